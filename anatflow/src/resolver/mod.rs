//! The cache resolver.
//!
//! A single pure pass over the manifest that classifies every stage as
//! `Satisfied`, `Partial`, or `Missing`. Downstream logic switches on this
//! one tagged value instead of threading independent booleans around.
//!
//! `Partial` is never an error: a partially satisfied stage cannot be
//! soundly skipped (a dseg without matching tpms, a lone hemisphere of a
//! surface pair), so the builder treats it exactly like `Missing` and
//! recomputes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::StageId;
use crate::config::AssemblyConfig;
use crate::manifest::{keys, ArtifactManifest, BilateralPair, Hemisphere};
use crate::surfaces::{MetricKind, SurfaceKind};
use crate::template::TemplateRequest;

/// Whether a cached artifact set satisfies a stage's output contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageAvailability {
    /// The contract is fully met; the stage contributes no node.
    Satisfied,
    /// Some outputs exist, but not a contract-satisfying set; the stage
    /// must run as if nothing existed.
    Partial,
    /// Nothing relevant is cached; the stage must run.
    Missing,
}

impl StageAvailability {
    /// Returns true when the stage can be skipped.
    #[must_use]
    pub const fn is_satisfied(self) -> bool {
        matches!(self, Self::Satisfied)
    }

    /// Returns true when a node must be instantiated.
    #[must_use]
    pub const fn requires_run(self) -> bool {
        !self.is_satisfied()
    }
}

impl std::fmt::Display for StageAvailability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Satisfied => "satisfied",
            Self::Partial => "partial",
            Self::Missing => "missing",
        };
        f.write_str(name)
    }
}

fn bilateral_availability(pair: Option<&BilateralPair>) -> StageAvailability {
    match pair {
        Some(pair) if pair.complete().is_some() => StageAvailability::Satisfied,
        Some(pair) if pair.is_partial() => StageAvailability::Partial,
        _ => StageAvailability::Missing,
    }
}

fn aggregate<'a>(
    mut parts: impl Iterator<Item = &'a StageAvailability>,
) -> StageAvailability {
    let Some(first) = parts.next() else {
        return StageAvailability::Missing;
    };
    let mut any_satisfied = first.is_satisfied();
    let mut all_satisfied = first.is_satisfied();
    let mut any_partial = matches!(first, StageAvailability::Partial);
    for part in parts {
        any_satisfied |= part.is_satisfied();
        all_satisfied &= part.is_satisfied();
        any_partial |= matches!(part, StageAvailability::Partial);
    }
    if all_satisfied {
        StageAvailability::Satisfied
    } else if any_satisfied || any_partial {
        StageAvailability::Partial
    } else {
        StageAvailability::Missing
    }
}

/// Per-stage availability for one subject's manifest.
///
/// Template registration, surface conversion, metric conversion, and MSM
/// refinement are replicated stages; their per-instance states live in
/// the dedicated maps, while the [`StageId`]-keyed entry carries the
/// aggregate.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedAvailability {
    stages: BTreeMap<StageId, StageAvailability>,
    templates: Vec<(TemplateRequest, StageAvailability)>,
    surfaces: BTreeMap<SurfaceKind, StageAvailability>,
    metrics: BTreeMap<MetricKind, StageAvailability>,
    msm: BTreeMap<Hemisphere, StageAvailability>,
}

impl ResolvedAvailability {
    /// The availability of one stage (aggregate for replicated stages).
    #[must_use]
    pub fn stage(&self, id: StageId) -> StageAvailability {
        self.stages
            .get(&id)
            .copied()
            .unwrap_or(StageAvailability::Missing)
    }

    /// Per-template availability, in request order.
    #[must_use]
    pub fn templates(&self) -> &[(TemplateRequest, StageAvailability)] {
        &self.templates
    }

    /// The availability of one surface kind's bilateral artifact.
    #[must_use]
    pub fn surface(&self, kind: SurfaceKind) -> StageAvailability {
        self.surfaces
            .get(&kind)
            .copied()
            .unwrap_or(StageAvailability::Missing)
    }

    /// The availability of one metric kind's bilateral artifact.
    #[must_use]
    pub fn metric(&self, kind: MetricKind) -> StageAvailability {
        self.metrics
            .get(&kind)
            .copied()
            .unwrap_or(StageAvailability::Missing)
    }

    /// The availability of one hemisphere's MSM-refined sphere.
    #[must_use]
    pub fn msm(&self, hemi: Hemisphere) -> StageAvailability {
        self.msm
            .get(&hemi)
            .copied()
            .unwrap_or(StageAvailability::Missing)
    }

    /// The stage ids currently marked satisfied.
    pub fn satisfied_stages(&self) -> impl Iterator<Item = StageId> + '_ {
        self.stages
            .iter()
            .filter(|(_, a)| a.is_satisfied())
            .map(|(id, _)| *id)
    }
}

/// Pure classification of cached artifacts against stage contracts.
#[derive(Debug, Clone, Copy)]
pub struct CacheResolver;

impl CacheResolver {
    /// Resolves availability for every stage in the standard catalog.
    #[must_use]
    pub fn resolve(manifest: &ArtifactManifest, config: &AssemblyConfig) -> ResolvedAvailability {
        let mut stages = BTreeMap::new();

        for (id, key) in [
            (StageId::TemplateAverage, keys::T1W_PREPROC),
            (StageId::T2wAverage, keys::T2W_PREPROC),
            (StageId::SkullStrip, keys::T1W_MASK),
            (StageId::RibbonMask, keys::ANAT_RIBBON),
        ] {
            let availability = if manifest.single(key).is_some() {
                StageAvailability::Satisfied
            } else {
                StageAvailability::Missing
            };
            stages.insert(id, availability);
        }

        stages.insert(StageId::Segmentation, Self::segmentation(manifest));

        let templates: Vec<(TemplateRequest, StageAvailability)> = config
            .templates
            .iter()
            .map(|request| {
                let availability = if manifest.transform(&request.space_key()).is_some() {
                    StageAvailability::Satisfied
                } else {
                    StageAvailability::Missing
                };
                (request.clone(), availability)
            })
            .collect();
        stages.insert(
            StageId::TemplateRegistration,
            aggregate(templates.iter().map(|(_, a)| a)),
        );

        let surfaces: BTreeMap<SurfaceKind, StageAvailability> = SurfaceKind::CONVERTED
            .iter()
            .chain(std::iter::once(&SurfaceKind::SphereRegFsLr))
            .map(|&kind| {
                (
                    kind,
                    bilateral_availability(manifest.bilateral(kind.manifest_key())),
                )
            })
            .collect();

        let metrics: BTreeMap<MetricKind, StageAvailability> = MetricKind::ALL
            .iter()
            .map(|&kind| {
                (
                    kind,
                    bilateral_availability(manifest.bilateral(kind.manifest_key())),
                )
            })
            .collect();

        // MSM state is per hemisphere: one cached hemisphere never forces
        // the other to recompute.
        let msm_pair = manifest.bilateral(keys::SPHERE_REG_MSM);
        let msm: BTreeMap<Hemisphere, StageAvailability> = Hemisphere::BOTH
            .iter()
            .map(|&hemi| {
                let availability = match msm_pair.and_then(|p| p.get(hemi)) {
                    Some(_) => StageAvailability::Satisfied,
                    None => StageAvailability::Missing,
                };
                (hemi, availability)
            })
            .collect();

        let gifti = aggregate(
            SurfaceKind::CONVERTED
                .iter()
                .filter_map(|kind| surfaces.get(kind)),
        );
        let metric = aggregate(metrics.values());
        let cortex = bilateral_availability(manifest.bilateral(keys::CORTEX_MASK));
        let fslr = surfaces
            .get(&SurfaceKind::SphereRegFsLr)
            .copied()
            .unwrap_or(StageAvailability::Missing);

        stages.insert(StageId::GiftiConversion, gifti);
        stages.insert(StageId::MetricConversion, metric);
        stages.insert(StageId::CortexMask, cortex);
        stages.insert(StageId::FsLrRegistration, fslr);
        stages.insert(StageId::MsmRefinement, aggregate(msm.values()));

        // Reconstruction can be skipped only when no consumer of the
        // subjects directory still has work to do.
        let refinement_needed = manifest.single(keys::T1W_MASK).is_none();
        let recon = if !refinement_needed
            && gifti.is_satisfied()
            && metric.is_satisfied()
            && cortex.is_satisfied()
        {
            StageAvailability::Satisfied
        } else {
            StageAvailability::Missing
        };
        stages.insert(StageId::SurfaceRecon, recon);

        // Never present in a manifest; these products are terminal or
        // internal to a single run.
        stages.insert(StageId::MaskRefinement, StageAvailability::Missing);
        stages.insert(
            StageId::GrayordinateResampling,
            StageAvailability::Missing,
        );

        let resolved = ResolvedAvailability {
            stages,
            templates,
            surfaces,
            metrics,
            msm,
        };
        debug!(
            satisfied = resolved.satisfied_stages().count(),
            "resolved stage availability"
        );
        resolved
    }

    fn segmentation(manifest: &ArtifactManifest) -> StageAvailability {
        let has_dseg = manifest.single(keys::T1W_DSEG).is_some();
        let has_tpms = manifest.tissue_maps().is_some();

        if has_dseg && has_tpms {
            StageAvailability::Satisfied
        } else if has_dseg || has_tpms || manifest.has_partial_tissue_maps() {
            StageAvailability::Partial
        } else {
            StageAvailability::Missing
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn volumetric_manifest() -> ArtifactManifest {
        ArtifactManifest::new()
            .with_single(keys::T1W_PREPROC, "t1w.nii.gz")
            .with_single(keys::T1W_MASK, "mask.nii.gz")
            .with_single(keys::T1W_DSEG, "dseg.nii.gz")
            .with_tissue_maps(vec![
                PathBuf::from("gm.nii.gz"),
                PathBuf::from("wm.nii.gz"),
                PathBuf::from("csf.nii.gz"),
            ])
    }

    #[test]
    fn test_empty_manifest_all_missing() {
        let manifest = ArtifactManifest::new();
        let config = AssemblyConfig::new("01").with_t1w("t1.nii.gz");
        let resolved = CacheResolver::resolve(&manifest, &config);

        assert_eq!(
            resolved.stage(StageId::TemplateAverage),
            StageAvailability::Missing
        );
        assert_eq!(resolved.stage(StageId::SkullStrip), StageAvailability::Missing);
        assert_eq!(
            resolved.stage(StageId::Segmentation),
            StageAvailability::Missing
        );
    }

    #[test]
    fn test_volumetric_manifest_satisfies_early_stages() {
        let config = AssemblyConfig::new("01");
        let resolved = CacheResolver::resolve(&volumetric_manifest(), &config);

        assert!(resolved.stage(StageId::TemplateAverage).is_satisfied());
        assert!(resolved.stage(StageId::SkullStrip).is_satisfied());
        assert!(resolved.stage(StageId::Segmentation).is_satisfied());
    }

    #[test]
    fn test_dseg_without_tpms_is_partial() {
        let manifest = ArtifactManifest::new().with_single(keys::T1W_DSEG, "dseg.nii.gz");
        let config = AssemblyConfig::new("01");
        let resolved = CacheResolver::resolve(&manifest, &config);

        let availability = resolved.stage(StageId::Segmentation);
        assert_eq!(availability, StageAvailability::Partial);
        assert!(availability.requires_run());
    }

    #[test]
    fn test_partial_bilateral_behaves_like_missing() {
        let mut manifest = ArtifactManifest::new();
        manifest.insert_hemisphere(keys::WHITE, Hemisphere::Left, "lh.white.gii");
        let config = AssemblyConfig::new("01").with_reconall();
        let resolved = CacheResolver::resolve(&manifest, &config);

        assert!(resolved.surface(SurfaceKind::White).requires_run());
        assert!(resolved.surface(SurfaceKind::Pial).requires_run());
    }

    #[test]
    fn test_per_template_resolution() {
        let manifest =
            ArtifactManifest::new().with_transforms("MNI152NLin2009cAsym", "fwd.h5", "rev.h5");
        let config = AssemblyConfig::new("01")
            .with_template(TemplateRequest::new("MNI152NLin2009cAsym"))
            .with_template(TemplateRequest::new("MNI152NLin6Asym"));
        let resolved = CacheResolver::resolve(&manifest, &config);

        let templates = resolved.templates();
        assert_eq!(templates.len(), 2);
        assert!(templates[0].1.is_satisfied());
        assert!(templates[1].1.requires_run());
    }

    #[test]
    fn test_msm_resolved_per_hemisphere() {
        let mut manifest = ArtifactManifest::new();
        manifest.insert_hemisphere(
            keys::SPHERE_REG_MSM,
            Hemisphere::Left,
            "lh.sphere.reg.msm.gii",
        );
        let config = AssemblyConfig::new("01").with_reconall().with_msm_sulc();
        let resolved = CacheResolver::resolve(&manifest, &config);

        assert!(resolved.msm(Hemisphere::Left).is_satisfied());
        assert!(resolved.msm(Hemisphere::Right).requires_run());
    }

    #[test]
    fn test_recon_satisfied_only_when_nothing_downstream_needs_it() {
        let config = AssemblyConfig::new("01").with_reconall();

        let mut manifest = volumetric_manifest();
        for kind in SurfaceKind::CONVERTED {
            manifest.insert_bilateral(kind.manifest_key(), "lh.gii", "rh.gii");
        }
        for metric in MetricKind::ALL {
            manifest.insert_bilateral(metric.manifest_key(), "lh.gii", "rh.gii");
        }
        manifest.insert_bilateral(keys::CORTEX_MASK, "lh.gii", "rh.gii");

        let resolved = CacheResolver::resolve(&manifest, &config);
        assert!(resolved.stage(StageId::SurfaceRecon).is_satisfied());

        // Dropping one hemisphere of one surface forces reconstruction.
        let mut degraded = manifest.clone();
        let mut partial_pial = ArtifactManifest::new();
        partial_pial.insert_hemisphere(keys::PIAL, Hemisphere::Left, "lh.pial.gii");
        degraded.overlay(partial_pial);

        let resolved = CacheResolver::resolve(&degraded, &config);
        assert!(resolved.stage(StageId::SurfaceRecon).requires_run());
    }
}
