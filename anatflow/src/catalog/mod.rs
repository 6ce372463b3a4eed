//! The stage catalog: a static table of stage descriptors.
//!
//! The catalog fixes the topological order in which the graph builder
//! considers stages. That order is part of the contract: later stages'
//! needed-predicates may depend on whether earlier stages were skipped
//! (mask refinement, for example, is omitted entirely when a brain mask
//! was supplied externally).

mod ports;

pub use ports::{names, InputPort, OutputPort, PortKind};

use serde::{Deserialize, Serialize};

use crate::config::AssemblyConfig;
use crate::manifest::{keys, ArtifactManifest};

/// Identity of a processing stage.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    /// Average and conform the raw T1w images into one reference.
    TemplateAverage,
    /// Average and conform the raw T2w images.
    T2wAverage,
    /// Skull-strip the T1w reference.
    SkullStrip,
    /// Tissue segmentation (discrete labels plus probability maps).
    Segmentation,
    /// Spatial normalization to one standard space.
    TemplateRegistration,
    /// Collect per-template registration outputs into ordered lists.
    TemplateJoin,
    /// FreeSurfer surface reconstruction.
    SurfaceRecon,
    /// Refine the brain mask against the reconstructed surfaces.
    MaskRefinement,
    /// Convert one FreeSurfer surface to GIFTI.
    GiftiConversion,
    /// Convert one FreeSurfer morphometry metric to GIFTI.
    MetricConversion,
    /// Build the cortical ribbon mask volume.
    RibbonMask,
    /// Extract the cortex label masks.
    CortexMask,
    /// Register spheres to the fsLR mesh.
    FsLrRegistration,
    /// Sulcal-depth-driven MSM refinement of one hemisphere's sphere.
    MsmRefinement,
    /// Resample surfaces and metrics onto grayordinates.
    GrayordinateResampling,
}

impl StageId {
    /// The stable string form used in labels and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TemplateAverage => "template_average",
            Self::T2wAverage => "t2w_average",
            Self::SkullStrip => "skull_strip",
            Self::Segmentation => "segmentation",
            Self::TemplateRegistration => "template_registration",
            Self::TemplateJoin => "template_join",
            Self::SurfaceRecon => "surface_recon",
            Self::MaskRefinement => "mask_refinement",
            Self::GiftiConversion => "gifti_conversion",
            Self::MetricConversion => "metric_conversion",
            Self::RibbonMask => "anat_ribbon",
            Self::CortexMask => "cortex_mask",
            Self::FsLrRegistration => "fslr_registration",
            Self::MsmRefinement => "msm_sulc",
            Self::GrayordinateResampling => "grayordinates",
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Predicate deciding whether a stage belongs in this subject's graph at
/// all, independent of caching.
pub type NeededPredicate = fn(&AssemblyConfig, &ArtifactManifest) -> bool;

/// An immutable description of one stage: identity, port contract, and
/// inclusion predicate. Stages never mutate global state; all
/// communication is through ports.
#[derive(Clone)]
pub struct StageDescriptor {
    /// The stage identity.
    pub id: StageId,
    /// Ordered input ports.
    pub inputs: &'static [InputPort],
    /// Ordered output ports.
    pub outputs: &'static [OutputPort],
    /// Whether this stage is needed for the given run.
    pub needed: NeededPredicate,
}

impl std::fmt::Debug for StageDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageDescriptor")
            .field("id", &self.id)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

impl StageDescriptor {
    /// Looks up an input port by name.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&InputPort> {
        self.inputs.iter().find(|p| p.name == name)
    }

    /// Looks up an output port by name.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&OutputPort> {
        self.outputs.iter().find(|p| p.name == name)
    }
}

const TEMPLATE_AVERAGE_OUTPUTS: [OutputPort; 1] =
    [OutputPort::new(keys::T1W_PREPROC, PortKind::Volume)];

const T2W_AVERAGE_OUTPUTS: [OutputPort; 1] =
    [OutputPort::new(keys::T2W_PREPROC, PortKind::Volume)];

const SKULL_STRIP_INPUTS: [InputPort; 1] =
    [InputPort::required(keys::T1W_PREPROC, PortKind::Volume)];
const SKULL_STRIP_OUTPUTS: [OutputPort; 1] = [OutputPort::new(keys::T1W_MASK, PortKind::Mask)];

const SEGMENTATION_INPUTS: [InputPort; 2] = [
    InputPort::required(keys::T1W_PREPROC, PortKind::Volume),
    InputPort::required(keys::T1W_MASK, PortKind::Mask),
];
const SEGMENTATION_OUTPUTS: [OutputPort; 2] = [
    OutputPort::new(keys::T1W_DSEG, PortKind::Segmentation),
    OutputPort::new(keys::T1W_TPMS, PortKind::TissueProbabilities),
];

const REGISTRATION_INPUTS: [InputPort; 2] = [
    InputPort::required(keys::T1W_PREPROC, PortKind::Volume),
    InputPort::required(keys::T1W_MASK, PortKind::Mask),
];
const REGISTRATION_OUTPUTS: [OutputPort; 3] = [
    OutputPort::new(names::ANAT2STD_XFM, PortKind::Transform),
    OutputPort::new(names::STD2ANAT_XFM, PortKind::Transform),
    OutputPort::new(names::STD_PREPROC, PortKind::Volume),
];

const SURFACE_RECON_INPUTS: [InputPort; 2] = [
    InputPort::required(keys::T1W_PREPROC, PortKind::Volume),
    InputPort::optional(keys::T2W_PREPROC, PortKind::Volume),
];
const SURFACE_RECON_OUTPUTS: [OutputPort; 2] = [
    OutputPort::new(names::FS_SUBJECTS_DIR, PortKind::SubjectsDir),
    OutputPort::new(names::FSNATIVE2T1W_XFM, PortKind::Transform),
];

const MASK_REFINEMENT_INPUTS: [InputPort; 3] = [
    InputPort::required(keys::T1W_MASK, PortKind::Mask),
    InputPort::required(names::FS_SUBJECTS_DIR, PortKind::SubjectsDir),
    InputPort::required(names::FSNATIVE2T1W_XFM, PortKind::Transform),
];
const MASK_REFINEMENT_OUTPUTS: [OutputPort; 1] =
    [OutputPort::new(names::T1W_MASK_REFINED, PortKind::Mask)];

const GIFTI_CONVERSION_INPUTS: [InputPort; 2] = [
    InputPort::required(names::FS_SUBJECTS_DIR, PortKind::SubjectsDir),
    InputPort::required(names::FSNATIVE2T1W_XFM, PortKind::Transform),
];
const GIFTI_CONVERSION_OUTPUTS: [OutputPort; 1] =
    [OutputPort::new(names::SURFACE, PortKind::Surface)];

const METRIC_CONVERSION_INPUTS: [InputPort; 1] =
    [InputPort::required(names::FS_SUBJECTS_DIR, PortKind::SubjectsDir)];
const METRIC_CONVERSION_OUTPUTS: [OutputPort; 1] =
    [OutputPort::new(names::METRIC, PortKind::Metric)];

const RIBBON_INPUTS: [InputPort; 3] = [
    InputPort::required(keys::WHITE, PortKind::Surface),
    InputPort::required(keys::PIAL, PortKind::Surface),
    InputPort::required(keys::T1W_PREPROC, PortKind::Volume),
];
const RIBBON_OUTPUTS: [OutputPort; 1] = [OutputPort::new(keys::ANAT_RIBBON, PortKind::Mask)];

const CORTEX_MASK_INPUTS: [InputPort; 1] =
    [InputPort::required(names::FS_SUBJECTS_DIR, PortKind::SubjectsDir)];
const CORTEX_MASK_OUTPUTS: [OutputPort; 1] =
    [OutputPort::new(keys::CORTEX_MASK, PortKind::Metric)];

const FSLR_INPUTS: [InputPort; 1] = [InputPort::required(keys::SPHERE_REG, PortKind::Surface)];
const FSLR_OUTPUTS: [OutputPort; 1] =
    [OutputPort::new(keys::SPHERE_REG_FSLR, PortKind::Surface)];

const MSM_INPUTS: [InputPort; 2] = [
    InputPort::required(keys::SPHERE_REG_FSLR, PortKind::Surface),
    InputPort::required(keys::SULC, PortKind::Metric),
];
const MSM_OUTPUTS: [OutputPort; 1] =
    [OutputPort::new(keys::SPHERE_REG_MSM, PortKind::Surface)];

const GRAYORDINATE_INPUTS: [InputPort; 6] = [
    InputPort::required(keys::MIDTHICKNESS, PortKind::Surface),
    InputPort::required(names::SPHERE_LEFT, PortKind::Surface),
    InputPort::required(names::SPHERE_RIGHT, PortKind::Surface),
    InputPort::required(keys::THICKNESS, PortKind::Metric),
    InputPort::required(keys::CURV, PortKind::Metric),
    InputPort::required(keys::SULC, PortKind::Metric),
];
const GRAYORDINATE_OUTPUTS: [OutputPort; 1] =
    [OutputPort::new(names::CIFTI_MORPH, PortKind::Cifti)];

fn always(_: &AssemblyConfig, _: &ArtifactManifest) -> bool {
    true
}

fn t2w_available(config: &AssemblyConfig, manifest: &ArtifactManifest) -> bool {
    !config.t2w.is_empty() || manifest.single(keys::T2W_PREPROC).is_some()
}

fn templates_requested(config: &AssemblyConfig, _: &ArtifactManifest) -> bool {
    !config.templates.is_empty()
}

fn reconall_enabled(config: &AssemblyConfig, _: &ArtifactManifest) -> bool {
    config.run_reconall
}

fn mask_refinement_needed(config: &AssemblyConfig, manifest: &ArtifactManifest) -> bool {
    // An externally supplied mask is authoritative and is never refined.
    config.run_reconall && manifest.single(keys::T1W_MASK).is_none()
}

fn msm_enabled(config: &AssemblyConfig, _: &ArtifactManifest) -> bool {
    config.run_reconall && config.msm_sulc
}

fn cifti_requested(config: &AssemblyConfig, _: &ArtifactManifest) -> bool {
    config.cifti.is_some()
}

/// The static stage table, in build order.
#[derive(Debug, Clone)]
pub struct StageCatalog {
    stages: Vec<StageDescriptor>,
}

impl StageCatalog {
    /// The standard anatomical catalog.
    #[must_use]
    pub fn standard() -> Self {
        let stages = vec![
            StageDescriptor {
                id: StageId::TemplateAverage,
                inputs: &[],
                outputs: &TEMPLATE_AVERAGE_OUTPUTS,
                needed: always,
            },
            StageDescriptor {
                id: StageId::T2wAverage,
                inputs: &[],
                outputs: &T2W_AVERAGE_OUTPUTS,
                needed: t2w_available,
            },
            StageDescriptor {
                id: StageId::SkullStrip,
                inputs: &SKULL_STRIP_INPUTS,
                outputs: &SKULL_STRIP_OUTPUTS,
                needed: always,
            },
            StageDescriptor {
                id: StageId::Segmentation,
                inputs: &SEGMENTATION_INPUTS,
                outputs: &SEGMENTATION_OUTPUTS,
                needed: always,
            },
            StageDescriptor {
                id: StageId::TemplateRegistration,
                inputs: &REGISTRATION_INPUTS,
                outputs: &REGISTRATION_OUTPUTS,
                needed: templates_requested,
            },
            StageDescriptor {
                id: StageId::SurfaceRecon,
                inputs: &SURFACE_RECON_INPUTS,
                outputs: &SURFACE_RECON_OUTPUTS,
                needed: reconall_enabled,
            },
            StageDescriptor {
                id: StageId::MaskRefinement,
                inputs: &MASK_REFINEMENT_INPUTS,
                outputs: &MASK_REFINEMENT_OUTPUTS,
                needed: mask_refinement_needed,
            },
            StageDescriptor {
                id: StageId::GiftiConversion,
                inputs: &GIFTI_CONVERSION_INPUTS,
                outputs: &GIFTI_CONVERSION_OUTPUTS,
                needed: reconall_enabled,
            },
            StageDescriptor {
                id: StageId::MetricConversion,
                inputs: &METRIC_CONVERSION_INPUTS,
                outputs: &METRIC_CONVERSION_OUTPUTS,
                needed: reconall_enabled,
            },
            StageDescriptor {
                id: StageId::RibbonMask,
                inputs: &RIBBON_INPUTS,
                outputs: &RIBBON_OUTPUTS,
                needed: reconall_enabled,
            },
            StageDescriptor {
                id: StageId::CortexMask,
                inputs: &CORTEX_MASK_INPUTS,
                outputs: &CORTEX_MASK_OUTPUTS,
                needed: reconall_enabled,
            },
            StageDescriptor {
                id: StageId::FsLrRegistration,
                inputs: &FSLR_INPUTS,
                outputs: &FSLR_OUTPUTS,
                needed: reconall_enabled,
            },
            StageDescriptor {
                id: StageId::MsmRefinement,
                inputs: &MSM_INPUTS,
                outputs: &MSM_OUTPUTS,
                needed: msm_enabled,
            },
            StageDescriptor {
                id: StageId::GrayordinateResampling,
                inputs: &GRAYORDINATE_INPUTS,
                outputs: &GRAYORDINATE_OUTPUTS,
                needed: cifti_requested,
            },
        ];

        Self { stages }
    }

    /// Iterates descriptors in build order.
    pub fn iter(&self) -> impl Iterator<Item = &StageDescriptor> {
        self.stages.iter()
    }

    /// Looks up a descriptor by stage id.
    #[must_use]
    pub fn get(&self, id: StageId) -> Option<&StageDescriptor> {
        self.stages.iter().find(|s| s.id == id)
    }

    /// Returns the number of stages in the catalog.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true when the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_order_is_fixed() {
        let catalog = StageCatalog::standard();
        let ids: Vec<StageId> = catalog.iter().map(|s| s.id).collect();

        let avg = ids.iter().position(|&id| id == StageId::TemplateAverage);
        let strip = ids.iter().position(|&id| id == StageId::SkullStrip);
        let seg = ids.iter().position(|&id| id == StageId::Segmentation);
        let recon = ids.iter().position(|&id| id == StageId::SurfaceRecon);
        let cifti = ids
            .iter()
            .position(|&id| id == StageId::GrayordinateResampling);

        assert!(avg < strip);
        assert!(strip < seg);
        assert!(seg < recon);
        assert!(recon < cifti);
    }

    #[test]
    fn test_mask_refinement_gated_by_external_mask() {
        let catalog = StageCatalog::standard();
        let descriptor = catalog.get(StageId::MaskRefinement).unwrap();

        let config = AssemblyConfig::new("01").with_reconall();
        let empty = ArtifactManifest::new();
        assert!((descriptor.needed)(&config, &empty));

        let with_mask = ArtifactManifest::new().with_single(keys::T1W_MASK, "mask.nii.gz");
        assert!(!(descriptor.needed)(&config, &with_mask));
    }

    #[test]
    fn test_surface_stages_gated_by_reconall() {
        let catalog = StageCatalog::standard();
        let config = AssemblyConfig::new("01");
        let manifest = ArtifactManifest::new();

        for id in [
            StageId::SurfaceRecon,
            StageId::GiftiConversion,
            StageId::RibbonMask,
            StageId::FsLrRegistration,
        ] {
            let descriptor = catalog.get(id).unwrap();
            assert!(!(descriptor.needed)(&config, &manifest), "{id}");
        }
    }

    #[test]
    fn test_port_lookup() {
        let catalog = StageCatalog::standard();
        let seg = catalog.get(StageId::Segmentation).unwrap();

        assert!(seg.input(keys::T1W_MASK).is_some());
        assert!(seg.output(keys::T1W_DSEG).is_some());
        assert!(seg.output("nonexistent").is_none());
    }

    #[test]
    fn test_stage_id_display() {
        assert_eq!(StageId::TemplateAverage.to_string(), "template_average");
        assert_eq!(StageId::MsmRefinement.to_string(), "msm_sulc");
    }
}
