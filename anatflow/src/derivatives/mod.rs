//! The derivative-writer boundary.
//!
//! For every requested output the assembler supplies the BIDS-derivatives
//! entity set (subject, session, space, cohort, resolution, density,
//! hemisphere, description, suffix) plus the buffer holding the value.
//! The write itself is an external collaborator's job.

use serde::Serialize;

use crate::builder::GraphBuilder;
use crate::catalog::names;
use crate::config::AssemblyConfig;
use crate::graph::BufferId;
use crate::manifest::{keys, Hemisphere};
use crate::surfaces::{MetricKind, SurfaceKind};
use crate::template::JoinedTemplates;

/// BIDS path entities for one derivative file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BidsEntities {
    /// Subject label.
    pub subject: String,
    /// Session label.
    pub session: Option<String>,
    /// `from` entity of a transform.
    pub from_space: Option<String>,
    /// `to` entity of a transform.
    pub to_space: Option<String>,
    /// `mode` entity of a transform.
    pub mode: Option<String>,
    /// Standard space name.
    pub space: Option<String>,
    /// Cohort modifier.
    pub cohort: Option<String>,
    /// Resolution modifier.
    pub resolution: Option<String>,
    /// Grayordinate density.
    pub density: Option<String>,
    /// Hemisphere.
    pub hemi: Option<String>,
    /// Description entity.
    pub desc: Option<String>,
    /// File suffix, e.g. `T1w`, `mask`, `xfm`.
    pub suffix: String,
    /// File extension including the leading dot.
    pub extension: String,
}

impl BidsEntities {
    /// Creates entities for one subject and suffix.
    #[must_use]
    pub fn new(
        subject: impl Into<String>,
        suffix: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            suffix: suffix.into(),
            extension: extension.into(),
            ..Self::default()
        }
    }

    /// Sets the session entity.
    #[must_use]
    pub fn with_session(mut self, session: Option<String>) -> Self {
        self.session = session;
        self
    }

    /// Sets the space entity.
    #[must_use]
    pub fn with_space(mut self, space: impl Into<String>) -> Self {
        self.space = Some(space.into());
        self
    }

    /// Sets the cohort entity.
    #[must_use]
    pub fn with_cohort(mut self, cohort: impl Into<String>) -> Self {
        self.cohort = Some(cohort.into());
        self
    }

    /// Sets the resolution entity.
    #[must_use]
    pub fn with_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = Some(resolution.into());
        self
    }

    /// Sets the density entity.
    #[must_use]
    pub fn with_density(mut self, density: impl Into<String>) -> Self {
        self.density = Some(density.into());
        self
    }

    /// Sets the hemisphere entity.
    #[must_use]
    pub fn with_hemi(mut self, hemi: Hemisphere) -> Self {
        self.hemi = Some(hemi.bids().to_string());
        self
    }

    /// Sets the description entity.
    #[must_use]
    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    /// Sets the transform `from`/`to`/`mode` entities.
    #[must_use]
    pub fn with_transform(
        mut self,
        from_space: impl Into<String>,
        to_space: impl Into<String>,
    ) -> Self {
        self.from_space = Some(from_space.into());
        self.to_space = Some(to_space.into());
        self.mode = Some("image".to_string());
        self
    }

    /// Renders the BIDS filename.
    #[must_use]
    pub fn filename(&self) -> String {
        let mut parts = vec![format!("sub-{}", self.subject)];
        let entities = [
            ("ses", &self.session),
            ("from", &self.from_space),
            ("to", &self.to_space),
            ("mode", &self.mode),
            ("space", &self.space),
            ("cohort", &self.cohort),
            ("res", &self.resolution),
            ("den", &self.density),
            ("hemi", &self.hemi),
            ("desc", &self.desc),
        ];
        for (key, value) in entities {
            if let Some(value) = value {
                parts.push(format!("{key}-{value}"));
            }
        }
        format!("{}_{}{}", parts.join("_"), self.suffix, self.extension)
    }

    /// Renders the store-relative path of the derivative.
    #[must_use]
    pub fn relative_path(&self) -> std::path::PathBuf {
        let mut path = std::path::PathBuf::from(format!("sub-{}", self.subject));
        if let Some(ref session) = self.session {
            path.push(format!("ses-{session}"));
        }
        path.push("anat");
        path.push(self.filename());
        path
    }
}

/// One requested output: its writer entities and the buffer that holds
/// (or will hold) its value.
#[derive(Debug, Clone, Serialize)]
pub struct DerivativeSpec {
    /// The BIDS entities the writer needs.
    pub entities: BidsEntities,
    /// The graph buffer carrying the value, cached or produced.
    pub buffer: BufferId,
}

/// Derives writer entities for everything the configuration requested.
///
/// Buffers are looked up by logical name; an artifact that this run
/// neither produces nor carries from the manifest is simply absent from
/// the result.
#[must_use]
pub fn derive_derivatives(
    builder: &GraphBuilder<'_>,
    joined: &JoinedTemplates,
) -> Vec<DerivativeSpec> {
    let config = builder.config();
    let mut specs = Vec::new();

    let mut push = |entities: BidsEntities, buffer: Option<BufferId>| {
        if let Some(buffer) = buffer {
            specs.push(DerivativeSpec { entities, buffer });
        }
    };

    push(
        base(config, "T1w", ".nii.gz").with_desc("preproc"),
        builder.lookup(keys::T1W_PREPROC),
    );
    push(
        base(config, "mask", ".nii.gz").with_desc("brain"),
        builder
            .lookup(names::T1W_MASK_REFINED)
            .or_else(|| builder.lookup(keys::T1W_MASK)),
    );
    push(base(config, "dseg", ".nii.gz"), builder.lookup(keys::T1W_DSEG));
    push(base(config, "probseg", ".nii.gz"), builder.lookup(keys::T1W_TPMS));

    for (index, request) in joined.templates.iter().enumerate() {
        let tag = request.file_tag();

        push(
            base(config, "xfm", ".h5").with_transform("T1w", tag.clone()),
            joined.anat2std_xfm.get(index).copied(),
        );
        push(
            base(config, "xfm", ".h5").with_transform(tag, "T1w"),
            joined.std2anat_xfm.get(index).copied(),
        );

        let mut entities = base(config, "T1w", ".nii.gz")
            .with_space(request.name.clone())
            .with_desc("preproc");
        if let Some(ref cohort) = request.cohort {
            entities = entities.with_cohort(cohort.clone());
        }
        if let Some(ref resolution) = request.resolution {
            entities = entities.with_resolution(resolution.clone());
        }
        push(
            entities,
            builder.lookup(&format!("{}@{}", names::STD_PREPROC, request.space_key())),
        );
    }

    if config.run_reconall {
        for kind in SurfaceKind::CONVERTED {
            let (suffix, desc) = match kind {
                SurfaceKind::SphereReg => ("sphere", Some("reg")),
                _ => (kind.manifest_key(), None),
            };
            for hemi in Hemisphere::BOTH {
                let mut entities = base(config, suffix, ".surf.gii").with_hemi(hemi);
                if let Some(desc) = desc {
                    entities = entities.with_desc(desc);
                }
                push(entities, builder.lookup(kind.manifest_key()));
            }
        }
        for metric in MetricKind::ALL {
            for hemi in Hemisphere::BOTH {
                push(
                    base(config, metric.manifest_key(), ".shape.gii").with_hemi(hemi),
                    builder.lookup(metric.manifest_key()),
                );
            }
        }
        push(
            base(config, "mask", ".nii.gz").with_desc("ribbon"),
            builder.lookup(keys::ANAT_RIBBON),
        );
    }

    if let Some(density) = config.cifti {
        push(
            base(config, "morph", ".dscalar.nii")
                .with_space("fsLR")
                .with_density(density.to_string()),
            builder.lookup(names::CIFTI_MORPH),
        );
    }

    specs
}

fn base(config: &AssemblyConfig, suffix: &str, extension: &str) -> BidsEntities {
    BidsEntities::new(&config.subject, suffix, extension).with_session(config.session.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_entity_order() {
        let entities = BidsEntities::new("01", "T1w", ".nii.gz")
            .with_space("MNIInfant")
            .with_cohort("1")
            .with_resolution("2")
            .with_desc("preproc");

        assert_eq!(
            entities.filename(),
            "sub-01_space-MNIInfant_cohort-1_res-2_desc-preproc_T1w.nii.gz"
        );
    }

    #[test]
    fn test_transform_filename() {
        let entities =
            BidsEntities::new("01", "xfm", ".h5").with_transform("T1w", "MNI152NLin2009cAsym");

        assert_eq!(
            entities.filename(),
            "sub-01_from-T1w_to-MNI152NLin2009cAsym_mode-image_xfm.h5"
        );
    }

    #[test]
    fn test_relative_path_with_session() {
        let entities = BidsEntities::new("01", "T1w", ".nii.gz")
            .with_session(Some("pre".to_string()))
            .with_desc("preproc");

        assert_eq!(
            entities.relative_path(),
            std::path::PathBuf::from("sub-01/ses-pre/anat/sub-01_ses-pre_desc-preproc_T1w.nii.gz")
        );
    }
}
