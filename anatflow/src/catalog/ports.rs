//! Typed, named stage ports.
//!
//! Ports are validated when the graph is wired: connecting a producer of
//! one kind to a consumer of another is a build-time error, not a runtime
//! failure deep inside execution.

use serde::{Deserialize, Serialize};

/// Names of ports that exist only inside the graph (never as manifest
/// artifact keys).
pub mod names {
    /// FreeSurfer subjects directory produced by reconstruction.
    pub const FS_SUBJECTS_DIR: &str = "fs_subjects_dir";
    /// FreeSurfer-native to anatomical affine.
    pub const FSNATIVE2T1W_XFM: &str = "fsnative2t1w_xfm";
    /// Brain mask refined against the reconstructed surfaces.
    pub const T1W_MASK_REFINED: &str = "t1w_mask_refined";
    /// Anatomical-to-standard transform.
    pub const ANAT2STD_XFM: &str = "anat2std_xfm";
    /// Standard-to-anatomical transform.
    pub const STD2ANAT_XFM: &str = "std2anat_xfm";
    /// Preprocessed reference resampled into a standard space.
    pub const STD_PREPROC: &str = "std_preproc";
    /// Generic surface output of a conversion stage.
    pub const SURFACE: &str = "surface";
    /// Generic metric output of a conversion stage.
    pub const METRIC: &str = "metric";
    /// Left-hemisphere registration sphere consumed by resampling.
    pub const SPHERE_LEFT: &str = "sphere_left";
    /// Right-hemisphere registration sphere consumed by resampling.
    pub const SPHERE_RIGHT: &str = "sphere_right";
    /// Dense morphometry CIFTI output.
    pub const CIFTI_MORPH: &str = "cifti_morph";
}

/// The kind of value a port carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortKind {
    /// A scalar anatomical volume.
    Volume,
    /// A binary mask volume.
    Mask,
    /// A discrete segmentation volume.
    Segmentation,
    /// An ordered set of tissue probability maps.
    TissueProbabilities,
    /// A spatial transform.
    Transform,
    /// A FreeSurfer subjects directory.
    SubjectsDir,
    /// A GIFTI surface (single file or hemisphere pair).
    Surface,
    /// A GIFTI surface metric (single file or hemisphere pair).
    Metric,
    /// A CIFTI grayordinate file.
    Cifti,
}

impl std::fmt::Display for PortKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Volume => "volume",
            Self::Mask => "mask",
            Self::Segmentation => "segmentation",
            Self::TissueProbabilities => "tissue_probabilities",
            Self::Transform => "transform",
            Self::SubjectsDir => "subjects_dir",
            Self::Surface => "surface",
            Self::Metric => "metric",
            Self::Cifti => "cifti",
        };
        f.write_str(name)
    }
}

/// A named, typed input slot of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InputPort {
    /// The port name.
    pub name: &'static str,
    /// The kind of value the port consumes.
    pub kind: PortKind,
    /// Whether the stage tolerates this port being left unwired.
    pub optional: bool,
}

impl InputPort {
    /// A required input port.
    #[must_use]
    pub const fn required(name: &'static str, kind: PortKind) -> Self {
        Self {
            name,
            kind,
            optional: false,
        }
    }

    /// An optional input port.
    #[must_use]
    pub const fn optional(name: &'static str, kind: PortKind) -> Self {
        Self {
            name,
            kind,
            optional: true,
        }
    }
}

/// A named, typed output slot of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OutputPort {
    /// The port name.
    pub name: &'static str,
    /// The kind of value the port produces.
    pub kind: PortKind,
}

impl OutputPort {
    /// Creates an output port.
    #[must_use]
    pub const fn new(name: &'static str, kind: PortKind) -> Self {
        Self { name, kind }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_constructors() {
        let input = InputPort::required("t1w_preproc", PortKind::Volume);
        assert!(!input.optional);

        let opt = InputPort::optional("t2w_preproc", PortKind::Volume);
        assert!(opt.optional);

        let output = OutputPort::new("t1w_mask", PortKind::Mask);
        assert_eq!(output.kind, PortKind::Mask);
    }

    #[test]
    fn test_port_kind_display() {
        assert_eq!(PortKind::Volume.to_string(), "volume");
        assert_eq!(PortKind::TissueProbabilities.to_string(), "tissue_probabilities");
    }
}
