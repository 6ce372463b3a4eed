//! Resolved assembly configuration.
//!
//! The assembler is invoked with this value type, never with raw argv;
//! command-line parsing lives with the caller. Template spec strings are
//! parsed into [`TemplateRequest`] values exactly once, when the
//! configuration is built.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{AssemblyError, ConfigurationError};
use crate::template::TemplateRequest;

/// Requested grayordinate density for CIFTI outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CiftiDensity {
    /// 91,282 grayordinates (2mm).
    #[serde(rename = "91k")]
    Den91k,
    /// 170,494 grayordinates (1.6mm).
    #[serde(rename = "170k")]
    Den170k,
}

impl fmt::Display for CiftiDensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Den91k => write!(f, "91k"),
            Self::Den170k => write!(f, "170k"),
        }
    }
}

/// Everything the assembler needs to know about one subject's run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyConfig {
    /// BIDS subject label, without the `sub-` prefix.
    pub subject: String,
    /// BIDS session label, if sessions are in use.
    #[serde(default)]
    pub session: Option<String>,
    /// Raw T1w input images.
    #[serde(default)]
    pub t1w: Vec<PathBuf>,
    /// Raw T2w input images.
    #[serde(default)]
    pub t2w: Vec<PathBuf>,
    /// Requested standard spaces, in request order.
    #[serde(default)]
    pub templates: Vec<TemplateRequest>,
    /// Whether surface reconstruction is enabled.
    #[serde(default)]
    pub run_reconall: bool,
    /// Whether MSM sulcal-depth-driven sphere refinement is enabled.
    #[serde(default)]
    pub msm_sulc: bool,
    /// Requested grayordinate density, when CIFTI outputs are wanted.
    #[serde(default)]
    pub cifti: Option<CiftiDensity>,
}

impl AssemblyConfig {
    /// Creates a configuration for one subject.
    #[must_use]
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            session: None,
            t1w: Vec::new(),
            t2w: Vec::new(),
            templates: Vec::new(),
            run_reconall: false,
            msm_sulc: false,
            cifti: None,
        }
    }

    /// Adds a raw T1w input.
    #[must_use]
    pub fn with_t1w(mut self, path: impl Into<PathBuf>) -> Self {
        self.t1w.push(path.into());
        self
    }

    /// Adds a raw T2w input.
    #[must_use]
    pub fn with_t2w(mut self, path: impl Into<PathBuf>) -> Self {
        self.t2w.push(path.into());
        self
    }

    /// Sets the session label.
    #[must_use]
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    /// Adds a standard-space request parsed from a spec string.
    ///
    /// # Errors
    ///
    /// Returns an error when the spec string is malformed.
    pub fn with_template_spec(mut self, spec: &str) -> Result<Self, AssemblyError> {
        self.templates.push(spec.parse()?);
        Ok(self)
    }

    /// Adds a standard-space request.
    #[must_use]
    pub fn with_template(mut self, request: TemplateRequest) -> Self {
        self.templates.push(request);
        self
    }

    /// Enables surface reconstruction.
    #[must_use]
    pub fn with_reconall(mut self) -> Self {
        self.run_reconall = true;
        self
    }

    /// Enables MSM sulcal-depth sphere refinement.
    #[must_use]
    pub fn with_msm_sulc(mut self) -> Self {
        self.msm_sulc = true;
        self
    }

    /// Requests CIFTI outputs at the given density.
    #[must_use]
    pub fn with_cifti(mut self, density: CiftiDensity) -> Self {
        self.cifti = Some(density);
        self
    }

    /// Validates internal consistency of the requested outputs.
    ///
    /// Input availability (raw images vs. cached reference) is checked
    /// against the manifest by the assembler, not here.
    ///
    /// # Errors
    ///
    /// Returns an error when the requested outputs contradict each other.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.subject.trim().is_empty() {
            return Err(ConfigurationError::new("subject label cannot be empty"));
        }

        if self.cifti.is_some() && !self.run_reconall {
            return Err(ConfigurationError::new(
                "CIFTI outputs require surface reconstruction to be enabled",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_chain() {
        let config = AssemblyConfig::new("01")
            .with_t1w("sub-01_T1w.nii.gz")
            .with_template_spec("MNI152NLin2009cAsym:res-2")
            .unwrap()
            .with_reconall()
            .with_cifti(CiftiDensity::Den91k);

        assert_eq!(config.subject, "01");
        assert_eq!(config.templates.len(), 1);
        assert!(config.run_reconall);
        config.validate().unwrap();
    }

    #[test]
    fn test_cifti_without_reconall_rejected() {
        let config = AssemblyConfig::new("01")
            .with_t1w("t1.nii.gz")
            .with_cifti(CiftiDensity::Den91k);

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_subject_rejected() {
        let config = AssemblyConfig::new("  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_from_json() {
        let config: AssemblyConfig = serde_json::from_str(
            r#"{
                "subject": "01",
                "t1w": ["sub-01_T1w.nii.gz"],
                "templates": [{"name": "MNI152NLin2009cAsym", "cohort": null, "resolution": "2"}],
                "run_reconall": true,
                "cifti": "91k"
            }"#,
        )
        .unwrap();

        assert_eq!(config.cifti, Some(CiftiDensity::Den91k));
        assert_eq!(config.templates[0].resolution.as_deref(), Some("2"));
    }
}
