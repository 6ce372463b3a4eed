//! Error types for pipeline assembly.
//!
//! The taxonomy separates structural build errors (raised while the graph is
//! being assembled) from configuration errors (raised before construction
//! begins). Partial cached artifacts are not errors at all; the resolver
//! silently downgrades them to recomputation.

use thiserror::Error;

use crate::catalog::StageId;

/// The main error type for assembly operations.
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// A structural build error occurred while wiring the graph.
    #[error("{0}")]
    Structural(#[from] StructuralBuildError),

    /// The resolved configuration is unusable.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// A cycle was detected in the assembled graph.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// A port buffer was read before it was bound.
    #[error("{0}")]
    UnboundPort(#[from] UnboundPortError),

    /// A port buffer was bound more than once.
    #[error("{0}")]
    PortRebound(#[from] PortReboundError),

    /// A template spec string could not be parsed.
    #[error("{0}")]
    TemplateSpec(#[from] TemplateSpecError),

    /// IO error while constructing the manifest.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for AssemblyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Error raised when the graph cannot be wired soundly.
///
/// Carries the offending stage and port so the caller can report exactly
/// which contract was violated, per the failure mode of the graph builder.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StructuralBuildError {
    /// The error message.
    pub message: String,
    /// The stage involved, if known.
    pub stage: Option<StageId>,
    /// The port involved, if known.
    pub port: Option<String>,
}

impl StructuralBuildError {
    /// Creates a new structural build error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stage: None,
            port: None,
        }
    }

    /// Sets the offending stage.
    #[must_use]
    pub fn with_stage(mut self, stage: StageId) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Sets the offending port.
    #[must_use]
    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }
}

/// Error raised before graph construction when the configuration or raw
/// inputs cannot produce a valid pipeline.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ConfigurationError {
    /// The error message.
    pub message: String,
}

impl ConfigurationError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error raised when the assembled graph contains a cycle.
#[derive(Debug, Clone)]
pub struct CycleDetectedError {
    /// The node labels forming the cycle, in order.
    pub cycle: Vec<String>,
}

impl CycleDetectedError {
    /// Creates a new cycle error from the offending path.
    #[must_use]
    pub fn new(cycle: Vec<String>) -> Self {
        Self { cycle }
    }
}

impl std::fmt::Display for CycleDetectedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cycle detected in task graph: {}", self.cycle.join(" -> "))
    }
}

impl std::error::Error for CycleDetectedError {}

/// Error raised when a port buffer is read before being bound.
#[derive(Debug, Clone, Error)]
#[error("Port buffer '{buffer}' read before it was bound")]
pub struct UnboundPortError {
    /// The logical name of the buffer.
    pub buffer: String,
}

impl UnboundPortError {
    /// Creates a new unbound port error.
    #[must_use]
    pub fn new(buffer: impl Into<String>) -> Self {
        Self {
            buffer: buffer.into(),
        }
    }
}

/// Error raised when a port buffer is bound a second time.
#[derive(Debug, Clone, Error)]
#[error("Port buffer '{buffer}' is already bound")]
pub struct PortReboundError {
    /// The logical name of the buffer.
    pub buffer: String,
}

impl PortReboundError {
    /// Creates a new rebind error.
    #[must_use]
    pub fn new(buffer: impl Into<String>) -> Self {
        Self {
            buffer: buffer.into(),
        }
    }
}

/// Error raised when a template spec string cannot be parsed.
#[derive(Debug, Clone, Error)]
#[error("Invalid template spec '{spec}': {message}")]
pub struct TemplateSpecError {
    /// The offending spec string.
    pub spec: String,
    /// The reason parsing failed.
    pub message: String,
}

impl TemplateSpecError {
    /// Creates a new template spec error.
    #[must_use]
    pub fn new(spec: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            spec: spec.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_error_builders() {
        let err = StructuralBuildError::new("input port cannot be bound")
            .with_stage(StageId::Segmentation)
            .with_port("t1w_mask");

        assert_eq!(err.stage, Some(StageId::Segmentation));
        assert_eq!(err.port.as_deref(), Some("t1w_mask"));
        assert_eq!(err.to_string(), "input port cannot be bound");
    }

    #[test]
    fn test_cycle_error_display() {
        let err = CycleDetectedError::new(vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
        ]);
        assert_eq!(err.to_string(), "Cycle detected in task graph: a -> b -> a");
    }

    #[test]
    fn test_assembly_error_wraps_structural() {
        let err: AssemblyError = StructuralBuildError::new("boom").into();
        assert!(matches!(err, AssemblyError::Structural(_)));
    }

    #[test]
    fn test_unbound_port_display() {
        let err = UnboundPortError::new("t1w_preproc");
        assert!(err.to_string().contains("t1w_preproc"));
    }
}
