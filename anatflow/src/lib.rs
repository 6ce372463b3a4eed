//! # Anatflow
//!
//! A derivative-aware assembler for anatomical preprocessing task graphs.
//!
//! Given a manifest of already-computed artifacts, a set of raw inputs,
//! and a declarative set of requested outputs (standard-space templates,
//! surface representations, grayordinate densities), anatflow constructs
//! the minimal correct DAG of external tool invocations:
//!
//! - **Cache-aware**: stages whose output contract is already met by the
//!   derivatives store contribute no nodes; their ports bind straight to
//!   the cached paths.
//! - **Typed ports**: every wire is checked at graph-construction time; a
//!   missing or kind-mismatched connection is a build error, never a
//!   runtime failure deep in execution.
//! - **Per-template replication**: the registration sub-graph is cloned
//!   once per requested standard space, and the join collector preserves
//!   request order across cached and fresh branches.
//!
//! The graph is handed to an external execution engine; this crate never
//! launches a process.
//!
//! ## Quick Start
//!
//! ```rust
//! use anatflow::prelude::*;
//!
//! let config = AssemblyConfig::new("01")
//!     .with_t1w("sub-01_T1w.nii.gz")
//!     .with_template_spec("MNI152NLin2009cAsym:res-2")?
//!     .with_reconall();
//!
//! let manifest = ArtifactManifest::new();
//! let assembly = PipelineAssembler::new(config).assemble(&manifest)?;
//!
//! assert!(assembly.graph.node_count() > 0);
//! # Ok::<(), anatflow::errors::AssemblyError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod assembler;
pub mod builder;
pub mod catalog;
pub mod config;
pub mod derivatives;
pub mod errors;
pub mod graph;
pub mod manifest;
pub mod resolver;
pub mod surfaces;
pub mod template;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::assembler::{Assembly, PipelineAssembler};
    pub use crate::builder::{GraphBuilder, SkippedStage};
    pub use crate::catalog::{
        InputPort, OutputPort, PortKind, StageCatalog, StageDescriptor, StageId,
    };
    pub use crate::config::{AssemblyConfig, CiftiDensity};
    pub use crate::derivatives::{BidsEntities, DerivativeSpec};
    pub use crate::errors::{
        AssemblyError, ConfigurationError, CycleDetectedError, PortReboundError,
        StructuralBuildError, TemplateSpecError, UnboundPortError,
    };
    pub use crate::graph::{
        BufferId, Edge, InvocationDescriptor, NodeId, PortBinding, PortBuffer, StageNode,
        TaskGraph,
    };
    pub use crate::manifest::{
        ArtifactManifest, BilateralPair, DerivativesScanner, Hemisphere, TransformPair,
    };
    pub use crate::resolver::{CacheResolver, ResolvedAvailability, StageAvailability};
    pub use crate::surfaces::{MetricKind, SurfaceKind};
    pub use crate::template::{JoinedTemplates, TemplateRequest};
    pub use crate::utils::{generate_run_id, init_subscriber, iso_timestamp};
}
