//! The pipeline assembler.
//!
//! Root orchestration: validate inputs, resolve the cache, build the
//! volumetric stages, replicate the registration sub-graph per template,
//! assemble the surface sub-graph, and hand back the finished graph plus
//! a report of everything that was skipped. Assembly is a pure function
//! of its explicit inputs; it launches nothing and retains no ownership
//! of the graph afterwards.


use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::builder::{GraphBuilder, SkippedStage};
use crate::catalog::StageCatalog;
use crate::config::AssemblyConfig;
use crate::derivatives::{derive_derivatives, DerivativeSpec};
use crate::errors::{AssemblyError, ConfigurationError};
use crate::graph::TaskGraph;
use crate::manifest::{keys, ArtifactManifest};
use crate::resolver::CacheResolver;
use crate::surfaces::build_surface_stages;
use crate::template::{replicate_templates, JoinedTemplates};
use crate::utils::{generate_run_id, iso_timestamp};

/// The completed product of one assembly run.
#[derive(Debug, Clone, Serialize)]
pub struct Assembly {
    /// Unique id of this assembly run.
    pub run_id: Uuid,
    /// RFC3339 creation timestamp.
    pub created_at: String,
    /// The subject this graph was assembled for.
    pub subject: String,
    /// The task graph, ready for an external execution engine.
    pub graph: TaskGraph,
    /// Stages that contributed no nodes, with the paths satisfying them.
    pub skipped: Vec<SkippedStage>,
    /// Order-aligned per-template registration outputs.
    pub joined: JoinedTemplates,
    /// Writer entities for every requested output.
    pub derivatives: Vec<DerivativeSpec>,
}

impl Assembly {
    /// The labels of all skipped stages.
    #[must_use]
    pub fn skipped_labels(&self) -> Vec<&str> {
        self.skipped.iter().map(|s| s.label.as_str()).collect()
    }

    /// Serializes the assembly to JSON for hand-off.
    ///
    /// # Errors
    ///
    /// Returns an error when serialization fails.
    pub fn to_json(&self) -> Result<String, AssemblyError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Assembles task graphs for one resolved configuration.
#[derive(Debug, Clone)]
pub struct PipelineAssembler {
    config: AssemblyConfig,
}

impl PipelineAssembler {
    /// Creates an assembler for one subject's configuration.
    #[must_use]
    pub fn new(config: AssemblyConfig) -> Self {
        Self { config }
    }

    /// The configuration this assembler was created with.
    #[must_use]
    pub fn config(&self) -> &AssemblyConfig {
        &self.config
    }

    /// Assembles the task graph for one subject.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the requested outputs cannot
    /// be produced from the available inputs, or a structural error when
    /// the graph cannot be wired soundly. No partial graph is ever
    /// returned.
    #[tracing::instrument(skip_all, fields(subject = %self.config.subject))]
    pub fn assemble(&self, manifest: &ArtifactManifest) -> Result<Assembly, AssemblyError> {
        self.validate_inputs(manifest)?;

        let catalog = StageCatalog::standard();
        let availability = CacheResolver::resolve(manifest, &self.config);

        let mut builder = GraphBuilder::new(&catalog, &availability, &self.config, manifest);
        builder.build_volume_stages()?;
        let joined = replicate_templates(&mut builder)?;
        build_surface_stages(&mut builder)?;

        let derivatives = derive_derivatives(&builder, &joined);
        let (graph, skipped) = builder.finish()?;

        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            skipped = skipped.len(),
            templates = joined.len(),
            "assembled task graph"
        );

        Ok(Assembly {
            run_id: generate_run_id(),
            created_at: iso_timestamp(),
            subject: self.config.subject.clone(),
            graph,
            skipped,
            joined,
            derivatives,
        })
    }

    fn validate_inputs(&self, manifest: &ArtifactManifest) -> Result<(), AssemblyError> {
        self.config.validate()?;

        if self.config.t1w.is_empty() && manifest.single(keys::T1W_PREPROC).is_none() {
            return Err(ConfigurationError::new(
                "no usable T1w input: neither raw images nor a preprocessed reference",
            )
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_t1w_is_a_configuration_error() {
        let assembler = PipelineAssembler::new(AssemblyConfig::new("01"));
        let err = assembler.assemble(&ArtifactManifest::new()).unwrap_err();

        assert!(matches!(err, AssemblyError::Configuration(_)));
    }

    #[test]
    fn test_cached_reference_substitutes_for_raw_t1w() {
        let assembler = PipelineAssembler::new(AssemblyConfig::new("01"));
        let manifest = ArtifactManifest::new().with_single(keys::T1W_PREPROC, "t1w.nii.gz");

        assert!(assembler.assemble(&manifest).is_ok());
    }

    #[test]
    fn test_assembly_serializes() {
        let config = AssemblyConfig::new("01").with_t1w("t1.nii.gz");
        let assembly = PipelineAssembler::new(config)
            .assemble(&ArtifactManifest::new())
            .unwrap();

        let json = assembly.to_json().unwrap();
        assert!(json.contains("skull_strip"));
    }
}
