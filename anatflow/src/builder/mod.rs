//! The graph builder.
//!
//! Processes stages in the catalog's fixed topological order, regardless
//! of availability: a `Satisfied` stage contributes manifest-bound
//! buffers and no node; a `Missing` (or `Partial`) stage contributes a
//! node whose inputs are wired to whatever upstream bound first, cached
//! or fresh. An input port that can be bound neither way is a fatal
//! structural error carrying the stage id and port name.

mod invocations;

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Serialize;
use tracing::debug;

use crate::catalog::{StageCatalog, StageDescriptor, StageId};
use crate::config::AssemblyConfig;
use crate::errors::{AssemblyError, StructuralBuildError};
use crate::graph::{BufferId, InvocationDescriptor, NodeId, TaskGraph};
use crate::manifest::{keys, ArtifactManifest};
use crate::resolver::ResolvedAvailability;

/// One stage that contributed no node because the manifest satisfied it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedStage {
    /// The skipped stage instance label.
    pub label: String,
    /// The cached paths that satisfied its contract.
    pub satisfied_by: Vec<PathBuf>,
}

/// Incrementally builds a [`TaskGraph`] against a registry of named
/// buffers.
pub struct GraphBuilder<'a> {
    catalog: &'a StageCatalog,
    availability: &'a ResolvedAvailability,
    config: &'a AssemblyConfig,
    manifest: &'a ArtifactManifest,
    graph: TaskGraph,
    registry: HashMap<String, BufferId>,
    skipped: Vec<SkippedStage>,
}

impl<'a> GraphBuilder<'a> {
    /// Creates a builder over one subject's resolved inputs.
    #[must_use]
    pub fn new(
        catalog: &'a StageCatalog,
        availability: &'a ResolvedAvailability,
        config: &'a AssemblyConfig,
        manifest: &'a ArtifactManifest,
    ) -> Self {
        Self {
            catalog,
            availability,
            config,
            manifest,
            graph: TaskGraph::new(),
            registry: HashMap::new(),
            skipped: Vec::new(),
        }
    }

    /// The resolved availability driving this build.
    #[must_use]
    pub fn availability(&self) -> &'a ResolvedAvailability {
        self.availability
    }

    /// The run configuration driving this build.
    #[must_use]
    pub fn config(&self) -> &'a AssemblyConfig {
        self.config
    }

    /// The manifest driving this build.
    #[must_use]
    pub fn manifest(&self) -> &'a ArtifactManifest {
        self.manifest
    }

    /// Looks up a registered buffer by logical name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<BufferId> {
        self.registry.get(name).copied()
    }

    /// Registers a buffer under a logical name.
    pub fn register(&mut self, name: impl Into<String>, buffer: BufferId) {
        self.registry.insert(name.into(), buffer);
    }

    /// Creates and registers a manifest-bound buffer.
    ///
    /// # Errors
    ///
    /// Propagates buffer binding failures.
    pub fn bind_manifest(
        &mut self,
        name: &str,
        kind: crate::catalog::PortKind,
        paths: Vec<PathBuf>,
    ) -> Result<BufferId, AssemblyError> {
        let buffer = self
            .graph
            .add_manifest_buffer(name, kind, paths)?;
        self.register(name, buffer);
        Ok(buffer)
    }

    /// Records a stage skipped because its contract was already met.
    pub fn record_skipped(&mut self, label: impl Into<String>, satisfied_by: Vec<PathBuf>) {
        let label = label.into();
        debug!(stage = %label, "stage satisfied from manifest");
        self.skipped.push(SkippedStage {
            label,
            satisfied_by,
        });
    }

    /// Instantiates a node for a stage and wires its input ports.
    ///
    /// Inputs resolve through `overrides` first (for replicated instances
    /// whose buffers carry scoped names), then through the registry by
    /// port name. A missing optional port is skipped; a missing required
    /// port is a structural build error.
    ///
    /// # Errors
    ///
    /// Returns a structural error when a required input cannot be bound.
    pub fn instantiate(
        &mut self,
        stage: StageId,
        label: &str,
        invocation: InvocationDescriptor,
        overrides: &[(&str, BufferId)],
    ) -> Result<NodeId, AssemblyError> {
        let descriptor = self.descriptor(stage)?;
        let node = self.graph.add_node(stage, label, Some(invocation));

        for port in descriptor.inputs {
            let buffer = overrides
                .iter()
                .find(|(name, _)| *name == port.name)
                .map(|(_, buffer)| *buffer)
                .or_else(|| self.lookup(port.name));

            match buffer {
                Some(buffer) => self.graph.wire(buffer, node, port.name, port.kind)?,
                None if port.optional => {}
                None => {
                    return Err(StructuralBuildError::new(format!(
                        "no producer or manifest entry binds input port '{}' of stage '{label}'",
                        port.name
                    ))
                    .with_stage(stage)
                    .with_port(port.name)
                    .into());
                }
            }
        }

        debug!(stage = %label, "instantiated stage node");
        Ok(node)
    }

    /// Declares one output buffer of an instantiated node.
    ///
    /// The buffer is registered under `buffer_name`, which equals the
    /// port name for singleton stages and carries a scope suffix for
    /// replicated instances.
    ///
    /// # Errors
    ///
    /// Returns a structural error when the stage has no such output port.
    pub fn declare_output(
        &mut self,
        node: NodeId,
        stage: StageId,
        port_name: &str,
        buffer_name: &str,
    ) -> Result<BufferId, AssemblyError> {
        let descriptor = self.descriptor(stage)?;
        let port = descriptor.output(port_name).ok_or_else(|| {
            StructuralBuildError::new(format!(
                "stage '{stage}' declares no output port '{port_name}'"
            ))
            .with_stage(stage)
            .with_port(port_name)
        })?;
        let kind = port.kind;

        let buffer = self
            .graph
            .add_output_buffer(buffer_name, kind, node, port_name)?;
        self.register(buffer_name, buffer);
        Ok(buffer)
    }

    /// Direct access to the graph under construction, for collector
    /// nodes that fall outside the catalog's port contracts.
    pub fn graph_mut(&mut self) -> &mut TaskGraph {
        &mut self.graph
    }

    /// Builds the volumetric stages: template averaging, T2w averaging,
    /// skull-stripping, and tissue segmentation.
    ///
    /// # Errors
    ///
    /// Returns a structural error when wiring fails.
    pub fn build_volume_stages(&mut self) -> Result<(), AssemblyError> {
        for stage in [
            StageId::TemplateAverage,
            StageId::T2wAverage,
            StageId::SkullStrip,
            StageId::Segmentation,
        ] {
            let descriptor = self.descriptor(stage)?;
            if !(descriptor.needed)(self.config, self.manifest) {
                continue;
            }

            if self.availability.stage(stage).is_satisfied() {
                self.bind_satisfied_volume_stage(stage)?;
            } else {
                self.instantiate_volume_stage(stage)?;
            }
        }
        Ok(())
    }

    fn bind_satisfied_volume_stage(&mut self, stage: StageId) -> Result<(), AssemblyError> {
        use crate::catalog::PortKind;

        let mut satisfied_by = Vec::new();
        match stage {
            StageId::TemplateAverage => {
                let path = self.require_manifest_single(stage, keys::T1W_PREPROC)?;
                satisfied_by.push(path.clone());
                self.bind_manifest(keys::T1W_PREPROC, PortKind::Volume, vec![path])?;
            }
            StageId::T2wAverage => {
                let path = self.require_manifest_single(stage, keys::T2W_PREPROC)?;
                satisfied_by.push(path.clone());
                self.bind_manifest(keys::T2W_PREPROC, PortKind::Volume, vec![path])?;
            }
            StageId::SkullStrip => {
                let path = self.require_manifest_single(stage, keys::T1W_MASK)?;
                satisfied_by.push(path.clone());
                self.bind_manifest(keys::T1W_MASK, PortKind::Mask, vec![path])?;
            }
            StageId::Segmentation => {
                let dseg = self.require_manifest_single(stage, keys::T1W_DSEG)?;
                let tpms: Vec<PathBuf> = self
                    .manifest
                    .tissue_maps()
                    .ok_or_else(|| {
                        StructuralBuildError::new(
                            "segmentation marked satisfied without complete tissue maps",
                        )
                        .with_stage(stage)
                    })?
                    .to_vec();
                satisfied_by.push(dseg.clone());
                satisfied_by.extend(tpms.iter().cloned());
                self.bind_manifest(keys::T1W_DSEG, PortKind::Segmentation, vec![dseg])?;
                self.bind_manifest(keys::T1W_TPMS, PortKind::TissueProbabilities, tpms)?;
            }
            _ => {
                return Err(StructuralBuildError::new(format!(
                    "'{stage}' is not a volumetric stage"
                ))
                .with_stage(stage)
                .into());
            }
        }

        self.record_skipped(stage.as_str(), satisfied_by);
        Ok(())
    }

    fn instantiate_volume_stage(&mut self, stage: StageId) -> Result<(), AssemblyError> {
        let invocation = match stage {
            StageId::TemplateAverage => invocations::template_average(self.config),
            StageId::T2wAverage => invocations::t2w_average(self.config),
            StageId::SkullStrip => invocations::skull_strip(),
            StageId::Segmentation => invocations::segmentation(),
            _ => {
                return Err(StructuralBuildError::new(format!(
                    "'{stage}' is not a volumetric stage"
                ))
                .with_stage(stage)
                .into());
            }
        };

        let node = self.instantiate(stage, stage.as_str(), invocation, &[])?;

        let descriptor = self.descriptor(stage)?;
        for port in descriptor.outputs {
            self.declare_output(node, stage, port.name, port.name)?;
        }
        Ok(())
    }

    fn require_manifest_single(
        &self,
        stage: StageId,
        key: &str,
    ) -> Result<PathBuf, AssemblyError> {
        self.manifest
            .single(key)
            .map(std::path::Path::to_path_buf)
            .ok_or_else(|| {
                StructuralBuildError::new(format!(
                    "'{stage}' marked satisfied but '{key}' is not in the manifest"
                ))
                .with_stage(stage)
                .with_port(key)
                .into()
            })
    }

    fn descriptor(&self, stage: StageId) -> Result<&'a StageDescriptor, StructuralBuildError> {
        self.catalog.get(stage).ok_or_else(|| {
            StructuralBuildError::new(format!("stage '{stage}' is not in the catalog"))
                .with_stage(stage)
        })
    }

    /// Finalizes the graph: prunes dead buffers and verifies acyclicity.
    ///
    /// # Errors
    ///
    /// Returns an error when the graph contains a cycle.
    pub fn finish(mut self) -> Result<(TaskGraph, Vec<SkippedStage>), AssemblyError> {
        let pruned = self.graph.prune_dead_buffers();
        if pruned > 0 {
            debug!(pruned, "pruned dead port buffers");
        }
        self.graph.validate_acyclic()?;
        Ok((self.graph, self.skipped))
    }
}
