//! The task graph: stage nodes wired through typed, named ports.
//!
//! The graph is pure data by the time it leaves the assembler. Every true
//! data dependency is an edge; anything not connected by an edge is safe
//! for an external scheduler to run in parallel.

mod buffer;
mod node;

pub use buffer::{BufferId, PortBinding, PortBuffer};
pub use node::{ExpectedOutput, InvocationDescriptor, NodeId, StageNode};

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::catalog::{PortKind, StageId};
use crate::errors::{AssemblyError, CycleDetectedError, StructuralBuildError};

/// A directed dependency between two nodes' named ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    /// The producing node.
    pub from_node: NodeId,
    /// The producing output port.
    pub from_port: String,
    /// The consuming node.
    pub to_node: NodeId,
    /// The consuming input port.
    pub to_port: String,
}

/// An input port fed directly from the manifest instead of an edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestInput {
    /// The consuming node.
    pub node: NodeId,
    /// The consuming input port.
    pub port: String,
    /// The buffer holding the cached paths.
    pub buffer: BufferId,
}

/// A set of stage instances plus the edges between their ports.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskGraph {
    nodes: Vec<StageNode>,
    buffers: Vec<PortBuffer>,
    edges: Vec<Edge>,
    manifest_inputs: Vec<ManifestInput>,
    #[serde(skip)]
    wired_inputs: HashSet<(NodeId, String)>,
    next_buffer: usize,
}

impl TaskGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a stage node.
    pub fn add_node(
        &mut self,
        stage: StageId,
        label: impl Into<String>,
        invocation: Option<InvocationDescriptor>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(StageNode {
            id,
            stage,
            label: label.into(),
            invocation,
        });
        id
    }

    /// Creates an unbound buffer.
    pub fn create_buffer(&mut self, name: impl Into<String>, kind: PortKind) -> BufferId {
        let id = BufferId(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.push(PortBuffer::new(id, name, kind));
        id
    }

    /// Creates a buffer bound to cached manifest paths.
    ///
    /// # Errors
    ///
    /// Never fails for a freshly created buffer; the signature matches
    /// the write-once contract.
    pub fn add_manifest_buffer(
        &mut self,
        name: impl Into<String>,
        kind: PortKind,
        paths: Vec<PathBuf>,
    ) -> Result<BufferId, AssemblyError> {
        let id = self.create_buffer(name, kind);
        self.bind_buffer(id, PortBinding::Manifest { paths })?;
        Ok(id)
    }

    /// Creates a buffer bound to a node's output port.
    ///
    /// # Errors
    ///
    /// Never fails for a freshly created buffer; the signature matches
    /// the write-once contract.
    pub fn add_output_buffer(
        &mut self,
        name: impl Into<String>,
        kind: PortKind,
        node: NodeId,
        port: impl Into<String>,
    ) -> Result<BufferId, AssemblyError> {
        let id = self.create_buffer(name, kind);
        self.bind_buffer(
            id,
            PortBinding::Produced {
                node,
                port: port.into(),
            },
        )?;
        Ok(id)
    }

    /// Binds an existing buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is unknown or already bound.
    pub fn bind_buffer(&mut self, id: BufferId, binding: PortBinding) -> Result<(), AssemblyError> {
        let buffer = self
            .buffer_mut(id)
            .ok_or_else(|| StructuralBuildError::new(format!("unknown buffer {}", id.index())))?;
        buffer.bind(binding)?;
        Ok(())
    }

    /// Wires a bound buffer into a node's input port.
    ///
    /// Enforces the wiring invariants: the buffer's kind must match the
    /// port's kind, the port must not already have a producer, and the
    /// buffer must already be bound.
    ///
    /// # Errors
    ///
    /// Returns a structural error when any invariant is violated.
    pub fn wire(
        &mut self,
        buffer_id: BufferId,
        to_node: NodeId,
        port_name: &str,
        port_kind: PortKind,
    ) -> Result<(), AssemblyError> {
        let stage = self.node(to_node).map(|n| n.stage);
        let key = (to_node, port_name.to_string());
        if self.wired_inputs.contains(&key) {
            let mut err = StructuralBuildError::new(format!(
                "input port '{port_name}' already has a producer"
            ))
            .with_port(port_name);
            if let Some(stage) = stage {
                err = err.with_stage(stage);
            }
            return Err(err.into());
        }

        let buffer = self
            .buffer(buffer_id)
            .ok_or_else(|| {
                StructuralBuildError::new(format!("unknown buffer {}", buffer_id.index()))
            })?;

        if buffer.kind != port_kind {
            let mut err = StructuralBuildError::new(format!(
                "cannot wire {} buffer '{}' into {port_kind} port '{port_name}'",
                buffer.kind, buffer.name
            ))
            .with_port(port_name);
            if let Some(stage) = stage {
                err = err.with_stage(stage);
            }
            return Err(err.into());
        }

        let binding = buffer.read()?.clone();
        match binding {
            PortBinding::Produced {
                node: from_node,
                port: from_port,
            } => {
                self.edges.push(Edge {
                    from_node,
                    from_port,
                    to_node,
                    to_port: port_name.to_string(),
                });
            }
            PortBinding::Manifest { .. } => {
                self.manifest_inputs.push(ManifestInput {
                    node: to_node,
                    port: port_name.to_string(),
                    buffer: buffer_id,
                });
            }
        }

        self.wired_inputs.insert(key);
        if let Some(buffer) = self.buffer_mut(buffer_id) {
            buffer.mark_read();
        }
        Ok(())
    }

    /// Looks up a node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&StageNode> {
        self.nodes.get(id.index())
    }

    /// Looks up a buffer.
    #[must_use]
    pub fn buffer(&self, id: BufferId) -> Option<&PortBuffer> {
        self.buffers.iter().find(|b| b.id == id)
    }

    fn buffer_mut(&mut self, id: BufferId) -> Option<&mut PortBuffer> {
        self.buffers.iter_mut().find(|b| b.id == id)
    }

    /// All nodes, in insertion order.
    #[must_use]
    pub fn nodes(&self) -> &[StageNode] {
        &self.nodes
    }

    /// All edges, in insertion order.
    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// All manifest-fed inputs.
    #[must_use]
    pub fn manifest_inputs(&self) -> &[ManifestInput] {
        &self.manifest_inputs
    }

    /// All live buffers.
    #[must_use]
    pub fn buffers(&self) -> &[PortBuffer] {
        &self.buffers
    }

    /// The number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Returns true when any node instantiates the given stage.
    #[must_use]
    pub fn contains_stage(&self, stage: StageId) -> bool {
        self.nodes.iter().any(|n| n.stage == stage)
    }

    /// Iterates the nodes instantiating one stage.
    pub fn nodes_for_stage(&self, stage: StageId) -> impl Iterator<Item = &StageNode> {
        self.nodes.iter().filter(move |n| n.stage == stage)
    }

    /// Verifies the graph is a true DAG.
    ///
    /// Holds by construction (inputs are only ever wired to buffers bound
    /// earlier), but the invariant is cheap to check and the check makes
    /// the contract explicit at the hand-off boundary.
    ///
    /// # Errors
    ///
    /// Returns the offending node labels when a cycle exists.
    pub fn validate_acyclic(&self) -> Result<(), CycleDetectedError> {
        let mut in_degree = vec![0usize; self.nodes.len()];
        for edge in &self.edges {
            in_degree[edge.to_node.index()] += 1;
        }

        let mut queue: VecDeque<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| i)
            .collect();

        let mut visited = 0usize;
        while let Some(index) = queue.pop_front() {
            visited += 1;
            for edge in &self.edges {
                if edge.from_node.index() == index {
                    let target = edge.to_node.index();
                    in_degree[target] -= 1;
                    if in_degree[target] == 0 {
                        queue.push_back(target);
                    }
                }
            }
        }

        if visited == self.nodes.len() {
            Ok(())
        } else {
            let cycle = in_degree
                .iter()
                .enumerate()
                .filter(|(_, &d)| d > 0)
                .map(|(i, _)| self.nodes[i].label.clone())
                .collect();
            Err(CycleDetectedError::new(cycle))
        }
    }

    /// Removes buffers with no binding and no readers.
    ///
    /// Returns how many were pruned. Buffer ids are stable across
    /// pruning; surviving buffers keep their identity.
    pub fn prune_dead_buffers(&mut self) -> usize {
        let before = self.buffers.len();
        self.buffers
            .retain(|b| b.is_bound() || b.readers() > 0);
        before - self.buffers.len()
    }

    /// A stable digest of the graph's semantic content.
    ///
    /// Two assemblies from identical inputs hash identically; node and
    /// buffer identities are excluded so the digest captures structure,
    /// not construction order bookkeeping.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut lines: Vec<String> = Vec::new();

        for node in &self.nodes {
            let argv = node
                .invocation
                .as_ref()
                .map(|inv| format!("{} {}", inv.executable, inv.argv.join(" ")))
                .unwrap_or_default();
            lines.push(format!("node|{}|{argv}", node.label));
        }
        for edge in &self.edges {
            lines.push(format!(
                "edge|{}.{}->{}.{}",
                self.label_of(edge.from_node),
                edge.from_port,
                self.label_of(edge.to_node),
                edge.to_port,
            ));
        }
        for input in &self.manifest_inputs {
            let paths = self
                .buffer(input.buffer)
                .and_then(|b| b.read().ok())
                .map(|binding| match binding {
                    PortBinding::Manifest { paths } => paths
                        .iter()
                        .map(|p| p.to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join(","),
                    PortBinding::Produced { .. } => String::new(),
                })
                .unwrap_or_default();
            lines.push(format!(
                "manifest|{}.{}<={paths}",
                self.label_of(input.node),
                input.port,
            ));
        }

        lines.sort();
        let mut hasher = Sha256::new();
        for line in &lines {
            hasher.update(line.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    fn label_of(&self, id: NodeId) -> &str {
        self.node(id).map_or("?", |n| n.label.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::names;
    use crate::manifest::keys;

    #[test]
    fn test_wire_produced_creates_edge() {
        let mut graph = TaskGraph::new();
        let strip = graph.add_node(StageId::SkullStrip, "skull_strip", None);
        let seg = graph.add_node(StageId::Segmentation, "segmentation", None);

        let mask = graph
            .add_output_buffer(keys::T1W_MASK, PortKind::Mask, strip, keys::T1W_MASK)
            .unwrap();
        graph.wire(mask, seg, keys::T1W_MASK, PortKind::Mask).unwrap();

        assert_eq!(graph.edge_count(), 1);
        assert!(graph.manifest_inputs().is_empty());
    }

    #[test]
    fn test_wire_manifest_creates_binding() {
        let mut graph = TaskGraph::new();
        let seg = graph.add_node(StageId::Segmentation, "segmentation", None);

        let mask = graph
            .add_manifest_buffer(
                keys::T1W_MASK,
                PortKind::Mask,
                vec![PathBuf::from("mask.nii.gz")],
            )
            .unwrap();
        graph.wire(mask, seg, keys::T1W_MASK, PortKind::Mask).unwrap();

        assert_eq!(graph.edge_count(), 0);
        assert_eq!(graph.manifest_inputs().len(), 1);
    }

    #[test]
    fn test_wire_rejects_kind_mismatch() {
        let mut graph = TaskGraph::new();
        let seg = graph.add_node(StageId::Segmentation, "segmentation", None);

        let mask = graph
            .add_manifest_buffer(
                keys::T1W_MASK,
                PortKind::Mask,
                vec![PathBuf::from("mask.nii.gz")],
            )
            .unwrap();

        let err = graph
            .wire(mask, seg, keys::T1W_PREPROC, PortKind::Volume)
            .unwrap_err();
        assert!(matches!(err, AssemblyError::Structural(_)));
    }

    #[test]
    fn test_wire_rejects_second_producer() {
        let mut graph = TaskGraph::new();
        let seg = graph.add_node(StageId::Segmentation, "segmentation", None);

        let a = graph
            .add_manifest_buffer(keys::T1W_MASK, PortKind::Mask, vec![PathBuf::from("a")])
            .unwrap();
        let b = graph
            .add_manifest_buffer(keys::T1W_MASK, PortKind::Mask, vec![PathBuf::from("b")])
            .unwrap();

        graph.wire(a, seg, keys::T1W_MASK, PortKind::Mask).unwrap();
        let err = graph
            .wire(b, seg, keys::T1W_MASK, PortKind::Mask)
            .unwrap_err();
        assert!(matches!(err, AssemblyError::Structural(_)));
    }

    #[test]
    fn test_wire_rejects_unbound_buffer() {
        let mut graph = TaskGraph::new();
        let seg = graph.add_node(StageId::Segmentation, "segmentation", None);
        let unbound = graph.create_buffer(keys::T1W_MASK, PortKind::Mask);

        let err = graph
            .wire(unbound, seg, keys::T1W_MASK, PortKind::Mask)
            .unwrap_err();
        assert!(matches!(err, AssemblyError::UnboundPort(_)));
    }

    #[test]
    fn test_acyclic_validation() {
        let mut graph = TaskGraph::new();
        let strip = graph.add_node(StageId::SkullStrip, "skull_strip", None);
        let seg = graph.add_node(StageId::Segmentation, "segmentation", None);
        let mask = graph
            .add_output_buffer(keys::T1W_MASK, PortKind::Mask, strip, keys::T1W_MASK)
            .unwrap();
        graph.wire(mask, seg, keys::T1W_MASK, PortKind::Mask).unwrap();

        graph.validate_acyclic().unwrap();

        // Force a cycle through the back door to prove the check bites.
        graph.edges.push(Edge {
            from_node: seg,
            from_port: keys::T1W_DSEG.to_string(),
            to_node: strip,
            to_port: keys::T1W_PREPROC.to_string(),
        });
        assert!(graph.validate_acyclic().is_err());
    }

    #[test]
    fn test_prune_dead_buffers() {
        let mut graph = TaskGraph::new();
        let _dead = graph.create_buffer("orphan", PortKind::Volume);
        let live = graph
            .add_manifest_buffer(
                keys::T1W_PREPROC,
                PortKind::Volume,
                vec![PathBuf::from("t1w.nii.gz")],
            )
            .unwrap();

        assert_eq!(graph.prune_dead_buffers(), 1);
        assert!(graph.buffer(live).is_some());
    }

    #[test]
    fn test_fingerprint_stable_and_discriminating() {
        let build = |with_edge: bool| {
            let mut graph = TaskGraph::new();
            let strip = graph.add_node(StageId::SkullStrip, "skull_strip", None);
            let seg = graph.add_node(StageId::Segmentation, "segmentation", None);
            let mask = graph
                .add_output_buffer(keys::T1W_MASK, PortKind::Mask, strip, keys::T1W_MASK)
                .unwrap();
            if with_edge {
                graph.wire(mask, seg, keys::T1W_MASK, PortKind::Mask).unwrap();
            }
            graph
        };

        assert_eq!(build(true).fingerprint(), build(true).fingerprint());
        assert_ne!(build(true).fingerprint(), build(false).fingerprint());
    }

    #[test]
    fn test_output_buffer_naming() {
        let mut graph = TaskGraph::new();
        let recon = graph.add_node(StageId::SurfaceRecon, "surface_recon", None);
        let dir = graph
            .add_output_buffer(
                names::FS_SUBJECTS_DIR,
                PortKind::SubjectsDir,
                recon,
                names::FS_SUBJECTS_DIR,
            )
            .unwrap();

        let buffer = graph.buffer(dir).unwrap();
        assert_eq!(buffer.name, names::FS_SUBJECTS_DIR);
        assert!(buffer.is_bound());
    }
}
