//! Per-template replication of the registration sub-graph.
//!
//! Every requested standard space gets an independent clone of the
//! registration stage with the request's parameters bound as constants in
//! its argument list. The clones share no edges with each other, so an
//! external scheduler may run them in parallel; the join collector is
//! their sole synchronization point.
//!
//! The join is indexed by original request position: `templates[i]`,
//! `anat2std_xfm[i]`, and `std2anat_xfm[i]` co-refer for every `i`, and
//! the lists preserve request order regardless of which spaces were
//! precomputed.

use serde::Serialize;
use tracing::debug;

use crate::builder::GraphBuilder;
use crate::catalog::{names, PortKind, StageId};
use crate::errors::{AssemblyError, StructuralBuildError};
use crate::graph::{BufferId, InvocationDescriptor, NodeId};

use super::TemplateRequest;

/// Order-aligned per-template outputs.
///
/// Positional alignment across the three lists is guaranteed by
/// construction; the join collector is only ever fed from the
/// replicator, never hand-assembled.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JoinedTemplates {
    /// The requests, in original request order.
    pub templates: Vec<TemplateRequest>,
    /// Anatomical-to-standard transform buffers, aligned with `templates`.
    pub anat2std_xfm: Vec<BufferId>,
    /// Standard-to-anatomical transform buffers, aligned with `templates`.
    pub std2anat_xfm: Vec<BufferId>,
    /// The join collector node, absent when nothing was requested.
    pub join_node: Option<NodeId>,
}

impl JoinedTemplates {
    /// The number of joined requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Returns true when no standard space was requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Replicates the registration sub-graph once per requested template and
/// joins the branches in request order.
///
/// # Errors
///
/// Returns a structural error when wiring fails or when a template
/// marked satisfied has no transform pair in the manifest.
pub fn replicate_templates(
    builder: &mut GraphBuilder<'_>,
) -> Result<JoinedTemplates, AssemblyError> {
    let entries = builder.availability().templates().to_vec();
    if entries.is_empty() {
        return Ok(JoinedTemplates::default());
    }

    let mut joined = JoinedTemplates::default();

    for (request, availability) in &entries {
        let scope = request.space_key();
        let label = format!("{}:{scope}", StageId::TemplateRegistration);

        let (forward, reverse) = if availability.is_satisfied() {
            let pair = builder
                .manifest()
                .transform(&scope)
                .cloned()
                .ok_or_else(|| {
                    StructuralBuildError::new(format!(
                        "template '{scope}' marked satisfied but its transform pair is missing"
                    ))
                    .with_stage(StageId::TemplateRegistration)
                })?;

            let forward = builder.graph_mut().add_manifest_buffer(
                scoped(names::ANAT2STD_XFM, &scope),
                PortKind::Transform,
                vec![pair.forward.clone()],
            )?;
            let reverse = builder.graph_mut().add_manifest_buffer(
                scoped(names::STD2ANAT_XFM, &scope),
                PortKind::Transform,
                vec![pair.reverse.clone()],
            )?;

            builder.record_skipped(&label, vec![pair.forward, pair.reverse]);
            (forward, reverse)
        } else {
            let node = builder.instantiate(
                StageId::TemplateRegistration,
                &label,
                registration_invocation(request),
                &[],
            )?;

            let forward = builder.declare_output(
                node,
                StageId::TemplateRegistration,
                names::ANAT2STD_XFM,
                &scoped(names::ANAT2STD_XFM, &scope),
            )?;
            let reverse = builder.declare_output(
                node,
                StageId::TemplateRegistration,
                names::STD2ANAT_XFM,
                &scoped(names::STD2ANAT_XFM, &scope),
            )?;
            builder.declare_output(
                node,
                StageId::TemplateRegistration,
                names::STD_PREPROC,
                &scoped(names::STD_PREPROC, &scope),
            )?;

            (forward, reverse)
        };

        joined.templates.push(request.clone());
        joined.anat2std_xfm.push(forward);
        joined.std2anat_xfm.push(reverse);
    }

    // One collector waits on all branches; its input ports are indexed
    // by request position so downstream consumers can rely on
    // templates[i] <-> transform[i] pairing.
    let join = builder
        .graph_mut()
        .add_node(StageId::TemplateJoin, StageId::TemplateJoin.as_str(), None);
    for (index, (forward, reverse)) in joined
        .anat2std_xfm
        .iter()
        .zip(&joined.std2anat_xfm)
        .enumerate()
    {
        builder.graph_mut().wire(
            *forward,
            join,
            &format!("{}[{index}]", names::ANAT2STD_XFM),
            PortKind::Transform,
        )?;
        builder.graph_mut().wire(
            *reverse,
            join,
            &format!("{}[{index}]", names::STD2ANAT_XFM),
            PortKind::Transform,
        )?;
    }
    joined.join_node = Some(join);

    debug!(
        templates = joined.len(),
        "joined standard-space registration branches"
    );
    Ok(joined)
}

fn scoped(name: &str, scope: &str) -> String {
    format!("{name}@{scope}")
}

fn registration_invocation(request: &TemplateRequest) -> InvocationDescriptor {
    use crate::manifest::keys;

    let tag = request.file_tag();
    let resolution = request.resolution.as_deref().unwrap_or("01");
    let fixed = format!("tpl-{tag}_res-{resolution}_T1w.nii.gz");

    InvocationDescriptor::new("antsRegistration")
        .with_args(["--dimensionality", "3", "--float", "0"])
        .with_args(["--collapse-output-transforms", "1"])
        .with_arg("--output")
        .with_arg(format!("[{tag}_,{tag}_Warped.nii.gz]"))
        .with_arg("--masks")
        .with_port_arg(keys::T1W_MASK)
        .with_arg("--moving-image")
        .with_port_arg(keys::T1W_PREPROC)
        .with_args(["--fixed-image", fixed.as_str()])
        .with_output(names::ANAT2STD_XFM, format!("{tag}_Composite.h5"))
        .with_output(names::STD2ANAT_XFM, format!("{tag}_InverseComposite.h5"))
        .with_output(names::STD_PREPROC, format!("{tag}_Warped.nii.gz"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StageCatalog;
    use crate::config::AssemblyConfig;
    use crate::manifest::ArtifactManifest;
    use crate::resolver::CacheResolver;

    fn replicate(
        config: &AssemblyConfig,
        manifest: &ArtifactManifest,
    ) -> (crate::graph::TaskGraph, JoinedTemplates) {
        let catalog = StageCatalog::standard();
        let availability = CacheResolver::resolve(manifest, config);
        let mut builder = GraphBuilder::new(&catalog, &availability, config, manifest);
        builder.build_volume_stages().unwrap();
        let joined = replicate_templates(&mut builder).unwrap();
        let (graph, _) = builder.finish().unwrap();
        (graph, joined)
    }

    #[test]
    fn test_no_templates_no_join() {
        let config = AssemblyConfig::new("01").with_t1w("t1.nii.gz");
        let manifest = ArtifactManifest::new();

        let (graph, joined) = replicate(&config, &manifest);
        assert!(joined.is_empty());
        assert!(joined.join_node.is_none());
        assert!(!graph.contains_stage(StageId::TemplateJoin));
    }

    #[test]
    fn test_one_branch_per_request() {
        let config = AssemblyConfig::new("01")
            .with_t1w("t1.nii.gz")
            .with_template(TemplateRequest::new("MNI152NLin2009cAsym"))
            .with_template(TemplateRequest::new("MNI152NLin6Asym"));
        let manifest = ArtifactManifest::new();

        let (graph, joined) = replicate(&config, &manifest);

        assert_eq!(joined.len(), 2);
        assert_eq!(
            graph.nodes_for_stage(StageId::TemplateRegistration).count(),
            2
        );
        assert!(graph.contains_stage(StageId::TemplateJoin));
    }

    #[test]
    fn test_join_preserves_request_order() {
        let config = AssemblyConfig::new("01")
            .with_t1w("t1.nii.gz")
            .with_template(TemplateRequest::new("A1"))
            .with_template(TemplateRequest::new("B2"));
        let manifest = ArtifactManifest::new();

        let (_, joined) = replicate(&config, &manifest);
        let names: Vec<&str> = joined.templates.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["A1", "B2"]);
        assert_eq!(joined.anat2std_xfm.len(), 2);
        assert_eq!(joined.std2anat_xfm.len(), 2);
    }

    #[test]
    fn test_satisfied_template_bypasses_replication_in_order() {
        let config = AssemblyConfig::new("01")
            .with_t1w("t1.nii.gz")
            .with_template(TemplateRequest::new("Fresh"))
            .with_template(TemplateRequest::new("Cached"))
            .with_template(TemplateRequest::new("Fresh2"));
        let manifest = ArtifactManifest::new().with_transforms("Cached", "fwd.h5", "rev.h5");

        let (graph, joined) = replicate(&config, &manifest);

        // One branch per missing template, none for the cached one.
        assert_eq!(
            graph.nodes_for_stage(StageId::TemplateRegistration).count(),
            2
        );
        // The joined list still follows request order.
        let names: Vec<&str> = joined.templates.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["Fresh", "Cached", "Fresh2"]);

        // The cached branch joins through a manifest binding, not an edge.
        let cached_buffer = graph.buffer(joined.anat2std_xfm[1]).unwrap();
        assert!(matches!(
            cached_buffer.read().unwrap(),
            crate::graph::PortBinding::Manifest { .. }
        ));
    }

    #[test]
    fn test_branches_share_no_edges() {
        let config = AssemblyConfig::new("01")
            .with_t1w("t1.nii.gz")
            .with_template(TemplateRequest::new("A1"))
            .with_template(TemplateRequest::new("B2"));
        let manifest = ArtifactManifest::new();

        let (graph, joined) = replicate(&config, &manifest);

        let branches: Vec<_> = graph
            .nodes_for_stage(StageId::TemplateRegistration)
            .map(|n| n.id)
            .collect();
        let join = joined.join_node.unwrap();

        for edge in graph.edges() {
            if branches.contains(&edge.from_node) {
                // Registration outputs flow only into the join.
                assert_eq!(edge.to_node, join);
            }
        }
    }

    #[test]
    fn test_registration_parameters_bound_as_constants() {
        let request: TemplateRequest = "MNIInfant:cohort-1:res-2".parse().unwrap();
        let invocation = registration_invocation(&request);

        assert!(invocation
            .argv
            .contains(&"tpl-MNIInfant+1_res-2_T1w.nii.gz".to_string()));
    }
}
