//! The surface pipeline assembler.
//!
//! A specialization of the graph builder for bilateral FreeSurfer-derived
//! artifacts. Each surface kind and each metric is gated independently:
//! two precomputed hemisphere paths bypass conversion entirely, anything
//! less triggers it. The ribbon mask and cortex label mask follow the
//! same rule. Grayordinate output is a terminal fan-out constructed only
//! when requested; its dependency on fsLR registration is enforced by
//! edge wiring, never by flags.

mod kinds;

pub use kinds::{MetricKind, SurfaceKind};

use std::path::PathBuf;

use tracing::debug;

use crate::builder::GraphBuilder;
use crate::catalog::{names, PortKind, StageId};
use crate::config::{AssemblyConfig, CiftiDensity};
use crate::errors::{AssemblyError, StructuralBuildError};
use crate::graph::{BufferId, InvocationDescriptor};
use crate::manifest::{keys, Hemisphere};

/// Builds the bilateral surface sub-graph on top of the volumetric
/// stages.
///
/// # Errors
///
/// Returns a structural error when wiring fails.
pub fn build_surface_stages(builder: &mut GraphBuilder<'_>) -> Result<(), AssemblyError> {
    let config = builder.config();
    if !config.run_reconall {
        return Ok(());
    }

    build_reconstruction(builder)?;
    build_mask_refinement(builder)?;
    build_gifti_conversions(builder)?;
    build_metric_conversions(builder)?;
    build_ribbon_mask(builder)?;
    build_cortex_mask(builder)?;
    build_fslr_registration(builder)?;
    build_msm_refinement(builder)?;
    build_grayordinates(builder)?;

    debug!("assembled surface sub-graph");
    Ok(())
}

fn build_reconstruction(builder: &mut GraphBuilder<'_>) -> Result<(), AssemblyError> {
    let stage = StageId::SurfaceRecon;
    if builder.availability().stage(stage).is_satisfied() {
        // Satisfied transitively: every consumer of the subjects
        // directory is itself satisfied, so no ports are needed.
        builder.record_skipped(stage.as_str(), Vec::new());
        return Ok(());
    }

    let invocation = recon_invocation(builder.config());
    let node = builder.instantiate(stage, stage.as_str(), invocation, &[])?;
    builder.declare_output(node, stage, names::FS_SUBJECTS_DIR, names::FS_SUBJECTS_DIR)?;
    builder.declare_output(node, stage, names::FSNATIVE2T1W_XFM, names::FSNATIVE2T1W_XFM)?;
    Ok(())
}

fn build_mask_refinement(builder: &mut GraphBuilder<'_>) -> Result<(), AssemblyError> {
    let stage = StageId::MaskRefinement;
    // Omitted entirely when the mask was supplied externally; otherwise
    // always attempted once reconstruction executes.
    if builder.manifest().single(keys::T1W_MASK).is_some() {
        return Ok(());
    }

    let node = builder.instantiate(stage, stage.as_str(), refinement_invocation(), &[])?;
    builder.declare_output(node, stage, names::T1W_MASK_REFINED, names::T1W_MASK_REFINED)?;
    Ok(())
}

fn build_gifti_conversions(builder: &mut GraphBuilder<'_>) -> Result<(), AssemblyError> {
    for kind in SurfaceKind::CONVERTED {
        let key = kind.manifest_key();
        let label = format!("{}:{key}", StageId::GiftiConversion);

        if builder.availability().surface(kind).is_satisfied() {
            let paths = bilateral_paths(builder, key)?;
            builder.bind_manifest(key, PortKind::Surface, paths.clone())?;
            builder.record_skipped(&label, paths);
        } else {
            let node = builder.instantiate(
                StageId::GiftiConversion,
                &label,
                gifti_invocation(kind),
                &[],
            )?;
            builder.declare_output(node, StageId::GiftiConversion, names::SURFACE, key)?;
        }
    }
    Ok(())
}

fn build_metric_conversions(builder: &mut GraphBuilder<'_>) -> Result<(), AssemblyError> {
    for metric in MetricKind::ALL {
        let key = metric.manifest_key();
        let label = format!("{}:{key}", StageId::MetricConversion);

        if builder.availability().metric(metric).is_satisfied() {
            let paths = bilateral_paths(builder, key)?;
            builder.bind_manifest(key, PortKind::Metric, paths.clone())?;
            builder.record_skipped(&label, paths);
        } else {
            let node = builder.instantiate(
                StageId::MetricConversion,
                &label,
                metric_invocation(metric),
                &[],
            )?;
            builder.declare_output(node, StageId::MetricConversion, names::METRIC, key)?;
        }
    }
    Ok(())
}

fn build_ribbon_mask(builder: &mut GraphBuilder<'_>) -> Result<(), AssemblyError> {
    let stage = StageId::RibbonMask;
    if builder.availability().stage(stage).is_satisfied() {
        let path = builder
            .manifest()
            .single(keys::ANAT_RIBBON)
            .map(std::path::Path::to_path_buf)
            .ok_or_else(|| {
                StructuralBuildError::new(
                    "ribbon mask marked satisfied but 'anat_ribbon' is not in the manifest",
                )
                .with_stage(stage)
            })?;
        builder.bind_manifest(keys::ANAT_RIBBON, PortKind::Mask, vec![path.clone()])?;
        builder.record_skipped(stage.as_str(), vec![path]);
        return Ok(());
    }

    let node = builder.instantiate(stage, stage.as_str(), ribbon_invocation(), &[])?;
    builder.declare_output(node, stage, keys::ANAT_RIBBON, keys::ANAT_RIBBON)?;
    Ok(())
}

fn build_cortex_mask(builder: &mut GraphBuilder<'_>) -> Result<(), AssemblyError> {
    let stage = StageId::CortexMask;
    if builder.availability().stage(stage).is_satisfied() {
        let paths = bilateral_paths(builder, keys::CORTEX_MASK)?;
        builder.bind_manifest(keys::CORTEX_MASK, PortKind::Metric, paths.clone())?;
        builder.record_skipped(stage.as_str(), paths);
        return Ok(());
    }

    let node = builder.instantiate(stage, stage.as_str(), cortex_invocation(), &[])?;
    builder.declare_output(node, stage, keys::CORTEX_MASK, keys::CORTEX_MASK)?;
    Ok(())
}

fn build_fslr_registration(builder: &mut GraphBuilder<'_>) -> Result<(), AssemblyError> {
    let stage = StageId::FsLrRegistration;
    let key = keys::SPHERE_REG_FSLR;

    if builder.availability().surface(SurfaceKind::SphereRegFsLr).is_satisfied() {
        let paths = bilateral_paths(builder, key)?;
        builder.bind_manifest(key, PortKind::Surface, paths.clone())?;
        builder.record_skipped(stage.as_str(), paths);
        return Ok(());
    }

    let node = builder.instantiate(stage, stage.as_str(), fslr_invocation(), &[])?;
    builder.declare_output(node, stage, key, key)?;
    Ok(())
}

fn build_msm_refinement(builder: &mut GraphBuilder<'_>) -> Result<(), AssemblyError> {
    let stage = StageId::MsmRefinement;
    if !builder.config().msm_sulc {
        return Ok(());
    }

    for hemi in Hemisphere::BOTH {
        let buffer_name = msm_buffer_name(hemi);
        let label = format!("{stage}:{hemi}");

        if builder.availability().msm(hemi).is_satisfied() {
            let path = builder
                .manifest()
                .bilateral(keys::SPHERE_REG_MSM)
                .and_then(|pair| pair.get(hemi))
                .map(std::path::Path::to_path_buf)
                .ok_or_else(|| {
                    StructuralBuildError::new(format!(
                        "MSM sphere for hemisphere {hemi} marked satisfied but missing"
                    ))
                    .with_stage(stage)
                })?;
            let buffer = builder
                .graph_mut()
                .add_manifest_buffer(&buffer_name, PortKind::Surface, vec![path.clone()])?;
            builder.register(&buffer_name, buffer);
            builder.record_skipped(&label, vec![path]);
        } else {
            let node =
                builder.instantiate(stage, &label, msm_invocation(hemi), &[])?;
            builder.declare_output(node, stage, keys::SPHERE_REG_MSM, &buffer_name)?;
        }
    }
    Ok(())
}

fn build_grayordinates(builder: &mut GraphBuilder<'_>) -> Result<(), AssemblyError> {
    let stage = StageId::GrayordinateResampling;
    let Some(density) = builder.config().cifti else {
        return Ok(());
    };

    let (left, right) = resampling_spheres(builder)?;
    let label = format!("{stage}:{density}");
    let node = builder.instantiate(
        stage,
        &label,
        cifti_invocation(density),
        &[(names::SPHERE_LEFT, left), (names::SPHERE_RIGHT, right)],
    )?;
    builder.declare_output(node, stage, names::CIFTI_MORPH, names::CIFTI_MORPH)?;
    Ok(())
}

/// The registration spheres feeding grayordinate resampling: the MSM
/// refinements when enabled, otherwise the fsLR pair for both
/// hemisphere ports.
fn resampling_spheres(
    builder: &GraphBuilder<'_>,
) -> Result<(BufferId, BufferId), AssemblyError> {
    let require = |name: &str| {
        builder.lookup(name).ok_or_else(|| {
            StructuralBuildError::new(format!(
                "grayordinate resampling requires '{name}' but nothing produced it"
            ))
            .with_stage(StageId::GrayordinateResampling)
            .with_port(name)
        })
    };

    if builder.config().msm_sulc {
        let left = require(&msm_buffer_name(Hemisphere::Left))?;
        let right = require(&msm_buffer_name(Hemisphere::Right))?;
        Ok((left, right))
    } else {
        let fslr = require(keys::SPHERE_REG_FSLR)?;
        Ok((fslr, fslr))
    }
}

fn msm_buffer_name(hemi: Hemisphere) -> String {
    format!("{}@{hemi}", keys::SPHERE_REG_MSM)
}

fn bilateral_paths(builder: &GraphBuilder<'_>, key: &str) -> Result<Vec<PathBuf>, AssemblyError> {
    let (left, right) = builder.manifest().complete_bilateral(key).ok_or_else(|| {
        StructuralBuildError::new(format!(
            "'{key}' marked satisfied without a complete hemisphere pair"
        ))
        .with_port(key)
    })?;
    Ok(vec![left.to_path_buf(), right.to_path_buf()])
}

fn recon_invocation(config: &AssemblyConfig) -> InvocationDescriptor {
    let subject = format!("sub-{}", config.subject);
    let mut invocation = InvocationDescriptor::new("recon-all")
        .with_args(["-all", "-subjid", subject.as_str(), "-i"])
        .with_port_arg(keys::T1W_PREPROC);

    if !config.t2w.is_empty() {
        invocation = invocation
            .with_arg("-T2")
            .with_port_arg(keys::T2W_PREPROC)
            .with_arg("-T2pial");
    }

    invocation
        .with_output(names::FS_SUBJECTS_DIR, subject.clone())
        .with_output(
            names::FSNATIVE2T1W_XFM,
            format!("{subject}/mri/transforms/fsnative2t1w.lta"),
        )
}

fn refinement_invocation() -> InvocationDescriptor {
    InvocationDescriptor::new("mri_binarize")
        .with_arg("--i")
        .with_arg(format!(
            "{}/mri/aseg.mgz",
            InvocationDescriptor::port_placeholder(names::FS_SUBJECTS_DIR)
        ))
        .with_args(["--min", "0.5", "--dilate", "1"])
        .with_arg("--merge")
        .with_port_arg(keys::T1W_MASK)
        .with_arg("--lta")
        .with_port_arg(names::FSNATIVE2T1W_XFM)
        .with_args(["--o", "refined_mask.nii.gz"])
        .with_output(names::T1W_MASK_REFINED, "refined_mask.nii.gz")
}

fn gifti_invocation(kind: SurfaceKind) -> InvocationDescriptor {
    let fs_name = kind.fs_name();
    let subjects = InvocationDescriptor::port_placeholder(names::FS_SUBJECTS_DIR);
    let mut invocation = InvocationDescriptor::new("mris_convert").with_arg("--to-scanner");

    for hemi in Hemisphere::BOTH {
        let output = format!("{}.{}.surf.gii", hemi.fs(), fs_name);
        invocation = invocation
            .with_arg(format!("{subjects}/surf/{}.{fs_name}", hemi.fs()))
            .with_arg(output.clone())
            .with_output(names::SURFACE, output);
    }
    invocation
}

fn metric_invocation(metric: MetricKind) -> InvocationDescriptor {
    let fs_name = metric.fs_name();
    let subjects = InvocationDescriptor::port_placeholder(names::FS_SUBJECTS_DIR);
    let mut invocation = InvocationDescriptor::new("mris_convert").with_arg("-c");

    for hemi in Hemisphere::BOTH {
        let output = format!("{}.{}.shape.gii", hemi.fs(), fs_name);
        invocation = invocation
            .with_arg(format!("{subjects}/surf/{}.{fs_name}", hemi.fs()))
            .with_arg(format!("{subjects}/surf/{}.white", hemi.fs()))
            .with_arg(output.clone())
            .with_output(names::METRIC, output);
    }
    invocation
}

fn ribbon_invocation() -> InvocationDescriptor {
    InvocationDescriptor::new("wb_command")
        .with_arg("-volume-math")
        .with_arg("(white > 0) * (pial < 0)")
        .with_arg("anat_ribbon.nii.gz")
        .with_arg("-var")
        .with_arg("white")
        .with_port_arg(keys::WHITE)
        .with_arg("-var")
        .with_arg("pial")
        .with_port_arg(keys::PIAL)
        .with_arg("-ref")
        .with_port_arg(keys::T1W_PREPROC)
        .with_output(keys::ANAT_RIBBON, "anat_ribbon.nii.gz")
}

fn cortex_invocation() -> InvocationDescriptor {
    let subjects = InvocationDescriptor::port_placeholder(names::FS_SUBJECTS_DIR);
    let mut invocation = InvocationDescriptor::new("mris_convert").with_arg("--annot");

    for hemi in Hemisphere::BOTH {
        let output = format!("{}.cortex_mask.shape.gii", hemi.fs());
        invocation = invocation
            .with_arg(format!("{subjects}/label/{}.aparc.annot", hemi.fs()))
            .with_arg(format!("{subjects}/surf/{}.white", hemi.fs()))
            .with_arg(output.clone())
            .with_output(keys::CORTEX_MASK, output);
    }
    invocation
}

fn fslr_invocation() -> InvocationDescriptor {
    let mut invocation =
        InvocationDescriptor::new("wb_command").with_arg("-surface-sphere-project-unproject");

    for hemi in Hemisphere::BOTH {
        let output = format!("{}.sphere.reg.fsLR.surf.gii", hemi.fs());
        invocation = invocation
            .with_port_arg(keys::SPHERE_REG)
            .with_arg(format!(
                "fsaverage_std_sphere.{}.164k_fsavg.surf.gii",
                hemi.bids()
            ))
            .with_arg(format!(
                "fs_LR-deformed_to-fsaverage.{}.sphere.32k_fs_LR.surf.gii",
                hemi.bids()
            ))
            .with_arg(output.clone())
            .with_output(keys::SPHERE_REG_FSLR, output);
    }
    invocation
}

fn msm_invocation(hemi: Hemisphere) -> InvocationDescriptor {
    let output = format!("{}.sphere.reg.msm.surf.gii", hemi.fs());
    InvocationDescriptor::new("msm")
        .with_arg(format!(
            "--inmesh={}",
            InvocationDescriptor::port_placeholder(keys::SPHERE_REG_FSLR)
        ))
        .with_arg(format!(
            "--indata={}",
            InvocationDescriptor::port_placeholder(keys::SULC)
        ))
        .with_arg(format!(
            "--refmesh=fsLR.{}.sphere.32k_fs_LR.surf.gii",
            hemi.bids()
        ))
        .with_arg(format!("--out={}.", hemi.fs()))
        .with_output(keys::SPHERE_REG_MSM, output)
}

fn cifti_invocation(density: CiftiDensity) -> InvocationDescriptor {
    InvocationDescriptor::new("wb_command")
        .with_arg("-cifti-create-dense-scalar")
        .with_arg(format!("morph.{density}.dscalar.nii"))
        .with_arg("-left-metric")
        .with_port_arg(keys::THICKNESS)
        .with_arg("-roi-left")
        .with_port_arg(names::SPHERE_LEFT)
        .with_arg("-right-metric")
        .with_port_arg(keys::CURV)
        .with_arg("-roi-right")
        .with_port_arg(names::SPHERE_RIGHT)
        .with_arg("-surface")
        .with_port_arg(keys::MIDTHICKNESS)
        .with_arg("-depth-metric")
        .with_port_arg(keys::SULC)
        .with_output(names::CIFTI_MORPH, format!("morph.{density}.dscalar.nii"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StageCatalog;
    use crate::graph::TaskGraph;
    use crate::manifest::ArtifactManifest;
    use crate::resolver::CacheResolver;
    use crate::template::replicate_templates;

    fn assemble(
        config: &AssemblyConfig,
        manifest: &ArtifactManifest,
    ) -> (TaskGraph, Vec<crate::builder::SkippedStage>) {
        let catalog = StageCatalog::standard();
        let availability = CacheResolver::resolve(manifest, config);
        let mut builder = GraphBuilder::new(&catalog, &availability, config, manifest);
        builder.build_volume_stages().unwrap();
        replicate_templates(&mut builder).unwrap();
        build_surface_stages(&mut builder).unwrap();
        builder.finish().unwrap()
    }

    fn surfaces_config() -> AssemblyConfig {
        AssemblyConfig::new("01").with_t1w("t1.nii.gz").with_reconall()
    }

    fn fully_cached_surface_manifest() -> ArtifactManifest {
        let mut manifest = ArtifactManifest::new()
            .with_single(keys::T1W_PREPROC, "t1w.nii.gz")
            .with_single(keys::T1W_MASK, "mask.nii.gz")
            .with_single(keys::T1W_DSEG, "dseg.nii.gz")
            .with_single(keys::ANAT_RIBBON, "ribbon.nii.gz")
            .with_tissue_maps(vec![
                PathBuf::from("gm.nii.gz"),
                PathBuf::from("wm.nii.gz"),
                PathBuf::from("csf.nii.gz"),
            ]);
        for kind in SurfaceKind::CONVERTED {
            manifest.insert_bilateral(kind.manifest_key(), "lh.gii", "rh.gii");
        }
        for metric in MetricKind::ALL {
            manifest.insert_bilateral(metric.manifest_key(), "lh.gii", "rh.gii");
        }
        manifest.insert_bilateral(keys::CORTEX_MASK, "lh.gii", "rh.gii");
        manifest.insert_bilateral(keys::SPHERE_REG_FSLR, "lh.gii", "rh.gii");
        manifest
    }

    #[test]
    fn test_surfaces_disabled_adds_nothing() {
        let config = AssemblyConfig::new("01").with_t1w("t1.nii.gz");
        let manifest = ArtifactManifest::new();

        let (graph, _) = assemble(&config, &manifest);
        assert!(!graph.contains_stage(StageId::SurfaceRecon));
        assert!(!graph.contains_stage(StageId::GiftiConversion));
    }

    #[test]
    fn test_empty_manifest_builds_full_surface_subgraph() {
        let (graph, _) = assemble(&surfaces_config(), &ArtifactManifest::new());

        assert!(graph.contains_stage(StageId::SurfaceRecon));
        assert!(graph.contains_stage(StageId::MaskRefinement));
        assert_eq!(
            graph.nodes_for_stage(StageId::GiftiConversion).count(),
            SurfaceKind::CONVERTED.len()
        );
        assert_eq!(
            graph.nodes_for_stage(StageId::MetricConversion).count(),
            MetricKind::ALL.len()
        );
        assert!(graph.contains_stage(StageId::RibbonMask));
        assert!(graph.contains_stage(StageId::CortexMask));
        assert!(graph.contains_stage(StageId::FsLrRegistration));
        assert!(!graph.contains_stage(StageId::MsmRefinement));
        assert!(!graph.contains_stage(StageId::GrayordinateResampling));
    }

    #[test]
    fn test_external_mask_omits_refinement() {
        let manifest = ArtifactManifest::new().with_single(keys::T1W_MASK, "mask.nii.gz");
        let (graph, _) = assemble(&surfaces_config(), &manifest);

        assert!(graph.contains_stage(StageId::SurfaceRecon));
        assert!(!graph.contains_stage(StageId::MaskRefinement));
    }

    #[test]
    fn test_fully_cached_surfaces_skip_reconstruction() {
        let manifest = fully_cached_surface_manifest();
        let (graph, skipped) = assemble(&surfaces_config(), &manifest);

        assert!(!graph.contains_stage(StageId::SurfaceRecon));
        assert!(!graph.contains_stage(StageId::GiftiConversion));
        assert!(skipped.iter().any(|s| s.label == "surface_recon"));
    }

    #[test]
    fn test_partial_surface_pair_triggers_conversion() {
        let mut manifest = fully_cached_surface_manifest();
        let mut partial = ArtifactManifest::new();
        partial.insert_hemisphere(keys::PIAL, Hemisphere::Left, "lh.pial.gii");
        manifest.overlay(partial);

        let (graph, _) = assemble(&surfaces_config(), &manifest);

        // The broken pair forces reconstruction plus one conversion node.
        assert!(graph.contains_stage(StageId::SurfaceRecon));
        let conversions: Vec<_> = graph
            .nodes_for_stage(StageId::GiftiConversion)
            .map(|n| n.label.clone())
            .collect();
        assert_eq!(conversions, ["gifti_conversion:pial"]);
    }

    #[test]
    fn test_msm_builds_per_hemisphere() {
        let mut manifest = ArtifactManifest::new();
        manifest.insert_hemisphere(keys::SPHERE_REG_MSM, Hemisphere::Left, "lh.msm.gii");
        let config = surfaces_config().with_msm_sulc();

        let (graph, skipped) = assemble(&config, &manifest);

        let msm_labels: Vec<_> = graph
            .nodes_for_stage(StageId::MsmRefinement)
            .map(|n| n.label.clone())
            .collect();
        assert_eq!(msm_labels, ["msm_sulc:R"]);
        assert!(skipped.iter().any(|s| s.label == "msm_sulc:L"));
    }

    #[test]
    fn test_cifti_fan_out_depends_on_fslr_by_edges() {
        let config = surfaces_config().with_cifti(CiftiDensity::Den91k);
        let (graph, _) = assemble(&config, &ArtifactManifest::new());

        let cifti = graph
            .nodes_for_stage(StageId::GrayordinateResampling)
            .next()
            .unwrap()
            .id;
        let fslr = graph
            .nodes_for_stage(StageId::FsLrRegistration)
            .next()
            .unwrap()
            .id;

        assert!(graph
            .edges()
            .iter()
            .any(|e| e.from_node == fslr && e.to_node == cifti));
    }

    #[test]
    fn test_cifti_consumes_msm_spheres_when_enabled() {
        let config = surfaces_config()
            .with_msm_sulc()
            .with_cifti(CiftiDensity::Den91k);
        let (graph, _) = assemble(&config, &ArtifactManifest::new());

        let cifti = graph
            .nodes_for_stage(StageId::GrayordinateResampling)
            .next()
            .unwrap()
            .id;
        let msm_nodes: Vec<_> = graph
            .nodes_for_stage(StageId::MsmRefinement)
            .map(|n| n.id)
            .collect();
        assert_eq!(msm_nodes.len(), 2);

        for msm in msm_nodes {
            assert!(graph
                .edges()
                .iter()
                .any(|e| e.from_node == msm && e.to_node == cifti));
        }
    }
}
