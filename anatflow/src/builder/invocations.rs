//! Invocation descriptors for the volumetric stages.
//!
//! Each descriptor is the complete external-tool boundary for one node:
//! executable, argument list (with `{port}` placeholders for wired
//! inputs), and the files the tool is expected to produce.

use crate::config::AssemblyConfig;
use crate::graph::InvocationDescriptor;
use crate::manifest::keys;

pub(crate) fn template_average(config: &AssemblyConfig) -> InvocationDescriptor {
    conform_average(&config.t1w, keys::T1W_PREPROC, "t1w_preproc.nii.gz")
}

pub(crate) fn t2w_average(config: &AssemblyConfig) -> InvocationDescriptor {
    conform_average(&config.t2w, keys::T2W_PREPROC, "t2w_preproc.nii.gz")
}

fn conform_average(
    inputs: &[std::path::PathBuf],
    port: &str,
    output: &str,
) -> InvocationDescriptor {
    let mut invocation = InvocationDescriptor::new("mri_robust_template")
        .with_args(["--satit", "--average", "1"])
        .with_arg("--mov");
    for path in inputs {
        invocation = invocation.with_arg(path.to_string_lossy());
    }
    invocation
        .with_args(["--template", output])
        .with_output(port, output)
}

pub(crate) fn skull_strip() -> InvocationDescriptor {
    InvocationDescriptor::new("antsBrainExtraction.sh")
        .with_args(["-d", "3", "-a"])
        .with_port_arg(keys::T1W_PREPROC)
        .with_args([
            "-e",
            "tpl-OASIS30ANTs_T1w.nii.gz",
            "-m",
            "tpl-OASIS30ANTs_res-01_label-brain_probseg.nii.gz",
            "-o",
            "ants_",
        ])
        .with_output(keys::T1W_MASK, "ants_BrainExtractionMask.nii.gz")
}

pub(crate) fn segmentation() -> InvocationDescriptor {
    InvocationDescriptor::new("Atropos")
        .with_args(["-d", "3", "-a"])
        .with_port_arg(keys::T1W_PREPROC)
        .with_arg("-x")
        .with_port_arg(keys::T1W_MASK)
        .with_args([
            "-c",
            "3",
            "-i",
            "KMeans[3]",
            "-o",
            "[segment.nii.gz,segment_prob_%02d.nii.gz]",
        ])
        .with_output(keys::T1W_DSEG, "segment.nii.gz")
        .with_output(keys::T1W_TPMS, "segment_prob_01.nii.gz")
        .with_output(keys::T1W_TPMS, "segment_prob_02.nii.gz")
        .with_output(keys::T1W_TPMS, "segment_prob_03.nii.gz")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_average_lists_raw_inputs() {
        let config = AssemblyConfig::new("01")
            .with_t1w("run-1_T1w.nii.gz")
            .with_t1w("run-2_T1w.nii.gz");

        let invocation = template_average(&config);
        assert_eq!(invocation.executable, "mri_robust_template");
        assert!(invocation
            .argv
            .iter()
            .any(|a| a == "run-2_T1w.nii.gz"));
        assert_eq!(invocation.expected_outputs.len(), 1);
    }

    #[test]
    fn test_segmentation_references_both_ports() {
        let invocation = segmentation();
        assert!(invocation.argv.contains(&"{t1w_preproc}".to_string()));
        assert!(invocation.argv.contains(&"{t1w_mask}".to_string()));
        assert_eq!(invocation.expected_outputs.len(), 4);
    }
}
