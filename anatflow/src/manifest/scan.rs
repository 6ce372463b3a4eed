//! Derivatives store scanning.
//!
//! Builds an [`ArtifactManifest`](super::ArtifactManifest) by globbing a
//! BIDS-derivatives tree for recognizable artifact filenames. Scanning is
//! the only I/O the assembler performs, and it happens once, before graph
//! construction.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use super::{keys, ArtifactManifest, Hemisphere};
use crate::errors::{AssemblyError, ConfigurationError, StructuralBuildError};

/// Bilateral artifact filename tails, with a `{hemi}` placeholder.
const BILATERAL_PATTERNS: &[(&str, &str)] = &[
    (keys::WHITE, "*_hemi-{hemi}_white.surf.gii"),
    (keys::PIAL, "*_hemi-{hemi}_pial.surf.gii"),
    (keys::MIDTHICKNESS, "*_hemi-{hemi}_midthickness.surf.gii"),
    (keys::INFLATED, "*_hemi-{hemi}_inflated.surf.gii"),
    (keys::SPHERE, "*_hemi-{hemi}_sphere.surf.gii"),
    (keys::SPHERE_REG, "*_hemi-{hemi}_desc-reg_sphere.surf.gii"),
    (
        keys::SPHERE_REG_FSLR,
        "*_space-fsLR_hemi-{hemi}_desc-reg_sphere.surf.gii",
    ),
    (
        keys::SPHERE_REG_MSM,
        "*_space-fsLR_hemi-{hemi}_desc-msmsulc_sphere.surf.gii",
    ),
    (keys::THICKNESS, "*_hemi-{hemi}_thickness.shape.gii"),
    (keys::CURV, "*_hemi-{hemi}_curv.shape.gii"),
    (keys::SULC, "*_hemi-{hemi}_sulc.shape.gii"),
    (keys::CORTEX_MASK, "*_hemi-{hemi}_desc-cortex_mask.shape.gii"),
];

fn forward_xfm_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"_from-T1w_to-([A-Za-z0-9]+)(?:\+([A-Za-z0-9]+))?_mode-image_xfm").unwrap()
    })
}

fn reverse_xfm_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"_from-([A-Za-z0-9]+)(?:\+([A-Za-z0-9]+))?_to-T1w_mode-image_xfm").unwrap()
    })
}

/// Scans a derivatives store for precomputed anatomical artifacts.
#[derive(Debug, Clone)]
pub struct DerivativesScanner {
    root: PathBuf,
}

impl DerivativesScanner {
    /// Creates a scanner over one derivatives root.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Scans the store for one subject's artifacts.
    ///
    /// # Errors
    ///
    /// Returns an error when the store holds a transform in only one
    /// direction, or when the filesystem cannot be read.
    pub fn scan(&self, subject: &str) -> Result<ArtifactManifest, AssemblyError> {
        let anat_dir = self.root.join(format!("sub-{subject}")).join("anat");
        let mut manifest = ArtifactManifest::new();

        if !anat_dir.is_dir() {
            debug!(dir = %anat_dir.display(), "no anatomical derivatives directory");
            return Ok(manifest);
        }

        for (key, tail) in [
            (keys::T1W_PREPROC, "*_desc-preproc_T1w.nii.gz"),
            (keys::T2W_PREPROC, "*_desc-preproc_T2w.nii.gz"),
            (keys::T1W_MASK, "*_desc-brain_mask.nii.gz"),
            (keys::ANAT_RIBBON, "*_desc-ribbon_mask.nii.gz"),
        ] {
            if let Some(path) = self.first_match(&anat_dir, tail)? {
                manifest.insert_single(key, path);
            }
        }

        // The subject-space dseg carries no space entity; standard-space
        // copies do and must not satisfy the segmentation stage.
        if let Some(path) = self
            .matches(&anat_dir, "*_dseg.nii.gz")?
            .into_iter()
            .find(|p| !file_name(p).contains("_space-"))
        {
            manifest.insert_single(keys::T1W_DSEG, path);
        }

        let mut tpms = Vec::new();
        for label in ["GM", "WM", "CSF"] {
            let tail = format!("*_label-{label}_probseg.nii.gz");
            if let Some(path) = self.first_match(&anat_dir, &tail)? {
                tpms.push(path);
            }
        }
        manifest.insert_tissue_maps(tpms);

        for (key, pattern) in BILATERAL_PATTERNS {
            for hemi in Hemisphere::BOTH {
                let tail = pattern.replace("{hemi}", hemi.bids());
                if let Some(path) = self.first_match(&anat_dir, &tail)? {
                    manifest.insert_hemisphere(*key, hemi, path);
                }
            }
        }

        self.scan_transforms(&anat_dir, &mut manifest)?;

        Ok(manifest)
    }

    fn scan_transforms(
        &self,
        anat_dir: &Path,
        manifest: &mut ArtifactManifest,
    ) -> Result<(), AssemblyError> {
        let mut forward: BTreeMap<String, PathBuf> = BTreeMap::new();
        let mut reverse: BTreeMap<String, PathBuf> = BTreeMap::new();

        for path in self.matches(anat_dir, "*_mode-image_xfm.h5")? {
            let name = file_name(&path);
            if let Some(caps) = forward_xfm_pattern().captures(&name) {
                forward.insert(space_key_from_captures(&caps), path);
            } else if let Some(caps) = reverse_xfm_pattern().captures(&name) {
                reverse.insert(space_key_from_captures(&caps), path);
            }
        }

        for (space, fwd) in forward {
            let Some(rev) = reverse.remove(&space) else {
                return Err(StructuralBuildError::new(format!(
                    "derivatives store holds a forward transform for '{space}' with no reverse"
                ))
                .with_port(space)
                .into());
            };
            manifest.insert_transforms(space, fwd, rev);
        }

        if let Some((space, _)) = reverse.into_iter().next() {
            return Err(StructuralBuildError::new(format!(
                "derivatives store holds a reverse transform for '{space}' with no forward"
            ))
            .with_port(space)
            .into());
        }

        Ok(())
    }

    fn first_match(&self, dir: &Path, tail: &str) -> Result<Option<PathBuf>, AssemblyError> {
        Ok(self.matches(dir, tail)?.into_iter().next())
    }

    fn matches(&self, dir: &Path, tail: &str) -> Result<Vec<PathBuf>, AssemblyError> {
        let pattern = dir.join(tail);
        let pattern = pattern.to_string_lossy();
        let entries = glob::glob(&pattern)
            .map_err(|e| ConfigurationError::new(format!("invalid scan pattern '{pattern}': {e}")))?;

        let mut paths = Vec::new();
        for entry in entries {
            paths.push(entry.map_err(glob::GlobError::into_error)?);
        }
        paths.sort();
        Ok(paths)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().map_or_else(String::new, |n| {
        n.to_string_lossy().into_owned()
    })
}

fn space_key_from_captures(caps: &regex::Captures<'_>) -> String {
    let name = &caps[1];
    match caps.get(2) {
        Some(cohort) => format!("{name}:cohort-{}", cohort.as_str()),
        None => name.to_string(),
    }
}
