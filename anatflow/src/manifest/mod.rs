//! The artifact manifest: what has already been computed.
//!
//! A manifest maps logical artifact names to filesystem paths in an
//! accessible derivatives store. It is constructed once, before assembly
//! begins, and is read-only for the remainder of assembly.
//!
//! Two invariants are enforced here rather than downstream:
//!
//! * A bilateral (left/right hemisphere) artifact counts as present only
//!   when both hemisphere paths exist. Partial pairs are reported as
//!   partial so the resolver can downgrade them to recomputation.
//! * A template transform entry must carry both the forward and the
//!   reverse direction. A half pair is a fatal input-validation error,
//!   not a cache miss.

mod scan;

pub use scan::DerivativesScanner;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::StructuralBuildError;

/// Well-known artifact keys.
pub mod keys {
    /// Preprocessed T1w reference volume.
    pub const T1W_PREPROC: &str = "t1w_preproc";
    /// Preprocessed T2w reference volume.
    pub const T2W_PREPROC: &str = "t2w_preproc";
    /// Brain mask in T1w space.
    pub const T1W_MASK: &str = "t1w_mask";
    /// Discrete tissue segmentation.
    pub const T1W_DSEG: &str = "t1w_dseg";
    /// Tissue probability maps, ordered GM/WM/CSF.
    pub const T1W_TPMS: &str = "t1w_tpms";
    /// Cortical ribbon mask volume.
    pub const ANAT_RIBBON: &str = "anat_ribbon";
    /// Cortex label masks, one per hemisphere.
    pub const CORTEX_MASK: &str = "cortex_mask";
    /// White surface pair.
    pub const WHITE: &str = "white";
    /// Pial surface pair.
    pub const PIAL: &str = "pial";
    /// Midthickness surface pair.
    pub const MIDTHICKNESS: &str = "midthickness";
    /// Inflated surface pair.
    pub const INFLATED: &str = "inflated";
    /// Spherical surface pair.
    pub const SPHERE: &str = "sphere";
    /// Registered sphere pair (fsaverage).
    pub const SPHERE_REG: &str = "sphere_reg";
    /// Registered sphere pair (fsLR).
    pub const SPHERE_REG_FSLR: &str = "sphere_reg_fsLR";
    /// MSM-refined registered sphere pair.
    pub const SPHERE_REG_MSM: &str = "sphere_reg_msm";
    /// Cortical thickness metric pair.
    pub const THICKNESS: &str = "thickness";
    /// Curvature metric pair.
    pub const CURV: &str = "curv";
    /// Sulcal depth metric pair.
    pub const SULC: &str = "sulc";
}

/// One brain hemisphere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Hemisphere {
    /// Left hemisphere.
    #[serde(rename = "L")]
    Left,
    /// Right hemisphere.
    #[serde(rename = "R")]
    Right,
}

impl Hemisphere {
    /// Both hemispheres, left first.
    pub const BOTH: [Self; 2] = [Self::Left, Self::Right];

    /// The BIDS `hemi` entity value.
    #[must_use]
    pub const fn bids(self) -> &'static str {
        match self {
            Self::Left => "L",
            Self::Right => "R",
        }
    }

    /// The FreeSurfer hemisphere prefix.
    #[must_use]
    pub const fn fs(self) -> &'static str {
        match self {
            Self::Left => "lh",
            Self::Right => "rh",
        }
    }
}

impl std::fmt::Display for Hemisphere {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.bids())
    }
}

/// A hemisphere-paired artifact entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BilateralPair {
    /// Left hemisphere path, if present.
    pub left: Option<PathBuf>,
    /// Right hemisphere path, if present.
    pub right: Option<PathBuf>,
}

impl BilateralPair {
    /// Creates a complete pair.
    #[must_use]
    pub fn new(left: impl Into<PathBuf>, right: impl Into<PathBuf>) -> Self {
        Self {
            left: Some(left.into()),
            right: Some(right.into()),
        }
    }

    /// Returns both paths when the pair is complete.
    #[must_use]
    pub fn complete(&self) -> Option<(&Path, &Path)> {
        match (&self.left, &self.right) {
            (Some(l), Some(r)) => Some((l.as_path(), r.as_path())),
            _ => None,
        }
    }

    /// Returns true when exactly one hemisphere is present.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.left.is_some() != self.right.is_some()
    }

    /// Returns the path for one hemisphere.
    #[must_use]
    pub fn get(&self, hemi: Hemisphere) -> Option<&Path> {
        match hemi {
            Hemisphere::Left => self.left.as_deref(),
            Hemisphere::Right => self.right.as_deref(),
        }
    }

    fn set(&mut self, hemi: Hemisphere, path: PathBuf) {
        match hemi {
            Hemisphere::Left => self.left = Some(path),
            Hemisphere::Right => self.right = Some(path),
        }
    }
}

/// A forward/reverse transform pair for one standard space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransformPair {
    /// Anatomical-to-standard transform.
    pub forward: PathBuf,
    /// Standard-to-anatomical transform.
    pub reverse: PathBuf,
}

impl TransformPair {
    /// Creates a transform pair.
    #[must_use]
    pub fn new(forward: impl Into<PathBuf>, reverse: impl Into<PathBuf>) -> Self {
        Self {
            forward: forward.into(),
            reverse: reverse.into(),
        }
    }
}

/// Typed lookup over everything a derivatives store already holds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "ManifestDocument")]
pub struct ArtifactManifest {
    singles: BTreeMap<String, PathBuf>,
    tissue_maps: Vec<PathBuf>,
    bilateral: BTreeMap<String, BilateralPair>,
    transforms: BTreeMap<String, TransformPair>,
}

impl ArtifactManifest {
    /// Creates an empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a manifest from a JSON document, validating its invariants.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or carries a half
    /// transform pair.
    pub fn from_json_str(json: &str) -> Result<Self, crate::errors::AssemblyError> {
        let doc: ManifestDocument = serde_json::from_str(json)?;
        Ok(Self::try_from(doc)?)
    }

    /// Records a single-valued artifact.
    pub fn insert_single(&mut self, key: impl Into<String>, path: impl Into<PathBuf>) {
        self.singles.insert(key.into(), path.into());
    }

    /// Records a single-valued artifact, builder style.
    #[must_use]
    pub fn with_single(mut self, key: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.insert_single(key, path);
        self
    }

    /// Records the ordered GM/WM/CSF tissue probability maps.
    pub fn insert_tissue_maps(&mut self, maps: Vec<PathBuf>) {
        self.tissue_maps = maps;
    }

    /// Records the tissue probability maps, builder style.
    #[must_use]
    pub fn with_tissue_maps(mut self, maps: Vec<PathBuf>) -> Self {
        self.insert_tissue_maps(maps);
        self
    }

    /// Records a complete bilateral artifact.
    pub fn insert_bilateral(
        &mut self,
        key: impl Into<String>,
        left: impl Into<PathBuf>,
        right: impl Into<PathBuf>,
    ) {
        self.bilateral
            .insert(key.into(), BilateralPair::new(left, right));
    }

    /// Records a complete bilateral artifact, builder style.
    #[must_use]
    pub fn with_bilateral(
        mut self,
        key: impl Into<String>,
        left: impl Into<PathBuf>,
        right: impl Into<PathBuf>,
    ) -> Self {
        self.insert_bilateral(key, left, right);
        self
    }

    /// Records one hemisphere of a bilateral artifact.
    pub fn insert_hemisphere(
        &mut self,
        key: impl Into<String>,
        hemi: Hemisphere,
        path: impl Into<PathBuf>,
    ) {
        self.bilateral
            .entry(key.into())
            .or_default()
            .set(hemi, path.into());
    }

    /// Records a forward/reverse transform pair for one standard space.
    pub fn insert_transforms(
        &mut self,
        space_key: impl Into<String>,
        forward: impl Into<PathBuf>,
        reverse: impl Into<PathBuf>,
    ) {
        self.transforms
            .insert(space_key.into(), TransformPair::new(forward, reverse));
    }

    /// Records a transform pair, builder style.
    #[must_use]
    pub fn with_transforms(
        mut self,
        space_key: impl Into<String>,
        forward: impl Into<PathBuf>,
        reverse: impl Into<PathBuf>,
    ) -> Self {
        self.insert_transforms(space_key, forward, reverse);
        self
    }

    /// Looks up a single-valued artifact.
    #[must_use]
    pub fn single(&self, key: &str) -> Option<&Path> {
        self.singles.get(key).map(PathBuf::as_path)
    }

    /// Returns the tissue probability maps when the complete ordered
    /// GM/WM/CSF triple is present.
    #[must_use]
    pub fn tissue_maps(&self) -> Option<&[PathBuf]> {
        (self.tissue_maps.len() == 3).then_some(self.tissue_maps.as_slice())
    }

    /// Returns true when some but not all tissue maps are present.
    #[must_use]
    pub fn has_partial_tissue_maps(&self) -> bool {
        !self.tissue_maps.is_empty() && self.tissue_maps.len() != 3
    }

    /// Looks up a bilateral artifact entry, complete or not.
    #[must_use]
    pub fn bilateral(&self, key: &str) -> Option<&BilateralPair> {
        self.bilateral.get(key)
    }

    /// Looks up a bilateral artifact, returning paths only for a
    /// complete pair.
    #[must_use]
    pub fn complete_bilateral(&self, key: &str) -> Option<(&Path, &Path)> {
        self.bilateral.get(key).and_then(BilateralPair::complete)
    }

    /// Looks up the transform pair for one standard space key.
    #[must_use]
    pub fn transform(&self, space_key: &str) -> Option<&TransformPair> {
        self.transforms.get(space_key)
    }

    /// Returns true when the manifest holds nothing at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.singles.is_empty()
            && self.tissue_maps.is_empty()
            && self.bilateral.is_empty()
            && self.transforms.is_empty()
    }

    /// Overlays another manifest on top of this one; entries in `other`
    /// win. Used to let explicit entries override scanned ones.
    pub fn overlay(&mut self, other: Self) {
        self.singles.extend(other.singles);
        if !other.tissue_maps.is_empty() {
            self.tissue_maps = other.tissue_maps;
        }
        self.bilateral.extend(other.bilateral);
        self.transforms.extend(other.transforms);
    }
}

/// Raw JSON shape of a manifest, prior to invariant validation.
#[derive(Debug, Deserialize)]
struct ManifestDocument {
    t1w_preproc: Option<PathBuf>,
    t2w_preproc: Option<PathBuf>,
    t1w_mask: Option<PathBuf>,
    t1w_dseg: Option<PathBuf>,
    #[serde(default)]
    t1w_tpms: Vec<PathBuf>,
    anat_ribbon: Option<PathBuf>,
    #[serde(default)]
    transforms: BTreeMap<String, TransformDocument>,
    #[serde(flatten)]
    bilateral: BTreeMap<String, BilateralDocument>,
}

/// A transform entry as it appears on disk; either direction may be
/// missing in the document, which validation then rejects.
#[derive(Debug, Deserialize)]
struct TransformDocument {
    forward: Option<PathBuf>,
    reverse: Option<PathBuf>,
}

/// A bilateral entry: either an ordered `[left, right]` list or an
/// explicit `{"L": ..., "R": ...}` map.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BilateralDocument {
    List(Vec<PathBuf>),
    Map {
        #[serde(rename = "L")]
        left: Option<PathBuf>,
        #[serde(rename = "R")]
        right: Option<PathBuf>,
    },
}

impl TryFrom<ManifestDocument> for ArtifactManifest {
    type Error = StructuralBuildError;

    fn try_from(doc: ManifestDocument) -> Result<Self, Self::Error> {
        let mut manifest = Self::new();

        for (key, path) in [
            (keys::T1W_PREPROC, doc.t1w_preproc),
            (keys::T2W_PREPROC, doc.t2w_preproc),
            (keys::T1W_MASK, doc.t1w_mask),
            (keys::T1W_DSEG, doc.t1w_dseg),
            (keys::ANAT_RIBBON, doc.anat_ribbon),
        ] {
            if let Some(path) = path {
                manifest.insert_single(key, path);
            }
        }
        manifest.insert_tissue_maps(doc.t1w_tpms);

        for (space, transform) in doc.transforms {
            match (transform.forward, transform.reverse) {
                (Some(forward), Some(reverse)) => {
                    manifest.insert_transforms(space, forward, reverse);
                }
                (forward, _) => {
                    let direction = if forward.is_some() { "reverse" } else { "forward" };
                    return Err(StructuralBuildError::new(format!(
                        "transform pair for '{space}' is missing its {direction} direction"
                    ))
                    .with_port(space));
                }
            }
        }

        for (key, entry) in doc.bilateral {
            let pair = match entry {
                BilateralDocument::List(mut paths) => {
                    // Ordered [left, right]; a truncated list only fills
                    // the leading hemisphere.
                    let left = (!paths.is_empty()).then(|| paths.remove(0));
                    let right = (!paths.is_empty()).then(|| paths.remove(0));
                    BilateralPair { left, right }
                }
                BilateralDocument::Map { left, right } => BilateralPair { left, right },
            };
            manifest.bilateral.insert(key, pair);
        }

        Ok(manifest)
    }
}
