//! Surface and metric kind enumerations.

use serde::{Deserialize, Serialize};

use crate::manifest::keys;

/// A FreeSurfer-derived surface representation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceKind {
    /// White matter surface.
    White,
    /// Pial surface.
    Pial,
    /// Midthickness surface.
    Midthickness,
    /// Inflated surface.
    Inflated,
    /// Spherical projection.
    Sphere,
    /// Sphere registered to fsaverage.
    SphereReg,
    /// Sphere registered to the fsLR mesh.
    SphereRegFsLr,
    /// MSM-refined fsLR-registered sphere.
    SphereRegMsm,
}

impl SurfaceKind {
    /// The kinds produced directly by GIFTI conversion, in build order.
    pub const CONVERTED: [Self; 6] = [
        Self::White,
        Self::Pial,
        Self::Midthickness,
        Self::Inflated,
        Self::Sphere,
        Self::SphereReg,
    ];

    /// The manifest key for this kind's bilateral entry.
    #[must_use]
    pub const fn manifest_key(self) -> &'static str {
        match self {
            Self::White => keys::WHITE,
            Self::Pial => keys::PIAL,
            Self::Midthickness => keys::MIDTHICKNESS,
            Self::Inflated => keys::INFLATED,
            Self::Sphere => keys::SPHERE,
            Self::SphereReg => keys::SPHERE_REG,
            Self::SphereRegFsLr => keys::SPHERE_REG_FSLR,
            Self::SphereRegMsm => keys::SPHERE_REG_MSM,
        }
    }

    /// The FreeSurfer surface file name, without hemisphere prefix.
    #[must_use]
    pub const fn fs_name(self) -> &'static str {
        match self {
            Self::White => "white",
            Self::Pial => "pial",
            Self::Midthickness => "graymid",
            Self::Inflated => "inflated",
            Self::Sphere => "sphere",
            Self::SphereReg => "sphere.reg",
            Self::SphereRegFsLr => "sphere.reg.fsLR",
            Self::SphereRegMsm => "sphere.reg.msm",
        }
    }
}

impl std::fmt::Display for SurfaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.manifest_key())
    }
}

/// A FreeSurfer-derived morphometry metric.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Cortical thickness.
    Thickness,
    /// Curvature.
    Curvature,
    /// Sulcal depth.
    SulcalDepth,
}

impl MetricKind {
    /// All metrics, in build order.
    pub const ALL: [Self; 3] = [Self::Thickness, Self::Curvature, Self::SulcalDepth];

    /// The manifest key for this metric's bilateral entry.
    #[must_use]
    pub const fn manifest_key(self) -> &'static str {
        match self {
            Self::Thickness => keys::THICKNESS,
            Self::Curvature => keys::CURV,
            Self::SulcalDepth => keys::SULC,
        }
    }

    /// The FreeSurfer metric file name, without hemisphere prefix.
    #[must_use]
    pub const fn fs_name(self) -> &'static str {
        match self {
            Self::Thickness => "thickness",
            Self::Curvature => "curv",
            Self::SulcalDepth => "sulc",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.manifest_key())
    }
}
