//! Optical effect parameters.

use crate::shapes::Uniform;
use serde::{Deserialize, Serialize};

/// The four primary optical controls consumed by the compositor.
///
/// All values are pixel-scale magnitudes. `frost_radius == 0` disables
/// the blur.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectParameters {
    /// Width of the refracting band just inside the shape boundary.
    #[serde(alias = "edge")]
    pub edge_thickness: f64,
    /// Maximum displacement at the boundary.
    #[serde(alias = "strength")]
    pub refraction_strength: f64,
    /// Per-channel displacement split.
    #[serde(alias = "ca")]
    pub chromatic_aberration: f64,
    /// Blur radius.
    #[serde(alias = "frost")]
    pub frost_radius: f64,
}

impl Default for EffectParameters {
    fn default() -> Self {
        Self {
            edge_thickness: 20.0,
            refraction_strength: 25.0,
            chromatic_aberration: 5.0,
            frost_radius: 0.0,
        }
    }
}

impl EffectParameters {
    pub fn new(
        edge_thickness: f64,
        refraction_strength: f64,
        chromatic_aberration: f64,
        frost_radius: f64,
    ) -> Self {
        Self {
            edge_thickness,
            refraction_strength,
            chromatic_aberration,
            frost_radius,
        }
    }

    /// Replace non-finite values with zero and clamp the blur radius to be
    /// non-negative. Never fails.
    pub fn sanitized(self) -> Self {
        let finite = |v: f64| if v.is_finite() { v } else { 0.0 };
        Self {
            edge_thickness: finite(self.edge_thickness),
            refraction_strength: finite(self.refraction_strength),
            chromatic_aberration: finite(self.chromatic_aberration),
            frost_radius: finite(self.frost_radius).max(0.0),
        }
    }
}

/// Per-field agreement across several glass elements.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSummary {
    pub edge_thickness: Uniform<f64>,
    pub refraction_strength: Uniform<f64>,
    pub chromatic_aberration: Uniform<f64>,
    pub frost_radius: Uniform<f64>,
}

impl ParameterSummary {
    /// Summarize a set of parameters. `None` for an empty set.
    pub fn from_params<'a>(params: impl IntoIterator<Item = &'a EffectParameters>) -> Option<Self> {
        let mut iter = params.into_iter();
        let first = iter.next()?;
        let mut summary = Self {
            edge_thickness: Uniform::Single(first.edge_thickness),
            refraction_strength: Uniform::Single(first.refraction_strength),
            chromatic_aberration: Uniform::Single(first.chromatic_aberration),
            frost_radius: Uniform::Single(first.frost_radius),
        };
        for p in iter {
            summary.edge_thickness = summary.edge_thickness.merge(Uniform::Single(p.edge_thickness));
            summary.refraction_strength = summary
                .refraction_strength
                .merge(Uniform::Single(p.refraction_strength));
            summary.chromatic_aberration = summary
                .chromatic_aberration
                .merge(Uniform::Single(p.chromatic_aberration));
            summary.frost_radius = summary.frost_radius.merge(Uniform::Single(p.frost_radius));
        }
        Some(summary)
    }
}
