//! Shape descriptors and classification.
//!
//! Every downstream component consumes the [`ShapeDescriptor`] produced once
//! by [`classify`], instead of probing host nodes for capabilities.

mod classify;
mod uniform;

pub use classify::{classify, classify_kind};
pub use uniform::Uniform;

use serde::{Deserialize, Serialize};

/// Geometric family of a glass shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShapeKind {
    /// Axis-aligned (optionally rounded) rectangle.
    Rectangle,
    /// Axis-aligned ellipse.
    Ellipse,
    /// Anything else: rotated primitives, boolean results, free paths.
    Complex,
}

impl ShapeKind {
    pub fn name(self) -> &'static str {
        match self {
            ShapeKind::Rectangle => "rectangle",
            ShapeKind::Ellipse => "ellipse",
            ShapeKind::Complex => "complex",
        }
    }
}

/// Geometry of the shape being rendered. Immutable per render.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapeDescriptor {
    pub width: f64,
    pub height: f64,
    pub corner_radius: Uniform<f64>,
    pub kind: ShapeKind,
}

impl ShapeDescriptor {
    pub fn new(width: f64, height: f64, corner_radius: Uniform<f64>, kind: ShapeKind) -> Self {
        Self {
            width,
            height,
            corner_radius,
            kind,
        }
    }

    /// Plain rectangle.
    pub fn rectangle(width: f64, height: f64, corner_radius: f64) -> Self {
        Self::new(width, height, Uniform::Single(corner_radius), ShapeKind::Rectangle)
    }

    /// Plain ellipse.
    pub fn ellipse(width: f64, height: f64) -> Self {
        Self::new(width, height, Uniform::Single(0.0), ShapeKind::Ellipse)
    }

    /// Half width and half height.
    pub fn half_extents(&self) -> (f64, f64) {
        (self.width / 2.0, self.height / 2.0)
    }

    /// Corner radius actually used for rendering: heterogeneous radii
    /// render square, and the radius never exceeds half the smaller side.
    pub fn effective_corner_radius(&self) -> f64 {
        let radius = self.corner_radius.unwrap_or(0.0);
        let limit = (self.width.min(self.height) / 2.0).max(0.0);
        if radius.is_finite() {
            radius.clamp(0.0, limit)
        } else {
            0.0
        }
    }

    /// Degraded treatment of a shape whose outline could not be used:
    /// its bounding box as a square-cornered rectangle.
    pub fn bounding_rectangle(&self) -> Self {
        Self::rectangle(self.width, self.height, 0.0)
    }
}

/// Agreement of descriptors across a multi-target batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapeSummary {
    pub count: usize,
    pub width: Uniform<f64>,
    pub height: Uniform<f64>,
    pub corner_radius: Uniform<f64>,
    pub kind: Uniform<ShapeKind>,
}

impl ShapeSummary {
    /// Summarize descriptors. `None` when there are none.
    pub fn summarize<'a>(descriptors: impl IntoIterator<Item = &'a ShapeDescriptor>) -> Option<Self> {
        let mut summary: Option<Self> = None;
        for d in descriptors {
            summary = Some(match summary {
                None => Self {
                    count: 1,
                    width: Uniform::Single(d.width),
                    height: Uniform::Single(d.height),
                    corner_radius: d.corner_radius,
                    kind: Uniform::Single(d.kind),
                },
                Some(s) => Self {
                    count: s.count + 1,
                    width: s.width.merge(Uniform::Single(d.width)),
                    height: s.height.merge(Uniform::Single(d.height)),
                    corner_radius: s.corner_radius.merge(d.corner_radius),
                    kind: s.kind.merge(Uniform::Single(d.kind)),
                },
            });
        }
        summary
    }
}
