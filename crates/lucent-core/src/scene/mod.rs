//! Scene host abstraction.
//!
//! The compositor never touches a design document directly. Everything it
//! needs from the host (node geometry, stacking order, visibility, raster
//! snapshots, vector outlines, selection and viewport) goes through the
//! [`SceneHost`] trait. Suspending operations return a [`BoxFuture`].

mod memory;

pub use memory::{MemoryScene, NodeSpec, SceneDocument};

use crate::params::EffectParameters;
use crate::shapes::Uniform;
use image::RgbaImage;
use kurbo::{Affine, Point, Rect};
use peniko::Color;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for scene nodes.
pub type NodeId = Uuid;

/// Scene host errors.
#[derive(Debug, Error)]
pub enum SceneError {
    #[error("Node not found: {0}")]
    NotFound(NodeId),
    #[error("Node {0} has no valid absolute transform")]
    MissingTransform(NodeId),
    #[error("Rasterization failed: {0}")]
    Rasterize(String),
    #[error("Outline export failed: {0}")]
    Export(String),
    #[error("Scene error: {0}")]
    Other(String),
}

/// Result type for scene operations.
pub type SceneResult<T> = Result<T, SceneError>;

/// Boxed future for host operations.
///
/// No `Send` bound: the host and the coordinator share a single logical
/// thread of control.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Serializable color representation (RGBA8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializableColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl SerializableColor {
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn white() -> Self {
        Self::new(255, 255, 255, 255)
    }

    pub fn to_rgba(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl From<SerializableColor> for Color {
    fn from(color: SerializableColor) -> Self {
        Color::from_rgba8(color.r, color.g, color.b, color.a)
    }
}

/// Primitive node type as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Primitive {
    Page,
    Frame,
    Group,
    Rectangle,
    Ellipse,
    Vector,
    BooleanOperation,
    Text,
    Other,
}

/// Snapshot of one scene node, taken at the moment it was requested.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneNode {
    pub id: NodeId,
    pub name: String,
    pub primitive: Primitive,
    pub parent: Option<NodeId>,
    /// Children, back to front. A higher index is stacked above a lower one.
    pub children: Vec<NodeId>,
    pub visible: bool,
    pub opacity: f64,
    /// Absolute (canvas space) transform. `None` when the host cannot
    /// provide one.
    pub absolute_transform: Option<Affine>,
    /// Position relative to the parent.
    pub position: Point,
    pub width: f64,
    pub height: f64,
    /// Rotation in degrees.
    pub rotation: f64,
    pub corner_radius: Uniform<f64>,
    /// Effect parameters, present only on glass elements.
    pub glass: Option<EffectParameters>,
}

impl SceneNode {
    /// Absolute bounding box from the transform's translation and the
    /// node size. `None` if the transform is missing or not finite.
    pub fn absolute_bounds(&self) -> Option<Rect> {
        let transform = self.absolute_transform?;
        let coeffs = transform.as_coeffs();
        if coeffs.iter().any(|c| !c.is_finite()) || !self.width.is_finite() || !self.height.is_finite() {
            return None;
        }
        let (x, y) = (coeffs[4], coeffs[5]);
        Some(Rect::new(x, y, x + self.width, y + self.height))
    }

    /// Bounding box from the parent-relative position.
    pub fn local_bounds(&self) -> Rect {
        Rect::new(
            self.position.x,
            self.position.y,
            self.position.x + self.width,
            self.position.y + self.height,
        )
    }

    /// Whether this node is a glass element the coordinator may track.
    pub fn is_eligible(&self) -> bool {
        self.glass.is_some()
    }
}

/// Canvas viewport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub center: Point,
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            center: Point::ZERO,
            zoom: 1.0,
        }
    }
}

/// Interface to the host design document.
pub trait SceneHost {
    /// The page holding every other node.
    fn page(&self) -> NodeId;

    /// Snapshot a node. `None` if it no longer exists.
    fn node(&self, id: NodeId) -> Option<SceneNode>;

    /// Set a node's opacity.
    fn set_opacity(&self, id: NodeId, opacity: f64) -> SceneResult<()>;

    /// Store new effect parameters on a glass element.
    fn set_effect_parameters(&self, id: NodeId, params: EffectParameters) -> SceneResult<()>;

    /// Current selection, in selection order.
    fn selection(&self) -> Vec<NodeId>;

    /// Replace the current selection.
    fn set_selection(&self, nodes: &[NodeId]) -> SceneResult<()>;

    /// Current viewport.
    fn viewport(&self) -> Viewport;

    /// Move the viewport.
    fn set_viewport(&self, viewport: Viewport) -> SceneResult<()>;

    /// Rasterize exactly `rect` (canvas coordinates, 1px per unit).
    fn rasterize(&self, rect: Rect) -> BoxFuture<'_, SceneResult<RgbaImage>>;

    /// Export a node's vector outline as an SVG document.
    fn export_outline(&self, id: NodeId) -> BoxFuture<'_, SceneResult<String>>;

    /// Yield to the host for `duration`.
    fn pause(&self, duration: Duration) -> BoxFuture<'_, ()>;

    /// Collect every glass element in the given subtrees, depth first.
    fn glass_nodes_under(&self, roots: &[NodeId]) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack: Vec<NodeId> = roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let Some(node) = self.node(id) else {
                continue;
            };
            if node.is_eligible() {
                found.push(id);
            }
            stack.extend(node.children.iter().rev().copied());
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_at(x: f64, y: f64) -> SceneNode {
        SceneNode {
            id: Uuid::new_v4(),
            name: "node".to_string(),
            primitive: Primitive::Rectangle,
            parent: None,
            children: Vec::new(),
            visible: true,
            opacity: 1.0,
            absolute_transform: Some(Affine::translate((x, y))),
            position: Point::new(5.0, 6.0),
            width: 40.0,
            height: 30.0,
            rotation: 0.0,
            corner_radius: Uniform::Single(0.0),
            glass: None,
        }
    }

    #[test]
    fn test_absolute_bounds_from_translation() {
        let node = node_at(100.0, 50.0);
        let bounds = node.absolute_bounds().unwrap();
        assert!((bounds.x0 - 100.0).abs() < f64::EPSILON);
        assert!((bounds.y1 - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_absolute_bounds_missing_transform() {
        let mut node = node_at(0.0, 0.0);
        node.absolute_transform = None;
        assert!(node.absolute_bounds().is_none());

        node.absolute_transform = Some(Affine::translate((f64::NAN, 0.0)));
        assert!(node.absolute_bounds().is_none());
    }

    #[test]
    fn test_local_bounds() {
        let node = node_at(0.0, 0.0);
        let bounds = node.local_bounds();
        assert!((bounds.x0 - 5.0).abs() < f64::EPSILON);
        assert!((bounds.y1 - 36.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_color_conversion() {
        let color: Color = SerializableColor::new(10, 20, 30, 128).into();
        let rgba = color.to_rgba8();
        assert_eq!((rgba.r, rgba.g, rgba.b, rgba.a), (10, 20, 30, 128));
    }
}
