//! In-memory scene host.
//!
//! A small document with a software rasterizer for solid-colour nodes and
//! baked image fills. Used by tests and the demo binary.

use super::{BoxFuture, NodeId, Primitive, SceneError, SceneHost, SceneNode, SceneResult, SerializableColor, Viewport};
use crate::params::EffectParameters;
use crate::shapes::Uniform;
use image::{Rgba, RgbaImage};
use kurbo::{Affine, Ellipse, Point, Rect, RoundedRect, Shape as KurboShape};
use peniko::Color;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

fn default_true() -> bool {
    true
}

fn default_opacity() -> f64 {
    1.0
}

fn default_radius() -> Uniform<f64> {
    Uniform::Single(0.0)
}

fn default_background() -> SerializableColor {
    SerializableColor::white()
}

/// Serializable description of a node and its subtree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    #[serde(default = "Uuid::new_v4")]
    pub id: NodeId,
    #[serde(default)]
    pub name: String,
    pub primitive: Primitive,
    /// Position relative to the parent.
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub rotation: f64,
    #[serde(default = "default_radius")]
    pub corner_radius: Uniform<f64>,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default = "default_opacity")]
    pub opacity: f64,
    #[serde(default)]
    pub fill: Option<SerializableColor>,
    /// SVG path data for vector nodes, in node-local coordinates.
    #[serde(default)]
    pub outline: Option<String>,
    #[serde(default)]
    pub glass: Option<EffectParameters>,
    #[serde(default)]
    pub children: Vec<NodeSpec>,
}

impl NodeSpec {
    pub fn new(name: &str, primitive: Primitive, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            primitive,
            x,
            y,
            width,
            height,
            rotation: 0.0,
            corner_radius: default_radius(),
            visible: true,
            opacity: 1.0,
            fill: None,
            outline: None,
            glass: None,
            children: Vec::new(),
        }
    }

    pub fn with_fill(mut self, fill: SerializableColor) -> Self {
        self.fill = Some(fill);
        self
    }

    pub fn with_corner_radius(mut self, radius: f64) -> Self {
        self.corner_radius = Uniform::Single(radius);
        self
    }

    pub fn with_glass(mut self, params: EffectParameters) -> Self {
        self.glass = Some(params);
        self
    }

    pub fn with_outline(mut self, path_data: &str) -> Self {
        self.outline = Some(path_data.to_string());
        self
    }

    pub fn with_rotation(mut self, degrees: f64) -> Self {
        self.rotation = degrees;
        self
    }

    pub fn with_child(mut self, child: NodeSpec) -> Self {
        self.children.push(child);
        self
    }
}

/// Serializable scene: page background plus top-level nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneDocument {
    #[serde(default = "default_background")]
    pub background: SerializableColor,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
}

struct Entry {
    name: String,
    primitive: Primitive,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    position: Point,
    width: f64,
    height: f64,
    rotation: f64,
    corner_radius: Uniform<f64>,
    visible: bool,
    opacity: f64,
    fill: Option<SerializableColor>,
    outline: Option<String>,
    glass: Option<EffectParameters>,
    fill_image: Option<RgbaImage>,
    transform_valid: bool,
}

struct Inner {
    root: NodeId,
    background: SerializableColor,
    entries: HashMap<NodeId, Entry>,
    selection: Vec<NodeId>,
    viewport: Viewport,
    opacity_writes: Vec<(NodeId, f64)>,
    pauses: Vec<Duration>,
    rasterize_count: usize,
    fail_next_rasterize: bool,
    fail_outline: bool,
}

type RasterizeHook = Box<dyn FnMut(Rect)>;

/// In-memory [`SceneHost`].
pub struct MemoryScene {
    inner: RefCell<Inner>,
    rasterize_hook: RefCell<Option<RasterizeHook>>,
}

impl Default for MemoryScene {
    fn default() -> Self {
        Self::new(SerializableColor::white())
    }
}

impl MemoryScene {
    /// Create an empty page with the given background.
    pub fn new(background: SerializableColor) -> Self {
        let root = Uuid::new_v4();
        let mut entries = HashMap::new();
        entries.insert(
            root,
            Entry {
                name: "Page".to_string(),
                primitive: Primitive::Page,
                parent: None,
                children: Vec::new(),
                position: Point::ZERO,
                width: 0.0,
                height: 0.0,
                rotation: 0.0,
                corner_radius: default_radius(),
                visible: true,
                opacity: 1.0,
                fill: None,
                outline: None,
                glass: None,
                fill_image: None,
                transform_valid: true,
            },
        );
        Self {
            inner: RefCell::new(Inner {
                root,
                background,
                entries,
                selection: Vec::new(),
                viewport: Viewport::default(),
                opacity_writes: Vec::new(),
                pauses: Vec::new(),
                rasterize_count: 0,
                fail_next_rasterize: false,
                fail_outline: false,
            }),
            rasterize_hook: RefCell::new(None),
        }
    }

    /// Build a scene from a document.
    pub fn from_document(document: SceneDocument) -> Self {
        let scene = Self::new(document.background);
        let root = scene.root();
        for spec in document.nodes {
            scene.add_node(root, spec);
        }
        scene
    }

    /// Parse a JSON [`SceneDocument`].
    pub fn from_json(json: &str) -> SceneResult<Self> {
        let document: SceneDocument =
            serde_json::from_str(json).map_err(|e| SceneError::Other(format!("Invalid scene: {}", e)))?;
        Ok(Self::from_document(document))
    }

    /// The page node.
    pub fn root(&self) -> NodeId {
        self.inner.borrow().root
    }

    /// Append a node (and its subtree) on top of `parent`'s children.
    pub fn add_node(&self, parent: NodeId, spec: NodeSpec) -> NodeId {
        let mut inner = self.inner.borrow_mut();
        Self::insert_spec(&mut inner, parent, spec)
    }

    fn insert_spec(inner: &mut Inner, parent: NodeId, spec: NodeSpec) -> NodeId {
        let id = spec.id;
        inner.entries.insert(
            id,
            Entry {
                name: spec.name,
                primitive: spec.primitive,
                parent: Some(parent),
                children: Vec::new(),
                position: Point::new(spec.x, spec.y),
                width: spec.width,
                height: spec.height,
                rotation: spec.rotation,
                corner_radius: spec.corner_radius,
                visible: spec.visible,
                opacity: spec.opacity,
                fill: spec.fill,
                outline: spec.outline,
                glass: spec.glass,
                fill_image: None,
                transform_valid: true,
            },
        );
        if let Some(p) = inner.entries.get_mut(&parent) {
            p.children.push(id);
        }
        for child in spec.children {
            Self::insert_spec(inner, id, child);
        }
        id
    }

    /// Find the first node with the given name.
    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        let root = self.root();
        let mut stack = vec![root];
        let inner = self.inner.borrow();
        while let Some(id) = stack.pop() {
            let entry = inner.entries.get(&id)?;
            if entry.name == name {
                return Some(id);
            }
            stack.extend(entry.children.iter().rev().copied());
        }
        None
    }

    /// Every glass element on the page.
    pub fn glass_nodes(&self) -> Vec<NodeId> {
        self.glass_nodes_under(&[self.root()])
    }

    fn with_entry<T>(&self, id: NodeId, f: impl FnOnce(&mut Entry) -> T) -> SceneResult<T> {
        let mut inner = self.inner.borrow_mut();
        inner.entries.get_mut(&id).map(f).ok_or(SceneError::NotFound(id))
    }

    pub fn set_position(&self, id: NodeId, x: f64, y: f64) -> SceneResult<()> {
        self.with_entry(id, |e| e.position = Point::new(x, y))
    }

    pub fn resize(&self, id: NodeId, width: f64, height: f64) -> SceneResult<()> {
        self.with_entry(id, |e| {
            e.width = width;
            e.height = height;
        })
    }

    pub fn set_corner_radius(&self, id: NodeId, radius: Uniform<f64>) -> SceneResult<()> {
        self.with_entry(id, |e| e.corner_radius = radius)
    }

    pub fn set_visible(&self, id: NodeId, visible: bool) -> SceneResult<()> {
        self.with_entry(id, |e| e.visible = visible)
    }

    /// Make a node a glass element, or a plain node again.
    pub fn set_glass(&self, id: NodeId, params: Option<EffectParameters>) -> SceneResult<()> {
        self.with_entry(id, |e| e.glass = params)
    }

    /// Make the host report no absolute transform for a node.
    pub fn set_transform_valid(&self, id: NodeId, valid: bool) -> SceneResult<()> {
        self.with_entry(id, |e| e.transform_valid = valid)
    }

    /// Apply a baked image fill to a node.
    pub fn set_fill_image(&self, id: NodeId, image: RgbaImage) -> SceneResult<()> {
        self.with_entry(id, |e| e.fill_image = Some(image))
    }

    pub fn fill_image(&self, id: NodeId) -> Option<RgbaImage> {
        self.inner.borrow().entries.get(&id).and_then(|e| e.fill_image.clone())
    }

    /// Make the next rasterization fail.
    pub fn fail_next_rasterize(&self) {
        self.inner.borrow_mut().fail_next_rasterize = true;
    }

    /// Make outline exports fail.
    pub fn set_fail_outline(&self, fail: bool) {
        self.inner.borrow_mut().fail_outline = fail;
    }

    /// Run `hook` at the start of every rasterization.
    pub fn set_rasterize_hook(&self, hook: impl FnMut(Rect) + 'static) {
        *self.rasterize_hook.borrow_mut() = Some(Box::new(hook));
    }

    /// Every opacity write, in order.
    pub fn opacity_writes(&self) -> Vec<(NodeId, f64)> {
        self.inner.borrow().opacity_writes.clone()
    }

    /// Every pause requested through [`SceneHost::pause`].
    pub fn pauses(&self) -> Vec<Duration> {
        self.inner.borrow().pauses.clone()
    }

    pub fn rasterize_count(&self) -> usize {
        self.inner.borrow().rasterize_count
    }

    fn absolute_position(inner: &Inner, id: NodeId) -> Point {
        let mut position = Point::ZERO;
        let mut current = Some(id);
        while let Some(node) = current {
            let Some(entry) = inner.entries.get(&node) else {
                break;
            };
            position += entry.position.to_vec2();
            current = entry.parent;
        }
        position
    }

    fn run_rasterize_hook(&self, rect: Rect) {
        let hook = self.rasterize_hook.borrow_mut().take();
        if let Some(mut hook) = hook {
            hook(rect);
            let mut slot = self.rasterize_hook.borrow_mut();
            if slot.is_none() {
                *slot = Some(hook);
            }
        }
    }

    fn rasterize_now(&self, rect: Rect) -> SceneResult<RgbaImage> {
        self.run_rasterize_hook(rect);

        let mut inner = self.inner.borrow_mut();
        inner.rasterize_count += 1;
        if inner.fail_next_rasterize {
            inner.fail_next_rasterize = false;
            return Err(SceneError::Rasterize("injected failure".to_string()));
        }
        let width = rect.width().round();
        let height = rect.height().round();
        if !(width >= 1.0 && height >= 1.0) {
            return Err(SceneError::Rasterize(format!("empty region {:?}", rect)));
        }

        let mut image = RgbaImage::from_pixel(width as u32, height as u32, Rgba(inner.background.to_rgba()));
        let root = inner.root;
        let children = inner.entries.get(&root).map(|e| e.children.clone()).unwrap_or_default();
        for child in children {
            Self::paint(&inner, child, 1.0, rect, &mut image);
        }
        Ok(image)
    }

    fn paint(inner: &Inner, id: NodeId, parent_opacity: f64, rect: Rect, image: &mut RgbaImage) {
        let Some(entry) = inner.entries.get(&id) else {
            return;
        };
        if !entry.visible {
            return;
        }
        let opacity = parent_opacity * entry.opacity.clamp(0.0, 1.0);
        if opacity <= 0.0 {
            return;
        }

        let origin = Self::absolute_position(inner, id);
        let bounds = Rect::new(origin.x, origin.y, origin.x + entry.width, origin.y + entry.height);

        if entry.fill.is_some() || entry.fill_image.is_some() {
            let radius = entry
                .corner_radius
                .unwrap_or(0.0)
                .clamp(0.0, (entry.width.min(entry.height) / 2.0).max(0.0));
            let rounded = RoundedRect::from_rect(bounds, radius);
            let ellipse = Ellipse::from_rect(bounds);
            let contains = |p: Point| match entry.primitive {
                Primitive::Rectangle | Primitive::Frame => rounded.contains(p),
                Primitive::Ellipse => ellipse.contains(p),
                _ => bounds.contains(p),
            };

            let area = bounds.intersect(rect);
            let x_start = (area.x0 - rect.x0).floor().max(0.0) as u32;
            let y_start = (area.y0 - rect.y0).floor().max(0.0) as u32;
            let x_end = ((area.x1 - rect.x0).ceil().max(0.0) as u32).min(image.width());
            let y_end = ((area.y1 - rect.y0).ceil().max(0.0) as u32).min(image.height());

            for py in y_start..y_end {
                for px in x_start..x_end {
                    let p = Point::new(rect.x0 + px as f64 + 0.5, rect.y0 + py as f64 + 0.5);
                    if !contains(p) {
                        continue;
                    }
                    let src = match &entry.fill_image {
                        Some(fill) if fill.width() > 0 && fill.height() > 0 => {
                            let fx = ((p.x - bounds.x0).floor().max(0.0) as u32).min(fill.width() - 1);
                            let fy = ((p.y - bounds.y0).floor().max(0.0) as u32).min(fill.height() - 1);
                            let [r, g, b, a] = fill.get_pixel(fx, fy).0;
                            Color::from_rgba8(r, g, b, a)
                        }
                        _ => match entry.fill {
                            Some(color) => Color::from(color),
                            None => continue,
                        },
                    };
                    blend_over(image.get_pixel_mut(px, py), src, opacity);
                }
            }
        }

        for &child in &entry.children {
            Self::paint(inner, child, opacity, rect, image);
        }
    }

    fn outline_svg(entry: &Entry) -> String {
        let (w, h) = (entry.width, entry.height);
        let body = match (entry.primitive, &entry.outline) {
            (_, Some(d)) => format!(r#"<path d="{}" fill="black"/>"#, d),
            (Primitive::Ellipse, None) => format!(
                r#"<ellipse cx="{}" cy="{}" rx="{}" ry="{}" fill="black"/>"#,
                w / 2.0,
                h / 2.0,
                w / 2.0,
                h / 2.0
            ),
            _ => format!(
                r#"<rect width="{}" height="{}" rx="{}" fill="black"/>"#,
                w,
                h,
                entry.corner_radius.unwrap_or(0.0).max(0.0)
            ),
        };
        format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">{body}</svg>"#
        )
    }
}

/// Source-over compositing of `src`, faded by `opacity`, onto `dst`.
fn blend_over(dst: &mut Rgba<u8>, src: Color, opacity: f64) {
    let [sr, sg, sb, sa] = src.multiply_alpha(opacity as f32).components;
    let [r, g, b, a] = dst.0;
    let [dr, dg, db, da] = Color::from_rgba8(r, g, b, a).components;
    let over = |s: f32, d: f32| s * sa + d * (1.0 - sa);
    let out = Color::new([over(sr, dr), over(sg, dg), over(sb, db), sa + da * (1.0 - sa)]).to_rgba8();
    dst.0 = [out.r, out.g, out.b, out.a];
}

impl SceneHost for MemoryScene {
    fn page(&self) -> NodeId {
        self.root()
    }

    fn node(&self, id: NodeId) -> Option<SceneNode> {
        let inner = self.inner.borrow();
        let entry = inner.entries.get(&id)?;
        let absolute = Self::absolute_position(&inner, id);
        Some(SceneNode {
            id,
            name: entry.name.clone(),
            primitive: entry.primitive,
            parent: entry.parent,
            children: entry.children.clone(),
            visible: entry.visible,
            opacity: entry.opacity,
            absolute_transform: entry
                .transform_valid
                .then(|| Affine::translate(absolute.to_vec2())),
            position: entry.position,
            width: entry.width,
            height: entry.height,
            rotation: entry.rotation,
            corner_radius: entry.corner_radius,
            glass: entry.glass,
        })
    }

    fn set_opacity(&self, id: NodeId, opacity: f64) -> SceneResult<()> {
        self.with_entry(id, |e| e.opacity = opacity)?;
        self.inner.borrow_mut().opacity_writes.push((id, opacity));
        Ok(())
    }

    fn set_effect_parameters(&self, id: NodeId, params: EffectParameters) -> SceneResult<()> {
        self.with_entry(id, |e| match &mut e.glass {
            Some(glass) => {
                *glass = params;
                Ok(())
            }
            None => Err(SceneError::Other(format!("Node {} is not a glass element", id))),
        })?
    }

    fn selection(&self) -> Vec<NodeId> {
        self.inner.borrow().selection.clone()
    }

    fn set_selection(&self, nodes: &[NodeId]) -> SceneResult<()> {
        self.inner.borrow_mut().selection = nodes.to_vec();
        Ok(())
    }

    fn viewport(&self) -> Viewport {
        self.inner.borrow().viewport
    }

    fn set_viewport(&self, viewport: Viewport) -> SceneResult<()> {
        self.inner.borrow_mut().viewport = viewport;
        Ok(())
    }

    fn rasterize(&self, rect: Rect) -> BoxFuture<'_, SceneResult<RgbaImage>> {
        Box::pin(async move { self.rasterize_now(rect) })
    }

    fn export_outline(&self, id: NodeId) -> BoxFuture<'_, SceneResult<String>> {
        Box::pin(async move {
            let inner = self.inner.borrow();
            if inner.fail_outline {
                return Err(SceneError::Export(format!("cannot export outline of {}", id)));
            }
            let entry = inner.entries.get(&id).ok_or(SceneError::NotFound(id))?;
            Ok(Self::outline_svg(entry))
        })
    }

    fn pause(&self, duration: Duration) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.inner.borrow_mut().pauses.push(duration);
        })
    }
}
