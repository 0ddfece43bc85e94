//! Region capture.
//!
//! Produces a padded snapshot of whatever lies behind a glass element. The
//! element itself and every visible node stacked above it (up to three
//! ancestor levels) are hidden for the duration of the snapshot and then
//! restored, on every exit path.

use crate::scene::{NodeId, SceneError, SceneHost, SceneNode};
use image::RgbaImage;
use kurbo::Rect;
use thiserror::Error;

/// Padding added on all four sides of the capture rectangle, in canvas
/// pixels. Stripped again before write-back.
pub const OFFSET: f64 = 20.0;

/// Number of ancestor levels searched for occluders (target, parent,
/// grandparent).
const OCCLUDER_LEVELS: usize = 3;

/// Capture errors.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Capture target not found: {0}")]
    TargetMissing(NodeId),
    #[error("Region rasterization failed: {0}")]
    Rasterize(#[source] SceneError),
}

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;

/// A node hidden for the capture and the opacity it had before.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Suppressed {
    pub node: NodeId,
    pub original_opacity: f64,
}

/// A snapshot of the area behind a glass element.
#[derive(Debug, Clone)]
pub struct CapturedRegion {
    pub bitmap: RgbaImage,
    /// Rasterized rectangle in canvas coordinates, padding included.
    pub rect: Rect,
    /// Nodes hidden while rasterizing, in suppression order.
    pub suppressed: Vec<Suppressed>,
}

/// Expand a bounding box by [`OFFSET`] on every side.
pub fn capture_rect(bounds: Rect) -> Rect {
    bounds.inflate(OFFSET, OFFSET)
}

fn overlaps(a: Rect, b: Rect) -> bool {
    a.x0 < b.x1 && a.x1 > b.x0 && a.y0 < b.y1 && a.y1 > b.y0
}

/// Find the visible nodes stacked above `target` that overlap `bounds`.
///
/// Walks the target's siblings, its parent's siblings and its
/// grandparent's siblings. Only siblings with a higher stacking index than
/// the node on the path to the target count. Candidates without a valid
/// transform are skipped.
pub fn find_occluders<H: SceneHost + ?Sized>(host: &H, target: &SceneNode, bounds: Rect) -> Vec<NodeId> {
    let mut occluders = Vec::new();
    let mut level = target.clone();

    for _ in 0..OCCLUDER_LEVELS {
        let Some(parent) = level.parent.and_then(|p| host.node(p)) else {
            break;
        };
        let Some(index) = parent.children.iter().position(|&c| c == level.id) else {
            log::warn!("Node {} missing from its parent's children", level.id);
            break;
        };

        for &sibling_id in &parent.children[index + 1..] {
            let Some(sibling) = host.node(sibling_id) else {
                continue;
            };
            if !sibling.visible {
                continue;
            }
            match sibling.absolute_bounds() {
                Some(sibling_bounds) if overlaps(sibling_bounds, bounds) => occluders.push(sibling_id),
                Some(_) => {}
                None => log::warn!("Skipping occluder candidate {} without a valid transform", sibling_id),
            }
        }

        level = parent;
    }

    occluders
}

/// Records hidden nodes and restores each of them exactly once.
///
/// Restoration happens in [`SuppressionGuard::restore`], or on drop if the
/// guard is abandoned.
pub struct SuppressionGuard<'a, H: SceneHost + ?Sized> {
    host: &'a H,
    entries: Vec<Suppressed>,
    restored: bool,
}

impl<'a, H: SceneHost + ?Sized> SuppressionGuard<'a, H> {
    pub fn new(host: &'a H) -> Self {
        Self {
            host,
            entries: Vec::new(),
            restored: false,
        }
    }

    /// Hide a node, remembering its opacity. A node that cannot be hidden
    /// is logged and not recorded.
    pub fn suppress(&mut self, node: NodeId, original_opacity: f64) {
        if self.entries.iter().any(|e| e.node == node) {
            return;
        }
        match self.host.set_opacity(node, 0.0) {
            Ok(()) => self.entries.push(Suppressed { node, original_opacity }),
            Err(e) => log::warn!("Could not hide {} for capture: {}", node, e),
        }
    }

    pub fn entries(&self) -> &[Suppressed] {
        &self.entries
    }

    /// Restore every recorded node and return the records.
    pub fn restore(mut self) -> Vec<Suppressed> {
        self.restore_all();
        std::mem::take(&mut self.entries)
    }

    fn restore_all(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;
        for entry in self.entries.iter().rev() {
            if let Err(e) = self.host.set_opacity(entry.node, entry.original_opacity) {
                log::error!("Failed to restore opacity of {}: {}", entry.node, e);
            }
        }
    }
}

impl<H: SceneHost + ?Sized> Drop for SuppressionGuard<'_, H> {
    fn drop(&mut self) {
        self.restore_all();
    }
}

/// Captures the background of glass elements from a host.
pub struct RegionCapture<'a, H: SceneHost + ?Sized> {
    host: &'a H,
}

impl<'a, H: SceneHost + ?Sized> RegionCapture<'a, H> {
    pub fn new(host: &'a H) -> Self {
        Self { host }
    }

    /// Snapshot the padded area behind `target` with the target and its
    /// occluders hidden.
    ///
    /// If the target has no usable absolute transform, its local position
    /// is used and no occluders are hidden.
    pub async fn capture(&self, target: NodeId) -> CaptureResult<CapturedRegion> {
        let node = self.host.node(target).ok_or(CaptureError::TargetMissing(target))?;

        let (rect, occluders) = match node.absolute_bounds() {
            Some(bounds) => (capture_rect(bounds), find_occluders(self.host, &node, bounds)),
            None => {
                log::warn!(
                    "Node {} has no valid absolute transform, capturing from local position without occlusion handling",
                    target
                );
                (capture_rect(node.local_bounds()), Vec::new())
            }
        };
        log::debug!("Capturing {:?} for {} with {} occluders", rect, target, occluders.len());

        let mut guard = SuppressionGuard::new(self.host);
        guard.suppress(target, node.opacity);
        for id in occluders {
            if let Some(occluder) = self.host.node(id) {
                guard.suppress(id, occluder.opacity);
            }
        }

        let result = self.host.rasterize(rect).await;
        let suppressed = guard.restore();
        let bitmap = result.map_err(CaptureError::Rasterize)?;

        Ok(CapturedRegion {
            bitmap,
            rect,
            suppressed,
        })
    }
}
