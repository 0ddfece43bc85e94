//! One render cycle: classify, capture, composite.

use crate::protocol::ProtocolError;
use crate::writeback::WriteBackError;
use image::RgbaImage;
use lucent_core::{
    classify, CaptureError, NodeId, RegionCapture, SceneError, SceneHost, ShapeDescriptor, ShapeKind, OFFSET,
};
use lucent_render::{CompositorError, DistanceField, DistanceFieldBuilder, DistanceFieldError, OpticalCompositor};
use thiserror::Error;

/// Render cycle errors.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("Node not found: {0}")]
    NotFound(NodeId),
    #[error("Node {0} is not a glass element")]
    NotEligible(NodeId),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Compositor(#[from] CompositorError),
    #[error(transparent)]
    Scene(#[from] SceneError),
    #[error(transparent)]
    DistanceField(#[from] DistanceFieldError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    WriteBack(#[from] WriteBackError),
}

/// Result type for render cycles.
pub type CycleResult<T> = Result<T, CycleError>;

/// Output of one cycle, padding already removed.
#[derive(Debug, Clone)]
pub struct RenderedGlass {
    pub node: NodeId,
    /// Descriptor as classified.
    pub descriptor: ShapeDescriptor,
    /// Descriptor actually rendered (the bounding box after a fallback).
    pub rendered: ShapeDescriptor,
    pub image: RgbaImage,
    pub distance_field_source: Option<String>,
    /// The outline could not be used and the bounding box was rendered.
    pub degraded: bool,
}

impl RenderedGlass {
    pub fn shape_kind(&self) -> ShapeKind {
        self.rendered.kind
    }
}

pub struct RenderCycle;

impl RenderCycle {
    /// Render the glass element `node` against what is currently behind it.
    pub async fn run<H: SceneHost + ?Sized>(
        host: &H,
        compositor: &mut OpticalCompositor,
        node: NodeId,
    ) -> CycleResult<RenderedGlass> {
        let snapshot = host.node(node).ok_or(CycleError::NotFound(node))?;
        let params = snapshot.glass.ok_or(CycleError::NotEligible(node))?;
        let descriptor = classify(&snapshot);

        let (rendered, field, source, degraded) = if descriptor.kind == ShapeKind::Complex {
            match Self::outline_field(host, node, &descriptor).await {
                Ok((svg, field)) => (descriptor, Some(field), Some(svg), false),
                Err(e) => {
                    log::warn!("Failed to process complex shape {}: {}, using its bounding box", node, e);
                    (descriptor.bounding_rectangle(), None, None, true)
                }
            }
        } else {
            (descriptor, None, None, false)
        };

        let region = RegionCapture::new(host).capture(node).await?;
        log::debug!(
            "Captured {}x{} for {} ({} suppressed)",
            region.bitmap.width(),
            region.bitmap.height(),
            node,
            region.suppressed.len()
        );

        let frame = compositor.composite(region.bitmap, &rendered, field, &params)?;
        Ok(RenderedGlass {
            node,
            descriptor,
            rendered,
            image: frame.cropped(),
            distance_field_source: source,
            degraded,
        })
    }

    async fn outline_field<H: SceneHost + ?Sized>(
        host: &H,
        node: NodeId,
        descriptor: &ShapeDescriptor,
    ) -> CycleResult<(String, DistanceField)> {
        let svg = host.export_outline(node).await?;
        let field = DistanceFieldBuilder::new(OFFSET).build(&svg, descriptor.width, descriptor.height)?;
        Ok((svg, field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lucent_core::{EffectParameters, MemoryScene, NodeSpec, Primitive, SerializableColor};

    fn scene_with(spec: NodeSpec) -> (MemoryScene, NodeId) {
        let scene = MemoryScene::new(SerializableColor::new(30, 60, 90, 255));
        let id = scene.add_node(scene.root(), spec);
        (scene, id)
    }

    #[test]
    fn test_rectangle_cycle() {
        let (scene, id) = scene_with(
            NodeSpec::new("glass", Primitive::Rectangle, 40.0, 40.0, 200.0, 100.0)
                .with_corner_radius(50.0)
                .with_fill(SerializableColor::new(255, 0, 0, 255))
                .with_glass(EffectParameters::default()),
        );
        let mut compositor = OpticalCompositor::new().unwrap();
        let glass = pollster::block_on(RenderCycle::run(&scene, &mut compositor, id)).unwrap();

        assert_eq!(glass.image.dimensions(), (200, 100));
        assert_eq!(glass.shape_kind(), ShapeKind::Rectangle);
        assert!(!glass.degraded);
        // The glass's own red fill is hidden during capture.
        assert!(glass.image.pixels().all(|p| p.0 == [30, 60, 90, 255]));
    }

    #[test]
    fn test_complex_cycle_uses_outline() {
        let (scene, id) = scene_with(
            NodeSpec::new("star", Primitive::Vector, 20.0, 20.0, 100.0, 100.0)
                .with_outline("M50 0 L100 100 L0 100 Z")
                .with_glass(EffectParameters::default()),
        );
        let mut compositor = OpticalCompositor::new().unwrap();
        let glass = pollster::block_on(RenderCycle::run(&scene, &mut compositor, id)).unwrap();

        assert_eq!(glass.shape_kind(), ShapeKind::Complex);
        assert!(glass.distance_field_source.as_deref().is_some_and(|s| s.contains("M50 0")));
        assert!(!glass.degraded);
    }

    #[test]
    fn test_complex_cycle_degrades_on_export_failure() {
        let (scene, id) = scene_with(
            NodeSpec::new("star", Primitive::Vector, 20.0, 20.0, 100.0, 100.0)
                .with_outline("M50 0 L100 100 L0 100 Z")
                .with_glass(EffectParameters::default()),
        );
        scene.set_fail_outline(true);
        let mut compositor = OpticalCompositor::new().unwrap();
        let glass = pollster::block_on(RenderCycle::run(&scene, &mut compositor, id)).unwrap();

        assert!(glass.degraded);
        assert_eq!(glass.descriptor.kind, ShapeKind::Complex);
        assert_eq!(glass.shape_kind(), ShapeKind::Rectangle);
        assert!(glass.distance_field_source.is_none());
    }

    #[test]
    fn test_cycle_errors() {
        let (scene, id) = scene_with(NodeSpec::new("plain", Primitive::Rectangle, 0.0, 0.0, 10.0, 10.0));
        let mut compositor = OpticalCompositor::new().unwrap();
        assert!(matches!(
            pollster::block_on(RenderCycle::run(&scene, &mut compositor, id)),
            Err(CycleError::NotEligible(_))
        ));

        scene.set_glass(id, Some(EffectParameters::default())).unwrap();
        scene.fail_next_rasterize();
        assert!(matches!(
            pollster::block_on(RenderCycle::run(&scene, &mut compositor, id)),
            Err(CycleError::Capture(CaptureError::Rasterize(_)))
        ));
        assert_eq!(scene.node(id).unwrap().opacity, 1.0);
    }
}
