//! Shape classification.

use super::{ShapeDescriptor, ShapeKind};
use crate::scene::{Primitive, SceneNode};

/// Classify a primitive type and rotation.
///
/// Only unrotated rectangles and ellipses have analytic distance formulas;
/// everything else is complex. Never fails.
pub fn classify_kind(primitive: Primitive, rotation: f64) -> ShapeKind {
    match primitive {
        Primitive::Rectangle if rotation == 0.0 => ShapeKind::Rectangle,
        Primitive::Ellipse if rotation == 0.0 => ShapeKind::Ellipse,
        _ => ShapeKind::Complex,
    }
}

/// Build the descriptor for a scene node.
pub fn classify(node: &SceneNode) -> ShapeDescriptor {
    let kind = classify_kind(node.primitive, node.rotation);
    log::debug!("Classified node {} ({:?}) as {}", node.id, node.primitive, kind.name());
    ShapeDescriptor::new(node.width, node.height, node.corner_radius, kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::Uniform;
    use kurbo::{Affine, Point};
    use uuid::Uuid;

    fn node(primitive: Primitive, rotation: f64) -> SceneNode {
        SceneNode {
            id: Uuid::new_v4(),
            name: "shape".to_string(),
            primitive,
            parent: None,
            children: Vec::new(),
            visible: true,
            opacity: 1.0,
            absolute_transform: Some(Affine::IDENTITY),
            position: Point::ZERO,
            width: 200.0,
            height: 100.0,
            rotation,
            corner_radius: Uniform::Single(50.0),
            glass: None,
        }
    }

    #[test]
    fn test_unrotated_primitives() {
        assert_eq!(classify_kind(Primitive::Rectangle, 0.0), ShapeKind::Rectangle);
        assert_eq!(classify_kind(Primitive::Ellipse, 0.0), ShapeKind::Ellipse);
        assert_eq!(classify_kind(Primitive::Ellipse, -0.0), ShapeKind::Ellipse);
    }

    #[test]
    fn test_rotated_primitives_are_complex() {
        assert_eq!(classify_kind(Primitive::Rectangle, 15.0), ShapeKind::Complex);
        assert_eq!(classify_kind(Primitive::Ellipse, 0.001), ShapeKind::Complex);
    }

    #[test]
    fn test_other_primitives_are_complex() {
        for primitive in [
            Primitive::Vector,
            Primitive::BooleanOperation,
            Primitive::Frame,
            Primitive::Text,
            Primitive::Other,
        ] {
            assert_eq!(classify_kind(primitive, 0.0), ShapeKind::Complex);
        }
        assert_eq!(classify_kind(Primitive::Rectangle, f64::NAN), ShapeKind::Complex);
    }

    #[test]
    fn test_classify_is_stable() {
        let n = node(Primitive::Rectangle, 0.0);
        let first = classify(&n);
        let second = classify(&n);
        assert_eq!(first, second);
        assert_eq!(first.kind, ShapeKind::Rectangle);
        assert_eq!(first.corner_radius, Uniform::Single(50.0));
    }
}
