//! Lucent Core Library
//!
//! Platform-agnostic data model for the liquid-glass compositor: shape
//! classification, effect parameters, the scene host seam, region capture
//! and the tracking state used by the sync coordinator.

pub mod capture;
pub mod params;
pub mod scene;
pub mod shapes;
pub mod tracking;

pub use capture::{CaptureError, CaptureResult, CapturedRegion, RegionCapture, Suppressed, OFFSET};
pub use params::{EffectParameters, ParameterSummary};
pub use scene::{
    BoxFuture, MemoryScene, NodeId, NodeSpec, Primitive, SceneDocument, SceneError, SceneHost, SceneNode,
    SceneResult, SerializableColor, Viewport,
};
pub use shapes::{classify, ShapeDescriptor, ShapeKind, ShapeSummary, Uniform};
pub use tracking::{GeometrySnapshot, SyncState, TrackedTarget};
