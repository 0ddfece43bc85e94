//! Messages between the coordinator and its host.
//!
//! Bitmaps travel as PNG data URLs.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::RgbaImage;
use lucent_core::{EffectParameters, NodeId, ParameterSummary, ShapeDescriptor, ShapeKind, ShapeSummary};
use lucent_render::CompositorError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Not a PNG data URL")]
    NotDataUrl,
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Invalid image payload: {0}")]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Encode(#[from] CompositorError),
}

/// Events fed to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Inbound {
    /// Render one glass element now.
    Render { node: NodeId },
    /// Re-render every glass element under `roots` (the whole page when
    /// empty).
    Batch {
        #[serde(default)]
        roots: Vec<NodeId>,
    },
    /// Stop a running batch.
    Interrupt,
    /// The host selection changed.
    SelectionChanged { selection: Vec<NodeId> },
    /// Nodes changed in the host document.
    DocumentChanged { nodes: Vec<NodeId> },
    /// New effect parameters for `nodes` (the selection when empty).
    ParametersChanged {
        #[serde(default)]
        nodes: Vec<NodeId>,
        params: EffectParameters,
    },
}

/// A baked glass frame ready to be applied as a fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageCaptured {
    pub node: NodeId,
    /// PNG data URL.
    pub bitmap: String,
    pub shape: ShapeDescriptor,
    pub shape_kind: ShapeKind,
    /// Outline SVG the distance field was built from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_field_source: Option<String>,
}

/// Events emitted by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Outbound {
    ImageCaptured(ImageCaptured),
    /// A cycle failed; nothing was written back.
    RenderFailed {
        #[serde(skip_serializing_if = "Option::is_none")]
        node: Option<NodeId>,
        reason: String,
    },
    /// A recapture is pending for `node`.
    Placeholder { node: NodeId },
    /// Several glass elements are selected.
    SelectionSummary {
        shapes: ShapeSummary,
        params: ParameterSummary,
    },
    /// User-visible message.
    Notify { message: String },
}

impl Outbound {
    pub fn notify(message: impl Into<String>) -> Self {
        Outbound::Notify {
            message: message.into(),
        }
    }
}

/// Encode an image as a PNG data URL.
pub fn encode_data_url(image: &RgbaImage) -> Result<String, ProtocolError> {
    let png = lucent_render::encode_png(image)?;
    Ok(format!("{}{}", DATA_URL_PREFIX, STANDARD.encode(png)))
}

/// Decode a PNG data URL.
pub fn decode_data_url(url: &str) -> Result<RgbaImage, ProtocolError> {
    let payload = url.strip_prefix(DATA_URL_PREFIX).ok_or(ProtocolError::NotDataUrl)?;
    let bytes = STANDARD.decode(payload)?;
    Ok(image::load_from_memory(&bytes)?.to_rgba8())
}
