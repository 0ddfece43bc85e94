//! Lucent Render Library
//!
//! Optical compositor for glass elements: the WGSL glass program, its
//! software fragment evaluator, and distance fields for complex outlines.

pub mod compositor;
pub mod distance_field;
pub mod kernel;
pub mod program;
pub mod shader;

pub use compositor::{encode_png, CompositorError, CompositorResult, CropRect, OpticalCompositor, RenderFrame};
pub use distance_field::{DistanceField, DistanceFieldBuilder, DistanceFieldError, DistanceFieldResult};
pub use program::{GlassProgram, GlassUniforms, ProgramError};
pub use shader::GLASS_SHADER;
