//! Glass program compilation and interface checking.

use crate::shader::GLASS_SHADER;
use lucent_core::{EffectParameters, ShapeDescriptor, ShapeKind};
use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{Module, ShaderStage, TypeInner};
use thiserror::Error;

pub const VERTEX_ENTRY: &str = "vs_main";
pub const FRAGMENT_ENTRY: &str = "fs_main";

/// Resource bindings the compositor feeds, in binding order.
pub const BINDINGS: [&str; 4] = ["uniforms", "background_texture", "background_sampler", "distance_texture"];

/// Program errors. Both are fatal: no render may be attempted.
#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("Shader compilation failed:\n{0}")]
    Compile(String),
    #[error("Shader link failed: {0}")]
    Link(String),
}

/// Uniform block shared with the `GlassUniforms` WGSL struct.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GlassUniforms {
    pub resolution: [f32; 2],
    pub shape_size: [f32; 2],
    pub corner_radius: f32,
    pub edge_thickness: f32,
    pub refraction_strength: f32,
    pub chromatic_aberration: f32,
    pub frost_radius: f32,
    pub shape_kind: u32,
    pub use_distance_field: u32,
    pub _padding: f32,
}

pub const SHAPE_RECTANGLE: u32 = 0;
pub const SHAPE_ELLIPSE: u32 = 1;
pub const SHAPE_COMPLEX: u32 = 2;

impl GlassUniforms {
    pub fn set_resolution(&mut self, width: u32, height: u32) {
        self.resolution = [width as f32, height as f32];
    }

    pub fn set_shape(&mut self, shape: &ShapeDescriptor, use_distance_field: bool) {
        self.shape_size = [shape.width as f32, shape.height as f32];
        self.corner_radius = shape.effective_corner_radius() as f32;
        self.shape_kind = match shape.kind {
            ShapeKind::Rectangle => SHAPE_RECTANGLE,
            ShapeKind::Ellipse => SHAPE_ELLIPSE,
            ShapeKind::Complex => SHAPE_COMPLEX,
        };
        self.use_distance_field = u32::from(use_distance_field);
    }

    pub fn set_parameters(&mut self, params: &EffectParameters) {
        let params = params.sanitized();
        self.edge_thickness = params.edge_thickness as f32;
        self.refraction_strength = params.refraction_strength as f32;
        self.chromatic_aberration = params.chromatic_aberration as f32;
        self.frost_radius = params.frost_radius as f32;
    }
}

/// A compiled and validated glass program.
#[derive(Debug)]
pub struct GlassProgram {
    module: Module,
}

impl GlassProgram {
    /// Compile the built-in program.
    pub fn builtin() -> Result<Self, ProgramError> {
        Self::compile(GLASS_SHADER)
    }

    /// Parse, validate and link-check a WGSL source.
    pub fn compile(source: &str) -> Result<Self, ProgramError> {
        let module = naga::front::wgsl::parse_str(source).map_err(|e| ProgramError::Compile(e.emit_to_string(source)))?;

        Validator::new(ValidationFlags::all(), Capabilities::all())
            .validate(&module)
            .map_err(|e| ProgramError::Compile(e.emit_to_string(source)))?;

        link(&module)?;
        log::debug!("Glass program compiled ({} entry points)", module.entry_points.len());
        Ok(Self { module })
    }

    pub fn module(&self) -> &Module {
        &self.module
    }
}

/// Check the stage entry points and the resource interface.
fn link(module: &Module) -> Result<(), ProgramError> {
    for (name, stage) in [(VERTEX_ENTRY, ShaderStage::Vertex), (FRAGMENT_ENTRY, ShaderStage::Fragment)] {
        match module.entry_points.iter().find(|ep| ep.name == name) {
            Some(ep) if ep.stage == stage => {}
            Some(ep) => {
                return Err(ProgramError::Link(format!(
                    "entry point `{}` has stage {:?}, expected {:?}",
                    name, ep.stage, stage
                )));
            }
            None => return Err(ProgramError::Link(format!("missing entry point `{}`", name))),
        }
    }

    for (binding, name) in BINDINGS.iter().enumerate() {
        let Some((_, var)) = module
            .global_variables
            .iter()
            .find(|(_, var)| var.name.as_deref() == Some(*name))
        else {
            return Err(ProgramError::Link(format!("missing binding `{}`", name)));
        };
        match &var.binding {
            Some(rb) if rb.group == 0 && rb.binding as usize == binding => {}
            other => {
                return Err(ProgramError::Link(format!(
                    "`{}` bound at {:?}, expected group 0 binding {}",
                    name, other, binding
                )));
            }
        }
    }

    if let Some((_, var)) = module.global_variables.iter().find(|(_, var)| var.name.as_deref() == Some(BINDINGS[0])) {
        let expected = std::mem::size_of::<GlassUniforms>() as u32;
        match module.types[var.ty].inner {
            TypeInner::Struct { span, .. } if span == expected => {}
            ref inner => {
                return Err(ProgramError::Link(format!(
                    "uniform block layout mismatch: {:?}, expected a {} byte struct",
                    inner, expected
                )));
            }
        }
    }

    Ok(())
}
