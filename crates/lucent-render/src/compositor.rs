//! Optical compositor.
//!
//! Holds the compiled glass program and the state a GPU context would
//! hold (uniform block, background texture, distance texture) and
//! evaluates the fragment stage for every output pixel.

use crate::distance_field::DistanceField;
use crate::kernel::{self, Fragment, FrostKernel};
use crate::program::{GlassProgram, GlassUniforms, ProgramError};
use image::{Rgba, RgbaImage};
use lucent_core::{EffectParameters, ShapeDescriptor, ShapeKind, OFFSET};
use thiserror::Error;

/// Compositor errors.
#[derive(Debug, Error)]
pub enum CompositorError {
    #[error(transparent)]
    Program(#[from] ProgramError),
    #[error("No background uploaded")]
    NoBackground,
    #[error("Invalid resolution {width}x{height}")]
    InvalidResolution { width: u32, height: u32 },
    #[error("PNG encoding failed: {0}")]
    Encode(String),
}

/// Result type for compositor operations.
pub type CompositorResult<T> = Result<T, CompositorError>;

/// Pixel rectangle inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    /// Inset `width` x `height` by `margin` pixels on every side.
    pub fn inset(width: u32, height: u32, margin: f64) -> Self {
        let m = margin.round().max(0.0) as u32;
        Self {
            x: m,
            y: m,
            width: width.saturating_sub(2 * m),
            height: height.saturating_sub(2 * m),
        }
    }
}

/// Composited output plus the crop that strips the capture padding.
#[derive(Debug, Clone)]
pub struct RenderFrame {
    pub image: RgbaImage,
    pub crop: CropRect,
}

impl RenderFrame {
    /// The image with the padding removed. Falls back to the full image
    /// when the crop is empty or out of bounds.
    pub fn cropped(&self) -> RgbaImage {
        let c = self.crop;
        let fits = c.x.checked_add(c.width).is_some_and(|r| r <= self.image.width())
            && c.y.checked_add(c.height).is_some_and(|b| b <= self.image.height());
        if c.width == 0 || c.height == 0 || !fits {
            log::warn!(
                "Crop {:?} unusable for {}x{} frame, keeping full image",
                c,
                self.image.width(),
                self.image.height()
            );
            return self.image.clone();
        }
        image::imageops::crop_imm(&self.image, c.x, c.y, c.width, c.height).to_image()
    }

    /// PNG bytes of the cropped image.
    pub fn encode_png(&self) -> CompositorResult<Vec<u8>> {
        encode_png(&self.cropped())
    }
}

/// Encode an RGBA8 image as PNG.
pub fn encode_png(image: &RgbaImage) -> CompositorResult<Vec<u8>> {
    let mut png_data = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut png_data, image.width(), image.height());
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder
            .write_header()
            .map_err(|e| CompositorError::Encode(e.to_string()))?;
        writer
            .write_image_data(image.as_raw())
            .map_err(|e| CompositorError::Encode(e.to_string()))?;
        writer.finish().map_err(|e| CompositorError::Encode(e.to_string()))?;
    }
    Ok(png_data)
}

/// The glass compositor.
pub struct OpticalCompositor {
    program: GlassProgram,
    uniforms: GlassUniforms,
    background: Option<RgbaImage>,
    distance_field: Option<DistanceField>,
    frost: Option<FrostKernel>,
}

impl OpticalCompositor {
    /// Compile the built-in glass program. Fails if it does not compile or
    /// link.
    pub fn new() -> CompositorResult<Self> {
        Ok(Self::with_program(GlassProgram::builtin()?))
    }

    /// Use a custom WGSL source for the glass program.
    pub fn with_program_source(source: &str) -> CompositorResult<Self> {
        Ok(Self::with_program(GlassProgram::compile(source)?))
    }

    fn with_program(program: GlassProgram) -> Self {
        let mut uniforms = GlassUniforms::default();
        uniforms.set_parameters(&EffectParameters::default());
        Self {
            program,
            uniforms,
            background: None,
            distance_field: None,
            frost: None,
        }
    }

    pub fn program(&self) -> &GlassProgram {
        &self.program
    }

    pub fn uniforms(&self) -> &GlassUniforms {
        &self.uniforms
    }

    /// Upload the captured region. Its size becomes the output resolution.
    pub fn upload_background(&mut self, image: RgbaImage) -> CompositorResult<()> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(CompositorError::InvalidResolution { width, height });
        }
        self.uniforms.set_resolution(width, height);
        self.background = Some(image);
        Ok(())
    }

    /// Set the shape. A complex shape without a distance field renders as
    /// its bounding rectangle.
    pub fn set_shape(&mut self, shape: &ShapeDescriptor, distance_field: Option<DistanceField>) {
        let shape = match (shape.kind, &distance_field) {
            (ShapeKind::Complex, None) => {
                log::warn!("Complex shape without a distance field, using its bounding box");
                shape.bounding_rectangle()
            }
            _ => *shape,
        };
        let use_field = shape.kind == ShapeKind::Complex && distance_field.is_some();
        self.uniforms.set_shape(&shape, use_field);
        self.distance_field = if use_field { distance_field } else { None };
    }

    pub fn set_parameters(&mut self, params: &EffectParameters) {
        self.uniforms.set_parameters(params);
        self.frost = kernel::frost_kernel(self.uniforms.frost_radius as f64);
    }

    /// Evaluate every output pixel.
    pub fn render(&self) -> CompositorResult<RenderFrame> {
        let background = self.background.as_ref().ok_or(CompositorError::NoBackground)?;
        let (width, height) = background.dimensions();

        let fragment = Fragment {
            uniforms: &self.uniforms,
            background,
            distance_field: self.distance_field.as_ref(),
            frost: self.frost.as_ref(),
        };
        let image = RgbaImage::from_fn(width, height, |x, y| Rgba(kernel::to_rgba8(fragment.shade(x, y))));
        log::debug!(
            "Composited {}x{} frame (kind {}, frost {})",
            width,
            height,
            self.uniforms.shape_kind,
            self.frost.is_some()
        );

        Ok(RenderFrame {
            image,
            crop: CropRect::inset(width, height, OFFSET),
        })
    }

    /// Upload, configure and render in one call.
    pub fn composite(
        &mut self,
        background: RgbaImage,
        shape: &ShapeDescriptor,
        distance_field: Option<DistanceField>,
        params: &EffectParameters,
    ) -> CompositorResult<RenderFrame> {
        self.upload_background(background)?;
        self.set_shape(shape, distance_field);
        self.set_parameters(params);
        self.render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance_field::DistanceFieldBuilder;
    use kurbo::Vec2;

    fn flat(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([90, 140, 200, 255]))
    }

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 255 / width) as u8, (y * 255 / height) as u8, ((x + y) % 256) as u8, 255])
        })
    }

    fn checkerboard(size: u32) -> RgbaImage {
        RgbaImage::from_fn(size, size, |x, y| {
            let v = if (x + y) % 2 == 0 { 255 } else { 0 };
            Rgba([v, v, v, 255])
        })
    }

    fn glass() -> ShapeDescriptor {
        ShapeDescriptor::rectangle(200.0, 100.0, 50.0)
    }

    fn interior_distance(x: u32, y: u32) -> f64 {
        let p = Vec2::new(x as f64 + 0.5 - 120.0, y as f64 + 0.5 - 70.0);
        kernel::sd_rounded_box(p, Vec2::new(100.0, 50.0), 50.0)
    }

    #[test]
    fn test_flat_background_is_unchanged() {
        let mut compositor = OpticalCompositor::new().unwrap();
        let background = flat(240, 140);
        let frame = compositor
            .composite(background.clone(), &glass(), None, &EffectParameters::new(20.0, 25.0, 5.0, 0.0))
            .unwrap();
        assert_eq!(frame.image, background);
    }

    #[test]
    fn test_interior_beyond_band_is_bit_identical() {
        let mut compositor = OpticalCompositor::new().unwrap();
        let background = gradient(240, 140);
        let frame = compositor
            .composite(background.clone(), &glass(), None, &EffectParameters::new(20.0, 25.0, 5.0, 0.0))
            .unwrap();

        let mut band_changed = 0;
        for (x, y, pixel) in frame.image.enumerate_pixels() {
            let d = interior_distance(x, y);
            if d < -20.0 || d > 0.0 {
                assert_eq!(pixel, background.get_pixel(x, y), "pixel ({}, {}) at d={}", x, y, d);
            } else if pixel != background.get_pixel(x, y) {
                band_changed += 1;
            }
        }
        assert!(band_changed > 0);
    }

    #[test]
    fn test_zero_aberration_matches_single_sample() {
        let mut compositor = OpticalCompositor::new().unwrap();
        let background = gradient(240, 140);
        let plain = compositor
            .composite(background.clone(), &glass(), None, &EffectParameters::new(20.0, 25.0, 0.0, 0.0))
            .unwrap();
        let split = compositor
            .composite(background, &glass(), None, &EffectParameters::new(20.0, 25.0, 5.0, 0.0))
            .unwrap();

        let mut fringed = 0;
        for (a, b) in plain.image.pixels().zip(split.image.pixels()) {
            // Green and alpha always come from the undisplaced-by-aberration sample.
            assert_eq!(a.0[1], b.0[1]);
            assert_eq!(a.0[3], b.0[3]);
            if a.0[0] != b.0[0] || a.0[2] != b.0[2] {
                fringed += 1;
            }
        }
        assert!(fringed > 0);
    }

    #[test]
    fn test_frost_below_threshold_is_identical() {
        let mut compositor = OpticalCompositor::new().unwrap();
        let background = gradient(240, 140);
        let sharp = compositor
            .composite(background.clone(), &glass(), None, &EffectParameters::new(20.0, 25.0, 5.0, 0.0))
            .unwrap();
        let barely = compositor
            .composite(background, &glass(), None, &EffectParameters::new(20.0, 25.0, 5.0, 0.05))
            .unwrap();
        assert_eq!(sharp.image, barely.image);
    }

    #[test]
    fn test_frost_reduces_checkerboard_variance() {
        let size = 80;
        let shape = ShapeDescriptor::rectangle(size as f64, size as f64, 0.0);
        let mut compositor = OpticalCompositor::new().unwrap();

        let variance = |radius: f64, compositor: &mut OpticalCompositor| {
            let frame = compositor
                .composite(checkerboard(size), &shape, None, &EffectParameters::new(0.0, 0.0, 0.0, radius))
                .unwrap();
            let values: Vec<f64> = frame
                .image
                .enumerate_pixels()
                .filter(|(x, y, _)| (10..size - 10).contains(x) && (10..size - 10).contains(y))
                .map(|(_, _, p)| p.0[0] as f64)
                .collect();
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64
        };

        let v0 = variance(0.0, &mut compositor);
        let v1 = variance(1.0, &mut compositor);
        let v2 = variance(2.0, &mut compositor);
        assert!(v0 > v1, "{} > {}", v0, v1);
        assert!(v1 > v2, "{} > {}", v1, v2);
    }

    #[test]
    fn test_zero_strength_passthrough() {
        let mut compositor = OpticalCompositor::new().unwrap();
        let background = gradient(240, 140);
        let frame = compositor
            .composite(background.clone(), &glass(), None, &EffectParameters::new(20.0, 0.0, 0.0, 0.0))
            .unwrap();
        assert_eq!(frame.image, background);
    }

    #[test]
    fn test_ellipse_center_unchanged() {
        let mut compositor = OpticalCompositor::new().unwrap();
        let background = gradient(240, 140);
        let frame = compositor
            .composite(
                background.clone(),
                &ShapeDescriptor::ellipse(200.0, 100.0),
                None,
                &EffectParameters::default(),
            )
            .unwrap();
        assert_eq!(frame.image.get_pixel(120, 70), background.get_pixel(120, 70));
        assert_eq!(frame.image.get_pixel(2, 2), background.get_pixel(2, 2));
    }

    #[test]
    fn test_complex_shape_uses_distance_field() {
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="100" viewBox="0 0 200 100"><rect width="200" height="100" fill="black"/></svg>"#;
        let field = DistanceFieldBuilder::new(OFFSET).build(svg, 200.0, 100.0).unwrap();
        let shape = ShapeDescriptor::new(200.0, 100.0, 0.0.into(), ShapeKind::Complex);

        let mut compositor = OpticalCompositor::new().unwrap();
        let background = gradient(240, 140);
        let frame = compositor
            .composite(background.clone(), &shape, Some(field), &EffectParameters::new(20.0, 25.0, 0.0, 0.0))
            .unwrap();
        assert_eq!(compositor.uniforms().use_distance_field, 1);
        // Deep inside: no displacement.
        assert_eq!(frame.image.get_pixel(120, 70), background.get_pixel(120, 70));
        // Outside the outline: background.
        assert_eq!(frame.image.get_pixel(5, 5), background.get_pixel(5, 5));
        // Just inside the right edge: displaced towards the centre.
        assert_ne!(frame.image.get_pixel(218, 70), background.get_pixel(218, 70));
    }

    #[test]
    fn test_complex_without_field_degrades() {
        let mut compositor = OpticalCompositor::new().unwrap();
        let shape = ShapeDescriptor::new(200.0, 100.0, 30.0.into(), ShapeKind::Complex);
        compositor.set_shape(&shape, None);
        assert_eq!(compositor.uniforms().use_distance_field, 0);
        assert_eq!(compositor.uniforms().corner_radius, 0.0);
    }

    #[test]
    fn test_render_without_background() {
        let compositor = OpticalCompositor::new().unwrap();
        assert!(matches!(compositor.render(), Err(CompositorError::NoBackground)));
    }

    #[test]
    fn test_invalid_program_is_fatal() {
        let result = OpticalCompositor::with_program_source("@fragment fn nope() {}");
        assert!(matches!(result, Err(CompositorError::Program(_))));
    }

    #[test]
    fn test_crop_strips_padding() {
        let frame = RenderFrame {
            image: flat(240, 140),
            crop: CropRect::inset(240, 140, OFFSET),
        };
        assert_eq!(frame.cropped().dimensions(), (200, 100));

        let tiny = RenderFrame {
            image: flat(30, 30),
            crop: CropRect::inset(30, 30, OFFSET),
        };
        assert_eq!(tiny.cropped().dimensions(), (30, 30));
    }

    #[test]
    fn test_encode_png() {
        let frame = RenderFrame {
            image: gradient(60, 50),
            crop: CropRect::inset(60, 50, OFFSET),
        };
        let bytes = frame.encode_png().unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(decoded, frame.cropped());
    }
}
