//! Per-pixel optical functions.
//!
//! Software evaluation of the glass program's fragment stage. Coordinates
//! are in pixels; pixel `(x, y)` has its centre at `(x + 0.5, y + 0.5)`.
//! Colours are `[f32; 4]` in `0..=255`.

use crate::distance_field::DistanceField;
use crate::program::{GlassUniforms, SHAPE_ELLIPSE};
use image::RgbaImage;
use kurbo::Vec2;

/// Below this radius the blur is skipped.
pub const FROST_THRESHOLD: f64 = 0.1;

/// Below this magnitude chromatic aberration is inactive.
pub const ABERRATION_THRESHOLD: f64 = 0.001;

/// Largest half-extent of the blur window, in taps.
pub const MAX_FROST_TAPS: i32 = 6;

const FALLBACK_DIRECTION: Vec2 = Vec2::new(std::f64::consts::FRAC_1_SQRT_2, std::f64::consts::FRAC_1_SQRT_2);

pub type Rgba = [f32; 4];

/// Signed distance from `p` to a rounded box centred at the origin.
pub fn sd_rounded_box(p: Vec2, half_extents: Vec2, radius: f64) -> f64 {
    let qx = p.x.abs() - half_extents.x + radius;
    let qy = p.y.abs() - half_extents.y + radius;
    let outside = Vec2::new(qx.max(0.0), qy.max(0.0)).hypot();
    qx.max(qy).min(0.0) + outside - radius
}

/// Approximate signed distance from `p` to an ellipse centred at the origin.
pub fn sd_ellipse(p: Vec2, radii: Vec2) -> f64 {
    let k0 = Vec2::new(p.x / radii.x, p.y / radii.y).hypot();
    let k1 = Vec2::new(p.x / (radii.x * radii.x), p.y / (radii.y * radii.y)).hypot();
    if k1 == 0.0 {
        return -radii.x.min(radii.y);
    }
    k0 * (k0 - 1.0) / k1
}

/// Position in the refracting band: 1 at the boundary, 0 at the inner edge
/// of the band and beyond. Always 0 for a non-positive thickness.
pub fn edge_amount(sdf: f64, edge_thickness: f64) -> f64 {
    if edge_thickness <= 0.0 {
        return 0.0;
    }
    ((sdf + edge_thickness) / edge_thickness).clamp(0.0, 1.0)
}

/// Displacement magnitude for an edge amount.
pub fn distortion(edge: f64, refraction_strength: f64) -> f64 {
    refraction_strength * edge * edge
}

/// Unit vector from the shape centre towards `p`.
pub fn sampling_direction(p: Vec2) -> Vec2 {
    if p.hypot() > 0.001 {
        p.normalize()
    } else {
        FALLBACK_DIRECTION
    }
}

/// A normalized, bounded Gaussian blur window.
#[derive(Debug, Clone, PartialEq)]
pub struct FrostKernel {
    /// `(offset, weight)` pairs; weights sum to one.
    taps: Vec<(Vec2, f32)>,
}

impl FrostKernel {
    pub fn taps(&self) -> &[(Vec2, f32)] {
        &self.taps
    }
}

/// Build the blur window for `radius`, or `None` when the blur is skipped.
///
/// Square window of half-extent `min(ceil(radius), 6)` taps spaced
/// `max(1, radius / 6)` pixels apart, so at most 13x13 taps.
pub fn frost_kernel(radius: f64) -> Option<FrostKernel> {
    if !(radius >= FROST_THRESHOLD) {
        return None;
    }
    let half = (radius.ceil() as i32).min(MAX_FROST_TAPS);
    let stride = (radius / MAX_FROST_TAPS as f64).max(1.0);
    let sigma = radius / 3.0;

    let mut taps = Vec::with_capacity(((2 * half + 1) * (2 * half + 1)) as usize);
    let mut total = 0.0;
    for y in -half..=half {
        for x in -half..=half {
            let offset = Vec2::new(x as f64, y as f64) * stride;
            let weight = (-offset.hypot2() / (2.0 * sigma * sigma)).exp();
            total += weight;
            taps.push((offset, weight));
        }
    }
    Some(FrostKernel {
        taps: taps.into_iter().map(|(o, w)| (o, (w / total) as f32)).collect(),
    })
}

/// Bilinear, clamp-to-edge sample at pixel coordinates.
pub fn sample_bilinear(image: &RgbaImage, x: f64, y: f64) -> Rgba {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return [0.0; 4];
    }
    let u = x - 0.5;
    let v = y - 0.5;
    let x0 = u.floor();
    let y0 = v.floor();
    let fx = (u - x0) as f32;
    let fy = (v - y0) as f32;

    let clamp_x = |i: f64| i.clamp(0.0, (w - 1) as f64) as u32;
    let clamp_y = |i: f64| i.clamp(0.0, (h - 1) as f64) as u32;
    let (xa, xb) = (clamp_x(x0), clamp_x(x0 + 1.0));
    let (ya, yb) = (clamp_y(y0), clamp_y(y0 + 1.0));

    let p00 = image.get_pixel(xa, ya).0;
    let p10 = image.get_pixel(xb, ya).0;
    let p01 = image.get_pixel(xa, yb).0;
    let p11 = image.get_pixel(xb, yb).0;

    let mut out = [0.0; 4];
    for c in 0..4 {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        out[c] = top * (1.0 - fy) + bottom * fy;
    }
    out
}

fn frost_sample(image: &RgbaImage, frost: Option<&FrostKernel>, at: Vec2) -> Rgba {
    let Some(kernel) = frost else {
        return sample_bilinear(image, at.x, at.y);
    };
    let mut out = [0.0; 4];
    for &(offset, weight) in kernel.taps() {
        let s = sample_bilinear(image, at.x + offset.x, at.y + offset.y);
        for c in 0..4 {
            out[c] += s[c] * weight;
        }
    }
    out
}

/// Everything one fragment evaluation reads.
pub struct Fragment<'a> {
    pub uniforms: &'a GlassUniforms,
    pub background: &'a RgbaImage,
    pub distance_field: Option<&'a DistanceField>,
    pub frost: Option<&'a FrostKernel>,
}

impl Fragment<'_> {
    fn resolution(&self) -> Vec2 {
        Vec2::new(self.uniforms.resolution[0] as f64, self.uniforms.resolution[1] as f64)
    }

    /// Signed distance at pixel position `pos` (offset `p` from the centre).
    pub fn shape_distance(&self, pos: Vec2, p: Vec2) -> f64 {
        let u = self.uniforms;
        let resolution = self.resolution();
        if let (true, Some(field)) = (u.use_distance_field != 0, self.distance_field) {
            let fx = pos.x / resolution.x * field.width as f64;
            let fy = pos.y / resolution.y * field.height as f64;
            return (field.sample_bilinear(fx, fy) as f64 - 0.5) * resolution.x.min(resolution.y);
        }
        let half = Vec2::new(u.shape_size[0] as f64, u.shape_size[1] as f64) / 2.0;
        if u.shape_kind == SHAPE_ELLIPSE {
            return sd_ellipse(p, half);
        }
        let radius = (u.corner_radius as f64).clamp(0.0, half.x.min(half.y).max(0.0));
        sd_rounded_box(p, half, radius)
    }

    /// Shade the output pixel `(x, y)`.
    pub fn shade(&self, x: u32, y: u32) -> Rgba {
        let u = self.uniforms;
        let pos = Vec2::new(x as f64 + 0.5, y as f64 + 0.5);
        let p = pos - self.resolution() / 2.0;

        let sdf = self.shape_distance(pos, p);
        if sdf > 0.0 {
            return sample_bilinear(self.background, pos.x, pos.y);
        }

        let edge = edge_amount(sdf, u.edge_thickness as f64);
        let amount = distortion(edge, u.refraction_strength as f64);
        let dir = sampling_direction(p);

        let aberration = u.chromatic_aberration as f64;
        if aberration > ABERRATION_THRESHOLD && edge > 0.0 {
            let red = frost_sample(self.background, self.frost, pos - dir * (amount - aberration / 2.0).max(0.0));
            let green = frost_sample(self.background, self.frost, pos - dir * amount);
            let blue = frost_sample(self.background, self.frost, pos - dir * (amount + aberration / 2.0));
            return [red[0], green[1], blue[2], green[3]];
        }

        frost_sample(self.background, self.frost, pos - dir * amount)
    }
}

/// Quantize a shaded colour to RGBA8.
pub fn to_rgba8(color: Rgba) -> [u8; 4] {
    color.map(|c| c.round().clamp(0.0, 255.0) as u8)
}
