//! Distance fields for complex shapes.
//!
//! The outline SVG is rasterized into a padded canvas matching the capture
//! resolution, thresholded into an inside mask and run through an exact
//! Euclidean distance transform in both directions.

use resvg::{tiny_skia, usvg};
use thiserror::Error;

/// Squared distance standing in for "no feature pixel".
const FAR: f64 = 1e20;

/// Coverage at or above which a pixel is inside the outline.
const INSIDE_ALPHA: u8 = 128;

#[derive(Debug, Error)]
pub enum DistanceFieldError {
    #[error("Failed to parse outline: {0}")]
    Parse(String),
    #[error("Outline covers no pixels")]
    EmptyOutline,
    #[error("Invalid outline size {width}x{height}")]
    ZeroSize { width: f64, height: f64 },
    #[error("Could not allocate a {width}x{height} pixmap")]
    Allocation { width: u32, height: u32 },
}

pub type DistanceFieldResult<T> = Result<T, DistanceFieldError>;

/// Single-channel field. Stored value `0.5 + d / min(width, height)`,
/// clamped to `[0, 1]`, where `d` is the signed pixel distance to the
/// outline (negative inside).
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceField {
    pub width: u32,
    pub height: u32,
    pub samples: Vec<f32>,
}

impl DistanceField {
    fn scale(&self) -> f64 {
        self.width.min(self.height) as f64
    }

    /// Stored value at texel `(x, y)`, clamped to the edge.
    pub fn sample(&self, x: u32, y: u32) -> f32 {
        if self.width == 0 || self.height == 0 {
            return 1.0;
        }
        let x = x.min(self.width - 1);
        let y = y.min(self.height - 1);
        self.samples[(y * self.width + x) as usize]
    }

    /// Bilinear sample at pixel coordinates (texel centres at `+ 0.5`).
    pub fn sample_bilinear(&self, x: f64, y: f64) -> f32 {
        let u = x - 0.5;
        let v = y - 0.5;
        let x0 = u.floor();
        let y0 = v.floor();
        let fx = (u - x0) as f32;
        let fy = (v - y0) as f32;
        let texel = |tx: f64, ty: f64| self.sample(tx.max(0.0) as u32, ty.max(0.0) as u32);

        let top = texel(x0, y0) * (1.0 - fx) + texel(x0 + 1.0, y0) * fx;
        let bottom = texel(x0, y0 + 1.0) * (1.0 - fx) + texel(x0 + 1.0, y0 + 1.0) * fx;
        top * (1.0 - fy) + bottom * fy
    }

    /// Signed pixel distance encoded at texel `(x, y)`.
    pub fn signed_distance_at(&self, x: u32, y: u32) -> f64 {
        (self.sample(x, y) as f64 - 0.5) * self.scale()
    }
}

/// Builds distance fields from SVG outlines.
#[derive(Debug, Clone, Copy)]
pub struct DistanceFieldBuilder {
    padding: f64,
}

impl DistanceFieldBuilder {
    /// `padding` is added on every side so the field lines up with a
    /// padded capture.
    pub fn new(padding: f64) -> Self {
        Self { padding }
    }

    /// Rasterize `svg` scaled to `width` x `height` and compute its field.
    pub fn build(&self, svg: &str, width: f64, height: f64) -> DistanceFieldResult<DistanceField> {
        if !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0) {
            return Err(DistanceFieldError::ZeroSize { width, height });
        }
        let field_w = (width + 2.0 * self.padding).round().max(1.0) as u32;
        let field_h = (height + 2.0 * self.padding).round().max(1.0) as u32;

        let mask = self.rasterize_mask(svg, width, height, field_w, field_h)?;
        if !mask.iter().any(|&inside| inside) {
            return Err(DistanceFieldError::EmptyOutline);
        }

        let (w, h) = (field_w as usize, field_h as usize);
        let outside: Vec<bool> = mask.iter().map(|&inside| !inside).collect();
        let to_inside = squared_distance_transform(&mask, w, h);
        let to_outside = squared_distance_transform(&outside, w, h);

        let scale = field_w.min(field_h) as f64;
        let samples = mask
            .iter()
            .enumerate()
            .map(|(i, &inside)| {
                let d = if inside {
                    -(to_outside[i].sqrt() - 0.5)
                } else {
                    to_inside[i].sqrt() - 0.5
                };
                (0.5 + d / scale).clamp(0.0, 1.0) as f32
            })
            .collect();

        log::debug!("Built {}x{} distance field", field_w, field_h);
        Ok(DistanceField {
            width: field_w,
            height: field_h,
            samples,
        })
    }

    fn rasterize_mask(
        &self,
        svg: &str,
        width: f64,
        height: f64,
        field_w: u32,
        field_h: u32,
    ) -> DistanceFieldResult<Vec<bool>> {
        let tree = usvg::Tree::from_str(svg, &usvg::Options::default())
            .map_err(|e| DistanceFieldError::Parse(e.to_string()))?;
        let mut pixmap = tiny_skia::Pixmap::new(field_w, field_h).ok_or(DistanceFieldError::Allocation {
            width: field_w,
            height: field_h,
        })?;

        let size = tree.size();
        let transform = tiny_skia::Transform::from_row(
            (width / size.width() as f64) as f32,
            0.0,
            0.0,
            (height / size.height() as f64) as f32,
            self.padding as f32,
            self.padding as f32,
        );
        resvg::render(&tree, transform, &mut pixmap.as_mut());

        Ok(pixmap.data().chunks_exact(4).map(|px| px[3] >= INSIDE_ALPHA).collect())
    }
}

/// Squared Euclidean distance from every pixel to the nearest feature
/// pixel. Separable two-pass transform (Felzenszwalb and Huttenlocher).
fn squared_distance_transform(features: &[bool], width: usize, height: usize) -> Vec<f64> {
    let mut grid: Vec<f64> = features.iter().map(|&f| if f { 0.0 } else { FAR }).collect();

    let mut column = vec![0.0; height];
    let mut transformed = vec![0.0; height];
    for x in 0..width {
        for y in 0..height {
            column[y] = grid[y * width + x];
        }
        distance_transform_1d(&column, &mut transformed);
        for y in 0..height {
            grid[y * width + x] = transformed[y];
        }
    }

    let mut row = vec![0.0; width];
    for y in 0..height {
        let span = y * width..(y + 1) * width;
        row.copy_from_slice(&grid[span.clone()]);
        distance_transform_1d(&row, &mut grid[span]);
    }

    grid
}

/// Lower envelope of parabolas rooted at `f`.
fn distance_transform_1d(f: &[f64], out: &mut [f64]) {
    let n = f.len();
    if n == 0 {
        return;
    }
    let mut v = vec![0usize; n];
    let mut z = vec![0.0f64; n + 1];
    let intersection = |q: usize, p: usize| {
        let (qf, pf) = (q as f64, p as f64);
        ((f[q] + qf * qf) - (f[p] + pf * pf)) / (2.0 * qf - 2.0 * pf)
    };

    let mut k = 0;
    z[0] = f64::NEG_INFINITY;
    z[1] = f64::INFINITY;
    for q in 1..n {
        let mut s = intersection(q, v[k]);
        while s <= z[k] {
            k -= 1;
            s = intersection(q, v[k]);
        }
        k += 1;
        v[k] = q;
        z[k] = s;
        z[k + 1] = f64::INFINITY;
    }

    k = 0;
    for (q, slot) in out.iter_mut().enumerate() {
        while z[k + 1] < q as f64 {
            k += 1;
        }
        let d = q as f64 - v[k] as f64;
        *slot = d * d + f[v[k]];
    }
}
