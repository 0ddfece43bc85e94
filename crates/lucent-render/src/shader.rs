//! WGSL source of the glass program.

/// Glass program: full-screen quad vertex stage plus the refraction,
/// chromatic aberration and frost fragment stage.
///
/// Bindings (group 0):
/// - 0: `uniforms`, a `GlassUniforms` block
/// - 1: `background_texture`, the captured region
/// - 2: `background_sampler`, linear, clamp-to-edge
/// - 3: `distance_texture`, the complex-shape distance field (R channel)
pub const GLASS_SHADER: &str = r#"
// ============================================================================
// Lucent Glass Shader
// ============================================================================

struct GlassUniforms {
    resolution: vec2<f32>,
    shape_size: vec2<f32>,
    corner_radius: f32,
    edge_thickness: f32,
    refraction_strength: f32,
    chromatic_aberration: f32,
    frost_radius: f32,
    shape_kind: u32,
    use_distance_field: u32,
    _padding: f32,
}

const SHAPE_RECTANGLE: u32 = 0u;
const SHAPE_ELLIPSE: u32 = 1u;
const SHAPE_COMPLEX: u32 = 2u;

const MAX_FROST_TAPS: f32 = 6.0;

@group(0) @binding(0) var<uniform> uniforms: GlassUniforms;
@group(0) @binding(1) var background_texture: texture_2d<f32>;
@group(0) @binding(2) var background_sampler: sampler;
@group(0) @binding(3) var distance_texture: texture_2d<f32>;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    var corners = array<vec2<f32>, 6>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(1.0, -1.0),
        vec2<f32>(-1.0, 1.0),
        vec2<f32>(-1.0, 1.0),
        vec2<f32>(1.0, -1.0),
        vec2<f32>(1.0, 1.0),
    );
    let corner = corners[vertex_index];

    var out: VertexOutput;
    out.position = vec4<f32>(corner, 0.0, 1.0);
    out.uv = vec2<f32>(corner.x * 0.5 + 0.5, 0.5 - corner.y * 0.5);
    return out;
}

// Rounded box, half extents b, radius r.
fn sd_rounded_box(p: vec2<f32>, b: vec2<f32>, r: f32) -> f32 {
    let q = abs(p) - b + vec2<f32>(r, r);
    return min(max(q.x, q.y), 0.0) + length(max(q, vec2<f32>(0.0, 0.0))) - r;
}

fn sd_ellipse(p: vec2<f32>, radii: vec2<f32>) -> f32 {
    let k0 = length(p / radii);
    let k1 = length(p / (radii * radii));
    if (k1 == 0.0) {
        return -min(radii.x, radii.y);
    }
    return k0 * (k0 - 1.0) / k1;
}

fn shape_distance(p: vec2<f32>, uv: vec2<f32>) -> f32 {
    if (uniforms.use_distance_field != 0u) {
        let stored = textureSampleLevel(distance_texture, background_sampler, uv, 0.0).r;
        return (stored - 0.5) * min(uniforms.resolution.x, uniforms.resolution.y);
    }
    let half_size = uniforms.shape_size * 0.5;
    if (uniforms.shape_kind == SHAPE_ELLIPSE) {
        return sd_ellipse(p, half_size);
    }
    let radius = clamp(uniforms.corner_radius, 0.0, min(half_size.x, half_size.y));
    return sd_rounded_box(p, half_size, radius);
}

fn sample_background(uv: vec2<f32>) -> vec4<f32> {
    return textureSampleLevel(background_texture, background_sampler, uv, 0.0);
}

// Square Gaussian window, at most 13x13 taps.
fn frost_sample(uv: vec2<f32>) -> vec4<f32> {
    let radius = uniforms.frost_radius;
    if (radius < 0.1) {
        return sample_background(uv);
    }

    let taps = i32(min(ceil(radius), MAX_FROST_TAPS));
    let stride = max(1.0, radius / MAX_FROST_TAPS);
    let sigma = radius / 3.0;
    let texel = vec2<f32>(1.0, 1.0) / uniforms.resolution;

    var total = vec4<f32>(0.0, 0.0, 0.0, 0.0);
    var weight_sum: f32 = 0.0;
    for (var y: i32 = -taps; y <= taps; y = y + 1) {
        for (var x: i32 = -taps; x <= taps; x = x + 1) {
            let offset = vec2<f32>(f32(x), f32(y)) * stride;
            let weight = exp(-dot(offset, offset) / (2.0 * sigma * sigma));
            total = total + sample_background(uv + offset * texel) * weight;
            weight_sum = weight_sum + weight;
        }
    }
    return total / weight_sum;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let uv = input.uv;
    let p = uv * uniforms.resolution - uniforms.resolution * 0.5;

    let sdf = shape_distance(p, uv);
    if (sdf > 0.0) {
        return sample_background(uv);
    }

    var edge: f32 = 0.0;
    if (uniforms.edge_thickness > 0.0) {
        edge = clamp((sdf + uniforms.edge_thickness) / uniforms.edge_thickness, 0.0, 1.0);
    }
    let distortion = uniforms.refraction_strength * edge * edge;

    var dir = vec2<f32>(0.70710678, 0.70710678);
    if (length(p) > 0.001) {
        dir = normalize(p);
    }
    let texel_step = dir / uniforms.resolution;

    let aberration = uniforms.chromatic_aberration;
    if (aberration > 0.001 && edge > 0.0) {
        let red = frost_sample(uv - texel_step * max(0.0, distortion - aberration * 0.5));
        let green = frost_sample(uv - texel_step * distortion);
        let blue = frost_sample(uv - texel_step * (distortion + aberration * 0.5));
        return vec4<f32>(red.r, green.g, blue.b, green.a);
    }

    return frost_sample(uv - texel_step * distortion);
}
"#;
