//! Cloud shader programs
//!
//! The orchestrator talks to three fullscreen programs and one compute program through
//! a fixed binding contract: the texture and uniform names in [`crate::params::names`],
//! in the order the descriptors below declare them. The WGSL bundled here is a cheap
//! preview implementation of that contract; production density and lighting programs
//! are expected to be supplied by the host and only need to honour the same layout.

use crate::backend::{
    BackendResult, ComputeProgramDescriptor, ComputeProgramHandle, GraphicsBackend,
    ProgramDescriptor, ProgramHandle, TextureFormat, UniformDecl, UniformKind,
};
use crate::params::names;

/// Passes of the cloud program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloudPass {
    Undersample,
    Accumulate,
    Composite,
    /// Depth downsample into a reduced-resolution target
    DepthDownsampleReduced,
    /// Depth copy at native resolution
    DepthDownsampleNative,
}

impl CloudPass {
    pub fn index(self) -> u32 {
        match self {
            CloudPass::Undersample => 0,
            CloudPass::Accumulate => 1,
            CloudPass::Composite => 2,
            CloudPass::DepthDownsampleReduced => 3,
            CloudPass::DepthDownsampleNative => 4,
        }
    }
}

/// Passes of the height downsample program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeightDownsamplePass {
    /// Weather texture and lookup into level 0
    Seed,
    /// Level i-1 into level i
    Reduce,
}

impl HeightDownsamplePass {
    pub fn index(self) -> u32 {
        match self {
            HeightDownsamplePass::Seed => 0,
            HeightDownsamplePass::Reduce => 1,
        }
    }
}

/// Passes of the shadow program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowPass {
    /// Top-down cloud density
    Density,
    /// Separable blur along `blur_direction`
    Blur,
}

impl ShadowPass {
    pub fn index(self) -> u32 {
        match self {
            ShadowPass::Density => 0,
            ShadowPass::Blur => 1,
        }
    }
}

/// Program references used by the cloud renderer.
///
/// Any reference may be absent: a missing cloud program makes every frame pass through,
/// a missing height program fails the height map step, a missing shadow program skips
/// shadows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloudShaders {
    pub cloud: Option<ProgramHandle>,
    pub height_downsample: Option<ProgramHandle>,
    pub height_preprocess: Option<ComputeProgramHandle>,
    pub shadow: Option<ProgramHandle>,
}

impl CloudShaders {
    /// Build every program from the bundled preview WGSL
    pub fn preview<B: GraphicsBackend>(backend: &mut B) -> BackendResult<Self> {
        Ok(Self {
            cloud: Some(backend.create_program(&cloud_program_descriptor(CLOUD_PREVIEW_WGSL))?),
            height_downsample: Some(backend.create_program(
                &height_downsample_program_descriptor(HEIGHT_DOWNSAMPLE_PREVIEW_WGSL),
            )?),
            height_preprocess: Some(backend.create_compute_program(
                &height_preprocess_program_descriptor(HEIGHT_PREPROCESS_PREVIEW_WGSL),
            )?),
            shadow: Some(
                backend.create_program(&shadow_program_descriptor(SHADOW_PREVIEW_WGSL))?,
            ),
        })
    }
}

fn with_prelude(body: &str) -> String {
    format!("{}{}{}", PARAMETER_BLOCK_WGSL, FULLSCREEN_VERTEX_WGSL, body)
}

fn textures(list: &[&str]) -> Vec<String> {
    list.iter().map(|name| name.to_string()).collect()
}

/// Cloud program layout. `body` must provide fragment entry points for every [`CloudPass`].
pub fn cloud_program_descriptor(body: &str) -> ProgramDescriptor {
    use UniformKind::*;

    ProgramDescriptor {
        label: "Volumetric Clouds".into(),
        source: with_prelude(body),
        vertex_entry: "vs_main".into(),
        passes: vec![
            "fs_undersample".into(),
            "fs_accumulate".into(),
            "fs_composite".into(),
            "fs_depth_reduced".into(),
            "fs_depth_native".into(),
        ],
        textures: textures(&[
            names::SOURCE,
            names::CAMERA_DEPTH,
            names::DOWNSAMPLED_DEPTH,
            names::UNDERSAMPLE_CLOUD_TEX,
            names::HISTORY_CLOUD_TEX,
            names::CLOUD_TEX,
            names::WEATHER_TEX,
            names::HEIGHT_DENSITY_MAP,
            names::BASE_TEX,
            names::HI_HEIGHT_MAP,
        ]),
        uniforms: vec![
            UniformDecl::new(names::PREV_VP, Matrix),
            UniformDecl::new(names::PROJECTION_EXTENTS, Vector),
            UniformDecl::new(names::TEXEL_SIZE, Vector),
            UniformDecl::new(names::RAYMARCH_OFFSET, Scalar),
            UniformDecl::new(names::CLOUD_MIN_SAMPLES, Scalar),
            UniformDecl::new(names::CLOUD_MAX_SAMPLES, Scalar),
            UniformDecl::new(names::CLOUD_DISTANCE_SCALE, Scalar),
            UniformDecl::new(names::CLOUD_DENSITY_SCALE, Scalar),
            UniformDecl::new(names::BASE_TILE, Scalar),
            UniformDecl::new(names::WIND_DIRECTION, Vector),
            UniformDecl::new(names::WIND_SPEED, Scalar),
            UniformDecl::new(names::CLOUD_HEIGHT_RANGE, Vector),
            UniformDecl::new(names::OVERALL_DENSITY, Scalar),
            UniformDecl::new(names::COVERAGE_MODIFIER, Scalar),
            UniformDecl::new(names::WEATHER_TEX_SIZE, Scalar),
            UniformDecl::new(names::HI_HEIGHT_MIN_LEVEL, Scalar),
            UniformDecl::new(names::HI_HEIGHT_MAX_LEVEL, Scalar),
            UniformDecl::new(names::HEIGHT_MAP_SIZE, Scalar),
        ],
    }
}

/// Height downsample layout: `fs_seed` and `fs_reduce`
pub fn height_downsample_program_descriptor(body: &str) -> ProgramDescriptor {
    ProgramDescriptor {
        label: "Height Downsample".into(),
        source: with_prelude(body),
        vertex_entry: "vs_main".into(),
        passes: vec!["fs_seed".into(), "fs_reduce".into()],
        textures: textures(&[names::SOURCE, names::WEATHER_TEX, names::HEIGHT_LUT]),
        uniforms: vec![UniformDecl::new(names::CLOUD_HEIGHT_RANGE, UniformKind::Vector)],
    }
}

/// Height lookup compute layout, entry point `cs_main`, 32x32 texels per work group
pub fn height_preprocess_program_descriptor(body: &str) -> ComputeProgramDescriptor {
    ComputeProgramDescriptor {
        label: "Height Preprocess".into(),
        source: format!("{}{}", PARAMETER_BLOCK_WGSL, body),
        entry_point: "cs_main".into(),
        textures: textures(&[names::HEIGHT_DENSITY_MAP]),
        storage_textures: vec![(names::HEIGHT_LUT_RESULT.to_string(), TextureFormat::R32Float)],
        uniforms: vec![UniformDecl::new(names::CLOUD_HEIGHT_RANGE, UniformKind::Vector)],
    }
}

/// Shadow layout: `fs_density` and `fs_blur`
pub fn shadow_program_descriptor(body: &str) -> ProgramDescriptor {
    use UniformKind::*;

    ProgramDescriptor {
        label: "Cloud Shadow".into(),
        source: with_prelude(body),
        vertex_entry: "vs_main".into(),
        passes: vec!["fs_density".into(), "fs_blur".into()],
        textures: textures(&[names::SOURCE, names::WEATHER_TEX, names::HEIGHT_DENSITY_MAP]),
        uniforms: vec![
            UniformDecl::new(names::BLUR_DIRECTION, Vector),
            UniformDecl::new(names::SHADOW_INTENSITY, Scalar),
            UniformDecl::new(names::SHADOW_BLUR, Scalar),
            UniformDecl::new(names::WIND_DIRECTION, Vector),
            UniformDecl::new(names::WIND_SPEED, Scalar),
            UniformDecl::new(names::COVERAGE_MODIFIER, Scalar),
            UniformDecl::new(names::OVERALL_DENSITY, Scalar),
        ],
    }
}

/// Plain copy, used by backends for blits between differing sizes or formats
pub fn copy_program_descriptor() -> ProgramDescriptor {
    ProgramDescriptor {
        label: "Copy".into(),
        source: with_prelude(COPY_WGSL),
        vertex_entry: "vs_main".into(),
        passes: vec!["fs_copy".into()],
        textures: textures(&[names::SOURCE]),
        uniforms: Vec::new(),
    }
}

/// WGSL mirror of [`crate::backend::ParameterBlock`]
pub const PARAMETER_BLOCK_WGSL: &str = r#"
struct Params {
    features: u32,
    pass_index: u32,
    _padding: vec2<u32>,
    slots: array<vec4<f32>, 64>,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var samp: sampler;

fn has_feature(bit: u32) -> bool {
    return (params.features & bit) != 0u;
}
"#;

/// Fullscreen triangle
pub const FULLSCREEN_VERTEX_WGSL: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    var output: VertexOutput;
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    output.position = vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
    output.uv = vec2<f32>(x, 1.0 - y);
    return output;
}
"#;

const COPY_WGSL: &str = r#"
@group(0) @binding(2) var source: texture_2d<f32>;

@fragment
fn fs_copy(input: VertexOutput) -> @location(0) vec4<f32> {
    return textureSampleLevel(source, samp, input.uv, 0.0);
}
"#;

/// Preview cloud program: single-layer density from the weather texture
pub const CLOUD_PREVIEW_WGSL: &str = r#"
@group(0) @binding(2) var source: texture_2d<f32>;
@group(0) @binding(3) var camera_depth: texture_2d<f32>;
@group(0) @binding(4) var downsampled_depth: texture_2d<f32>;
@group(0) @binding(5) var undersample_cloud_tex: texture_2d<f32>;
@group(0) @binding(6) var history_cloud_tex: texture_2d<f32>;
@group(0) @binding(7) var cloud_tex: texture_2d<f32>;
@group(0) @binding(8) var weather_tex: texture_2d<f32>;
@group(0) @binding(9) var height_density_map: texture_2d<f32>;
@group(0) @binding(10) var base_tex: texture_2d<f32>;
@group(0) @binding(11) var hi_height_map: texture_2d<f32>;

const USE_HI_HEIGHT: u32 = 1u;
const ALLOW_CLOUD_FRONT_OBJECT: u32 = 2u;
const SHOW_SAMPLE_COUNT: u32 = 4u;

fn prev_vp() -> mat4x4<f32> {
    return mat4x4<f32>(params.slots[0], params.slots[1], params.slots[2], params.slots[3]);
}

@fragment
fn fs_undersample(input: VertexOutput) -> @location(0) vec4<f32> {
    let texel = params.slots[5].xy;
    let jitter = params.slots[6].x;
    let min_samples = params.slots[7].x;
    let max_samples = params.slots[8].x;
    let density_scale = params.slots[10].x;
    let wind = params.slots[12].xy * params.slots[13].x;
    let overall_density = params.slots[15].x;
    let coverage_modifier = params.slots[16].x;

    let uv = input.uv + wind * 0.001 + (jitter - 0.5) * texel;
    let weather = textureSampleLevel(weather_tex, samp, uv, 0.0);
    let coverage = clamp(weather.r * coverage_modifier, 0.0, 1.0);
    let density = clamp(coverage * overall_density * density_scale, 0.0, 1.0);

    let samples = mix(min_samples, max_samples, density);
    if (has_feature(SHOW_SAMPLE_COUNT)) {
        return vec4<f32>(samples / max(max_samples, 1.0), 0.0, 0.0, 1.0);
    }

    var alpha = density;
    if (has_feature(USE_HI_HEIGHT)) {
        let level = params.slots[19].x;
        let height = textureSampleLevel(hi_height_map, samp, input.uv, level).r;
        if (height <= 0.0) {
            alpha = 0.0;
        }
    }
    let depth = textureSampleLevel(downsampled_depth, samp, input.uv, 0.0).r;
    if (!has_feature(ALLOW_CLOUD_FRONT_OBJECT) && depth < 1.0) {
        alpha = 0.0;
    }
    return vec4<f32>(vec3<f32>(alpha), alpha);
}

@fragment
fn fs_accumulate(input: VertexOutput) -> @location(0) vec4<f32> {
    let current = textureSampleLevel(undersample_cloud_tex, samp, input.uv, 0.0);
    let extents = params.slots[4].xy;
    let view_dir = vec3<f32>((input.uv.x * 2.0 - 1.0) * extents.x, (1.0 - input.uv.y * 2.0) * extents.y, -1.0);
    let clip = prev_vp() * vec4<f32>(view_dir, 0.0);
    if (clip.w <= 0.0) {
        return current;
    }
    let prev_uv = vec2<f32>(clip.x / clip.w * 0.5 + 0.5, 0.5 - clip.y / clip.w * 0.5);
    if (any(prev_uv < vec2<f32>(0.0)) || any(prev_uv > vec2<f32>(1.0))) {
        return current;
    }
    let history = textureSampleLevel(history_cloud_tex, samp, prev_uv, 0.0);
    return mix(history, current, 0.2);
}

@fragment
fn fs_composite(input: VertexOutput) -> @location(0) vec4<f32> {
    let scene = textureSampleLevel(source, samp, input.uv, 0.0);
    let cloud = textureSampleLevel(cloud_tex, samp, input.uv, 0.0);
    return vec4<f32>(scene.rgb * (1.0 - cloud.a) + cloud.rgb, scene.a);
}

@fragment
fn fs_depth_reduced(input: VertexOutput) -> @location(0) vec4<f32> {
    let size = vec2<i32>(textureDimensions(camera_depth));
    let target_size = vec2<i32>(textureDimensions(downsampled_depth));
    let scale = max(size / max(target_size, vec2<i32>(1)), vec2<i32>(1));
    let base = vec2<i32>(input.position.xy) * scale;
    var depth = 0.0;
    for (var y = 0; y < scale.y; y++) {
        for (var x = 0; x < scale.x; x++) {
            let coord = min(base + vec2<i32>(x, y), size - vec2<i32>(1));
            depth = max(depth, textureLoad(camera_depth, coord, 0).r);
        }
    }
    return vec4<f32>(depth, 0.0, 0.0, 1.0);
}

@fragment
fn fs_depth_native(input: VertexOutput) -> @location(0) vec4<f32> {
    let depth = textureSampleLevel(camera_depth, samp, input.uv, 0.0).r;
    return vec4<f32>(depth, 0.0, 0.0, 1.0);
}
"#;

/// Preview height downsample: seed from the weather texture, then 2x2 max reduction
pub const HEIGHT_DOWNSAMPLE_PREVIEW_WGSL: &str = r#"
@group(0) @binding(2) var source: texture_2d<f32>;
@group(0) @binding(3) var weather_tex: texture_2d<f32>;
@group(0) @binding(4) var height_lut: texture_2d<f32>;

@fragment
fn fs_seed(input: VertexOutput) -> @location(0) vec4<f32> {
    let weather = textureSampleLevel(weather_tex, samp, input.uv, 0.0);
    let lut_uv = vec2<f32>(clamp(weather.r, 0.0, 1.0), clamp(weather.g, 0.0, 1.0));
    let height = textureSampleLevel(height_lut, samp, lut_uv, 0.0).r;
    return vec4<f32>(height, 0.0, 0.0, 1.0);
}

@fragment
fn fs_reduce(input: VertexOutput) -> @location(0) vec4<f32> {
    let size = vec2<i32>(textureDimensions(source));
    let base = vec2<i32>(input.position.xy) * 2;
    var height = 0.0;
    for (var y = 0; y < 2; y++) {
        for (var x = 0; x < 2; x++) {
            let coord = min(base + vec2<i32>(x, y), size - vec2<i32>(1));
            height = max(height, textureLoad(source, coord, 0).r);
        }
    }
    return vec4<f32>(height, 0.0, 0.0, 1.0);
}
"#;

/// Preview height lookup: each 8x8 invocation group covers a 32x32 tile
pub const HEIGHT_PREPROCESS_PREVIEW_WGSL: &str = r#"
@group(0) @binding(2) var height_density_map: texture_2d<f32>;
@group(0) @binding(3) var height_lut_result: texture_storage_2d<r32float, write>;

@compute @workgroup_size(8, 8, 1)
fn cs_main(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = textureDimensions(height_lut_result);
    let height_range = params.slots[0].xy;
    for (var dy = 0u; dy < 4u; dy++) {
        for (var dx = 0u; dx < 4u; dx++) {
            let p = id.xy * 4u + vec2<u32>(dx, dy);
            if (p.x >= size.x || p.y >= size.y) {
                continue;
            }
            let uv = (vec2<f32>(p) + 0.5) / vec2<f32>(size);
            let density = textureSampleLevel(height_density_map, samp, uv, 0.0).r;
            let height = mix(height_range.x, height_range.y, clamp(density, 0.0, 1.0));
            textureStore(height_lut_result, vec2<i32>(p), vec4<f32>(height, 0.0, 0.0, 1.0));
        }
    }
}
"#;

/// Preview shadow program: density projected from above, separable box blur
pub const SHADOW_PREVIEW_WGSL: &str = r#"
@group(0) @binding(2) var source: texture_2d<f32>;
@group(0) @binding(3) var weather_tex: texture_2d<f32>;
@group(0) @binding(4) var height_density_map: texture_2d<f32>;

@fragment
fn fs_density(input: VertexOutput) -> @location(0) vec4<f32> {
    let intensity = params.slots[1].x;
    let wind = params.slots[3].xy * params.slots[4].x;
    let coverage_modifier = params.slots[5].x;
    let overall_density = params.slots[6].x;

    let weather = textureSampleLevel(weather_tex, samp, input.uv + wind * 0.001, 0.0);
    let density = clamp(weather.r * coverage_modifier * overall_density, 0.0, 1.0);
    let shadow = 1.0 - density * intensity;
    return vec4<f32>(shadow, shadow, shadow, 1.0);
}

@fragment
fn fs_blur(input: VertexOutput) -> @location(0) vec4<f32> {
    let direction = vec2<i32>(params.slots[0].xy);
    let radius = clamp(i32(params.slots[2].x), 0, 8);
    let size = vec2<i32>(textureDimensions(source));
    let center = vec2<i32>(input.position.xy);
    var sum = vec4<f32>(0.0);
    for (var i = -radius; i <= radius; i++) {
        let coord = clamp(center + direction * i, vec2<i32>(0), size - vec2<i32>(1));
        sum += textureLoad(source, coord, 0);
    }
    return sum / f32(2 * radius + 1);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_indices_are_stable() {
        assert_eq!(CloudPass::Undersample.index(), 0);
        assert_eq!(CloudPass::Accumulate.index(), 1);
        assert_eq!(CloudPass::Composite.index(), 2);
        assert_eq!(CloudPass::DepthDownsampleReduced.index(), 3);
        assert_eq!(CloudPass::DepthDownsampleNative.index(), 4);
        assert_eq!(ShadowPass::Blur.index(), 1);
        assert_eq!(HeightDownsamplePass::Reduce.index(), 1);
    }

    #[test]
    fn every_cloud_pass_has_an_entry_point() {
        let desc = cloud_program_descriptor(CLOUD_PREVIEW_WGSL);
        for pass in [
            CloudPass::Undersample,
            CloudPass::Accumulate,
            CloudPass::Composite,
            CloudPass::DepthDownsampleReduced,
            CloudPass::DepthDownsampleNative,
        ] {
            let entry = &desc.passes[pass.index() as usize];
            assert!(desc.source.contains(&format!("fn {}(", entry)), "{entry}");
        }
    }

    #[test]
    fn cloud_uniforms_fit_parameter_block() {
        let desc = cloud_program_descriptor("");
        let slots: usize = desc.uniforms.iter().map(|u| u.kind.slot_count()).sum();
        assert!(slots <= crate::backend::MAX_UNIFORM_SLOTS);
    }

    #[test]
    fn wgsl_block_matches_rust_layout() {
        let decl = format!("array<vec4<f32>, {}>", crate::backend::MAX_UNIFORM_SLOTS);
        assert!(PARAMETER_BLOCK_WGSL.contains(&decl));
        assert_eq!(
            std::mem::size_of::<crate::backend::ParameterBlock>(),
            16 + 16 * crate::backend::MAX_UNIFORM_SLOTS
        );
    }

    #[test]
    fn preview_texture_bindings_follow_declaration_order() {
        let desc = cloud_program_descriptor(CLOUD_PREVIEW_WGSL);
        for (i, name) in desc.textures.iter().enumerate() {
            let binding = format!("@binding({}) var {}:", i + 2, name);
            assert!(desc.source.contains(&binding), "{binding}");
        }
    }
}
