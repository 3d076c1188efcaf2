//! Shader parameter bundles
//!
//! Every blit and dispatch receives its inputs as an explicit [`ShaderParameters`]
//! value: the enabled [`ShaderFeatures`] plus named uniforms and textures. Nothing is
//! stored on shared material objects between calls.

use crate::backend::types::{ParameterBlock, UniformDecl, MAX_UNIFORM_SLOTS};
use crate::backend::TextureHandle;
use bitflags::bitflags;
use glam::{Mat4, Vec4};
use std::collections::BTreeMap;

bitflags! {
    /// Feature toggles read by the cloud shading stage
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ShaderFeatures: u32 {
        /// Sample the hierarchical height map for early ray termination
        const USE_HI_HEIGHT = 1 << 0;
        /// Let clouds render in front of scene geometry
        const ALLOW_CLOUD_FRONT_OBJECT = 1 << 1;
        /// Debug view of the adaptive sample count
        const SHOW_SAMPLE_COUNT = 1 << 2;
    }
}

/// Parameter names shared between the orchestrator and shader programs
pub mod names {
    /// Source texture of a blit
    pub const SOURCE: &str = "source";

    // Configuration
    pub const WEATHER_TEX: &str = "weather_tex";
    pub const HEIGHT_DENSITY_MAP: &str = "height_density_map";
    pub const BASE_TEX: &str = "base_tex";
    pub const BASE_TILE: &str = "base_tile";
    pub const WIND_DIRECTION: &str = "wind_direction";
    pub const WIND_SPEED: &str = "wind_speed";
    pub const CLOUD_HEIGHT_RANGE: &str = "cloud_height_range";
    pub const OVERALL_DENSITY: &str = "overall_density";
    pub const COVERAGE_MODIFIER: &str = "coverage_modifier";
    pub const WEATHER_TEX_SIZE: &str = "weather_tex_size";
    pub const SHADOW_INTENSITY: &str = "shadow_intensity";
    pub const SHADOW_BLUR: &str = "shadow_blur";

    // Frame
    pub const CAMERA_DEPTH: &str = "camera_depth";
    pub const PROJECTION_EXTENTS: &str = "projection_extents";
    pub const RAYMARCH_OFFSET: &str = "raymarch_offset";
    pub const TEXEL_SIZE: &str = "texel_size";
    pub const CLOUD_MIN_SAMPLES: &str = "cloud_min_samples";
    pub const CLOUD_MAX_SAMPLES: &str = "cloud_max_samples";
    pub const CLOUD_DISTANCE_SCALE: &str = "cloud_distance_scale";
    pub const CLOUD_DENSITY_SCALE: &str = "cloud_density_scale";
    pub const DOWNSAMPLED_DEPTH: &str = "downsampled_depth";
    pub const UNDERSAMPLE_CLOUD_TEX: &str = "undersample_cloud_tex";
    pub const HISTORY_CLOUD_TEX: &str = "history_cloud_tex";
    pub const PREV_VP: &str = "prev_vp";
    pub const CLOUD_TEX: &str = "cloud_tex";

    // Hierarchical height map
    pub const HI_HEIGHT_MAP: &str = "hi_height_map";
    pub const HEIGHT_MAP_SIZE: &str = "height_map_size";
    pub const HI_HEIGHT_MIN_LEVEL: &str = "hi_height_min_level";
    pub const HI_HEIGHT_MAX_LEVEL: &str = "hi_height_max_level";
    pub const HEIGHT_LUT: &str = "height_lut";
    pub const HEIGHT_LUT_RESULT: &str = "height_lut_result";

    // Shadows
    pub const BLUR_DIRECTION: &str = "blur_direction";
}

/// A single named parameter value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Float(f32),
    Int(i32),
    Vector(Vec4),
    Matrix(Mat4),
    Texture(TextureHandle),
}

/// Structured parameter bundle passed to a pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShaderParameters {
    features: ShaderFeatures,
    values: BTreeMap<&'static str, ParamValue>,
}

impl ShaderParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn features(&self) -> ShaderFeatures {
        self.features
    }

    pub fn set_feature(&mut self, feature: ShaderFeatures, enabled: bool) {
        self.features.set(feature, enabled);
    }

    pub fn set_float(&mut self, name: &'static str, value: f32) {
        self.values.insert(name, ParamValue::Float(value));
    }

    pub fn set_int(&mut self, name: &'static str, value: i32) {
        self.values.insert(name, ParamValue::Int(value));
    }

    pub fn set_vector(&mut self, name: &'static str, value: Vec4) {
        self.values.insert(name, ParamValue::Vector(value));
    }

    pub fn set_matrix(&mut self, name: &'static str, value: Mat4) {
        self.values.insert(name, ParamValue::Matrix(value));
    }

    pub fn set_texture(&mut self, name: &'static str, texture: TextureHandle) {
        self.values.insert(name, ParamValue::Texture(texture));
    }

    /// Builder-style variant of [`set_texture`](Self::set_texture)
    pub fn with_texture(mut self, name: &'static str, texture: TextureHandle) -> Self {
        self.set_texture(name, texture);
        self
    }

    pub fn get(&self, name: &str) -> Option<ParamValue> {
        self.values.get(name).copied()
    }

    pub fn texture(&self, name: &str) -> Option<TextureHandle> {
        match self.values.get(name) {
            Some(ParamValue::Texture(handle)) => Some(*handle),
            _ => None,
        }
    }

    pub fn float(&self, name: &str) -> Option<f32> {
        match self.values.get(name) {
            Some(ParamValue::Float(value)) => Some(*value),
            Some(ParamValue::Int(value)) => Some(*value as f32),
            _ => None,
        }
    }

    /// Every value, in name order
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, ParamValue)> + '_ {
        self.values.iter().map(|(name, value)| (*name, *value))
    }

    /// All bound textures, in name order
    pub fn textures(&self) -> impl Iterator<Item = (&'static str, TextureHandle)> + '_ {
        self.values.iter().filter_map(|(name, value)| match value {
            ParamValue::Texture(handle) => Some((*name, *handle)),
            _ => None,
        })
    }

    /// Pack the declared uniforms into a GPU parameter block.
    ///
    /// Slots are assigned in declaration order. Undeclared values are ignored and
    /// declared values without a binding stay zero.
    pub fn pack(&self, uniforms: &[UniformDecl], pass_index: u32) -> ParameterBlock {
        let mut block = ParameterBlock {
            features: self.features.bits(),
            pass_index,
            ..Default::default()
        };

        let mut slot = 0;
        for decl in uniforms {
            let count = decl.kind.slot_count();
            if slot + count > MAX_UNIFORM_SLOTS {
                log::warn!("Parameter block overflow at uniform '{}'", decl.name);
                break;
            }
            match self.values.get(decl.name.as_str()) {
                Some(ParamValue::Float(v)) => block.slots[slot] = [*v, 0.0, 0.0, 0.0],
                Some(ParamValue::Int(v)) => block.slots[slot] = [*v as f32, 0.0, 0.0, 0.0],
                Some(ParamValue::Vector(v)) => block.slots[slot] = v.to_array(),
                Some(ParamValue::Matrix(m)) => {
                    let columns = m.to_cols_array_2d();
                    for (i, column) in columns.iter().enumerate().take(count) {
                        block.slots[slot + i] = *column;
                    }
                }
                Some(ParamValue::Texture(_)) | None => {}
            }
            slot += count;
        }

        block
    }
}
