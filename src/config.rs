//! Cloud configuration and renderer settings
//!
//! [`CloudConfiguration`] is the read-only description of the cloud layer (textures,
//! wind, density, shadows). [`RendererSettings`] controls how the renderer spends its
//! budget. The numeric parts of both load from TOML.

use std::path::Path;

use glam::Vec4;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::backend::{GraphicsBackend, TextureHandle, WrapMode};
use crate::error::{CloudError, CloudResult};
use crate::params::{names, ShaderParameters};
use crate::shadow::ShadowQuality;

/// Numeric cloud layer parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudParameters {
    pub base_tile: f32,
    pub wind_direction: [f32; 2],
    pub wind_speed: f32,
    /// Bottom and top of the cloud layer in world units
    pub cloud_height_range: [f32; 2],
    pub overall_density: f32,
    pub coverage_modifier: f32,
    pub shadow_quality: ShadowQuality,
    pub shadow_intensity: f32,
    /// Blur radius in texels
    pub shadow_blur: f32,
    /// World-space extent covered by one repeat of the weather texture
    pub weather_tex_size: f32,
}

impl Default for CloudParameters {
    fn default() -> Self {
        Self {
            base_tile: 1.0,
            wind_direction: [1.0, 0.0],
            wind_speed: 10.0,
            cloud_height_range: [1500.0, 4000.0],
            overall_density: 1.0,
            coverage_modifier: 1.0,
            shadow_quality: ShadowQuality::Off,
            shadow_intensity: 0.8,
            shadow_blur: 2.0,
            weather_tex_size: 50000.0,
        }
    }
}

/// A texture owned by the host, with the properties the pipeline checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRef {
    pub handle: TextureHandle,
    pub width: u32,
    pub height: u32,
    pub wrap_mode: WrapMode,
}

impl TextureRef {
    pub fn new(handle: TextureHandle, width: u32, height: u32) -> Self {
        Self {
            handle,
            width,
            height,
            wrap_mode: WrapMode::default(),
        }
    }

    /// Describe a texture already created on `backend`
    pub fn from_backend<B: GraphicsBackend>(backend: &B, handle: TextureHandle) -> Option<Self> {
        backend.texture_descriptor(handle).map(|desc| Self {
            handle,
            width: desc.width,
            height: desc.height,
            wrap_mode: desc.wrap_mode,
        })
    }
}

/// Read-only cloud configuration consumed once per frame
#[derive(Debug, Clone, PartialEq)]
pub struct CloudConfiguration {
    pub weather_tex: TextureRef,
    pub height_density_map: Option<TextureHandle>,
    pub base_tex: Option<TextureHandle>,
    pub parameters: CloudParameters,
}

impl CloudConfiguration {
    pub fn new(weather_tex: TextureRef, parameters: CloudParameters) -> Self {
        Self {
            weather_tex,
            height_density_map: None,
            base_tex: None,
            parameters,
        }
    }

    pub fn with_height_density_map(mut self, texture: TextureHandle) -> Self {
        self.height_density_map = Some(texture);
        self
    }

    pub fn with_base_tex(mut self, texture: TextureHandle) -> Self {
        self.base_tex = Some(texture);
        self
    }

    /// Push every configuration value onto `params`
    pub fn apply_to(&self, params: &mut ShaderParameters) {
        let p = &self.parameters;

        params.set_texture(names::WEATHER_TEX, self.weather_tex.handle);
        if let Some(texture) = self.height_density_map {
            params.set_texture(names::HEIGHT_DENSITY_MAP, texture);
        }
        if let Some(texture) = self.base_tex {
            params.set_texture(names::BASE_TEX, texture);
        }

        params.set_float(names::BASE_TILE, p.base_tile);
        params.set_vector(
            names::WIND_DIRECTION,
            Vec4::new(p.wind_direction[0], p.wind_direction[1], 0.0, 0.0),
        );
        params.set_float(names::WIND_SPEED, p.wind_speed);
        params.set_vector(
            names::CLOUD_HEIGHT_RANGE,
            Vec4::new(p.cloud_height_range[0], p.cloud_height_range[1], 0.0, 0.0),
        );
        params.set_float(names::OVERALL_DENSITY, p.overall_density);
        params.set_float(names::COVERAGE_MODIFIER, p.coverage_modifier);
        params.set_float(names::WEATHER_TEX_SIZE, p.weather_tex_size);
        params.set_float(names::SHADOW_INTENSITY, p.shadow_intensity);
        params.set_float(names::SHADOW_BLUR, p.shadow_blur);
    }
}

/// Renderer quality and debug settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    /// Working resolution is the camera resolution shifted right by this (0..=2)
    pub downsample: u32,
    pub allow_cloud_front_object: bool,
    pub min_sample_count: u32,
    pub max_sample_count: u32,
    pub sample_distance_scale: f32,
    pub density_sample_scale: f32,
    pub use_hierarchical_height_map: bool,
    /// Lowest and highest height map level the cloud pass may use
    pub hi_height_level_range: [u32; 2],
    pub height_lut_size: [u32; 2],
    /// Visualize the adaptive sample count instead of clouds
    pub show_sample_count: bool,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            downsample: 1,
            allow_cloud_front_object: false,
            min_sample_count: 16,
            max_sample_count: 64,
            sample_distance_scale: 1.0,
            density_sample_scale: 1.0,
            use_hierarchical_height_map: false,
            hi_height_level_range: [0, 9],
            height_lut_size: [512, 512],
            show_sample_count: false,
        }
    }
}

impl RendererSettings {
    pub const MAX_DOWNSAMPLE: u32 = 2;

    /// Copy with every value clamped into its supported range
    pub fn sanitized(&self) -> Self {
        let min_level = self.hi_height_level_range[0].min(9);
        Self {
            downsample: self.downsample.min(Self::MAX_DOWNSAMPLE),
            allow_cloud_front_object: self.allow_cloud_front_object,
            min_sample_count: self.min_sample_count.clamp(8, 32),
            max_sample_count: self.max_sample_count.clamp(32, 128),
            sample_distance_scale: self.sample_distance_scale.clamp(0.1, 2.0),
            density_sample_scale: self.density_sample_scale.clamp(0.1, 2.0),
            use_hierarchical_height_map: self.use_hierarchical_height_map,
            hi_height_level_range: [min_level, self.hi_height_level_range[1].max(min_level)],
            height_lut_size: [
                self.height_lut_size[0].max(32),
                self.height_lut_size[1].max(32),
            ],
            show_sample_count: self.show_sample_count,
        }
    }
}

/// Both sections of a cloud TOML file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub renderer: RendererSettings,
    pub clouds: CloudParameters,
}

fn load_toml<T: DeserializeOwned>(path: &Path) -> CloudResult<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| CloudError::Config(format!("failed to read {}: {e}", path.display())))?;
    toml::from_str(&content)
        .map_err(|e| CloudError::Config(format!("failed to parse {}: {e}", path.display())))
}

/// Load renderer settings from a TOML file
pub fn load_settings(path: &Path) -> CloudResult<RendererSettings> {
    load_toml::<RendererSettings>(path).map(|s| s.sanitized())
}

/// Load cloud parameters from a TOML file
pub fn load_cloud_parameters(path: &Path) -> CloudResult<CloudParameters> {
    load_toml(path)
}

/// Load a file with `[renderer]` and `[clouds]` sections
pub fn load_config_file(path: &Path) -> CloudResult<ConfigFile> {
    let mut file: ConfigFile = load_toml(path)?;
    file.renderer = file.renderer.sanitized();
    Ok(file)
}
