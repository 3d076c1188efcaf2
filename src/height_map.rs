//! Hierarchical height map
//!
//! Builds a 512x512 single-channel texture whose mip chain stores the maximum cloud
//! height over progressively larger footprints. The cloud pass samples it to skip
//! empty space before marching.
//!
//! Build order:
//! 1. compute pass writing the height lookup texture
//! 2. seed pass from the weather texture into scratch level 0, copied to mip 0
//! 3. reduce passes from level i-1 into level i, each copied to mip i

use crate::backend::{
    Blit, GraphicsBackend, MaterialPass, TextureDescriptor, TextureFormat, TextureHandle,
};
use crate::config::CloudConfiguration;
use crate::error::{CloudError, CloudResult};
use crate::params::{names, ShaderParameters};
use crate::pool::{RenderTargetPool, TargetTag};
use crate::shaders::{CloudShaders, HeightDownsamplePass};

/// Side length of the weather texture and of height map level 0
pub const HEIGHT_MAP_SIZE: u32 = 512;

/// Number of levels in the chain (512 down to 1)
pub const HEIGHT_MAP_LEVELS: u32 = 10;

/// Texels covered by one compute work group along each axis
const LUT_TILE: u32 = 32;

/// Side length of chain level `level`
pub fn level_size(level: u32) -> u32 {
    HEIGHT_MAP_SIZE >> level
}

/// A built height map and the level range the cloud pass may sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeightMap {
    pub texture: TextureHandle,
    pub size: u32,
    pub min_level: u32,
    pub max_level: u32,
}

impl HeightMap {
    pub fn apply_to(&self, params: &mut ShaderParameters) {
        params.set_texture(names::HI_HEIGHT_MAP, self.texture);
        params.set_int(names::HEIGHT_MAP_SIZE, self.size as i32);
        params.set_int(names::HI_HEIGHT_MIN_LEVEL, self.min_level as i32);
        params.set_int(names::HI_HEIGHT_MAX_LEVEL, self.max_level as i32);
    }
}

/// Builds the hierarchical height map once per frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchicalHeightMapBuilder {
    lut_size: [u32; 2],
    level_range: [u32; 2],
}

impl HierarchicalHeightMapBuilder {
    pub fn new(lut_size: [u32; 2], level_range: [u32; 2]) -> Self {
        Self {
            lut_size,
            level_range,
        }
    }

    pub fn lut_size(&self) -> [u32; 2] {
        self.lut_size
    }

    pub fn level_range(&self) -> [u32; 2] {
        self.level_range
    }

    /// Highest chain level the reduce passes write
    pub fn last_level(&self) -> u32 {
        self.level_range[1].min(HEIGHT_MAP_LEVELS - 1)
    }

    /// Check the weather texture before any GPU work is issued
    pub fn validate(&self, config: &CloudConfiguration) -> CloudResult<()> {
        let weather = &config.weather_tex;
        if weather.width != HEIGHT_MAP_SIZE || weather.height != HEIGHT_MAP_SIZE {
            return Err(CloudError::InvalidWeatherTexture {
                width: weather.width,
                height: weather.height,
            });
        }
        Ok(())
    }

    pub fn build<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        pool: &mut RenderTargetPool,
        shaders: &CloudShaders,
        config: &CloudConfiguration,
    ) -> CloudResult<HeightMap> {
        self.validate(config)?;
        let preprocess = shaders
            .height_preprocess
            .ok_or(CloudError::MissingProgram("height preprocess"))?;
        let downsample = shaders
            .height_downsample
            .ok_or(CloudError::MissingProgram("height downsample"))?;

        let mut params = ShaderParameters::new();
        config.apply_to(&mut params);

        let lut_desc = TextureDescriptor::render_target(
            "Height LUT",
            self.lut_size[0],
            self.lut_size[1],
            TextureFormat::R32Float,
        )
        .with_random_write();
        let lut = pool.ensure(backend, TargetTag::HeightLut, &lut_desc)?.handle;

        params.set_texture(names::HEIGHT_LUT_RESULT, lut);
        backend.dispatch(
            preprocess,
            &params,
            [
                (self.lut_size[0] / LUT_TILE).max(1),
                (self.lut_size[1] / LUT_TILE).max(1),
                1,
            ],
        )?;

        let output_desc = TextureDescriptor::render_target(
            "Hi Height",
            HEIGHT_MAP_SIZE,
            HEIGHT_MAP_SIZE,
            TextureFormat::R32Float,
        )
        .with_random_write()
        .with_mip_levels(HEIGHT_MAP_LEVELS)
        .with_wrap_mode(config.weather_tex.wrap_mode);
        let output = pool.ensure(backend, TargetTag::HiHeight, &output_desc)?.handle;

        let mut levels = Vec::with_capacity(HEIGHT_MAP_LEVELS as usize);
        for level in 0..HEIGHT_MAP_LEVELS {
            let size = level_size(level);
            let desc = TextureDescriptor::render_target(
                &format!("Hi Height Level {}", level),
                size,
                size,
                TextureFormat::R32Float,
            );
            levels.push(pool.ensure(backend, TargetTag::HiHeightLevel(level), &desc)?.handle);
        }

        params.set_texture(names::HEIGHT_LUT, lut);
        backend.blit(&Blit::pass(
            None,
            levels[0],
            MaterialPass::new(downsample, HeightDownsamplePass::Seed.index()),
            &params,
        ))?;
        backend.copy_to_mip(levels[0], output, 0)?;

        let reduce = ShaderParameters::new();
        for level in 1..=self.last_level() {
            let (src, dst) = (levels[level as usize - 1], levels[level as usize]);
            backend.blit(&Blit::pass(
                Some(src),
                dst,
                MaterialPass::new(downsample, HeightDownsamplePass::Reduce.index()),
                &reduce,
            ))?;
            backend.copy_to_mip(dst, output, level)?;
        }

        log::trace!("Built hierarchical height map up to level {}", self.last_level());
        Ok(HeightMap {
            texture: output,
            size: HEIGHT_MAP_SIZE,
            min_level: self.level_range[0],
            max_level: self.level_range[1],
        })
    }
}

impl Default for HierarchicalHeightMapBuilder {
    fn default() -> Self {
        Self::new([512, 512], [0, 9])
    }
}
