//! Volumetric cloud frame orchestrator
//!
//! [`VolumetricCloudRenderer::render`] runs once per frame:
//!
//! 1. validate configuration, cloud program and camera, otherwise pass the frame through
//! 2. provision the accumulation pair, undersample and depth buffers and the shadow texture
//! 3. build the hierarchical height map when enabled
//! 4. downsample depth
//! 5. render the undersampled cloud pass with a halton jitter offset
//! 6. accumulate into the current ping-pong slot (plain copy when there is no history)
//! 7. render cloud shadows
//! 8. composite clouds over the scene, through a temporary when source and destination alias
//! 9. commit temporal state
//!
//! Missing dependencies and backend failures never surface as errors: the frame is
//! passed through unchanged and the reason is reported in [`FrameOutcome`].

use std::sync::Arc;

use bevy_ecs::world::World;
use glam::{UVec2, Vec4};

use crate::backend::{
    BackendError, BackendResult, Blit, GraphicsBackend, MaterialPass, ProgramHandle,
    TextureDescriptor, TextureFormat, TextureHandle,
};
use crate::config::{CloudConfiguration, RendererSettings};
use crate::error::CloudError;
use crate::height_map::HierarchicalHeightMapBuilder;
use crate::jitter::HaltonSequence;
use crate::params::{names, ShaderFeatures, ShaderParameters};
use crate::pool::{with_temporary, RenderTargetPool, TargetTag};
use crate::scene::{first_directional_light, Camera, LightCookieSlot};
use crate::shaders::{CloudPass, CloudShaders};
use crate::shadow::{CloudShadowPipeline, ShadowQuality};
use crate::temporal::{BufferPair, TemporalState};

/// Textures and camera of one frame
#[derive(Debug, Clone, Copy)]
pub struct FrameInput<'a> {
    /// Scene color
    pub source: TextureHandle,
    /// Where the composited frame goes. May be the same texture as `source`.
    pub destination: TextureHandle,
    pub camera: Option<&'a Camera>,
    /// Scene depth, sampled by the depth downsample pass
    pub depth: Option<TextureHandle>,
}

impl<'a> FrameInput<'a> {
    pub fn new(source: TextureHandle, destination: TextureHandle, camera: &'a Camera) -> Self {
        Self {
            source,
            destination,
            camera: Some(camera),
            depth: None,
        }
    }

    /// Composite into the scene color texture itself
    pub fn in_place(target: TextureHandle, camera: &'a Camera) -> Self {
        Self::new(target, target, camera)
    }

    pub fn with_depth(mut self, depth: TextureHandle) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn without_camera(mut self) -> Self {
        self.camera = None;
        self
    }
}

/// Why a frame was passed through unchanged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassThroughReason {
    /// The effect is disabled
    Disabled,
    MissingConfiguration,
    MissingCloudShader,
    MissingCamera,
    /// Working resolution rounded down to zero
    EmptyResolution,
    /// A render target could not be allocated; retried next frame
    AllocationFailed,
    /// Any other backend error
    BackendFailure(BackendError),
}

/// State of the hierarchical height map step in one frame
#[derive(Debug, Clone, PartialEq)]
pub enum HeightMapStatus {
    Disabled,
    Built,
    /// The step failed and the frame rendered without the height map
    Failed(CloudError),
}

/// What a rendered frame did
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub resolution: UVec2,
    pub buffers: BufferPair,
    pub height_map: HeightMapStatus,
    pub shadow_rendered: bool,
    /// Composite went through a temporary because source and destination alias
    pub used_temporary: bool,
    /// False when the accumulation slot was copied from the undersample buffer
    pub history_blended: bool,
}

/// Result of [`VolumetricCloudRenderer::render`]
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Rendered(FrameReport),
    PassThrough(PassThroughReason),
}

impl FrameOutcome {
    pub fn is_rendered(&self) -> bool {
        matches!(self, FrameOutcome::Rendered(_))
    }

    pub fn report(&self) -> Option<&FrameReport> {
        match self {
            FrameOutcome::Rendered(report) => Some(report),
            FrameOutcome::PassThrough(_) => None,
        }
    }

    pub fn pass_through_reason(&self) -> Option<&PassThroughReason> {
        match self {
            FrameOutcome::Rendered(_) => None,
            FrameOutcome::PassThrough(reason) => Some(reason),
        }
    }
}

/// Camera post-processing effect rendering volumetric clouds
pub struct VolumetricCloudRenderer {
    settings: RendererSettings,
    config: Option<Arc<CloudConfiguration>>,
    shaders: CloudShaders,
    pool: RenderTargetPool,
    temporal: TemporalState,
    jitter: HaltonSequence,
    height_map: HierarchicalHeightMapBuilder,
    shadows: CloudShadowPipeline,
    enabled: bool,
}

impl VolumetricCloudRenderer {
    pub fn new(shaders: CloudShaders, settings: RendererSettings) -> Self {
        let settings = settings.sanitized();
        Self {
            height_map: height_map_builder(&settings),
            settings,
            config: None,
            shaders,
            pool: RenderTargetPool::new(),
            temporal: TemporalState::new(),
            jitter: HaltonSequence::default(),
            shadows: CloudShadowPipeline::default(),
            enabled: true,
        }
    }

    pub fn with_configuration(mut self, config: Arc<CloudConfiguration>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn set_configuration(&mut self, config: Option<Arc<CloudConfiguration>>) {
        self.config = config;
    }

    pub fn configuration(&self) -> Option<&Arc<CloudConfiguration>> {
        self.config.as_ref()
    }

    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    /// Replace the settings. Values are clamped into their supported ranges.
    pub fn set_settings(&mut self, settings: RendererSettings) {
        self.settings = settings.sanitized();
        self.height_map = height_map_builder(&self.settings);
    }

    pub fn shaders(&self) -> &CloudShaders {
        &self.shaders
    }

    pub fn set_shaders(&mut self, shaders: CloudShaders) {
        self.shaders = shaders;
    }

    /// Light whose cookie receives the cloud shadow texture
    pub fn set_light(&mut self, light: Option<LightCookieSlot>) {
        self.shadows.set_light(light);
    }

    /// Attach to the first directional light in `world`. Returns false when there is none.
    pub fn attach_light(&mut self, world: &mut World) -> bool {
        let light = first_directional_light(world);
        let found = light.is_some();
        if !found {
            log::debug!("No directional light found, cloud shadows will not be projected");
        }
        self.shadows.set_light(light);
        found
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enable the effect with fresh temporal history
    pub fn enable(&mut self) {
        self.enabled = true;
        self.temporal.reset();
    }

    /// Disable the effect, releasing every render target, idle scratch texture and the
    /// light cookie
    pub fn disable<B: GraphicsBackend>(&mut self, backend: &mut B) {
        self.enabled = false;
        self.shadows.teardown(backend, &mut self.pool);
        self.pool.release_all(backend);
        backend.release_unused_temporaries();
    }

    pub fn temporal(&self) -> &TemporalState {
        &self.temporal
    }

    pub fn pool(&self) -> &RenderTargetPool {
        &self.pool
    }

    pub fn jitter(&self) -> &HaltonSequence {
        &self.jitter
    }

    pub fn shadow_pipeline(&self) -> &CloudShadowPipeline {
        &self.shadows
    }

    /// Current cloud shadow texture, for other systems to sample
    pub fn shadow_texture(&self) -> Option<TextureHandle> {
        self.shadows.output(&self.pool)
    }

    /// Camera resolution reduced by the downsample level
    pub fn working_resolution(&self, camera: &Camera) -> UVec2 {
        UVec2::new(
            camera.resolution.x >> self.settings.downsample,
            camera.resolution.y >> self.settings.downsample,
        )
    }

    /// Render clouds for one frame
    pub fn render<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        frame: &FrameInput<'_>,
    ) -> FrameOutcome {
        if !self.enabled {
            return pass_through(backend, frame, PassThroughReason::Disabled);
        }
        let Some(config) = self.config.clone() else {
            return pass_through(backend, frame, PassThroughReason::MissingConfiguration);
        };
        let Some(cloud) = self.shaders.cloud else {
            return pass_through(backend, frame, PassThroughReason::MissingCloudShader);
        };
        let Some(camera) = frame.camera else {
            return pass_through(backend, frame, PassThroughReason::MissingCamera);
        };
        let resolution = self.working_resolution(camera);
        if resolution.x == 0 || resolution.y == 0 {
            return pass_through(backend, frame, PassThroughReason::EmptyResolution);
        }

        match self.render_clouds(backend, frame, camera, cloud, &config, resolution) {
            Ok(report) => {
                log::trace!(
                    "Cloud frame {} rendered at {}x{}",
                    self.temporal.frames(),
                    resolution.x,
                    resolution.y
                );
                FrameOutcome::Rendered(report)
            }
            Err(err) if err.is_allocation_failure() => {
                log::warn!("Cloud render target allocation failed, passing frame through: {err}");
                pass_through(backend, frame, PassThroughReason::AllocationFailed)
            }
            Err(err) => {
                log::warn!("Cloud rendering failed, passing frame through: {err}");
                pass_through(backend, frame, PassThroughReason::BackendFailure(err))
            }
        }
    }

    fn render_clouds<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        frame: &FrameInput<'_>,
        camera: &Camera,
        cloud: ProgramHandle,
        config: &CloudConfiguration,
        resolution: UVec2,
    ) -> BackendResult<FrameReport> {
        let buffers = self.temporal.next_buffers();
        let (width, height) = (resolution.x, resolution.y);

        // Provision
        let color = |label: &str| {
            TextureDescriptor::render_target(label, width, height, TextureFormat::Rgba32Float)
        };
        let current = self
            .pool
            .ensure(backend, buffers.current_tag(), &color("Cloud Accumulation"))?;
        let previous = self
            .pool
            .ensure(backend, buffers.previous_tag(), &color("Cloud Accumulation"))?;
        let undersample = self
            .pool
            .ensure(backend, TargetTag::Undersample, &color("Cloud Undersample"))?
            .handle;
        let depth_desc =
            TextureDescriptor::render_target("Cloud Depth", width, height, TextureFormat::R32Float);
        let downsampled_depth = self
            .pool
            .ensure(backend, TargetTag::DownsampledDepth, &depth_desc)?
            .handle;
        // No shadow program, no shadow texture
        let shadow_quality = if self.shaders.shadow.is_some() {
            config.parameters.shadow_quality
        } else {
            ShadowQuality::Off
        };
        let shadow_output = self
            .shadows
            .set_quality(backend, &mut self.pool, shadow_quality)?;

        let mut params = ShaderParameters::new();
        config.apply_to(&mut params);
        params.set_feature(
            ShaderFeatures::ALLOW_CLOUD_FRONT_OBJECT,
            self.settings.allow_cloud_front_object,
        );
        params.set_feature(
            ShaderFeatures::SHOW_SAMPLE_COUNT,
            self.settings.show_sample_count,
        );

        // Hierarchical height map
        let height_map = if self.settings.use_hierarchical_height_map {
            match self
                .height_map
                .build(backend, &mut self.pool, &self.shaders, config)
            {
                Ok(map) => {
                    map.apply_to(&mut params);
                    params.set_feature(ShaderFeatures::USE_HI_HEIGHT, true);
                    HeightMapStatus::Built
                }
                Err(CloudError::Backend(err)) => return Err(err),
                Err(err) => {
                    log::error!("Hierarchical height map skipped: {err}");
                    HeightMapStatus::Failed(err)
                }
            }
        } else {
            HeightMapStatus::Disabled
        };

        params.set_vector(names::PROJECTION_EXTENTS, camera.projection_extents());
        params.set_float(names::RAYMARCH_OFFSET, self.jitter.next());
        params.set_vector(
            names::TEXEL_SIZE,
            Vec4::new(
                1.0 / width as f32,
                1.0 / height as f32,
                width as f32,
                height as f32,
            ),
        );
        params.set_float(names::CLOUD_MIN_SAMPLES, self.settings.min_sample_count as f32);
        params.set_float(names::CLOUD_MAX_SAMPLES, self.settings.max_sample_count as f32);
        params.set_float(names::CLOUD_DISTANCE_SCALE, self.settings.sample_distance_scale);
        params.set_float(names::CLOUD_DENSITY_SCALE, self.settings.density_sample_scale);

        // Depth downsample
        if let Some(depth) = frame.depth {
            params.set_texture(names::CAMERA_DEPTH, depth);
        }
        let depth_pass = if self.settings.downsample > 0 {
            CloudPass::DepthDownsampleReduced
        } else {
            CloudPass::DepthDownsampleNative
        };
        backend.blit(&Blit::pass(
            None,
            downsampled_depth,
            MaterialPass::new(cloud, depth_pass.index()),
            &params,
        ))?;
        params.set_texture(names::DOWNSAMPLED_DEPTH, downsampled_depth);

        // Undersampled clouds
        backend.blit(&Blit::pass(
            None,
            undersample,
            MaterialPass::new(cloud, CloudPass::Undersample.index()),
            &params,
        ))?;

        // Temporal accumulation
        params.set_texture(names::UNDERSAMPLE_CLOUD_TEX, undersample);
        params.set_matrix(
            names::PREV_VP,
            camera.projection_matrix() * self.temporal.previous_view(),
        );
        let history_valid =
            !self.temporal.first_frame() && !current.allocated && !previous.allocated;
        if history_valid {
            params.set_texture(names::HISTORY_CLOUD_TEX, previous.handle);
            backend.blit(&Blit::pass(
                None,
                current.handle,
                MaterialPass::new(cloud, CloudPass::Accumulate.index()),
                &params,
            ))?;
        } else {
            if !self.temporal.first_frame() {
                log::debug!("Cloud accumulation buffers reallocated, history dropped");
            }
            backend.blit(&Blit::copy(undersample, current.handle))?;
        }
        params.set_texture(names::CLOUD_TEX, current.handle);

        // Shadows
        let shadow_rendered = match (shadow_output, self.shaders.shadow) {
            (Some(output), Some(program)) => {
                self.shadows.render(backend, program, output, config)?;
                true
            }
            _ => false,
        };

        // Composite
        let composite = MaterialPass::new(cloud, CloudPass::Composite.index());
        let used_temporary = frame.source == frame.destination;
        if used_temporary {
            let desc = backend
                .texture_descriptor(frame.destination)
                .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", frame.destination)))?;
            let temp_desc = TextureDescriptor::render_target(
                "Cloud Composite",
                desc.width,
                desc.height,
                desc.format,
            );
            with_temporary(backend, &temp_desc, |backend, temp| {
                backend.blit(&Blit::pass(Some(frame.source), temp, composite, &params))?;
                backend.blit(&Blit::copy(temp, frame.destination))
            })?;
        } else {
            backend.blit(&Blit::pass(
                Some(frame.source),
                frame.destination,
                composite,
                &params,
            ))?;
        }

        self.temporal.commit(camera.view_matrix(), buffers);

        Ok(FrameReport {
            resolution,
            buffers,
            height_map,
            shadow_rendered,
            used_temporary,
            history_blended: history_valid,
        })
    }
}

impl Default for VolumetricCloudRenderer {
    fn default() -> Self {
        Self::new(CloudShaders::default(), RendererSettings::default())
    }
}

fn height_map_builder(settings: &RendererSettings) -> HierarchicalHeightMapBuilder {
    HierarchicalHeightMapBuilder::new(settings.height_lut_size, settings.hi_height_level_range)
}

/// Copy the scene through unchanged
fn pass_through<B: GraphicsBackend>(
    backend: &mut B,
    frame: &FrameInput<'_>,
    reason: PassThroughReason,
) -> FrameOutcome {
    log::trace!("Cloud frame passed through: {:?}", reason);
    if frame.source != frame.destination {
        if let Err(err) = backend.blit(&Blit::copy(frame.source, frame.destination)) {
            log::error!("Pass-through copy failed: {err}");
        }
    }
    FrameOutcome::PassThrough(reason)
}
