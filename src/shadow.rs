//! Cloud shadow pipeline
//!
//! Renders cloud density seen from above into a 2048x2048 scratch buffer, blurs it
//! into the pooled shadow texture and publishes that texture as the cookie of the
//! sun light. Quality transitions decide residency:
//! - Off to Low/High: the shadow texture is (re)allocated
//! - Low/High to Off: residency is released and the cookie cleared
//! - Low to High and back: parameter change only

use glam::Vec4;
use serde::{Deserialize, Serialize};

use crate::backend::{
    BackendResult, Blit, GraphicsBackend, MaterialPass, ProgramHandle, TextureDescriptor,
    TextureFormat, TextureHandle,
};
use crate::config::CloudConfiguration;
use crate::params::{names, ShaderParameters};
use crate::pool::{with_temporary, RenderTargetPool, TargetTag};
use crate::scene::{LightCookie, LightCookieSlot};
use crate::shaders::ShadowPass;

/// Side length of the shadow texture and its scratch buffers
pub const SHADOW_MAP_SIZE: u32 = 2048;

const HORIZONTAL: Vec4 = Vec4::new(1.0, 0.0, 0.0, 0.0);
const VERTICAL: Vec4 = Vec4::new(0.0, 1.0, 0.0, 0.0);

/// Shadow quality tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShadowQuality {
    #[default]
    Off,
    /// One horizontal blur pass
    Low,
    /// Horizontal and vertical blur passes
    High,
}

impl ShadowQuality {
    pub fn is_enabled(self) -> bool {
        self != ShadowQuality::Off
    }

    pub fn blur_passes(self) -> u32 {
        match self {
            ShadowQuality::Off => 0,
            ShadowQuality::Low => 1,
            ShadowQuality::High => 2,
        }
    }
}

/// Shadow quality state machine and render passes
#[derive(Debug, Clone, Default)]
pub struct CloudShadowPipeline {
    quality: ShadowQuality,
    previous_quality: ShadowQuality,
    light: Option<LightCookieSlot>,
}

impl CloudShadowPipeline {
    pub fn new(light: Option<LightCookieSlot>) -> Self {
        Self {
            light,
            ..Default::default()
        }
    }

    pub fn quality(&self) -> ShadowQuality {
        self.quality
    }

    pub fn previous_quality(&self) -> ShadowQuality {
        self.previous_quality
    }

    pub fn light(&self) -> Option<&LightCookieSlot> {
        self.light.as_ref()
    }

    pub fn set_light(&mut self, light: Option<LightCookieSlot>) {
        if let Some(old) = &self.light {
            old.clear();
        }
        self.light = light;
    }

    pub fn output_descriptor() -> TextureDescriptor {
        TextureDescriptor::render_target(
            "Cloud Shadow",
            SHADOW_MAP_SIZE,
            SHADOW_MAP_SIZE,
            TextureFormat::Rgba8Unorm,
        )
    }

    pub fn scratch_descriptor() -> TextureDescriptor {
        TextureDescriptor::render_target(
            "Cloud Shadow Scratch",
            SHADOW_MAP_SIZE,
            SHADOW_MAP_SIZE,
            TextureFormat::Rgba8Unorm,
        )
    }

    /// Move to `quality`, allocating or releasing the shadow texture as needed.
    /// Returns the shadow texture when shadows are enabled.
    pub fn set_quality<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        pool: &mut RenderTargetPool,
        quality: ShadowQuality,
    ) -> BackendResult<Option<TextureHandle>> {
        if quality != self.quality {
            log::debug!("Cloud shadow quality {:?} -> {:?}", self.quality, quality);
        }
        self.previous_quality = self.quality;
        self.quality = quality;

        if !quality.is_enabled() {
            if self.previous_quality.is_enabled() {
                pool.release(backend, TargetTag::Shadow);
                self.clear_cookie();
            }
            return Ok(None);
        }

        let provisioned = pool.ensure(backend, TargetTag::Shadow, &Self::output_descriptor())?;
        Ok(Some(provisioned.handle))
    }

    /// Current shadow texture, if shadows are enabled and it is provisioned
    pub fn output(&self, pool: &RenderTargetPool) -> Option<TextureHandle> {
        if self.quality.is_enabled() {
            pool.get(TargetTag::Shadow)
        } else {
            None
        }
    }

    /// Render density and blur passes into `output`, then publish it as the light cookie.
    /// Scratch buffers are returned to the backend even when a pass fails.
    pub fn render<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        program: ProgramHandle,
        output: TextureHandle,
        config: &CloudConfiguration,
    ) -> BackendResult<()> {
        let quality = self.quality;
        if !quality.is_enabled() {
            return Ok(());
        }

        let mut params = ShaderParameters::new();
        config.apply_to(&mut params);
        let scratch = Self::scratch_descriptor();

        with_temporary(backend, &scratch, |backend, a| {
            backend.blit(&Blit::pass(
                None,
                a,
                MaterialPass::new(program, ShadowPass::Density.index()),
                &params,
            ))?;
            match quality {
                ShadowQuality::Low => blur(backend, program, &params, a, output, HORIZONTAL),
                ShadowQuality::High => with_temporary(backend, &scratch, |backend, b| {
                    blur(backend, program, &params, a, b, HORIZONTAL)?;
                    blur(backend, program, &params, b, output, VERTICAL)
                }),
                ShadowQuality::Off => Ok(()),
            }
        })?;

        if let Some(light) = &self.light {
            light.set(LightCookie {
                texture: output,
                size: config.parameters.weather_tex_size,
            });
        }
        Ok(())
    }

    /// Release the shadow texture and clear the cookie, as on effect teardown
    pub fn teardown<B: GraphicsBackend>(&mut self, backend: &mut B, pool: &mut RenderTargetPool) {
        pool.release(backend, TargetTag::Shadow);
        self.clear_cookie();
        self.previous_quality = self.quality;
        self.quality = ShadowQuality::Off;
    }

    fn clear_cookie(&self) {
        if let Some(light) = &self.light {
            light.clear();
        }
    }
}

fn blur<B: GraphicsBackend>(
    backend: &mut B,
    program: ProgramHandle,
    params: &ShaderParameters,
    source: TextureHandle,
    destination: TextureHandle,
    direction: Vec4,
) -> BackendResult<()> {
    let mut params = params.clone();
    params.set_vector(names::BLUR_DIRECTION, direction);
    backend.blit(&Blit::pass(
        Some(source),
        destination,
        MaterialPass::new(program, ShadowPass::Blur.index()),
        &params,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Command, DummyBackend};
    use crate::config::{CloudParameters, TextureRef};
    use crate::shaders::CloudShaders;

    struct Fixture {
        backend: DummyBackend,
        pool: RenderTargetPool,
        program: ProgramHandle,
        config: CloudConfiguration,
        light: LightCookieSlot,
    }

    fn fixture() -> Fixture {
        let mut backend = DummyBackend::new();
        let program = CloudShaders::preview(&mut backend).unwrap().shadow.unwrap();
        let weather = backend
            .create_texture(&TextureDescriptor {
                width: 512,
                height: 512,
                ..Default::default()
            })
            .unwrap();
        let config = CloudConfiguration::new(
            TextureRef::from_backend(&backend, weather).unwrap(),
            CloudParameters::default(),
        );
        Fixture {
            backend,
            pool: RenderTargetPool::new(),
            program,
            config,
            light: LightCookieSlot::new(),
        }
    }

    fn blur_count(backend: &DummyBackend, program: ProgramHandle) -> usize {
        backend
            .blits()
            .filter(|c| {
                matches!(c, Command::Blit { material: Some(m), .. }
                    if m.program == program && m.pass == ShadowPass::Blur.index())
            })
            .count()
    }

    #[test]
    fn blur_pass_count_follows_quality() {
        for (quality, expected) in [(ShadowQuality::Low, 1), (ShadowQuality::High, 2)] {
            let mut f = fixture();
            let mut shadows = CloudShadowPipeline::new(Some(f.light.clone()));
            let output = shadows
                .set_quality(&mut f.backend, &mut f.pool, quality)
                .unwrap()
                .unwrap();
            shadows
                .render(&mut f.backend, f.program, output, &f.config)
                .unwrap();

            assert_eq!(blur_count(&f.backend, f.program), expected);
            assert_eq!(f.backend.temporaries_in_use(), 0);
            assert_eq!(f.light.get().map(|c| c.texture), Some(output));
            assert_eq!(f.light.get().map(|c| c.size), Some(50000.0));
        }
    }

    #[test]
    fn off_releases_residency_and_cookie() {
        let mut f = fixture();
        let mut shadows = CloudShadowPipeline::new(Some(f.light.clone()));
        let output = shadows
            .set_quality(&mut f.backend, &mut f.pool, ShadowQuality::High)
            .unwrap()
            .unwrap();
        shadows
            .render(&mut f.backend, f.program, output, &f.config)
            .unwrap();

        shadows
            .set_quality(&mut f.backend, &mut f.pool, ShadowQuality::Off)
            .unwrap();
        assert!(!f.backend.is_resident(output));
        assert!(!f.light.is_set());
        assert_eq!(shadows.output(&f.pool), None);
        assert_eq!(shadows.previous_quality(), ShadowQuality::High);
    }

    #[test]
    fn low_high_switch_keeps_texture() {
        let mut f = fixture();
        let mut shadows = CloudShadowPipeline::new(None);
        let low = shadows
            .set_quality(&mut f.backend, &mut f.pool, ShadowQuality::Low)
            .unwrap();
        let high = shadows
            .set_quality(&mut f.backend, &mut f.pool, ShadowQuality::High)
            .unwrap();
        assert_eq!(low, high);
    }

    #[test]
    fn missing_light_is_not_an_error() {
        let mut f = fixture();
        let mut shadows = CloudShadowPipeline::new(None);
        let output = shadows
            .set_quality(&mut f.backend, &mut f.pool, ShadowQuality::Low)
            .unwrap()
            .unwrap();
        assert!(shadows
            .render(&mut f.backend, f.program, output, &f.config)
            .is_ok());
    }
}
