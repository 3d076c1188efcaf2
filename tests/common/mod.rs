//! Common utilities for cloud pipeline integration tests.
//!
//! Provides a [`Fixture`] wiring a [`VolumetricCloudRenderer`] to the dummy backend with
//! a scene color texture, an output texture, a camera and a directional light.

#![allow(dead_code)]

use std::sync::Arc;

use volumetric_clouds::backend::{
    Command, DummyBackend, GraphicsBackend, TextureDescriptor, TextureFormat, TextureHandle,
};
use volumetric_clouds::config::{CloudConfiguration, CloudParameters, RendererSettings, TextureRef};
use volumetric_clouds::scene::{Camera, LightCookieSlot};
use volumetric_clouds::shaders::CloudShaders;
use volumetric_clouds::{FrameInput, FrameOutcome, FrameReport, VolumetricCloudRenderer};

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 32;

/// Content stamp given to the scene color texture
pub const SCENE_CONTENT: u64 = 0x5ce7e;

pub struct Fixture {
    pub backend: DummyBackend,
    pub renderer: VolumetricCloudRenderer,
    pub shaders: CloudShaders,
    pub scene: TextureHandle,
    pub output: TextureHandle,
    pub camera: Camera,
    pub light: LightCookieSlot,
    pub weather: TextureRef,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with(RendererSettings::default(), CloudParameters::default(), 512)
    }

    pub fn with_settings(settings: RendererSettings) -> Self {
        Self::with(settings, CloudParameters::default(), 512)
    }

    pub fn with(settings: RendererSettings, parameters: CloudParameters, weather_size: u32) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut backend = DummyBackend::new();
        let shaders = CloudShaders::preview(&mut backend).expect("preview programs");
        let weather = backend
            .create_texture(&TextureDescriptor {
                label: Some("weather".into()),
                width: weather_size,
                height: weather_size,
                ..Default::default()
            })
            .expect("weather texture");
        let weather = TextureRef::from_backend(&backend, weather).expect("weather descriptor");

        let scene = render_target(&mut backend, "scene");
        backend.set_content(scene, SCENE_CONTENT);
        let output = render_target(&mut backend, "output");

        let light = LightCookieSlot::new();
        let mut renderer = VolumetricCloudRenderer::new(shaders, settings)
            .with_configuration(Arc::new(CloudConfiguration::new(weather, parameters)));
        renderer.set_light(Some(light.clone()));

        Self {
            backend,
            renderer,
            shaders,
            scene,
            output,
            camera: Camera::default().with_resolution(WIDTH, HEIGHT),
            light,
            weather,
        }
    }

    /// Render scene into output
    pub fn frame(&mut self) -> FrameOutcome {
        let input = FrameInput::new(self.scene, self.output, &self.camera);
        self.renderer.render(&mut self.backend, &input)
    }

    /// Render with source and destination being the scene texture
    pub fn frame_in_place(&mut self) -> FrameOutcome {
        let input = FrameInput::in_place(self.scene, &self.camera);
        self.renderer.render(&mut self.backend, &input)
    }

    /// Render a frame that is expected to succeed
    pub fn rendered(&mut self) -> FrameReport {
        match self.frame() {
            FrameOutcome::Rendered(report) => report,
            FrameOutcome::PassThrough(reason) => panic!("frame passed through: {:?}", reason),
        }
    }

    /// Swap in a new configuration with the given parameters
    pub fn set_parameters(&mut self, parameters: CloudParameters) {
        let config = CloudConfiguration::new(self.weather, parameters);
        self.renderer.set_configuration(Some(Arc::new(config)));
    }

    pub fn count(&self, predicate: impl Fn(&Command) -> bool) -> usize {
        self.backend.commands().iter().filter(|c| predicate(c)).count()
    }

    pub fn creations(&self) -> usize {
        self.count(|c| matches!(c, Command::CreateTexture { .. }))
    }
}

pub fn render_target(backend: &mut DummyBackend, label: &str) -> TextureHandle {
    backend
        .create_texture(&TextureDescriptor::render_target(
            label,
            WIDTH,
            HEIGHT,
            TextureFormat::Rgba8Unorm,
        ))
        .expect("render target")
}
