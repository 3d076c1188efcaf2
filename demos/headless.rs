//! # Headless Clouds Demo
//!
//! Demonstrates:
//! - Headless wgpu backend initialization
//! - Loading renderer settings and cloud parameters from TOML
//! - Weather texture from an image file or a procedural gradient
//! - Several frames of temporal accumulation with a moving camera
//! - Cloud shadows published to a directional light cookie
//! - Reading back the composited frame into a PNG
//!
//! ```text
//! cargo run --example headless -- --config demos/clouds.toml --output clouds.png
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use bevy_ecs::world::World;
use clap::Parser;
use glam::Vec3;
use volumetric_clouds::backend::{GraphicsBackend, TextureDescriptor, TextureFormat, WrapMode};
use volumetric_clouds::config::{load_config_file, ConfigFile};
use volumetric_clouds::resources::TextureData;
use volumetric_clouds::scene::{first_directional_light, Camera, DirectionalLight};
use volumetric_clouds::{
    CloudConfiguration, CloudShaders, FrameInput, FrameOutcome, VolumetricCloudRenderer,
    WgpuBackend,
};

/// Render volumetric clouds without a window.
#[derive(Parser, Debug)]
#[command(name = "headless", about = "Render volumetric clouds offscreen")]
struct Args {
    /// TOML file with [renderer] and [clouds] sections
    #[arg(long)]
    config: Option<PathBuf>,

    /// Weather texture (512x512 when the hierarchical height map is enabled)
    #[arg(long)]
    weather: Option<PathBuf>,

    /// Number of frames to accumulate
    #[arg(long, default_value_t = 8)]
    frames: u32,

    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 360)]
    height: u32,

    /// Composite into the scene texture itself instead of a separate output
    #[arg(long)]
    in_place: bool,

    /// Write the final frame to this PNG
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    volumetric_clouds::init();

    let args = Args::parse();
    let file = match &args.config {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    let mut backend = WgpuBackend::new_headless()?;
    log::info!("Using {} backend", backend.name());
    let shaders = CloudShaders::preview(&mut backend)?;

    let weather = match &args.weather {
        Some(path) => TextureData::from_file(path)?,
        None => TextureData::weather_gradient(512),
    };
    let weather = weather.upload(&mut backend, WrapMode::Repeat)?;
    let density =
        TextureData::height_density_gradient(64, 4).upload(&mut backend, WrapMode::Clamp)?;
    let config =
        CloudConfiguration::new(weather, file.clouds).with_height_density_map(density.handle);

    let (width, height) = (args.width, args.height);
    let scene = backend.create_texture(&TextureDescriptor::render_target(
        "Scene Color",
        width,
        height,
        TextureFormat::Rgba8Unorm,
    ))?;
    backend.write_texture(
        scene,
        &TextureData::solid_color(width, height, [110, 160, 230, 255], "sky").data,
    )?;

    let depth = backend.create_texture(&TextureDescriptor::render_target(
        "Scene Depth",
        width,
        height,
        TextureFormat::R32Float,
    ))?;
    let far_plane = vec![1.0f32; (width * height) as usize];
    backend.write_texture(depth, bytemuck::cast_slice(&far_plane))?;

    let destination = if args.in_place {
        scene
    } else {
        backend.create_texture(&TextureDescriptor::render_target(
            "Cloud Output",
            width,
            height,
            TextureFormat::Rgba8Unorm,
        ))?
    };

    let mut world = World::new();
    world.spawn(DirectionalLight::new(Vec3::new(-0.3, -1.0, -0.2), Vec3::ONE, 1.0));
    let sun = first_directional_light(&mut world);

    let mut renderer = VolumetricCloudRenderer::new(shaders, file.renderer)
        .with_configuration(Arc::new(config));
    renderer.attach_light(&mut world);

    let mut camera = Camera::new(Vec3::new(0.0, 2.0, 0.0), Vec3::new(0.0, 40.0, -100.0))
        .with_resolution(width, height);
    for frame in 0..args.frames {
        camera.look_at(Vec3::new(frame as f32 * 0.5, 40.0, -100.0));
        let input = FrameInput::new(scene, destination, &camera).with_depth(depth);
        match renderer.render(&mut backend, &input) {
            FrameOutcome::Rendered(report) => log::info!(
                "Frame {}: {}x{}, history blended: {}, shadows: {}, height map: {:?}",
                frame,
                report.resolution.x,
                report.resolution.y,
                report.history_blended,
                report.shadow_rendered,
                report.height_map
            ),
            FrameOutcome::PassThrough(reason) => {
                log::warn!("Frame {} passed through: {:?}", frame, reason)
            }
        }
    }

    if let Some(cookie) = sun.and_then(|slot| slot.get()) {
        log::info!("Sun cookie: texture {}, size {}", cookie.texture.id(), cookie.size);
    }

    if let Some(path) = &args.output {
        let pixels = backend.read_texture(destination)?;
        let image = image::RgbaImage::from_raw(width, height, pixels)
            .ok_or("readback size does not match the frame")?;
        image.save(path)?;
        log::info!("Wrote {}", path.display());
    }

    renderer.disable(&mut backend);
    Ok(())
}
