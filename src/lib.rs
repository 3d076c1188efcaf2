//! Volumetric Clouds - a multi-pass volumetric cloud post-processing effect
//!
//! The renderer composites clouds over a scene color buffer in several offscreen
//! passes and carries state between frames:
//! - undersampled ray-marched clouds jittered by a halton sequence
//! - temporal reprojection into a ping-pong accumulation pair
//! - optional hierarchical height map for early ray termination
//! - cloud shadows published as a directional light cookie
//!
//! All GPU work goes through [`GraphicsBackend`]. Two backends are provided:
//! - **dummy**: records commands and tracks content stamps, used by the tests
//! - **wgpu**: headless wgpu implementation (feature `wgpu-backend`)

pub mod backend;
pub mod config;
pub mod error;
pub mod height_map;
pub mod jitter;
pub mod params;
pub mod pool;
pub mod renderer;
pub mod resources;
pub mod scene;
pub mod shaders;
pub mod shadow;
pub mod temporal;

pub use backend::{DummyBackend, GraphicsBackend, TextureHandle};
#[cfg(feature = "wgpu-backend")]
pub use backend::WgpuBackend;
pub use config::{CloudConfiguration, CloudParameters, RendererSettings, TextureRef};
pub use error::{CloudError, CloudResult};
pub use renderer::{
    FrameInput, FrameOutcome, FrameReport, HeightMapStatus, PassThroughReason,
    VolumetricCloudRenderer,
};
pub use shaders::CloudShaders;
pub use shadow::ShadowQuality;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the crate version. Call after the logger is installed.
pub fn init() {
    log::info!("Volumetric Clouds v{}", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
