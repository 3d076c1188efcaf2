//! Texture loading and upload

use std::path::Path;

use image::{DynamicImage, GenericImageView};

use crate::backend::{GraphicsBackend, TextureDescriptor, TextureFormat, TextureUsage, WrapMode};
use crate::config::TextureRef;
use crate::error::{CloudError, CloudResult};

/// Loaded texture data
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub data: Vec<u8>,
    pub name: String,
}

impl TextureData {
    /// Load texture from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> CloudResult<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let img = image::open(path)
            .map_err(|e| CloudError::Texture(format!("{}: {}", path.display(), e)))?;
        Ok(Self::from_image(img, &name))
    }

    /// Load texture from encoded bytes (png, jpeg, ...)
    pub fn from_bytes(bytes: &[u8], name: &str) -> CloudResult<Self> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| CloudError::Texture(format!("{}: {}", name, e)))?;
        Ok(Self::from_image(img, name))
    }

    fn from_image(img: DynamicImage, name: &str) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            format: TextureFormat::Rgba8Unorm,
            data: img.to_rgba8().into_raw(),
            name: name.to_string(),
        }
    }

    /// Create a solid color texture
    pub fn solid_color(width: u32, height: u32, color: [u8; 4], name: &str) -> Self {
        let data = color
            .iter()
            .copied()
            .cycle()
            .take((width * height * 4) as usize)
            .collect();
        Self {
            width,
            height,
            format: TextureFormat::Rgba8Unorm,
            data,
            name: name.to_string(),
        }
    }

    /// Procedural weather map: coverage in red rising from left to right, cloud type in
    /// green rising from top to bottom
    pub fn weather_gradient(size: u32) -> Self {
        let mut data = Vec::with_capacity((size * size * 4) as usize);
        let scale = 255.0 / size.saturating_sub(1).max(1) as f32;
        for y in 0..size {
            for x in 0..size {
                data.extend_from_slice(&[
                    (x as f32 * scale) as u8,
                    (y as f32 * scale) as u8,
                    0,
                    255,
                ]);
            }
        }
        Self {
            width: size,
            height: size,
            format: TextureFormat::Rgba8Unorm,
            data,
            name: "weather_gradient".to_string(),
        }
    }

    /// Height density lookup: density peaks in the lower third of the layer and fades out
    /// towards the top. One row per cloud type.
    pub fn height_density_gradient(width: u32, height: u32) -> Self {
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..height {
            for x in 0..width {
                let h = x as f32 / width.saturating_sub(1).max(1) as f32;
                let density = if h < 0.3 { h / 0.3 } else { (1.0 - h) / 0.7 };
                let value = (density.clamp(0.0, 1.0) * 255.0) as u8;
                data.extend_from_slice(&[value, value, value, 255]);
            }
        }
        Self {
            width,
            height,
            format: TextureFormat::Rgba8Unorm,
            data,
            name: "height_density".to_string(),
        }
    }

    pub fn descriptor(&self, wrap_mode: WrapMode) -> TextureDescriptor {
        TextureDescriptor {
            label: Some(self.name.clone()),
            width: self.width,
            height: self.height,
            mip_levels: 1,
            format: self.format,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST | TextureUsage::COPY_SRC,
            wrap_mode,
        }
    }

    /// Create the texture on `backend` and upload the pixels
    pub fn upload<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        wrap_mode: WrapMode,
    ) -> CloudResult<TextureRef> {
        let desc = self.descriptor(wrap_mode);
        let handle = backend.create_texture(&desc)?;
        if let Err(e) = backend.write_texture(handle, &self.data) {
            backend.release_texture(handle);
            return Err(e.into());
        }
        log::debug!(
            "Uploaded texture '{}' ({}x{})",
            self.name,
            self.width,
            self.height
        );
        Ok(TextureRef {
            handle,
            width: self.width,
            height: self.height,
            wrap_mode,
        })
    }
}
