//! Common types shared between backends

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Rgba16Float,
    /// Full precision color, used by the accumulation and undersample buffers
    Rgba32Float,
    /// Single float channel, used by depth and height lookups
    R32Float,
}

impl TextureFormat {
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::R32Float => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }

    /// Whether the format can be bound as a write-only storage texture
    pub fn supports_storage(&self) -> bool {
        matches!(
            self,
            TextureFormat::Rgba8Unorm
                | TextureFormat::Rgba16Float
                | TextureFormat::Rgba32Float
                | TextureFormat::R32Float
        )
    }
}

bitflags! {
    /// Texture usage flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const TEXTURE_BINDING = 1 << 2;
        const STORAGE_BINDING = 1 << 3;
        const RENDER_ATTACHMENT = 1 << 4;
    }
}

impl TextureUsage {
    /// Usage of an offscreen buffer that passes render into and sample from
    pub fn render_target() -> Self {
        Self::RENDER_ATTACHMENT | Self::TEXTURE_BINDING | Self::COPY_SRC | Self::COPY_DST
    }
}

/// Addressing applied when sampling outside of [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WrapMode {
    #[default]
    Clamp,
    Repeat,
    Mirror,
}

/// Texture descriptor
#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
    pub wrap_mode: WrapMode,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            width: 1,
            height: 1,
            mip_levels: 1,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
            wrap_mode: WrapMode::Clamp,
        }
    }
}

impl TextureDescriptor {
    /// Offscreen render target of the given size and format
    pub fn render_target(label: &str, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: Some(label.to_string()),
            width,
            height,
            mip_levels: 1,
            format,
            usage: TextureUsage::render_target(),
            wrap_mode: WrapMode::Clamp,
        }
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    /// Allow compute passes to write the texture directly
    pub fn with_random_write(mut self) -> Self {
        self.usage |= TextureUsage::STORAGE_BINDING;
        self
    }

    pub fn with_wrap_mode(mut self, wrap_mode: WrapMode) -> Self {
        self.wrap_mode = wrap_mode;
        self
    }

    pub fn random_write(&self) -> bool {
        self.usage.contains(TextureUsage::STORAGE_BINDING)
    }

    /// Two descriptors are compatible when a texture created from one can stand in
    /// for the other. Labels are ignored.
    pub fn matches(&self, other: &TextureDescriptor) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.mip_levels == other.mip_levels
            && self.format == other.format
            && self.usage == other.usage
            && self.wrap_mode == other.wrap_mode
    }

    /// Size in bytes of mip level 0
    pub fn byte_size(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.format.bytes_per_pixel() as u64
    }
}

/// Kind of a named uniform in a program's parameter block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    /// Float or int, stored in the x component of one slot
    Scalar,
    /// Four floats, one slot
    Vector,
    /// Column-major 4x4 matrix, four slots
    Matrix,
}

impl UniformKind {
    pub fn slot_count(&self) -> usize {
        match self {
            UniformKind::Scalar | UniformKind::Vector => 1,
            UniformKind::Matrix => 4,
        }
    }
}

/// Named uniform declared by a program
#[derive(Debug, Clone)]
pub struct UniformDecl {
    pub name: String,
    pub kind: UniformKind,
}

impl UniformDecl {
    pub fn new(name: &str, kind: UniformKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }
}

/// Fullscreen program: one vertex entry point and one fragment entry point per pass
#[derive(Debug, Clone)]
pub struct ProgramDescriptor {
    pub label: String,
    /// WGSL source
    pub source: String,
    pub vertex_entry: String,
    /// Fragment entry points, indexed by pass number
    pub passes: Vec<String>,
    /// Sampled textures, bound in order starting at binding 2
    pub textures: Vec<String>,
    pub uniforms: Vec<UniformDecl>,
}

/// Compute program with a single entry point
#[derive(Debug, Clone)]
pub struct ComputeProgramDescriptor {
    pub label: String,
    /// WGSL source
    pub source: String,
    pub entry_point: String,
    /// Sampled textures, bound in order starting at binding 2
    pub textures: Vec<String>,
    /// Write-only storage textures, bound after the sampled textures
    pub storage_textures: Vec<(String, TextureFormat)>,
    pub uniforms: Vec<UniformDecl>,
}

/// Maximum number of vec4 slots in a parameter block
pub const MAX_UNIFORM_SLOTS: usize = 64;

/// Uniform block layout shared by every program.
///
/// Mirrors the WGSL struct in [`crate::shaders::PARAMETER_BLOCK_WGSL`].
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ParameterBlock {
    pub features: u32,
    pub pass_index: u32,
    pub _padding: [u32; 2],
    pub slots: [[f32; 4]; MAX_UNIFORM_SLOTS],
}

impl Default for ParameterBlock {
    fn default() -> Self {
        Self::zeroed()
    }
}
