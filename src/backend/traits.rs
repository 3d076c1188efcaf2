//! Core backend abstraction traits
//!
//! These traits define the interface that both the dummy and wgpu backends implement.
//! The cloud pipeline only ever talks to a [`GraphicsBackend`], so any renderer able to
//! allocate textures, draw fullscreen passes and dispatch compute work can host it.

use crate::backend::types::*;
use crate::params::ShaderParameters;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create shader: {0}")]
    ShaderCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

impl BackendError {
    /// Allocation failures are recoverable: the frame falls back to pass-through and
    /// allocation is retried on the next frame.
    pub fn is_allocation_failure(&self) -> bool {
        matches!(
            self,
            BackendError::TextureCreationFailed(_) | BackendError::OutOfMemory
        )
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub(crate) u64);

impl TextureHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Handle to a fullscreen program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub(crate) u64);

/// Handle to a compute program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComputeProgramHandle(pub(crate) u64);

/// A program together with the pass to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialPass {
    pub program: ProgramHandle,
    pub pass: u32,
}

impl MaterialPass {
    pub fn new(program: ProgramHandle, pass: u32) -> Self {
        Self { program, pass }
    }
}

/// Fullscreen blit request.
///
/// Without a material this is a plain copy of `source` into `destination`. With a
/// material the pass is drawn into `destination`, `source` (if any) is bound under
/// [`crate::params::names::SOURCE`].
#[derive(Debug, Clone, Copy)]
pub struct Blit<'a> {
    pub source: Option<TextureHandle>,
    pub destination: TextureHandle,
    pub material: Option<MaterialPass>,
    pub params: Option<&'a ShaderParameters>,
}

impl<'a> Blit<'a> {
    /// Plain copy
    pub fn copy(source: TextureHandle, destination: TextureHandle) -> Self {
        Self {
            source: Some(source),
            destination,
            material: None,
            params: None,
        }
    }

    /// Draw a material pass
    pub fn pass(
        source: Option<TextureHandle>,
        destination: TextureHandle,
        material: MaterialPass,
        params: &'a ShaderParameters,
    ) -> Self {
        Self {
            source,
            destination,
            material: Some(material),
            params: Some(params),
        }
    }
}

/// Main graphics backend trait
pub trait GraphicsBackend {
    /// Backend name for logging
    fn name(&self) -> &str;

    // Resource creation

    /// Create a texture
    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// Release the GPU memory of a texture. Releasing an unknown or already released
    /// handle is a no-op.
    fn release_texture(&mut self, texture: TextureHandle);

    /// Whether the texture is currently backed by GPU memory
    fn is_resident(&self, texture: TextureHandle) -> bool;

    /// Descriptor the texture was created with
    fn texture_descriptor(&self, texture: TextureHandle) -> Option<TextureDescriptor>;

    /// Upload mip level 0 of a texture
    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> BackendResult<()>;

    /// Get a scratch texture matching `desc`, reusing a released one when possible.
    ///
    /// An idle scratch texture with the same label but a different descriptor is
    /// destroyed first, so a resized request replaces its stale predecessor.
    fn acquire_temporary(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// Return a scratch texture to the backend
    fn release_temporary(&mut self, texture: TextureHandle);

    /// Destroy every scratch texture that is not currently handed out
    fn release_unused_temporaries(&mut self);

    // Program creation

    /// Create a fullscreen program
    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle>;

    /// Create a compute program
    fn create_compute_program(
        &mut self,
        desc: &ComputeProgramDescriptor,
    ) -> BackendResult<ComputeProgramHandle>;

    // Command execution

    /// Draw a fullscreen pass or copy one texture into another
    fn blit(&mut self, blit: &Blit) -> BackendResult<()>;

    /// Copy the whole of `source` into one mip level of `destination`
    fn copy_to_mip(
        &mut self,
        source: TextureHandle,
        destination: TextureHandle,
        mip_level: u32,
    ) -> BackendResult<()>;

    /// Dispatch compute work
    fn dispatch(
        &mut self,
        program: ComputeProgramHandle,
        params: &ShaderParameters,
        workgroups: [u32; 3],
    ) -> BackendResult<()>;
}
