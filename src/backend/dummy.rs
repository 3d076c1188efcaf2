//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't perform actual GPU operations. It records every call as a
//! [`Command`] and tracks a content stamp per texture, so tests can check pass order,
//! buffer lifetimes and data flow without GPU hardware.
//!
//! Content stamps follow three rules:
//! - a freshly created texture has stamp 0
//! - a plain copy gives the destination the source's stamp
//! - a material pass or dispatch derives a new stamp from everything it read

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::params::{ParamValue, ShaderFeatures, ShaderParameters};

/// A recorded backend call
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreateTexture {
        texture: TextureHandle,
        label: Option<String>,
        width: u32,
        height: u32,
    },
    ReleaseTexture(TextureHandle),
    WriteTexture(TextureHandle),
    AcquireTemporary(TextureHandle),
    ReleaseTemporary(TextureHandle),
    Blit {
        source: Option<TextureHandle>,
        destination: TextureHandle,
        material: Option<MaterialPass>,
        features: ShaderFeatures,
    },
    CopyToMip {
        source: TextureHandle,
        destination: TextureHandle,
        mip_level: u32,
    },
    Dispatch {
        program: ComputeProgramHandle,
        workgroups: [u32; 3],
    },
}

#[derive(Debug)]
struct DummyTexture {
    desc: TextureDescriptor,
    content: u64,
    mip_contents: HashMap<u32, u64>,
    temporary: bool,
    in_use: bool,
}

/// Dummy GPU backend.
#[derive(Debug, Default)]
pub struct DummyBackend {
    textures: HashMap<u64, DummyTexture>,
    programs: HashMap<u64, ProgramDescriptor>,
    compute_programs: HashMap<u64, ComputeProgramDescriptor>,
    commands: Vec<Command>,
    next_id: u64,
    failing_allocations: u32,
}

impl DummyBackend {
    /// Create a new dummy backend.
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Default::default()
        }
    }

    /// All commands recorded so far
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Forget recorded commands, keeping resources
    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Make the next `count` texture allocations fail with [`BackendError::OutOfMemory`]
    pub fn fail_allocations(&mut self, count: u32) {
        self.failing_allocations = count;
    }

    /// Content stamp of mip level 0
    pub fn content(&self, texture: TextureHandle) -> Option<u64> {
        self.textures.get(&texture.0).map(|t| t.content)
    }

    /// Content stamp of a mip level written through [`GraphicsBackend::copy_to_mip`]
    pub fn mip_content(&self, texture: TextureHandle, mip_level: u32) -> Option<u64> {
        let tex = self.textures.get(&texture.0)?;
        if mip_level == 0 {
            return tex.mip_contents.get(&0).copied().or(Some(tex.content));
        }
        tex.mip_contents.get(&mip_level).copied()
    }

    /// Overwrite the content stamp, e.g. to model a scene color buffer
    pub fn set_content(&mut self, texture: TextureHandle, content: u64) {
        if let Some(tex) = self.textures.get_mut(&texture.0) {
            tex.content = content;
        }
    }

    /// Number of textures currently backed by memory
    pub fn resident_count(&self) -> usize {
        self.textures.len()
    }

    /// Number of scratch textures handed out and not yet returned
    pub fn temporaries_in_use(&self) -> usize {
        self.textures
            .values()
            .filter(|t| t.temporary && t.in_use)
            .count()
    }

    /// Recorded blits, in order
    pub fn blits(&self) -> impl Iterator<Item = &Command> + '_ {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::Blit { .. }))
    }

    fn allocate(&mut self, desc: &TextureDescriptor, temporary: bool) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 || desc.mip_levels == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: empty extent {}x{} ({} mips)",
                desc.label, desc.width, desc.height, desc.mip_levels
            )));
        }
        if self.failing_allocations > 0 {
            self.failing_allocations -= 1;
            log::trace!("DummyBackend: injected allocation failure for {:?}", desc.label);
            return Err(BackendError::OutOfMemory);
        }

        let handle = TextureHandle(self.next_id);
        self.next_id += 1;
        log::trace!(
            "DummyBackend: creating texture {:?} ({}x{}, {} mips)",
            desc.label,
            desc.width,
            desc.height,
            desc.mip_levels
        );

        self.textures.insert(
            handle.0,
            DummyTexture {
                desc: desc.clone(),
                content: 0,
                mip_contents: HashMap::new(),
                temporary,
                in_use: temporary,
            },
        );
        self.commands.push(Command::CreateTexture {
            texture: handle,
            label: desc.label.clone(),
            width: desc.width,
            height: desc.height,
        });
        Ok(handle)
    }

    fn resident(&self, texture: TextureHandle) -> BackendResult<&DummyTexture> {
        self.textures.get(&texture.0).ok_or_else(|| {
            BackendError::InvalidHandle(format!("texture {} is not resident", texture.0))
        })
    }

    /// Stamp derived from every input a pass reads
    fn derive_content(
        &self,
        seed: u64,
        pass: u32,
        source: Option<TextureHandle>,
        params: Option<&ShaderParameters>,
    ) -> BackendResult<u64> {
        let mut hasher = DefaultHasher::new();
        seed.hash(&mut hasher);
        pass.hash(&mut hasher);
        if let Some(source) = source {
            self.resident(source)?.content.hash(&mut hasher);
        }
        if let Some(params) = params {
            params.features().bits().hash(&mut hasher);
            for (name, value) in params.iter() {
                name.hash(&mut hasher);
                match value {
                    ParamValue::Float(v) => v.to_bits().hash(&mut hasher),
                    ParamValue::Int(v) => v.hash(&mut hasher),
                    ParamValue::Vector(v) => {
                        v.to_array().iter().for_each(|c| c.to_bits().hash(&mut hasher))
                    }
                    ParamValue::Matrix(m) => m
                        .to_cols_array()
                        .iter()
                        .for_each(|c| c.to_bits().hash(&mut hasher)),
                    ParamValue::Texture(t) => self.resident(t)?.content.hash(&mut hasher),
                }
            }
        }
        Ok(hasher.finish())
    }
}

impl GraphicsBackend for DummyBackend {
    fn name(&self) -> &str {
        "Dummy"
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        self.allocate(desc, false)
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        if let Some(tex) = self.textures.remove(&texture.0) {
            log::trace!("DummyBackend: releasing texture {:?}", tex.desc.label);
            self.commands.push(Command::ReleaseTexture(texture));
        }
    }

    fn is_resident(&self, texture: TextureHandle) -> bool {
        self.textures.contains_key(&texture.0)
    }

    fn texture_descriptor(&self, texture: TextureHandle) -> Option<TextureDescriptor> {
        self.textures.get(&texture.0).map(|t| t.desc.clone())
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> BackendResult<()> {
        let expected = self.resident(texture)?.desc.byte_size();
        if data.len() as u64 != expected {
            return Err(BackendError::InvalidParameter(format!(
                "write_texture expected {} bytes, got {}",
                expected,
                data.len()
            )));
        }
        let mut hasher = DefaultHasher::new();
        data.hash(&mut hasher);
        let content = hasher.finish();
        if let Some(tex) = self.textures.get_mut(&texture.0) {
            tex.content = content;
        }
        self.commands.push(Command::WriteTexture(texture));
        Ok(())
    }

    fn acquire_temporary(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let stale: Vec<TextureHandle> = self
            .textures
            .iter()
            .filter(|(_, t)| {
                t.temporary && !t.in_use && t.desc.label == desc.label && !t.desc.matches(desc)
            })
            .map(|(id, _)| TextureHandle(*id))
            .collect();
        for texture in stale {
            self.release_texture(texture);
        }

        let reusable = self
            .textures
            .iter_mut()
            .find(|(_, t)| t.temporary && !t.in_use && t.desc.matches(desc))
            .map(|(id, t)| {
                t.in_use = true;
                TextureHandle(*id)
            });

        let handle = match reusable {
            Some(handle) => handle,
            None => self.allocate(desc, true)?,
        };
        self.commands.push(Command::AcquireTemporary(handle));
        Ok(handle)
    }

    fn release_temporary(&mut self, texture: TextureHandle) {
        if let Some(tex) = self.textures.get_mut(&texture.0) {
            if tex.temporary && tex.in_use {
                tex.in_use = false;
                self.commands.push(Command::ReleaseTemporary(texture));
            }
        }
    }

    fn release_unused_temporaries(&mut self) {
        let idle: Vec<TextureHandle> = self
            .textures
            .iter()
            .filter(|(_, t)| t.temporary && !t.in_use)
            .map(|(id, _)| TextureHandle(*id))
            .collect();
        for texture in idle {
            self.release_texture(texture);
        }
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle> {
        if desc.passes.is_empty() {
            return Err(BackendError::PipelineCreationFailed(format!(
                "program '{}' has no passes",
                desc.label
            )));
        }
        let handle = ProgramHandle(self.next_id);
        self.next_id += 1;
        log::trace!("DummyBackend: creating program '{}'", desc.label);
        self.programs.insert(handle.0, desc.clone());
        Ok(handle)
    }

    fn create_compute_program(
        &mut self,
        desc: &ComputeProgramDescriptor,
    ) -> BackendResult<ComputeProgramHandle> {
        let handle = ComputeProgramHandle(self.next_id);
        self.next_id += 1;
        log::trace!("DummyBackend: creating compute program '{}'", desc.label);
        self.compute_programs.insert(handle.0, desc.clone());
        Ok(handle)
    }

    fn blit(&mut self, blit: &Blit) -> BackendResult<()> {
        self.resident(blit.destination)?;

        let content = match blit.material {
            None => {
                let source = blit.source.ok_or_else(|| {
                    BackendError::InvalidParameter("plain blit without a source".into())
                })?;
                self.resident(source)?.content
            }
            Some(material) => {
                let program = self.programs.get(&material.program.0).ok_or_else(|| {
                    BackendError::InvalidHandle(format!("unknown program {}", material.program.0))
                })?;
                if material.pass as usize >= program.passes.len() {
                    return Err(BackendError::InvalidParameter(format!(
                        "program '{}' has no pass {}",
                        program.label, material.pass
                    )));
                }
                let reads_destination = blit.source == Some(blit.destination)
                    || blit
                        .params
                        .map(|p| p.textures().any(|(_, t)| t == blit.destination))
                        .unwrap_or(false);
                if reads_destination {
                    return Err(BackendError::InvalidParameter(format!(
                        "pass {} of '{}' reads its own render target",
                        material.pass, program.label
                    )));
                }
                self.derive_content(material.program.0, material.pass, blit.source, blit.params)?
            }
        };

        log::trace!(
            "DummyBackend: blit {:?} -> {:?} ({:?})",
            blit.source,
            blit.destination,
            blit.material
        );
        if let Some(tex) = self.textures.get_mut(&blit.destination.0) {
            tex.content = content;
        }
        self.commands.push(Command::Blit {
            source: blit.source,
            destination: blit.destination,
            material: blit.material,
            features: blit.params.map(|p| p.features()).unwrap_or_default(),
        });
        Ok(())
    }

    fn copy_to_mip(
        &mut self,
        source: TextureHandle,
        destination: TextureHandle,
        mip_level: u32,
    ) -> BackendResult<()> {
        let src = self.resident(source)?;
        let (src_width, src_height, content) = (src.desc.width, src.desc.height, src.content);
        let dst = self.resident(destination)?;
        if mip_level >= dst.desc.mip_levels {
            return Err(BackendError::InvalidParameter(format!(
                "mip level {} out of range ({} levels)",
                mip_level, dst.desc.mip_levels
            )));
        }
        let (mip_width, mip_height) = (
            (dst.desc.width >> mip_level).max(1),
            (dst.desc.height >> mip_level).max(1),
        );
        if (src_width, src_height) != (mip_width, mip_height) {
            return Err(BackendError::InvalidParameter(format!(
                "copy {}x{} into mip {} of size {}x{}",
                src_width, src_height, mip_level, mip_width, mip_height
            )));
        }

        if let Some(tex) = self.textures.get_mut(&destination.0) {
            tex.mip_contents.insert(mip_level, content);
            if mip_level == 0 {
                tex.content = content;
            }
        }
        self.commands.push(Command::CopyToMip {
            source,
            destination,
            mip_level,
        });
        Ok(())
    }

    fn dispatch(
        &mut self,
        program: ComputeProgramHandle,
        params: &ShaderParameters,
        workgroups: [u32; 3],
    ) -> BackendResult<()> {
        let desc = self.compute_programs.get(&program.0).ok_or_else(|| {
            BackendError::InvalidHandle(format!("unknown compute program {}", program.0))
        })?;

        let mut outputs = Vec::new();
        for (name, _) in &desc.storage_textures {
            let Some(texture) = params.texture(name) else {
                return Err(BackendError::InvalidParameter(format!(
                    "storage texture '{}' is not bound",
                    name
                )));
            };
            if !self.resident(texture)?.desc.random_write() {
                return Err(BackendError::InvalidParameter(format!(
                    "storage texture '{}' was created without random write",
                    name
                )));
            }
            outputs.push(texture);
        }

        let content = self.derive_content(program.0, 0, None, Some(params))?;
        for texture in outputs {
            if let Some(tex) = self.textures.get_mut(&texture.0) {
                tex.content = content;
            }
        }

        log::trace!("DummyBackend: dispatch {:?} {:?}", program, workgroups);
        self.commands.push(Command::Dispatch {
            program,
            workgroups,
        });
        Ok(())
    }
}
