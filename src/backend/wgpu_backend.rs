//! wgpu GPU backend implementation.
//!
//! Headless: no surface is created. Every blit, mip copy and dispatch is encoded and
//! submitted immediately, so the call order seen by the pipeline is the GPU order.
//!
//! All programs share one binding layout:
//! - binding 0: the [`ParameterBlock`] uniform
//! - binding 1: a non-filtering sampler
//! - binding 2..: sampled textures, in declaration order
//! - then storage textures (compute programs only)
//!
//! Textures a pass declares but does not receive are bound to a 1x1 black fallback.

use std::collections::HashMap;

use wgpu::util::DeviceExt;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::params::{names, ShaderParameters};

struct GpuTexture {
    desc: TextureDescriptor,
    resources: (wgpu::Texture, wgpu::TextureView),
    temporary: bool,
    in_use: bool,
}

struct GpuProgram {
    desc: ProgramDescriptor,
    module: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    // One pipeline per (pass, target format)
    pipelines: HashMap<(u32, wgpu::TextureFormat), wgpu::RenderPipeline>,
}

struct GpuComputeProgram {
    desc: ComputeProgramDescriptor,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

/// wgpu-based GPU backend.
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,

    textures: HashMap<u64, GpuTexture>,
    programs: HashMap<u64, GpuProgram>,
    compute_programs: HashMap<u64, GpuComputeProgram>,
    samplers: HashMap<WrapMode, wgpu::Sampler>,
    fallback: (wgpu::Texture, wgpu::TextureView),
    copy_program: Option<ProgramHandle>,
    next_id: u64,
}

impl std::fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("adapter", &self.adapter.get_info().name)
            .field("textures", &self.textures.len())
            .finish()
    }
}

fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
    }
}

fn convert_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
    let mut result = wgpu::TextureUsages::empty();
    if usage.contains(TextureUsage::COPY_SRC) {
        result |= wgpu::TextureUsages::COPY_SRC;
    }
    if usage.contains(TextureUsage::COPY_DST) {
        result |= wgpu::TextureUsages::COPY_DST;
    }
    if usage.contains(TextureUsage::TEXTURE_BINDING) {
        result |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if usage.contains(TextureUsage::STORAGE_BINDING) {
        result |= wgpu::TextureUsages::STORAGE_BINDING;
    }
    if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
        result |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    result
}

fn convert_address_mode(mode: WrapMode) -> wgpu::AddressMode {
    match mode {
        WrapMode::Clamp => wgpu::AddressMode::ClampToEdge,
        WrapMode::Repeat => wgpu::AddressMode::Repeat,
        WrapMode::Mirror => wgpu::AddressMode::MirrorRepeat,
    }
}

/// Layout entries for the shared binding contract
fn layout_entries(
    sampled: usize,
    storage: &[(String, TextureFormat)],
) -> Vec<wgpu::BindGroupLayoutEntry> {
    let visibility =
        wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT | wgpu::ShaderStages::COMPUTE;
    let mut entries = vec![
        wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        },
        wgpu::BindGroupLayoutEntry {
            binding: 1,
            visibility,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
            count: None,
        },
    ];
    for i in 0..sampled {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: 2 + i as u32,
            visibility,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
    }
    for (i, (_, format)) in storage.iter().enumerate() {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: 2 + (sampled + i) as u32,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format: convert_texture_format(*format),
                view_dimension: wgpu::TextureViewDimension::D2,
            },
            count: None,
        });
    }
    entries
}

impl WgpuBackend {
    /// Create a headless wgpu backend on the first suitable adapter.
    pub fn new_headless() -> BackendResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| BackendError::InitializationFailed("No compatible GPU adapter".into()))?;

        log::info!("wgpu adapter: {:?}", adapter.get_info());

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Volumetric Clouds Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
            },
            None,
        ))
        .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        let samplers = [WrapMode::Clamp, WrapMode::Repeat, WrapMode::Mirror]
            .into_iter()
            .map(|mode| {
                let address_mode = convert_address_mode(mode);
                let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
                    label: Some("Point Sampler"),
                    address_mode_u: address_mode,
                    address_mode_v: address_mode,
                    address_mode_w: address_mode,
                    mag_filter: wgpu::FilterMode::Nearest,
                    min_filter: wgpu::FilterMode::Nearest,
                    mipmap_filter: wgpu::FilterMode::Nearest,
                    ..Default::default()
                });
                (mode, sampler)
            })
            .collect();

        let fallback_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Fallback Texture"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &fallback_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[0, 0, 0, 0],
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        let fallback_view = fallback_texture.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            textures: HashMap::new(),
            programs: HashMap::new(),
            compute_programs: HashMap::new(),
            samplers,
            fallback: (fallback_texture, fallback_view),
            copy_program: None,
            next_id: 1,
        })
    }

    /// Get the wgpu device.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Get the wgpu queue.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn next_handle(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Run `f` inside validation and out-of-memory error scopes
    fn scoped<T>(&self, f: impl FnOnce(&Self) -> T) -> BackendResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(self);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());

        if out_of_memory.is_some() {
            return Err(BackendError::OutOfMemory);
        }
        if let Some(err) = validation {
            return Err(BackendError::InvalidParameter(err.to_string()));
        }
        Ok(value)
    }

    fn gpu_texture(&self, texture: TextureHandle) -> BackendResult<&(wgpu::Texture, wgpu::TextureView)> {
        self.textures
            .get(&texture.0)
            .map(|t| &t.resources)
            .ok_or_else(|| {
                BackendError::InvalidHandle(format!("texture {} is not resident", texture.0))
            })
    }

    fn view_or_fallback(&self, texture: Option<TextureHandle>) -> BackendResult<&wgpu::TextureView> {
        match texture {
            Some(texture) => Ok(&self.gpu_texture(texture)?.1),
            None => Ok(&self.fallback.1),
        }
    }

    fn sampler_for(&self, textures: &[Option<TextureHandle>]) -> BackendResult<&wgpu::Sampler> {
        let wrap_mode = textures
            .iter()
            .flatten()
            .find_map(|t| self.textures.get(&t.0).map(|t| t.desc.wrap_mode))
            .unwrap_or_default();
        self.samplers
            .get(&wrap_mode)
            .ok_or_else(|| BackendError::InvalidParameter(format!("no sampler for {:?}", wrap_mode)))
    }

    fn ensure_pipeline(
        &mut self,
        program: ProgramHandle,
        pass: u32,
        format: wgpu::TextureFormat,
    ) -> BackendResult<()> {
        let device = &self.device;
        let gpu_program = self
            .programs
            .get_mut(&program.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("unknown program {}", program.0)))?;
        if gpu_program.pipelines.contains_key(&(pass, format)) {
            return Ok(());
        }
        let entry = gpu_program.desc.passes.get(pass as usize).ok_or_else(|| {
            BackendError::InvalidParameter(format!(
                "program '{}' has no pass {}",
                gpu_program.desc.label, pass
            ))
        })?;

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(gpu_program.desc.label.as_str()),
            layout: Some(&gpu_program.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &gpu_program.module,
                entry_point: &gpu_program.desc.vertex_entry,
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &gpu_program.module,
                entry_point: entry,
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(BackendError::PipelineCreationFailed(err.to_string()));
        }

        log::debug!(
            "Created pipeline '{}' pass {} for {:?}",
            gpu_program.desc.label,
            pass,
            format
        );
        gpu_program.pipelines.insert((pass, format), pipeline);
        Ok(())
    }

    fn draw(
        &mut self,
        material: MaterialPass,
        source: Option<TextureHandle>,
        destination: TextureHandle,
        params: &ShaderParameters,
    ) -> BackendResult<()> {
        let format = self.gpu_texture(destination)?.0.format();
        self.ensure_pipeline(material.program, material.pass, format)?;

        let program = self.programs.get(&material.program.0).ok_or_else(|| {
            BackendError::InvalidHandle(format!("unknown program {}", material.program.0))
        })?;
        let pipeline = program
            .pipelines
            .get(&(material.pass, format))
            .ok_or_else(|| BackendError::PipelineCreationFailed(program.desc.label.clone()))?;

        let bound: Vec<Option<TextureHandle>> = program
            .desc
            .textures
            .iter()
            .map(|name| {
                if name == names::SOURCE {
                    source
                } else {
                    params.texture(name)
                }
            })
            .collect();
        if bound.contains(&Some(destination)) {
            return Err(BackendError::InvalidParameter(format!(
                "pass {} of '{}' reads its own render target",
                material.pass, program.desc.label
            )));
        }

        let block = params.pack(&program.desc.uniforms, material.pass);
        let target = self.gpu_texture(destination)?.0.create_view(&wgpu::TextureViewDescriptor {
            mip_level_count: Some(1),
            ..Default::default()
        });

        let views = bound
            .iter()
            .map(|t| self.view_or_fallback(*t))
            .collect::<BackendResult<Vec<_>>>()?;
        let sampler = self.sampler_for(&bound)?;

        self.scoped(|backend| {
            let uniform = backend
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Parameter Block"),
                    contents: bytemuck::bytes_of(&block),
                    usage: wgpu::BufferUsages::UNIFORM,
                });

            let mut entries = vec![
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ];
            for (i, view) in views.iter().enumerate() {
                entries.push(wgpu::BindGroupEntry {
                    binding: 2 + i as u32,
                    resource: wgpu::BindingResource::TextureView(*view),
                });
            }
            let bind_group = backend.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(program.desc.label.as_str()),
                layout: &program.bind_group_layout,
                entries: &entries,
            });

            let mut encoder = backend
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Blit Encoder"),
                });
            {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some(program.desc.label.as_str()),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &target,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
            backend.queue.submit(std::iter::once(encoder.finish()));
        })
    }

    fn copy_program(&mut self) -> BackendResult<ProgramHandle> {
        if let Some(program) = self.copy_program {
            return Ok(program);
        }
        let program = self.create_program(&crate::shaders::copy_program_descriptor())?;
        self.copy_program = Some(program);
        Ok(program)
    }

    /// Read back mip level 0 of a texture, tightly packed.
    pub fn read_texture(&self, texture: TextureHandle) -> BackendResult<Vec<u8>> {
        let (gpu_texture, _) = self.gpu_texture(texture)?;
        let desc = self
            .textures
            .get(&texture.0)
            .map(|t| t.desc.clone())
            .ok_or_else(|| BackendError::InvalidHandle(format!("unknown texture {}", texture.0)))?;

        let row_bytes = desc.width * desc.format.bytes_per_pixel();
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row_bytes = row_bytes.div_ceil(align) * align;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: padded_row_bytes as u64 * desc.height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: gpu_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row_bytes),
                    rows_per_image: Some(desc.height),
                },
            },
            wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        match rx.recv() {
            Ok(Ok(())) => {}
            _ => return Err(BackendError::DeviceLost),
        }

        let mapped = slice.get_mapped_range();
        let mut data = Vec::with_capacity((row_bytes * desc.height) as usize);
        for row in mapped.chunks(padded_row_bytes as usize) {
            data.extend_from_slice(&row[..row_bytes as usize]);
        }
        drop(mapped);
        staging.unmap();
        Ok(data)
    }
}

impl GraphicsBackend for WgpuBackend {
    fn name(&self) -> &str {
        "wgpu Backend"
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 || desc.mip_levels == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: empty extent {}x{}",
                desc.label, desc.width, desc.height
            )));
        }
        let texture = self
            .scoped(|backend| {
                backend.device.create_texture(&wgpu::TextureDescriptor {
                    label: desc.label.as_deref(),
                    size: wgpu::Extent3d {
                        width: desc.width,
                        height: desc.height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: desc.mip_levels,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: convert_texture_format(desc.format),
                    usage: convert_texture_usage(desc.usage),
                    view_formats: &[],
                })
            })
            .map_err(|e| match e {
                BackendError::InvalidParameter(msg) => BackendError::TextureCreationFailed(msg),
                other => other,
            })?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let id = self.next_handle();
        log::debug!(
            "Created texture {:?} ({}x{}, {:?})",
            desc.label,
            desc.width,
            desc.height,
            desc.format
        );
        self.textures.insert(
            id,
            GpuTexture {
                desc: desc.clone(),
                resources: (texture, view),
                temporary: false,
                in_use: false,
            },
        );
        Ok(TextureHandle(id))
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        if let Some(tex) = self.textures.remove(&texture.0) {
            log::debug!("Released texture {:?}", tex.desc.label);
            tex.resources.0.destroy();
        }
    }

    fn is_resident(&self, texture: TextureHandle) -> bool {
        self.textures.contains_key(&texture.0)
    }

    fn texture_descriptor(&self, texture: TextureHandle) -> Option<TextureDescriptor> {
        self.textures.get(&texture.0).map(|t| t.desc.clone())
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> BackendResult<()> {
        let desc = self
            .texture_descriptor(texture)
            .ok_or_else(|| BackendError::InvalidHandle(format!("unknown texture {}", texture.0)))?;
        if data.len() as u64 != desc.byte_size() {
            return Err(BackendError::InvalidParameter(format!(
                "write_texture expected {} bytes, got {}",
                desc.byte_size(),
                data.len()
            )));
        }
        let (gpu_texture, _) = self.gpu_texture(texture)?;
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: gpu_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(desc.width * desc.format.bytes_per_pixel()),
                rows_per_image: Some(desc.height),
            },
            wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
        );
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
        if let Some(handle) = reusable {
            return Ok(handle);
        }

        let handle = self.create_texture(desc)?;
        if let Some(tex) = self.textures.get_mut(&handle.0) {
            tex.temporary = true;
            tex.in_use = true;
        }
        Ok(handle)
    }

    fn release_temporary(&mut self, texture: TextureHandle) {
        if let Some(tex) = self.textures.get_mut(&texture.0) {
            if tex.temporary {
                tex.in_use = false;
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

        let (module, bind_group_layout, pipeline_layout) = self
            .scoped(|backend| {
                let module = backend
                    .device
                    .create_shader_module(wgpu::ShaderModuleDescriptor {
                        label: Some(desc.label.as_str()),
                        source: wgpu::ShaderSource::Wgsl(desc.source.as_str().into()),
                    });
                let bind_group_layout =
                    backend
                        .device
                        .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                            label: Some(desc.label.as_str()),
                            entries: &layout_entries(desc.textures.len(), &[]),
                        });
                let pipeline_layout =
                    backend
                        .device
                        .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                            label: Some(desc.label.as_str()),
                            bind_group_layouts: &[&bind_group_layout],
                            push_constant_ranges: &[],
                        });
                (module, bind_group_layout, pipeline_layout)
            })
            .map_err(|e| BackendError::ShaderCreationFailed(format!("{}: {}", desc.label, e)))?;

        let id = self.next_handle();
        log::debug!("Created program '{}' ({} passes)", desc.label, desc.passes.len());
        self.programs.insert(
            id,
            GpuProgram {
                desc: desc.clone(),
                module,
                bind_group_layout,
                pipeline_layout,
                pipelines: HashMap::new(),
            },
        );
        Ok(ProgramHandle(id))
    }

    fn create_compute_program(
        &mut self,
        desc: &ComputeProgramDescriptor,
    ) -> BackendResult<ComputeProgramHandle> {
        let (bind_group_layout, pipeline) = self
            .scoped(|backend| {
                let module = backend
                    .device
                    .create_shader_module(wgpu::ShaderModuleDescriptor {
                        label: Some(desc.label.as_str()),
                        source: wgpu::ShaderSource::Wgsl(desc.source.as_str().into()),
                    });
                let bind_group_layout =
                    backend
                        .device
                        .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                            label: Some(desc.label.as_str()),
                            entries: &layout_entries(desc.textures.len(), &desc.storage_textures),
                        });
                let pipeline_layout =
                    backend
                        .device
                        .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                            label: Some(desc.label.as_str()),
                            bind_group_layouts: &[&bind_group_layout],
                            push_constant_ranges: &[],
                        });
                let pipeline =
                    backend
                        .device
                        .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                            label: Some(desc.label.as_str()),
                            layout: Some(&pipeline_layout),
                            module: &module,
                            entry_point: &desc.entry_point,
                            compilation_options: wgpu::PipelineCompilationOptions::default(),
                        });
                (bind_group_layout, pipeline)
            })
            .map_err(|e| BackendError::PipelineCreationFailed(format!("{}: {}", desc.label, e)))?;

        let id = self.next_handle();
        log::debug!("Created compute program '{}'", desc.label);
        self.compute_programs.insert(
            id,
            GpuComputeProgram {
                desc: desc.clone(),
                bind_group_layout,
                pipeline,
            },
        );
        Ok(ComputeProgramHandle(id))
    }

    fn blit(&mut self, blit: &Blit) -> BackendResult<()> {
        if let Some(material) = blit.material {
            let empty = ShaderParameters::new();
            return self.draw(
                material,
                blit.source,
                blit.destination,
                blit.params.unwrap_or(&empty),
            );
        }

        let source = blit
            .source
            .ok_or_else(|| BackendError::InvalidParameter("plain blit without a source".into()))?;
        if source == blit.destination {
            return Ok(());
        }

        let (src, _) = self.gpu_texture(source)?;
        let (dst, _) = self.gpu_texture(blit.destination)?;
        let same_layout = src.format() == dst.format()
            && src.width() == dst.width()
            && src.height() == dst.height();
        if !same_layout {
            let copy = self.copy_program()?;
            let params = ShaderParameters::new();
            return self.draw(MaterialPass::new(copy, 0), Some(source), blit.destination, &params);
        }

        self.scoped(|backend| {
            let mut encoder = backend
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Copy Encoder"),
                });
            encoder.copy_texture_to_texture(
                src.as_image_copy(),
                dst.as_image_copy(),
                wgpu::Extent3d {
                    width: src.width(),
                    height: src.height(),
                    depth_or_array_layers: 1,
                },
            );
            backend.queue.submit(std::iter::once(encoder.finish()));
        })
    }

    fn copy_to_mip(
        &mut self,
        source: TextureHandle,
        destination: TextureHandle,
        mip_level: u32,
    ) -> BackendResult<()> {
        let (src, _) = self.gpu_texture(source)?;
        let (dst, _) = self.gpu_texture(destination)?;
        if mip_level >= dst.mip_level_count() {
            return Err(BackendError::InvalidParameter(format!(
                "mip level {} out of range ({} levels)",
                mip_level,
                dst.mip_level_count()
            )));
        }
        let (mip_width, mip_height) = (
            (dst.width() >> mip_level).max(1),
            (dst.height() >> mip_level).max(1),
        );
        if (src.width(), src.height()) != (mip_width, mip_height) {
            return Err(BackendError::InvalidParameter(format!(
                "copy {}x{} into mip {} of size {}x{}",
                src.width(),
                src.height(),
                mip_level,
                mip_width,
                mip_height
            )));
        }

        self.scoped(|backend| {
            let mut encoder = backend
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Mip Copy Encoder"),
                });
            encoder.copy_texture_to_texture(
                src.as_image_copy(),
                wgpu::ImageCopyTexture {
                    texture: dst,
                    mip_level,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::Extent3d {
                    width: mip_width,
                    height: mip_height,
                    depth_or_array_layers: 1,
                },
            );
            backend.queue.submit(std::iter::once(encoder.finish()));
        })
    }

    fn dispatch(
        &mut self,
        program: ComputeProgramHandle,
        params: &ShaderParameters,
        workgroups: [u32; 3],
    ) -> BackendResult<()> {
        let gpu_program = self.compute_programs.get(&program.0).ok_or_else(|| {
            BackendError::InvalidHandle(format!("unknown compute program {}", program.0))
        })?;

        let bound: Vec<Option<TextureHandle>> = gpu_program
            .desc
            .textures
            .iter()
            .map(|name| params.texture(name))
            .collect();
        let views = bound
            .iter()
            .map(|t| self.view_or_fallback(*t))
            .collect::<BackendResult<Vec<_>>>()?;

        let mut storage_views = Vec::new();
        for (name, _) in &gpu_program.desc.storage_textures {
            let texture = params.texture(name).ok_or_else(|| {
                BackendError::InvalidParameter(format!("storage texture '{}' is not bound", name))
            })?;
            let (gpu_texture, _) = self.gpu_texture(texture)?;
            storage_views.push(gpu_texture.create_view(&wgpu::TextureViewDescriptor {
                mip_level_count: Some(1),
                ..Default::default()
            }));
        }

        let all_views: Vec<&wgpu::TextureView> =
            views.iter().copied().chain(storage_views.iter()).collect();
        let sampler = self.sampler_for(&bound)?;
        let block = params.pack(&gpu_program.desc.uniforms, 0);

        self.scoped(|backend| {
            let uniform = backend
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Parameter Block"),
                    contents: bytemuck::bytes_of(&block),
                    usage: wgpu::BufferUsages::UNIFORM,
                });

            let mut entries = vec![
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ];
            for (i, view) in all_views.iter().enumerate() {
                entries.push(wgpu::BindGroupEntry {
                    binding: 2 + i as u32,
                    resource: wgpu::BindingResource::TextureView(*view),
                });
            }
            let bind_group = backend.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(gpu_program.desc.label.as_str()),
                layout: &gpu_program.bind_group_layout,
                entries: &entries,
            });

            let mut encoder = backend
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Dispatch Encoder"),
                });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(gpu_program.desc.label.as_str()),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&gpu_program.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(workgroups[0], workgroups[1], workgroups[2]);
            }
            backend.queue.submit(std::iter::once(encoder.finish()));
        })
    }
}
