//! [`GraphicsDevice`] on top of wgpu.
//!
//! wgpu has no ambient bindings, so this device keeps the binding state
//! itself and resolves it at draw time: every `draw_arrays` becomes one render
//! pass into whatever the bound framebuffer points at, with a pipeline built
//! (and cached) for the current program, target format and primitive. Program
//! uniforms live in a CPU-side copy of the std140 block and are copied to the
//! GPU through a staging buffer right before each pass, so two draws with
//! different values in the same frame each see their own.

use std::collections::HashMap;

use anyhow::Result;
use wgpu::util::DeviceExt;
use winit::dpi::PhysicalSize;

use crate::compile::{
    compile_stage, link_stages, BlockLayout, CompiledStage, LinkedLayout, MemberKind,
    ResourceBinding, ResourceKind,
};
use crate::device::{
    BindingState, FramebufferId, GraphicsDevice, ObjectNames, ProgramId, ShaderId, TextureId,
    UniformLocation,
};
use crate::types::{
    FilterMode, FramebufferStatus, PixelFormat, Primitive, SamplerParams, ShaderKind,
    UniformValue, Viewport, WrapMode,
};

use super::context::GpuContext;

struct ShaderRecord {
    kind: ShaderKind,
    stage: CompiledStage,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct PipelineKey {
    format: wgpu::TextureFormat,
    primitive: Primitive,
}

struct VertexInput {
    name: String,
    location: u32,
    components: u32,
}

struct VertexArray {
    buffer: wgpu::Buffer,
    components: u32,
    vertices: u32,
}

struct UniformBlock {
    layout: BlockLayout,
    data: Vec<u8>,
    buffer: wgpu::Buffer,
}

struct LinkedProgram {
    vertex: wgpu::ShaderModule,
    fragment: wgpu::ShaderModule,
    block: Option<UniformBlock>,
    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    resources: Vec<ResourceBinding>,
    inputs: Vec<VertexInput>,
    arrays: HashMap<u32, VertexArray>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
}

#[derive(Default)]
struct ProgramRecord {
    attached: Vec<ShaderId>,
    linked: Option<LinkedProgram>,
}

struct TextureStorage {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    format: PixelFormat,
    width: u32,
    height: u32,
}

struct TextureRecord {
    storage: Option<TextureStorage>,
    params: SamplerParams,
    sampler: wgpu::Sampler,
}

struct SurfaceFrame {
    texture: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
    cleared: bool,
}

pub struct WgpuDevice {
    context: GpuContext,
    names: ObjectNames,
    bindings: BindingState,
    shaders: HashMap<ShaderId, ShaderRecord>,
    programs: HashMap<ProgramId, ProgramRecord>,
    textures: HashMap<TextureId, TextureRecord>,
    framebuffers: HashMap<FramebufferId, Option<TextureId>>,
    placeholder: TextureStorage,
    placeholder_sampler: wgpu::Sampler,
    encoder: Option<wgpu::CommandEncoder>,
    frame: Option<SurfaceFrame>,
    passes: u64,
}

fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::Luminance => wgpu::TextureFormat::R8Unorm,
        PixelFormat::Rgba => wgpu::TextureFormat::Rgba8Unorm,
    }
}

fn vertex_format(components: u32) -> wgpu::VertexFormat {
    match components {
        1 => wgpu::VertexFormat::Float32,
        2 => wgpu::VertexFormat::Float32x2,
        3 => wgpu::VertexFormat::Float32x3,
        _ => wgpu::VertexFormat::Float32x4,
    }
}

fn create_sampler(device: &wgpu::Device, params: SamplerParams) -> wgpu::Sampler {
    let filter = match params.filter {
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    };
    let address = match params.wrap {
        WrapMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        WrapMode::Repeat => wgpu::AddressMode::Repeat,
    };
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("lumatrail sampler"),
        address_mode_u: address,
        address_mode_v: address,
        address_mode_w: address,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}

fn create_storage(
    device: &wgpu::Device,
    format: PixelFormat,
    width: u32,
    height: u32,
) -> TextureStorage {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("lumatrail texture"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: texture_format(format),
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    TextureStorage {
        texture,
        view,
        format,
        width,
        height,
    }
}

impl WgpuDevice {
    pub fn new<T>(target: &T, initial_size: PhysicalSize<u32>, vsync: bool) -> Result<Self>
    where
        T: raw_window_handle::HasDisplayHandle + raw_window_handle::HasWindowHandle,
    {
        let context = GpuContext::new(target, initial_size, vsync)?;
        let placeholder = create_storage(&context.device, PixelFormat::Rgba, 1, 1);
        let placeholder_sampler = create_sampler(&context.device, SamplerParams::default());
        Ok(Self {
            context,
            names: ObjectNames::default(),
            bindings: BindingState::default(),
            shaders: HashMap::new(),
            programs: HashMap::new(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            placeholder,
            placeholder_sampler,
            encoder: None,
            frame: None,
            passes: 0,
        })
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.context.size
    }

    pub fn is_software(&self) -> bool {
        self.context.is_software
    }

    /// Render passes encoded since the device was created.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    pub fn resize_surface(&mut self, size: PhysicalSize<u32>) {
        self.context.resize(size);
    }

    /// Acquires the surface texture that draws to the default framebuffer land in.
    pub fn begin_frame(&mut self) -> Result<(), wgpu::SurfaceError> {
        if self.frame.is_some() {
            return Ok(());
        }
        let texture = self.context.surface.get_current_texture()?;
        let view = texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        self.frame = Some(SurfaceFrame {
            texture,
            view,
            cleared: false,
        });
        Ok(())
    }

    /// Submits everything recorded so far and presents the surface texture.
    pub fn present(&mut self) {
        if let Some(frame) = self.frame.as_mut().filter(|frame| !frame.cleared) {
            // Nothing drew to the screen this frame; don't present stale swapchain contents.
            let device = &self.context.device;
            let encoder = self.encoder.get_or_insert_with(|| {
                device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("lumatrail encoder"),
                })
            });
            encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("clear pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &frame.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            frame.cleared = true;
        }
        self.flush();
        if let Some(frame) = self.frame.take() {
            frame.texture.present();
        }
    }

    fn flush(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.context.queue.submit(std::iter::once(encoder.finish()));
        }
    }

    fn bound_texture_record(&mut self, operation: &str) -> Option<(TextureId, &mut TextureRecord)> {
        let Some(texture) = self.bindings.bound_texture() else {
            tracing::warn!(operation, unit = self.bindings.active_unit, "no texture bound");
            return None;
        };
        match self.textures.get_mut(&texture) {
            Some(record) => Some((texture, record)),
            None => {
                tracing::warn!(operation, ?texture, "texture does not exist");
                None
            }
        }
    }

    fn write_pixels(&self, storage: &TextureStorage, width: u32, height: u32, pixels: &[u8]) {
        let bytes_per_row = width * storage.format.bytes_per_pixel() as u32;
        self.context.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &storage.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn link(&self, record: &ProgramRecord) -> Result<LinkedProgram, String> {
        let device = &self.context.device;
        let mut vertex = None;
        let mut fragment = None;
        for shader in &record.attached {
            let shader_record = self
                .shaders
                .get(shader)
                .ok_or_else(|| format!("attached {shader:?} was deleted"))?;
            let slot = match shader_record.kind {
                ShaderKind::Vertex => &mut vertex,
                ShaderKind::Fragment => &mut fragment,
            };
            if slot.is_some() {
                return Err(format!("more than one {} stage attached", shader_record.kind));
            }
            *slot = Some(&shader_record.stage);
        }
        let vertex = vertex.ok_or("no vertex stage attached")?;
        let fragment = fragment.ok_or("no fragment stage attached")?;

        let LinkedLayout {
            block: layout,
            resources,
            attributes,
        } = link_stages(&vertex.reflection, &fragment.reflection)?;
        let inputs: Vec<VertexInput> = attributes
            .into_iter()
            .map(|attribute| VertexInput {
                components: match attribute.kind {
                    MemberKind::Float(n) | MemberKind::Int(n) => n,
                },
                name: attribute.name,
                location: attribute.location,
            })
            .collect();

        let uniform_entries: Vec<wgpu::BindGroupLayoutEntry> = layout
            .iter()
            .map(|block| wgpu::BindGroupLayoutEntry {
                binding: block.binding,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();
        let texture_entries: Vec<wgpu::BindGroupLayoutEntry> = resources
            .iter()
            .map(|resource| wgpu::BindGroupLayoutEntry {
                binding: resource.binding,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: match resource.kind {
                    ResourceKind::Texture => wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    ResourceKind::Sampler => {
                        wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering)
                    }
                },
                count: None,
            })
            .collect();

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("uniform layout"),
            entries: &uniform_entries,
        });
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("texture layout"),
            entries: &texture_entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("program layout"),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            push_constant_ranges: &[],
        });
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(error.to_string());
        }

        let block = layout.map(|layout| {
            let size = (layout.size.max(16) as u64).next_multiple_of(16);
            let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("program uniforms"),
                size,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            UniformBlock {
                data: vec![0; size as usize],
                layout,
                buffer,
            }
        });

        Ok(LinkedProgram {
            vertex: vertex.module.clone(),
            fragment: fragment.module.clone(),
            block,
            uniform_layout,
            texture_layout,
            pipeline_layout,
            resources,
            inputs,
            arrays: HashMap::new(),
            pipelines: HashMap::new(),
        })
    }

    fn build_pipeline(
        device: &wgpu::Device,
        linked: &LinkedProgram,
        key: PipelineKey,
    ) -> Result<wgpu::RenderPipeline, String> {
        let attributes: Vec<[wgpu::VertexAttribute; 1]> = linked
            .inputs
            .iter()
            .map(|input| {
                [wgpu::VertexAttribute {
                    format: vertex_format(input.components),
                    offset: 0,
                    shader_location: input.location,
                }]
            })
            .collect();
        let buffers: Vec<wgpu::VertexBufferLayout> = linked
            .inputs
            .iter()
            .zip(attributes.iter())
            .map(|(input, attribute)| wgpu::VertexBufferLayout {
                array_stride: u64::from(input.components) * 4,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: attribute,
            })
            .collect();
        let topology = match key.primitive {
            Primitive::Triangles => wgpu::PrimitiveTopology::TriangleList,
            Primitive::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        };

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("lumatrail pipeline"),
            layout: Some(&linked.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &linked.vertex,
                entry_point: Some("main"),
                buffers: &buffers,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            fragment: Some(wgpu::FragmentState {
                module: &linked.fragment,
                entry_point: Some("main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: key.format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
            cache: None,
        });
        match pollster::block_on(device.pop_error_scope()) {
            Some(error) => Err(error.to_string()),
            None => Ok(pipeline),
        }
    }

    fn encode_draw(&mut self, primitive: Primitive, first: u32, count: u32) -> Result<(), String> {
        let program = self.bindings.program.ok_or("no current program")?;

        let (view, format, target_size, target) = match self.bindings.framebuffer {
            Some(framebuffer) => {
                let texture = self
                    .framebuffers
                    .get(&framebuffer)
                    .copied()
                    .flatten()
                    .ok_or("framebuffer has no color attachment")?;
                let storage = self
                    .textures
                    .get(&texture)
                    .and_then(|record| record.storage.as_ref())
                    .ok_or("color attachment has no storage")?;
                (
                    storage.view.clone(),
                    texture_format(storage.format),
                    (storage.width, storage.height),
                    Some(texture),
                )
            }
            None => {
                let frame = self.frame.as_ref().ok_or("no surface frame acquired")?;
                (
                    frame.view.clone(),
                    self.context.surface_format,
                    (self.context.config.width, self.context.config.height),
                    None,
                )
            }
        };

        let Viewport {
            x,
            y,
            width,
            height,
        } = self.bindings.viewport;
        let x = x.min(target_size.0);
        let y = y.min(target_size.1);
        let width = width.min(target_size.0 - x);
        let height = height.min(target_size.1 - y);
        if width == 0 || height == 0 {
            return Err("viewport is empty".to_string());
        }

        let device = self.context.device.clone();
        let key = PipelineKey { format, primitive };
        let linked = self
            .programs
            .get_mut(&program)
            .and_then(|record| record.linked.as_mut())
            .ok_or("current program is not linked")?;

        for input in &linked.inputs {
            let array = linked
                .arrays
                .get(&input.location)
                .ok_or_else(|| format!("vertex input `{}` has no array", input.name))?;
            if array.components != input.components {
                return Err(format!(
                    "vertex input `{}` takes {} components, array has {}",
                    input.name, input.components, array.components
                ));
            }
            if array.vertices < first + count {
                return Err(format!(
                    "vertex input `{}` holds {} vertices, draw needs {}",
                    input.name,
                    array.vertices,
                    first + count
                ));
            }
        }

        if !linked.pipelines.contains_key(&key) {
            let pipeline = Self::build_pipeline(&device, linked, key)?;
            tracing::debug!(?program, format = ?key.format, primitive = ?key.primitive, "built render pipeline");
            linked.pipelines.insert(key, pipeline);
        }
        let linked = self
            .programs
            .get(&program)
            .and_then(|record| record.linked.as_ref())
            .ok_or("current program is not linked")?;
        let pipeline = linked
            .pipelines
            .get(&key)
            .ok_or("pipeline cache miss")?
            .clone();

        let mut views = Vec::new();
        let mut samplers = Vec::new();
        for resource in &linked.resources {
            let bound = self
                .bindings
                .units
                .get(resource.unit() as usize)
                .copied()
                .flatten();
            let record = bound
                .filter(|texture| Some(*texture) != target)
                .and_then(|texture| self.textures.get(&texture))
                .filter(|record| record.storage.is_some());
            if bound.is_some() && bound == target {
                tracing::warn!(unit = resource.unit(), "texture sampled while rendered to; using placeholder");
            }
            match resource.kind {
                ResourceKind::Texture => views.push(
                    record
                        .and_then(|record| record.storage.as_ref())
                        .map_or_else(|| self.placeholder.view.clone(), |storage| storage.view.clone()),
                ),
                ResourceKind::Sampler => samplers.push(
                    record.map_or_else(
                        || self.placeholder_sampler.clone(),
                        |record| record.sampler.clone(),
                    ),
                ),
            }
        }

        let mut texture_entries = Vec::with_capacity(linked.resources.len());
        let (mut next_view, mut next_sampler) = (views.iter(), samplers.iter());
        for resource in &linked.resources {
            let resource_entry = match resource.kind {
                ResourceKind::Texture => next_view.next().map(wgpu::BindingResource::TextureView),
                ResourceKind::Sampler => next_sampler.next().map(wgpu::BindingResource::Sampler),
            };
            if let Some(resource_entry) = resource_entry {
                texture_entries.push(wgpu::BindGroupEntry {
                    binding: resource.binding,
                    resource: resource_entry,
                });
            }
        }
        let texture_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("texture bind group"),
            layout: &linked.texture_layout,
            entries: &texture_entries,
        });

        let uniform_entries: Vec<wgpu::BindGroupEntry> = linked
            .block
            .iter()
            .map(|block| wgpu::BindGroupEntry {
                binding: block.layout.binding,
                resource: block.buffer.as_entire_binding(),
            })
            .collect();
        let uniform_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("uniform bind group"),
            layout: &linked.uniform_layout,
            entries: &uniform_entries,
        });

        let vertex_buffers: Vec<wgpu::Buffer> = linked
            .inputs
            .iter()
            .filter_map(|input| linked.arrays.get(&input.location))
            .map(|array| array.buffer.clone())
            .collect();
        let staged_uniforms = linked.block.as_ref().map(|block| {
            let staging = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("uniform staging buffer"),
                contents: &block.data,
                usage: wgpu::BufferUsages::COPY_SRC,
            });
            (staging, block.buffer.clone(), block.data.len() as u64)
        });

        let load = match self.frame.as_mut() {
            Some(frame) if target.is_none() && !frame.cleared => {
                frame.cleared = true;
                wgpu::LoadOp::Clear(wgpu::Color::BLACK)
            }
            _ => wgpu::LoadOp::Load,
        };

        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("lumatrail encoder"),
            })
        });
        if let Some((staging, buffer, size)) = staged_uniforms.as_ref() {
            encoder.copy_buffer_to_buffer(staging, 0, buffer, 0, *size);
        }
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("lumatrail pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &uniform_group, &[]);
            pass.set_bind_group(1, &texture_group, &[]);
            for (slot, buffer) in vertex_buffers.iter().enumerate() {
                pass.set_vertex_buffer(slot as u32, buffer.slice(..));
            }
            pass.set_viewport(
                x as f32,
                y as f32,
                width as f32,
                height as f32,
                0.0,
                1.0,
            );
            pass.draw(first..first + count, 0..1);
        }
        self.passes += 1;
        Ok(())
    }
}

impl GraphicsDevice for WgpuDevice {
    fn create_shader(&mut self, kind: ShaderKind, source: &str) -> Result<ShaderId, String> {
        let stage = compile_stage(&self.context.device, kind, source)?;
        let id = ShaderId::from_raw(self.names.next());
        self.shaders.insert(id, ShaderRecord { kind, stage });
        Ok(id)
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        self.shaders.remove(&shader);
    }

    fn create_program(&mut self) -> ProgramId {
        let id = ProgramId::from_raw(self.names.next());
        self.programs.insert(id, ProgramRecord::default());
        id
    }

    fn attach_shader(&mut self, program: ProgramId, shader: ShaderId) {
        match self.programs.get_mut(&program) {
            Some(record) if !record.attached.contains(&shader) => record.attached.push(shader),
            Some(_) => {}
            None => tracing::warn!(?program, "attach_shader: program does not exist"),
        }
    }

    fn detach_shader(&mut self, program: ProgramId, shader: ShaderId) {
        if let Some(record) = self.programs.get_mut(&program) {
            record.attached.retain(|attached| *attached != shader);
        }
    }

    fn link_program(&mut self, program: ProgramId) -> Result<(), String> {
        let record = self
            .programs
            .get(&program)
            .ok_or_else(|| format!("{program:?} does not exist"))?;
        let result = self.link(record);
        let record = self
            .programs
            .get_mut(&program)
            .ok_or_else(|| format!("{program:?} does not exist"))?;
        match result {
            Ok(linked) => {
                record.linked = Some(linked);
                Ok(())
            }
            Err(log) => {
                record.linked = None;
                Err(log)
            }
        }
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
        if self.bindings.program == Some(program) {
            self.bindings.program = None;
        }
    }

    fn current_program(&self) -> Option<ProgramId> {
        self.bindings.program
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        if let Some(id) = program {
            if !self.programs.contains_key(&id) {
                tracing::warn!(program = ?id, "use_program: program does not exist");
                return;
            }
        }
        self.bindings.program = program;
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let block = self.programs.get(&program)?.linked.as_ref()?.block.as_ref()?;
        let index = block.layout.position(name)?;
        Some(UniformLocation {
            program,
            index: index as u32,
        })
    }

    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue) {
        if self.bindings.program != Some(location.program) {
            tracing::warn!(?location, "set_uniform: location does not belong to the current program");
            return;
        }
        let Some(block) = self
            .programs
            .get_mut(&location.program)
            .and_then(|record| record.linked.as_mut())
            .and_then(|linked| linked.block.as_mut())
        else {
            return;
        };
        let Some(member) = block.layout.members.get(location.index as usize) else {
            tracing::warn!(?location, "set_uniform: stale location");
            return;
        };

        if !member.kind.accepts(&value) {
            tracing::warn!(
                uniform = %member.name,
                ?value,
                expected = ?member.kind,
                "set_uniform: value does not match the declared type"
            );
            return;
        }
        let mut bytes = [0u8; 16];
        let len = match value {
            UniformValue::Float(v) => write_floats(&mut bytes, &[v]),
            UniformValue::Vec2(v) => write_floats(&mut bytes, &v),
            UniformValue::Vec3(v) => write_floats(&mut bytes, &v),
            UniformValue::Vec4(v) => write_floats(&mut bytes, &v),
            UniformValue::Int(v) => {
                bytes[..4].copy_from_slice(&v.to_ne_bytes());
                4
            }
        };
        let offset = member.offset as usize;
        debug_assert_eq!(len, member.kind.byte_len());
        if let Some(target) = block.data.get_mut(offset..offset + len) {
            target.copy_from_slice(&bytes[..len]);
        }
    }

    fn attrib_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        self.programs
            .get(&program)?
            .linked
            .as_ref()?
            .inputs
            .iter()
            .find(|input| input.name == name)
            .map(|input| input.location)
    }

    fn vertex_attrib_array(&mut self, location: u32, values: &[f32], components: u32) {
        let Some(program) = self.bindings.program else {
            tracing::warn!(location, "vertex_attrib_array: no current program");
            return;
        };
        let device = &self.context.device;
        let Some(linked) = self
            .programs
            .get_mut(&program)
            .and_then(|record| record.linked.as_mut())
        else {
            return;
        };
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("vertex array"),
            contents: bytemuck::cast_slice(values),
            usage: wgpu::BufferUsages::VERTEX,
        });
        linked.arrays.insert(
            location,
            VertexArray {
                buffer,
                components,
                vertices: values.len() as u32 / components.max(1),
            },
        );
    }

    fn create_texture(&mut self) -> TextureId {
        let id = TextureId::from_raw(self.names.next());
        let params = SamplerParams::default();
        self.textures.insert(
            id,
            TextureRecord {
                storage: None,
                params,
                sampler: create_sampler(&self.context.device, params),
            },
        );
        id
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
        self.bindings.forget_texture(texture);
        for attachment in self.framebuffers.values_mut() {
            if *attachment == Some(texture) {
                *attachment = None;
            }
        }
    }

    fn active_texture_unit(&self) -> u32 {
        self.bindings.active_unit
    }

    fn set_active_texture_unit(&mut self, unit: u32) {
        if !self.bindings.set_active_unit(unit) {
            tracing::warn!(unit, "set_active_texture_unit: unit out of range");
        }
    }

    fn bound_texture(&self) -> Option<TextureId> {
        self.bindings.bound_texture()
    }

    fn bind_texture(&mut self, texture: Option<TextureId>) {
        self.bindings.bind_texture(texture);
    }

    fn texture_parameters(&mut self, params: SamplerParams) {
        let device = self.context.device.clone();
        if let Some((_, record)) = self.bound_texture_record("texture_parameters") {
            if record.params != params {
                record.params = params;
                record.sampler = create_sampler(&device, params);
            }
        }
    }

    fn tex_image_2d(&mut self, format: PixelFormat, width: u32, height: u32, pixels: Option<&[u8]>) {
        let len = format.image_len(width, height);
        if pixels.is_some_and(|data| data.len() < len) {
            tracing::warn!(width, height, ?format, "tex_image_2d: not enough pixel data");
            return;
        }
        let max = self.context.max_texture_dimension;
        if width > max || height > max {
            tracing::warn!(width, height, max, "tex_image_2d: size exceeds device limits");
            return;
        }
        self.flush();

        let storage = (width > 0 && height > 0)
            .then(|| create_storage(&self.context.device, format, width, height));
        if let (Some(storage), Some(data)) = (storage.as_ref(), pixels) {
            self.write_pixels(storage, width, height, &data[..len]);
        }
        if let Some((_, record)) = self.bound_texture_record("tex_image_2d") {
            record.storage = storage;
        }
    }

    fn tex_sub_image_2d(&mut self, format: PixelFormat, width: u32, height: u32, pixels: &[u8]) {
        let len = format.image_len(width, height);
        if pixels.len() < len || len == 0 {
            tracing::warn!(width, height, ?format, "tex_sub_image_2d: not enough pixel data");
            return;
        }
        self.flush();
        let Some(texture) = self.bindings.bound_texture() else {
            tracing::warn!("tex_sub_image_2d: no texture bound");
            return;
        };
        let Some(storage) = self
            .textures
            .get(&texture)
            .and_then(|record| record.storage.as_ref())
        else {
            tracing::warn!(?texture, "tex_sub_image_2d: texture has no storage");
            return;
        };
        if storage.format != format || width > storage.width || height > storage.height {
            tracing::warn!(
                ?texture,
                width,
                height,
                storage_width = storage.width,
                storage_height = storage.height,
                "tex_sub_image_2d: region does not fit the storage"
            );
            return;
        }
        self.write_pixels(storage, width, height, &pixels[..len]);
    }

    fn create_framebuffer(&mut self) -> FramebufferId {
        let id = FramebufferId::from_raw(self.names.next());
        self.framebuffers.insert(id, None);
        id
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.framebuffers.remove(&framebuffer);
        if self.bindings.framebuffer == Some(framebuffer) {
            self.bindings.framebuffer = None;
        }
    }

    fn bound_framebuffer(&self) -> Option<FramebufferId> {
        self.bindings.framebuffer
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        self.bindings.framebuffer = framebuffer;
    }

    fn framebuffer_texture(&mut self, texture: Option<TextureId>) {
        match self
            .bindings
            .framebuffer
            .and_then(|id| self.framebuffers.get_mut(&id))
        {
            Some(attachment) => *attachment = texture,
            None => tracing::warn!("framebuffer_texture: no framebuffer bound"),
        }
    }

    fn check_framebuffer_status(&self) -> FramebufferStatus {
        let Some(framebuffer) = self.bindings.framebuffer else {
            return FramebufferStatus::Complete;
        };
        let Some(texture) = self.framebuffers.get(&framebuffer).copied().flatten() else {
            return FramebufferStatus::MissingAttachment;
        };
        match self.textures.get(&texture).and_then(|record| record.storage.as_ref()) {
            Some(_) => FramebufferStatus::Complete,
            None => FramebufferStatus::IncompleteAttachment,
        }
    }

    fn viewport(&mut self, viewport: Viewport) {
        self.bindings.viewport = viewport;
    }

    fn draw_arrays(&mut self, primitive: Primitive, first: u32, count: u32) {
        if let Err(reason) = self.encode_draw(primitive, first, count) {
            tracing::warn!(%reason, "draw skipped");
        }
    }
}

fn write_floats(bytes: &mut [u8; 16], values: &[f32]) -> usize {
    let raw: &[u8] = bytemuck::cast_slice(values);
    bytes[..raw.len()].copy_from_slice(raw);
    raw.len()
}
