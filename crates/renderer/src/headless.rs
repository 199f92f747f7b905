//! In-memory [`GraphicsDevice`] that records what the pipeline asks of it.
//!
//! The headless device keeps the same binding-state semantics as the wgpu
//! backend but stores texture storage in plain byte vectors and records every
//! draw call instead of rasterising. Each texture also tracks where its
//! current contents came from ([`Contents`]), which lets tests follow a
//! composite from the upload that fed it through every pass that read it.
//! Misuse that a real driver would flag (drawing with an unlinked program,
//! uploading out of bounds, writing another program's uniform) is recorded in
//! [`HeadlessDevice::errors`] and logged, never panics.

use std::collections::HashMap;

use crate::device::{
    BindingState, FramebufferId, GraphicsDevice, ObjectNames, ProgramId, ShaderId, TextureId,
    UniformLocation,
};
use crate::compile::{analyze_stage, link_stages, BlockLayout, ResourceKind, StageReflection};
use crate::types::{
    FramebufferStatus, PixelFormat, Primitive, SamplerParams, ShaderKind, UniformValue, Viewport,
};

/// Provenance of a texture's current contents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Contents {
    /// Never written.
    #[default]
    Undefined,
    /// Fresh zero-filled storage.
    Zeroed,
    /// Written by the n-th upload (1-based, counted across the device).
    Uploaded(u64),
    /// Written by the draw at this index of [`HeadlessDevice::draws`].
    Drawn(usize),
}

/// Texture read by a draw, as it was at draw time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampledInput {
    pub unit: u32,
    pub texture: Option<TextureId>,
    pub contents: Contents,
}

/// One recorded `draw_arrays` call.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawCall {
    pub program: ProgramId,
    /// `None` is the display surface.
    pub framebuffer: Option<FramebufferId>,
    /// Color attachment written by the draw, `None` for the display surface.
    pub target: Option<TextureId>,
    pub target_size: Option<(u32, u32)>,
    pub viewport: Viewport,
    pub primitive: Primitive,
    pub first: u32,
    pub count: u32,
    pub inputs: Vec<SampledInput>,
    pub uniforms: Vec<(String, UniformValue)>,
}

impl DrawCall {
    pub fn input(&self, unit: u32) -> Option<&SampledInput> {
        self.inputs.iter().find(|input| input.unit == unit)
    }
}

/// Number of live objects per kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LiveObjects {
    pub shaders: usize,
    pub programs: usize,
    pub textures: usize,
    pub framebuffers: usize,
}

impl LiveObjects {
    pub fn total(&self) -> usize {
        self.shaders + self.programs + self.textures + self.framebuffers
    }
}

struct ShaderObject {
    kind: ShaderKind,
    reflection: StageReflection,
}

struct AttributeSlot {
    name: String,
    location: u32,
}

struct LinkedProgram {
    /// Shared parameter block and the last value written to each member.
    block: Option<BlockLayout>,
    values: Vec<Option<UniformValue>>,
    attributes: Vec<AttributeSlot>,
    /// Texture units read by the fragment stage.
    units: Vec<u32>,
}

#[derive(Default)]
struct ProgramObject {
    attached: Vec<ShaderId>,
    linked: Option<LinkedProgram>,
    link_count: u32,
    arrays: HashMap<u32, (Vec<f32>, u32)>,
}

struct Storage {
    format: PixelFormat,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

struct TextureObject {
    storage: Option<Storage>,
    sampling: SamplerParams,
    allocations: u32,
    contents: Contents,
}

#[derive(Default)]
struct FramebufferObject {
    color: Option<TextureId>,
}

#[derive(Default)]
pub struct HeadlessDevice {
    names: ObjectNames,
    bindings: BindingState,
    shaders: HashMap<ShaderId, ShaderObject>,
    programs: HashMap<ProgramId, ProgramObject>,
    textures: HashMap<TextureId, TextureObject>,
    framebuffers: HashMap<FramebufferId, FramebufferObject>,
    draws: Vec<DrawCall>,
    errors: Vec<String>,
    uploads: u64,
    screen: Contents,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draws(&self) -> &[DrawCall] {
        &self.draws
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn live_objects(&self) -> LiveObjects {
        LiveObjects {
            shaders: self.shaders.len(),
            programs: self.programs.len(),
            textures: self.textures.len(),
            framebuffers: self.framebuffers.len(),
        }
    }

    pub fn texture_pixels(&self, texture: TextureId) -> Option<&[u8]> {
        self.textures
            .get(&texture)?
            .storage
            .as_ref()
            .map(|storage| storage.pixels.as_slice())
    }

    /// Allocated storage size and format of `texture`.
    pub fn texture_storage(&self, texture: TextureId) -> Option<(PixelFormat, u32, u32)> {
        self.textures
            .get(&texture)?
            .storage
            .as_ref()
            .map(|storage| (storage.format, storage.width, storage.height))
    }

    pub fn texture_sampling(&self, texture: TextureId) -> Option<SamplerParams> {
        self.textures.get(&texture).map(|object| object.sampling)
    }

    pub fn texture_contents(&self, texture: TextureId) -> Option<Contents> {
        self.textures.get(&texture).map(|object| object.contents)
    }

    /// How many times storage was (re)allocated for `texture`.
    pub fn allocation_count(&self, texture: TextureId) -> u32 {
        self.textures
            .get(&texture)
            .map_or(0, |object| object.allocations)
    }

    pub fn link_count(&self, program: ProgramId) -> u32 {
        self.programs
            .get(&program)
            .map_or(0, |object| object.link_count)
    }

    pub fn uniform_value(&self, program: ProgramId, name: &str) -> Option<UniformValue> {
        let linked = self.programs.get(&program)?.linked.as_ref()?;
        let index = linked.block.as_ref()?.position(name)?;
        linked.values[index]
    }

    pub fn current_viewport(&self) -> Viewport {
        self.bindings.viewport
    }

    /// What was last drawn to the display surface.
    pub fn screen_contents(&self) -> Contents {
        self.screen
    }

    /// Number of uploads performed so far; the last one is `Contents::Uploaded(upload_count())`.
    pub fn upload_count(&self) -> u64 {
        self.uploads
    }

    fn error(&mut self, message: String) {
        tracing::warn!(%message, "headless device error");
        self.errors.push(message);
    }

    fn bound_texture_object(&mut self, operation: &str) -> Option<&mut TextureObject> {
        let Some(texture) = self.bindings.bound_texture() else {
            self.error(format!("{operation}: no texture bound to unit {}", self.bindings.active_unit));
            return None;
        };
        if !self.textures.contains_key(&texture) {
            self.error(format!("{operation}: {texture:?} does not exist"));
            return None;
        }
        self.textures.get_mut(&texture)
    }

    fn attachment_of(&self, framebuffer: Option<FramebufferId>) -> Option<TextureId> {
        framebuffer.and_then(|id| self.framebuffers.get(&id)?.color)
    }

    fn framebuffer_status(&self, framebuffer: Option<FramebufferId>) -> FramebufferStatus {
        let Some(id) = framebuffer else {
            return FramebufferStatus::Complete;
        };
        let Some(texture) = self.framebuffers.get(&id).and_then(|object| object.color) else {
            return FramebufferStatus::MissingAttachment;
        };
        match self
            .textures
            .get(&texture)
            .and_then(|object| object.storage.as_ref())
        {
            Some(storage) if storage.width > 0 && storage.height > 0 => FramebufferStatus::Complete,
            _ => FramebufferStatus::IncompleteAttachment,
        }
    }

    fn link(&self, program: &ProgramObject) -> Result<LinkedProgram, String> {
        let mut vertex = None;
        let mut fragment = None;
        for shader in &program.attached {
            let Some(object) = self.shaders.get(shader) else {
                return Err(format!("attached {shader:?} was deleted"));
            };
            let slot = match object.kind {
                ShaderKind::Vertex => &mut vertex,
                ShaderKind::Fragment => &mut fragment,
            };
            if slot.is_some() {
                return Err(format!("more than one {} stage attached", object.kind));
            }
            *slot = Some(&object.reflection);
        }
        let vertex = vertex.ok_or("no vertex stage attached")?;
        let fragment = fragment.ok_or("no fragment stage attached")?;

        let layout = link_stages(vertex, fragment)?;
        let attributes = layout
            .attributes
            .into_iter()
            .map(|attribute| AttributeSlot {
                name: attribute.name,
                location: attribute.location,
            })
            .collect();
        let mut units: Vec<u32> = layout
            .resources
            .iter()
            .filter(|resource| resource.kind == ResourceKind::Texture)
            .map(|resource| resource.unit())
            .collect();
        units.dedup();
        let values = vec![None; layout.block.as_ref().map_or(0, |block| block.members.len())];

        Ok(LinkedProgram {
            block: layout.block,
            values,
            attributes,
            units,
        })
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn create_shader(&mut self, kind: ShaderKind, source: &str) -> Result<ShaderId, String> {
        let reflection = analyze_stage(kind, source)?;
        let id = ShaderId::from_raw(self.names.next());
        self.shaders.insert(id, ShaderObject { kind, reflection });
        Ok(id)
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        if self.shaders.remove(&shader).is_none() {
            self.error(format!("delete_shader: {shader:?} does not exist"));
        }
    }

    fn create_program(&mut self) -> ProgramId {
        let id = ProgramId::from_raw(self.names.next());
        self.programs.insert(id, ProgramObject::default());
        id
    }

    fn attach_shader(&mut self, program: ProgramId, shader: ShaderId) {
        if !self.shaders.contains_key(&shader) {
            self.error(format!("attach_shader: {shader:?} does not exist"));
            return;
        }
        match self.programs.get_mut(&program) {
            Some(object) if !object.attached.contains(&shader) => object.attached.push(shader),
            Some(_) => self.error(format!("attach_shader: {shader:?} already attached")),
            None => self.error(format!("attach_shader: {program:?} does not exist")),
        }
    }

    fn detach_shader(&mut self, program: ProgramId, shader: ShaderId) {
        match self.programs.get_mut(&program) {
            Some(object) => object.attached.retain(|attached| *attached != shader),
            None => self.error(format!("detach_shader: {program:?} does not exist")),
        }
    }

    fn link_program(&mut self, program: ProgramId) -> Result<(), String> {
        let Some(object) = self.programs.get(&program) else {
            return Err(format!("{program:?} does not exist"));
        };
        let result = self.link(object);
        if let Some(object) = self.programs.get_mut(&program) {
            object.link_count += 1;
            object.arrays.clear();
            match result {
                Ok(linked) => {
                    object.linked = Some(linked);
                    Ok(())
                }
                Err(log) => {
                    object.linked = None;
                    Err(log)
                }
            }
        } else {
            Err(format!("{program:?} does not exist"))
        }
    }

    fn delete_program(&mut self, program: ProgramId) {
        if self.programs.remove(&program).is_none() {
            self.error(format!("delete_program: {program:?} does not exist"));
        }
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
                self.error(format!("use_program: {id:?} does not exist"));
                return;
            }
        }
        self.bindings.program = program;
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let linked = self.programs.get(&program)?.linked.as_ref()?;
        let index = linked.block.as_ref()?.position(name)?;
        Some(UniformLocation {
            program,
            index: index as u32,
        })
    }

    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue) {
        if self.bindings.program != Some(location.program) {
            self.error(format!(
                "set_uniform: location belongs to {:?} but {:?} is current",
                location.program, self.bindings.program
            ));
            return;
        }
        let index = location.index as usize;
        let Some(linked) = self
            .programs
            .get_mut(&location.program)
            .and_then(|object| object.linked.as_mut())
        else {
            self.error("set_uniform: stale uniform location".to_string());
            return;
        };
        let message = match linked.block.as_ref().and_then(|block| block.members.get(index)) {
            Some(member) if member.kind.accepts(&value) => {
                linked.values[index] = Some(value);
                return;
            }
            Some(member) => format!(
                "set_uniform: {value:?} does not fit `{}` ({:?})",
                member.name, member.kind
            ),
            None => "set_uniform: stale uniform location".to_string(),
        };
        self.error(message);
    }

    fn attrib_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        let linked = self.programs.get(&program)?.linked.as_ref()?;
        linked
            .attributes
            .iter()
            .find(|slot| slot.name == name)
            .map(|slot| slot.location)
    }

    fn vertex_attrib_array(&mut self, location: u32, values: &[f32], components: u32) {
        let Some(program) = self.bindings.program else {
            self.error("vertex_attrib_array: no current program".to_string());
            return;
        };
        if let Some(object) = self.programs.get_mut(&program) {
            object.arrays.insert(location, (values.to_vec(), components));
        }
    }

    fn create_texture(&mut self) -> TextureId {
        let id = TextureId::from_raw(self.names.next());
        self.textures.insert(
            id,
            TextureObject {
                storage: None,
                sampling: SamplerParams::default(),
                allocations: 0,
                contents: Contents::Undefined,
            },
        );
        id
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if self.textures.remove(&texture).is_none() {
            self.error(format!("delete_texture: {texture:?} does not exist"));
        }
        self.bindings.forget_texture(texture);
        for framebuffer in self.framebuffers.values_mut() {
            if framebuffer.color == Some(texture) {
                framebuffer.color = None;
            }
        }
    }

    fn active_texture_unit(&self) -> u32 {
        self.bindings.active_unit
    }

    fn set_active_texture_unit(&mut self, unit: u32) {
        if !self.bindings.set_active_unit(unit) {
            self.error(format!("set_active_texture_unit: unit {unit} out of range"));
        }
    }

    fn bound_texture(&self) -> Option<TextureId> {
        self.bindings.bound_texture()
    }

    fn bind_texture(&mut self, texture: Option<TextureId>) {
        if let Some(id) = texture {
            if !self.textures.contains_key(&id) {
                self.error(format!("bind_texture: {id:?} does not exist"));
                return;
            }
        }
        self.bindings.bind_texture(texture);
    }

    fn texture_parameters(&mut self, params: SamplerParams) {
        if let Some(object) = self.bound_texture_object("texture_parameters") {
            object.sampling = params;
        }
    }

    fn tex_image_2d(&mut self, format: PixelFormat, width: u32, height: u32, pixels: Option<&[u8]>) {
        let len = format.image_len(width, height);
        if let Some(data) = pixels {
            if data.len() < len {
                self.error(format!(
                    "tex_image_2d: {width}x{height} {format:?} needs {len} bytes, got {}",
                    data.len()
                ));
                return;
            }
        }
        let next_upload = self.uploads + 1;
        let Some(object) = self.bound_texture_object("tex_image_2d") else {
            return;
        };
        let (data, contents) = match pixels {
            Some(data) => (data[..len].to_vec(), Contents::Uploaded(next_upload)),
            None => (vec![0; len], Contents::Zeroed),
        };
        object.storage = Some(Storage {
            format,
            width,
            height,
            pixels: data,
        });
        object.allocations += 1;
        object.contents = contents;
        if pixels.is_some() {
            self.uploads = next_upload;
        }
    }

    fn tex_sub_image_2d(&mut self, format: PixelFormat, width: u32, height: u32, pixels: &[u8]) {
        let len = format.image_len(width, height);
        if pixels.len() < len {
            self.error(format!(
                "tex_sub_image_2d: {width}x{height} {format:?} needs {len} bytes, got {}",
                pixels.len()
            ));
            return;
        }
        let next_upload = self.uploads + 1;
        let Some(object) = self.bound_texture_object("tex_sub_image_2d") else {
            return;
        };
        let message = match object.storage.as_mut() {
            None => "tex_sub_image_2d: texture has no storage".to_string(),
            Some(storage) if storage.format != format => format!(
                "tex_sub_image_2d: {format:?} data into {:?} storage",
                storage.format
            ),
            Some(storage) if width > storage.width || height > storage.height => format!(
                "tex_sub_image_2d: {width}x{height} region exceeds {}x{} storage",
                storage.width, storage.height
            ),
            Some(storage) => {
                let bpp = format.bytes_per_pixel();
                let src_stride = width as usize * bpp;
                let dst_stride = storage.width as usize * bpp;
                for row in 0..height as usize {
                    let src = &pixels[row * src_stride..(row + 1) * src_stride];
                    storage.pixels[row * dst_stride..row * dst_stride + src_stride]
                        .copy_from_slice(src);
                }
                object.contents = Contents::Uploaded(next_upload);
                self.uploads = next_upload;
                return;
            }
        };
        self.error(message);
    }

    fn create_framebuffer(&mut self) -> FramebufferId {
        let id = FramebufferId::from_raw(self.names.next());
        self.framebuffers.insert(id, FramebufferObject::default());
        id
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.framebuffers.remove(&framebuffer).is_none() {
            self.error(format!("delete_framebuffer: {framebuffer:?} does not exist"));
        }
        if self.bindings.framebuffer == Some(framebuffer) {
            self.bindings.framebuffer = None;
        }
    }

    fn bound_framebuffer(&self) -> Option<FramebufferId> {
        self.bindings.framebuffer
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        if let Some(id) = framebuffer {
            if !self.framebuffers.contains_key(&id) {
                self.error(format!("bind_framebuffer: {id:?} does not exist"));
                return;
            }
        }
        self.bindings.framebuffer = framebuffer;
    }

    fn framebuffer_texture(&mut self, texture: Option<TextureId>) {
        let Some(id) = self.bindings.framebuffer else {
            self.error("framebuffer_texture: the display surface has no attachments".to_string());
            return;
        };
        if let Some(object) = self.framebuffers.get_mut(&id) {
            object.color = texture;
        }
    }

    fn check_framebuffer_status(&self) -> FramebufferStatus {
        self.framebuffer_status(self.bindings.framebuffer)
    }

    fn viewport(&mut self, viewport: Viewport) {
        self.bindings.viewport = viewport;
    }

    fn draw_arrays(&mut self, primitive: Primitive, first: u32, count: u32) {
        let Some(program) = self.bindings.program else {
            self.error("draw_arrays: no current program".to_string());
            return;
        };
        let Some(object) = self.programs.get(&program) else {
            self.error(format!("draw_arrays: {program:?} does not exist"));
            return;
        };
        let Some(linked) = object.linked.as_ref() else {
            self.error(format!("draw_arrays: {program:?} is not linked"));
            return;
        };

        let needed = (first + count) as usize;
        let mut problems = Vec::new();
        for attribute in &linked.attributes {
            match object.arrays.get(&attribute.location) {
                None => problems.push(format!(
                    "draw_arrays: attribute `{}` has no array",
                    attribute.name
                )),
                Some((values, components)) if values.len() / (*components as usize) < needed => {
                    problems.push(format!(
                        "draw_arrays: attribute `{}` holds fewer than {needed} vertices",
                        attribute.name
                    ))
                }
                Some(_) => {}
            }
        }
        let units = linked.units.clone();
        let uniforms: Vec<(String, UniformValue)> = match linked.block.as_ref() {
            Some(block) => block
                .members
                .iter()
                .zip(&linked.values)
                .filter_map(|(member, value)| value.map(|value| (member.name.clone(), value)))
                .collect(),
            None => Vec::new(),
        };

        let framebuffer = self.bindings.framebuffer;
        let status = self.framebuffer_status(framebuffer);
        if status != FramebufferStatus::Complete {
            problems.push(format!("draw_arrays: framebuffer incomplete ({status:?})"));
        }
        if !problems.is_empty() {
            for problem in problems {
                self.error(problem);
            }
            return;
        }

        let target = self.attachment_of(framebuffer);
        let target_size = target
            .and_then(|id| self.textures.get(&id)?.storage.as_ref())
            .map(|storage| (storage.width, storage.height));
        let viewport = self.bindings.viewport;

        let inputs: Vec<SampledInput> = units
            .iter()
            .map(|&unit| {
                let texture = self.bindings.units.get(unit as usize).copied().flatten();
                let contents = texture
                    .and_then(|id| self.textures.get(&id))
                    .map_or(Contents::Undefined, |object| object.contents);
                SampledInput {
                    unit,
                    texture,
                    contents,
                }
            })
            .collect();
        let mut warnings = Vec::new();
        if let Some((width, height)) = target_size {
            if viewport.x + viewport.width > width || viewport.y + viewport.height > height {
                warnings.push(format!(
                    "draw_arrays: viewport {}x{} at ({}, {}) exceeds {width}x{height} target",
                    viewport.width, viewport.height, viewport.x, viewport.y
                ));
            }
        }
        if let Some(target) = target {
            if inputs.iter().any(|input| input.texture == Some(target)) {
                warnings.push(format!("draw_arrays: {target:?} is sampled while rendered to"));
            }
        }
        for warning in warnings {
            self.error(warning);
        }

        let index = self.draws.len();
        self.draws.push(DrawCall {
            program,
            framebuffer,
            target,
            target_size,
            viewport,
            primitive,
            first,
            count,
            inputs,
            uniforms,
        });
        match target.and_then(|id| self.textures.get_mut(&id)) {
            Some(object) => object.contents = Contents::Drawn(index),
            None => self.screen = Contents::Drawn(index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX: &str = "#version 450
layout(location = 0) in vec2 a_position;
layout(location = 0) out vec2 v_uv;
void main() {
    v_uv = a_position * 0.5 + 0.5;
    gl_Position = vec4(a_position, 0.0, 1.0);
}
";

    const FRAGMENT: &str = "#version 450
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 color;
void main() {
    color = vec4(v_uv, 0.0, 1.0);
}
";

    fn linked(device: &mut HeadlessDevice, vertex: &str, fragment: &str) -> ProgramId {
        let vertex = device.create_shader(ShaderKind::Vertex, vertex).unwrap();
        let fragment = device.create_shader(ShaderKind::Fragment, fragment).unwrap();
        let program = device.create_program();
        device.attach_shader(program, vertex);
        device.attach_shader(program, fragment);
        device.link_program(program).unwrap();
        program
    }

    #[test]
    fn malformed_sources_are_rejected_at_compile_time() {
        let mut device = HeadlessDevice::new();
        let log = device
            .create_shader(
                ShaderKind::Fragment,
                "#version 450
layout(location = 0) out vec4 c;
void main() { float x = ; c = vec4(undeclared_name, 1.0); }
",
            )
            .expect_err("broken expression");
        assert!(log.contains("error"), "{log}");

        let log = device
            .create_shader(
                ShaderKind::Fragment,
                "#version 450
layout(location = 0) out vec4 c;
void main() { c = vec4(undeclared_name, 1.0); }
",
            )
            .expect_err("unknown identifier");
        assert!(log.contains("undeclared_name"), "{log}");

        assert!(device.create_shader(ShaderKind::Vertex, "  \n").is_err());
        assert!(device
            .create_shader(ShaderKind::Fragment, "#version 450\nvoid helper() {}\n")
            .is_err());
        assert_eq!(device.live_objects().shaders, 0);
    }

    #[test]
    fn link_requires_both_stages_and_matching_varyings() {
        let mut device = HeadlessDevice::new();
        let vertex = device.create_shader(ShaderKind::Vertex, VERTEX).unwrap();
        let program = device.create_program();
        device.attach_shader(program, vertex);
        let log = device.link_program(program).expect_err("no fragment");
        assert!(log.contains("fragment"), "{log}");

        let tinted = device
            .create_shader(
                ShaderKind::Fragment,
                "#version 450
layout(location = 3) in vec3 tint;
layout(location = 0) out vec4 color;
void main() { color = vec4(tint, 1.0); }
",
            )
            .unwrap();
        device.attach_shader(program, tinted);
        let log = device.link_program(program).expect_err("unfed varying");
        assert!(log.contains("location 3"), "{log}");

        device.detach_shader(program, tinted);
        let fragment = device.create_shader(ShaderKind::Fragment, FRAGMENT).unwrap();
        device.attach_shader(program, fragment);
        device.link_program(program).unwrap();
        assert_eq!(device.link_count(program), 3);
    }

    #[test]
    fn uniform_writes_need_the_owning_program_current() {
        let mut device = HeadlessDevice::new();
        let program = linked(
            &mut device,
            "#version 450
layout(location = 0) in vec2 a_position;
layout(std140, set = 0, binding = 0) uniform Params { float t; } params;
void main() { gl_Position = vec4(a_position * params.t, 0.0, 1.0); }
",
            "#version 450
layout(location = 0) out vec4 color;
void main() { color = vec4(1.0); }
",
        );

        let location = device.uniform_location(program, "t").unwrap();
        assert_eq!(device.uniform_location(program, "params.t"), Some(location));
        device.set_uniform(location, UniformValue::Float(1.0));
        assert_eq!(device.errors().len(), 1);

        device.use_program(Some(program));
        device.set_uniform(location, UniformValue::Vec2([1.0, 2.0]));
        assert_eq!(device.errors().len(), 2);
        device.set_uniform(location, UniformValue::Float(3.0));
        assert_eq!(device.uniform_value(program, "t"), Some(UniformValue::Float(3.0)));
        assert_eq!(device.errors().len(), 2);
    }

    #[test]
    fn sub_upload_outside_storage_is_an_error() {
        let mut device = HeadlessDevice::new();
        device.tex_image_2d(PixelFormat::Luminance, 2, 2, Some(&[5, 6, 7, 8]));
        assert_eq!(device.errors().len(), 1);
        assert_eq!(device.upload_count(), 0);

        let texture = device.create_texture();
        device.bind_texture(Some(texture));
        device.tex_image_2d(PixelFormat::Luminance, 2, 2, Some(&[1, 2, 3, 4]));
        assert_eq!(device.upload_count(), 1);
        device.tex_sub_image_2d(PixelFormat::Luminance, 3, 2, &[0; 6]);
        assert_eq!(device.errors().len(), 2);
        assert_eq!(device.upload_count(), 1);
        assert_eq!(device.texture_pixels(texture), Some(&[1, 2, 3, 4][..]));

        device.tex_sub_image_2d(PixelFormat::Luminance, 1, 2, &[9, 8]);
        assert_eq!(device.texture_pixels(texture), Some(&[9, 2, 8, 4][..]));
        assert_eq!(device.texture_contents(texture), Some(Contents::Uploaded(2)));
        assert_eq!(device.upload_count(), 2);
    }
}
