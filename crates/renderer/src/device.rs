//! The binding-based GPU state machine driven by the pipeline components.
//!
//! [`GraphicsDevice`] mirrors the classic "current binding" model: one active
//! program, one active texture unit with a 2D texture bound per unit, and one
//! bound framebuffer (`None` is the display surface). Configuration calls act
//! on whatever is currently bound, which is why the components above this
//! layer rebind through [`crate::scope`] guards.

use std::fmt;

use crate::types::{
    FramebufferStatus, PixelFormat, Primitive, SamplerParams, ShaderKind, UniformValue, Viewport,
};

/// Number of texture units a device exposes.
pub const MAX_TEXTURE_UNITS: usize = 8;

macro_rules! object_handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            pub(crate) fn from_raw(raw: u32) -> Self {
                Self(raw)
            }

            pub fn raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

object_handle!(
    /// Compiled shader stage object.
    ShaderId,
    "shader"
);
object_handle!(
    /// Program object that stages are attached to and linked into.
    ProgramId,
    "program"
);
object_handle!(
    /// 2D texture object.
    TextureId,
    "texture"
);
object_handle!(
    /// Off-screen framebuffer object.
    FramebufferId,
    "framebuffer"
);

/// Resolved uniform slot of a linked program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UniformLocation {
    pub(crate) program: ProgramId,
    pub(crate) index: u32,
}

impl UniformLocation {
    pub fn program(&self) -> ProgramId {
        self.program
    }
}

/// Binding-based GPU device.
///
/// Compile and link failures return the backend's diagnostic text verbatim;
/// everything else follows "errors are recorded, not raised" semantics of
/// the state machine and is reported through `tracing`.
pub trait GraphicsDevice {
    fn create_shader(&mut self, kind: ShaderKind, source: &str) -> Result<ShaderId, String>;
    fn delete_shader(&mut self, shader: ShaderId);

    fn create_program(&mut self) -> ProgramId;
    fn attach_shader(&mut self, program: ProgramId, shader: ShaderId);
    fn detach_shader(&mut self, program: ProgramId, shader: ShaderId);
    fn link_program(&mut self, program: ProgramId) -> Result<(), String>;
    fn delete_program(&mut self, program: ProgramId);

    fn current_program(&self) -> Option<ProgramId>;
    fn use_program(&mut self, program: Option<ProgramId>);
    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;
    /// Writes a uniform of the current program.
    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue);
    fn attrib_location(&self, program: ProgramId, name: &str) -> Option<u32>;
    /// Uploads and enables a float vertex array for the current program.
    fn vertex_attrib_array(&mut self, location: u32, values: &[f32], components: u32);

    fn create_texture(&mut self) -> TextureId;
    fn delete_texture(&mut self, texture: TextureId);
    fn active_texture_unit(&self) -> u32;
    fn set_active_texture_unit(&mut self, unit: u32);
    /// Texture bound to the active unit.
    fn bound_texture(&self) -> Option<TextureId>;
    fn bind_texture(&mut self, texture: Option<TextureId>);
    fn texture_parameters(&mut self, params: SamplerParams);
    /// (Re)allocates storage of the bound texture; `None` allocates zero-filled storage.
    fn tex_image_2d(&mut self, format: PixelFormat, width: u32, height: u32, pixels: Option<&[u8]>);
    /// Overwrites the top-left region of the bound texture's existing storage.
    fn tex_sub_image_2d(&mut self, format: PixelFormat, width: u32, height: u32, pixels: &[u8]);

    fn create_framebuffer(&mut self) -> FramebufferId;
    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);
    /// Bound framebuffer; `None` is the display surface.
    fn bound_framebuffer(&self) -> Option<FramebufferId>;
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>);
    /// Attaches a texture as the color attachment of the bound framebuffer.
    fn framebuffer_texture(&mut self, texture: Option<TextureId>);
    fn check_framebuffer_status(&self) -> FramebufferStatus;

    fn viewport(&mut self, viewport: Viewport);
    fn draw_arrays(&mut self, primitive: Primitive, first: u32, count: u32);
}

/// Ambient binding state shared by the device implementations.
#[derive(Clone, Debug, Default)]
pub(crate) struct BindingState {
    pub program: Option<ProgramId>,
    pub active_unit: u32,
    pub units: [Option<TextureId>; MAX_TEXTURE_UNITS],
    pub framebuffer: Option<FramebufferId>,
    pub viewport: Viewport,
}

impl BindingState {
    pub fn bound_texture(&self) -> Option<TextureId> {
        self.units
            .get(self.active_unit as usize)
            .copied()
            .flatten()
    }

    pub fn bind_texture(&mut self, texture: Option<TextureId>) {
        if let Some(slot) = self.units.get_mut(self.active_unit as usize) {
            *slot = texture;
        }
    }

    pub fn set_active_unit(&mut self, unit: u32) -> bool {
        if (unit as usize) < MAX_TEXTURE_UNITS {
            self.active_unit = unit;
            true
        } else {
            false
        }
    }

    /// Clears every binding that refers to a deleted texture.
    pub fn forget_texture(&mut self, texture: TextureId) {
        for slot in self.units.iter_mut() {
            if *slot == Some(texture) {
                *slot = None;
            }
        }
    }
}

/// Monotonic object name allocator; zero is never handed out.
#[derive(Debug, Default)]
pub(crate) struct ObjectNames {
    last: u32,
}

impl ObjectNames {
    pub fn next(&mut self) -> u32 {
        self.last = self.last.wrapping_add(1).max(1);
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_state_tracks_units_independently() {
        let mut state = BindingState::default();
        let a = TextureId::from_raw(1);
        let b = TextureId::from_raw(2);
        state.bind_texture(Some(a));
        assert!(state.set_active_unit(1));
        state.bind_texture(Some(b));
        assert_eq!(state.bound_texture(), Some(b));
        state.set_active_unit(0);
        assert_eq!(state.bound_texture(), Some(a));

        state.forget_texture(a);
        assert_eq!(state.bound_texture(), None);
        assert_eq!(state.units[1], Some(b));
    }

    #[test]
    fn out_of_range_unit_is_rejected() {
        let mut state = BindingState::default();
        assert!(!state.set_active_unit(MAX_TEXTURE_UNITS as u32));
        assert_eq!(state.active_unit, 0);
    }
}
