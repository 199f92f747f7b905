//! RAII guards for the device's ambient bindings.
//!
//! A guard records the binding of one binding point, rebinds it, and puts the
//! recorded binding back when it goes out of scope, including on early `?`
//! returns. Guards deref to the device so the scoped work is written against
//! the guard itself; nesting a second guard borrows through the first
//! (`TextureScope::bind(&mut *program_scope, ..)`).

use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use crate::device::{FramebufferId, GraphicsDevice, ProgramId, TextureId};

/// One slot of ambient device state that can be saved and restored.
pub trait BindingPoint {
    type Handle: Copy + PartialEq;

    fn current<D: GraphicsDevice + ?Sized>(device: &D) -> Option<Self::Handle>;
    fn bind<D: GraphicsDevice + ?Sized>(device: &mut D, handle: Option<Self::Handle>);
}

/// The current program.
pub enum ProgramPoint {}

/// The 2D texture bound to the active texture unit.
pub enum TexturePoint {}

/// The current framebuffer (`None` = display surface).
pub enum FramebufferPoint {}

impl BindingPoint for ProgramPoint {
    type Handle = ProgramId;

    fn current<D: GraphicsDevice + ?Sized>(device: &D) -> Option<ProgramId> {
        device.current_program()
    }

    fn bind<D: GraphicsDevice + ?Sized>(device: &mut D, handle: Option<ProgramId>) {
        device.use_program(handle);
    }
}

impl BindingPoint for TexturePoint {
    type Handle = TextureId;

    fn current<D: GraphicsDevice + ?Sized>(device: &D) -> Option<TextureId> {
        device.bound_texture()
    }

    fn bind<D: GraphicsDevice + ?Sized>(device: &mut D, handle: Option<TextureId>) {
        device.bind_texture(handle);
    }
}

impl BindingPoint for FramebufferPoint {
    type Handle = FramebufferId;

    fn current<D: GraphicsDevice + ?Sized>(device: &D) -> Option<FramebufferId> {
        device.bound_framebuffer()
    }

    fn bind<D: GraphicsDevice + ?Sized>(device: &mut D, handle: Option<FramebufferId>) {
        device.bind_framebuffer(handle);
    }
}

/// Guard over a single binding point of `device`.
pub struct Scoped<'a, D: GraphicsDevice + ?Sized, P: BindingPoint> {
    device: &'a mut D,
    previous: Option<P::Handle>,
    _point: PhantomData<P>,
}

pub type ProgramScope<'a, D> = Scoped<'a, D, ProgramPoint>;
pub type TextureScope<'a, D> = Scoped<'a, D, TexturePoint>;
pub type FramebufferScope<'a, D> = Scoped<'a, D, FramebufferPoint>;

impl<'a, D: GraphicsDevice + ?Sized, P: BindingPoint> Scoped<'a, D, P> {
    /// Saves the current binding and binds `handle` for the lifetime of the guard.
    pub fn bind(device: &'a mut D, handle: P::Handle) -> Self {
        let previous = P::current(&*device);
        if previous != Some(handle) {
            P::bind(&mut *device, Some(handle));
        }
        Self {
            device,
            previous,
            _point: PhantomData,
        }
    }

    /// Binding that will be restored on drop.
    pub fn previous(&self) -> Option<P::Handle> {
        self.previous
    }
}

impl<D: GraphicsDevice + ?Sized, P: BindingPoint> Deref for Scoped<'_, D, P> {
    type Target = D;

    fn deref(&self) -> &D {
        self.device
    }
}

impl<D: GraphicsDevice + ?Sized, P: BindingPoint> DerefMut for Scoped<'_, D, P> {
    fn deref_mut(&mut self) -> &mut D {
        self.device
    }
}

impl<D: GraphicsDevice + ?Sized, P: BindingPoint> Drop for Scoped<'_, D, P> {
    fn drop(&mut self) {
        if P::current(&*self.device) != self.previous {
            P::bind(&mut *self.device, self.previous);
        }
    }
}
