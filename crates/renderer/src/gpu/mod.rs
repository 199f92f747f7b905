//! wgpu backend for the preview window.
//!
//! - `context` owns the instance, surface and device, and reconfigures the
//!   swapchain when the window resizes.
//! - `device` implements [`GraphicsDevice`](crate::device::GraphicsDevice)
//!   by replaying the tracked bindings into one render pass per draw.

mod context;
mod device;

pub use device::WgpuDevice;
