//! Frame sources for the trail renderer.
//!
//! A [`FrameProducer`] fills buffers taken from a [`FramePool`];
//! [`CaptureThread`] runs it at a fixed interval and publishes each frame into
//! the renderer's `LatestFrame` slot. The renderer returns buffers to the pool
//! through `FrameRecycler` as soon as they are uploaded.

mod capture;
mod error;
mod layout;
mod pattern;
mod pool;
mod sequence;

pub use capture::{CaptureThread, FrameProducer};
pub use error::{CameraError, CameraResult};
pub use layout::PixelLayout;
pub use pattern::TestPattern;
pub use pool::FramePool;
pub use sequence::ImageSequence;
