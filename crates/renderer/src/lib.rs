//! Camera trail renderer.
//!
//! Live luma frames are blended into a persistent off-screen composite and
//! then drawn to the screen, which leaves a fading trail behind anything that
//! moves. The flow for one tick:
//!
//! ```text
//!   capture thread ──publish──▶ LatestFrame
//!                                   │ take (once per tick)
//!                                   ▼
//!   upload ──▶ capture ─┐
//!                       ├─ pass 1 (accumulate) ──▶ back ── pass 2 (display) ──▶ screen
//!              front ───┘                            │
//!                 ▲──────────────── swap ◀───────────┘
//! ```
//!
//! Everything GPU-facing is written against [`GraphicsDevice`], a binding-based
//! state machine (current program, texture per unit, framebuffer, viewport).
//! [`WgpuDevice`] drives a real window; [`HeadlessDevice`] keeps the same state
//! in memory and records what would have been drawn.

mod accumulate;
mod compile;
mod device;
mod error;
mod gpu;
mod handoff;
mod headless;
mod lifecycle;
mod program;
mod runtime;
mod scope;
mod shader;
mod sources;
mod target;
mod types;
mod window;

pub use accumulate::{
    AccumulationPipeline, TickPhase, TickReport, CAPTURE_UNIT, COMPOSITE_UNIT,
    HISTORY_UNIT, QUAD_VERTICES,
};
pub use device::{
    FramebufferId, GraphicsDevice, ProgramId, ShaderId, TextureId, UniformLocation,
    MAX_TEXTURE_UNITS,
};
pub use error::{PipelineError, PipelineResult};
pub use gpu::WgpuDevice;
pub use handoff::{DiscardRecycler, FrameRecycler, HandoffStats, IncomingFrame, LatestFrame};
pub use headless::{Contents, DrawCall, HeadlessDevice, LiveObjects, SampledInput};
pub use lifecycle::TrailRenderer;
pub use program::PipelineProgram;
pub use runtime::{FramePacer, FrameRates, FrameStats};
pub use scope::{
    BindingPoint, FramebufferPoint, FramebufferScope, ProgramPoint, ProgramScope, Scoped,
    TexturePoint, TextureScope,
};
pub use shader::ShaderUnit;
pub use sources::{
    ShaderSources, ACCUMULATION_SHADER_GLSL, DISPLAY_SHADER_GLSL, VERTEX_SHADER_GLSL,
};
pub use target::RenderTarget;
pub use types::{
    EffectSettings, FilterMode, FramebufferStatus, IdlePolicy, PixelFormat, PreviewConfig,
    Primitive, SamplerParams, ShaderKind, UniformValue, Viewport, WrapMode,
};
pub use window::run_preview;
