use thiserror::Error;

use crate::types::{FramebufferStatus, ShaderKind};

/// Failures raised by the GPU resource and pipeline layer.
///
/// None of these are retried. Per-tick soft conditions (no new frame, zero
/// sized buffers) are not errors and surface through
/// [`crate::accumulate::TickReport`] instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The backend rejected a shader stage; `log` is the compiler output unmodified.
    #[error("{stage} shader failed to compile:\n{log}")]
    Compile { stage: ShaderKind, log: String },
    /// The backend refused to link a program; `log` is the linker output unmodified.
    #[error("program failed to link:\n{log}")]
    Link { log: String },
    /// Caller supplied fewer bytes (or a malformed array) than the operation needs.
    #[error("invalid data: expected at least {expected} elements, got {actual}")]
    InvalidData { expected: usize, actual: usize },
    #[error("render target is incomplete ({status:?})")]
    IncompleteTarget { status: FramebufferStatus },
}

pub type PipelineResult<T> = Result<T, PipelineError>;
