use crate::device::{GraphicsDevice, ShaderId};
use crate::error::{PipelineError, PipelineResult};
use crate::types::ShaderKind;

/// A compiled shader stage and the device object backing it.
///
/// Units are released explicitly with [`ShaderUnit::release`] (usually by the
/// owning [`crate::program::PipelineProgram`]); dropping a live unit leaks the
/// stage object on the device and logs a warning.
#[derive(Debug)]
pub struct ShaderUnit {
    id: Option<ShaderId>,
    kind: ShaderKind,
}

impl ShaderUnit {
    /// Compiles `source` as a `kind` stage. One device object is allocated on success.
    pub fn compile<D: GraphicsDevice + ?Sized>(
        device: &mut D,
        kind: ShaderKind,
        source: &str,
    ) -> PipelineResult<Self> {
        match device.create_shader(kind, source) {
            Ok(id) => {
                tracing::debug!(stage = %kind, ?id, "compiled shader stage");
                Ok(Self { id: Some(id), kind })
            }
            Err(log) => Err(PipelineError::Compile { stage: kind, log }),
        }
    }

    pub fn kind(&self) -> ShaderKind {
        self.kind
    }

    /// Device handle, `None` once released.
    pub fn id(&self) -> Option<ShaderId> {
        self.id
    }

    pub fn release<D: GraphicsDevice + ?Sized>(mut self, device: &mut D) {
        self.release_in_place(device);
    }

    pub(crate) fn release_in_place<D: GraphicsDevice + ?Sized>(&mut self, device: &mut D) {
        if let Some(id) = self.id.take() {
            device.delete_shader(id);
        }
    }
}

impl Drop for ShaderUnit {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            tracing::warn!(stage = %self.kind, ?id, "shader stage dropped without release");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessDevice;
    use crate::sources::VERTEX_SHADER_GLSL;

    #[test]
    fn compile_allocates_one_stage_and_release_frees_it() {
        let mut device = HeadlessDevice::new();
        let unit = ShaderUnit::compile(&mut device, ShaderKind::Vertex, VERTEX_SHADER_GLSL)
            .expect("vertex shader compiles");
        assert_eq!(device.live_objects().shaders, 1);
        assert_eq!(unit.kind(), ShaderKind::Vertex);

        unit.release(&mut device);
        assert_eq!(device.live_objects().shaders, 0);
    }

    #[test]
    fn compile_error_carries_the_log() {
        let mut device = HeadlessDevice::new();
        let err = ShaderUnit::compile(
            &mut device,
            ShaderKind::Fragment,
            "#version 450\nlayout(location = 0) out vec4 c;\nvoid main() { float x = ; c = vec4(undeclared_name, 1.0); }\n",
        )
        .expect_err("compile fails");
        match err {
            PipelineError::Compile { stage, log } => {
                assert_eq!(stage, ShaderKind::Fragment);
                assert!(log.contains("error"), "{log}");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(device.live_objects().shaders, 0);
    }
}
