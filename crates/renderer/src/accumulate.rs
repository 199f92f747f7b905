//! The two-pass trail pipeline.
//!
//! Every tick runs through four phases:
//!
//! ```text
//!   Idle ──new frame──▶ CaptureReady ──pass 1──▶ PassOneComplete ──pass 2──▶ Presented ──swap──▶ Idle
//!     │                                                                ▲
//!     └────────────── no frame: re-present the front buffer ──────────┘
//! ```
//!
//! Pass 1 renders `capture` (unit 0) and `front` (unit 1) into `back`.
//! Pass 2 draws `back` (unit 0) to the display surface. Then front and back
//! trade places, so the front buffer always holds the latest composite.

use crate::device::GraphicsDevice;
use crate::error::PipelineResult;
use crate::handoff::{FrameRecycler, IncomingFrame};
use crate::program::PipelineProgram;
use crate::sources::ShaderSources;
use crate::target::RenderTarget;
use crate::types::{EffectSettings, IdlePolicy, Primitive};

/// Full-viewport quad as a four vertex triangle strip.
pub const QUAD_VERTICES: [f32; 8] = [-1.0, -1.0, 1.0, -1.0, -1.0, 1.0, 1.0, 1.0];

const POSITION_ATTRIBUTE: &str = "xy";
pub const CAPTURE_UNIT: u32 = 0;
pub const HISTORY_UNIT: u32 = 1;
pub const COMPOSITE_UNIT: u32 = 0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TickPhase {
    #[default]
    Idle,
    CaptureReady,
    PassOneComplete,
    Presented,
}

/// What a single tick did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// A new frame was uploaded.
    pub captured: bool,
    /// The accumulation pass ran.
    pub accumulated: bool,
    /// Something was drawn to the display surface.
    pub presented: bool,
    /// Front and back buffers traded places.
    pub swapped: bool,
    /// Furthest phase the tick reached before the swap back to `Idle`.
    pub phase: TickPhase,
}

#[derive(Debug)]
struct PingPong {
    front: RenderTarget,
    back: RenderTarget,
}

impl PingPong {
    fn swap(&mut self) {
        std::mem::swap(&mut self.front, &mut self.back);
    }

    fn set_size(&mut self, width: u32, height: u32) -> bool {
        let front = self.front.set_size(width, height);
        let back = self.back.set_size(width, height);
        front || back
    }
}

pub struct AccumulationPipeline {
    capture: RenderTarget,
    buffers: PingPong,
    accumulation: PipelineProgram,
    display: PipelineProgram,
    viewport: (u32, u32),
    effect: EffectSettings,
    has_capture: bool,
}

impl AccumulationPipeline {
    /// Links both programs and creates the three render targets.
    ///
    /// Nothing is left allocated on the device when this fails.
    pub fn new<D: GraphicsDevice + ?Sized>(
        device: &mut D,
        sources: &ShaderSources,
        effect: EffectSettings,
    ) -> PipelineResult<Self> {
        let mut accumulation =
            PipelineProgram::from_sources(device, &sources.vertex, &sources.accumulation)?;
        let mut display =
            match PipelineProgram::from_sources(device, &sources.vertex, &sources.display) {
                Ok(program) => program,
                Err(err) => {
                    accumulation.release(device);
                    return Err(err);
                }
            };

        let quad = accumulation
            .set_vertex_attribute(device, POSITION_ATTRIBUTE, &QUAD_VERTICES, 2)
            .and_then(|_| {
                display.set_vertex_attribute(device, POSITION_ATTRIBUTE, &QUAD_VERTICES, 2)
            });
        if let Err(err) = quad {
            accumulation.release(device);
            display.release(device);
            return Err(err);
        }

        let capture = RenderTarget::new(device);
        let buffers = PingPong {
            front: RenderTarget::new(device),
            back: RenderTarget::new(device),
        };

        let mut pipeline = Self {
            capture,
            buffers,
            accumulation,
            display,
            viewport: (0, 0),
            effect,
            has_capture: false,
        };
        pipeline.apply_effect(device);
        Ok(pipeline)
    }

    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if self.viewport != (width, height) {
            tracing::debug!(width, height, "display viewport changed");
        }
        self.viewport = (width, height);
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    pub fn effect(&self) -> EffectSettings {
        self.effect
    }

    pub fn set_effect<D: GraphicsDevice + ?Sized>(&mut self, device: &mut D, effect: EffectSettings) {
        self.effect = effect;
        self.apply_effect(device);
    }

    fn apply_effect<D: GraphicsDevice + ?Sized>(&mut self, device: &mut D) {
        self.accumulation
            .set_uniform(device, "decay", self.effect.decay.clamp(0.0, 1.0));
        self.display.set_uniform(device, "gain", self.effect.gain);
    }

    pub fn capture(&self) -> &RenderTarget {
        &self.capture
    }

    /// Target holding the latest completed composite.
    pub fn front(&self) -> &RenderTarget {
        &self.buffers.front
    }

    pub fn back(&self) -> &RenderTarget {
        &self.buffers.back
    }

    pub fn swap_buffers(&mut self) {
        self.buffers.swap();
    }

    /// Idle → CaptureReady: uploads `frame` and sizes the composites to match.
    ///
    /// The frame's buffer goes back to `recycler` right after the upload.
    /// Returns `false` (and still recycles) when the frame is unusable.
    pub fn receive<D: GraphicsDevice + ?Sized>(
        &mut self,
        device: &mut D,
        frame: IncomingFrame,
        recycler: &dyn FrameRecycler,
    ) -> PipelineResult<bool> {
        let IncomingFrame {
            pixels,
            width,
            height,
        } = frame;
        let needed = width as usize * height as usize;
        if needed == 0 || pixels.len() < needed {
            tracing::warn!(
                width,
                height,
                bytes = pixels.len(),
                "dropping malformed camera frame"
            );
            recycler.recycle(pixels);
            return Ok(false);
        }

        if self.capture.set_size(width, height) {
            tracing::debug!(width, height, "capture size changed");
        }
        let uploaded = self.capture.upload_data(device, &pixels);
        recycler.recycle(pixels);
        uploaded?;

        if self.buffers.set_size(width, height) {
            let texel = [1.0 / width as f32, 1.0 / height as f32];
            self.accumulation.set_uniform(device, "duv", texel);
        }

        self.has_capture = true;
        Ok(true)
    }

    /// Runs one frame of the pipeline.
    pub fn tick<D: GraphicsDevice + ?Sized>(
        &mut self,
        device: &mut D,
        frame: Option<IncomingFrame>,
        recycler: &dyn FrameRecycler,
    ) -> PipelineResult<TickReport> {
        let mut report = TickReport::default();

        if let Some(frame) = frame {
            report.captured = self.receive(device, frame, recycler)?;
            if report.captured {
                report.phase = TickPhase::CaptureReady;
            }
        }
        if self.buffers.back.is_empty() {
            tracing::trace!("no camera frame yet, nothing to draw");
            return Ok(report);
        }

        let blend = report.captured || (self.effect.idle == IdlePolicy::Reblend && self.has_capture);
        if blend {
            self.accumulate(device)?;
            report.accumulated = true;
            report.phase = TickPhase::PassOneComplete;
        }

        let (width, height) = self.viewport;
        if width > 0 && height > 0 {
            let composite = if blend {
                &self.buffers.back
            } else {
                &self.buffers.front
            };
            RenderTarget::present_to_screen(device, width, height);
            composite.bind_as_sampled_input(device, COMPOSITE_UNIT);
            self.display.activate(device);
            device.draw_arrays(Primitive::TriangleStrip, 0, 4);
            report.presented = true;
            report.phase = TickPhase::Presented;
        }

        if blend {
            self.buffers.swap();
            report.swapped = true;
        }
        Ok(report)
    }

    /// Pass 1: capture + front → back.
    fn accumulate<D: GraphicsDevice + ?Sized>(&mut self, device: &mut D) -> PipelineResult<()> {
        self.buffers.front.ensure_color_storage(device);
        self.buffers.back.bind_as_render_destination(device)?;
        self.capture.bind_as_sampled_input(device, CAPTURE_UNIT);
        self.buffers.front.bind_as_sampled_input(device, HISTORY_UNIT);
        self.accumulation.activate(device);
        device.draw_arrays(Primitive::TriangleStrip, 0, 4);
        Ok(())
    }

    /// Releases every program and target.
    pub fn release<D: GraphicsDevice + ?Sized>(self, device: &mut D) {
        let Self {
            capture,
            buffers,
            accumulation,
            display,
            ..
        } = self;
        accumulation.release(device);
        display.release(device);
        capture.release(device);
        buffers.front.release(device);
        buffers.back.release(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handoff::DiscardRecycler;
    use crate::headless::HeadlessDevice;

    fn pipeline(device: &mut HeadlessDevice) -> AccumulationPipeline {
        AccumulationPipeline::new(device, &ShaderSources::default(), EffectSettings::default())
            .expect("built-in shaders link")
    }

    #[test]
    fn swapping_twice_is_identity() {
        let mut device = HeadlessDevice::new();
        let mut pipeline = pipeline(&mut device);
        let (front, back) = (pipeline.front().texture(), pipeline.back().texture());

        pipeline.swap_buffers();
        assert_eq!(pipeline.front().texture(), back);
        pipeline.swap_buffers();
        assert_eq!(
            (pipeline.front().texture(), pipeline.back().texture()),
            (front, back)
        );
        pipeline.release(&mut device);
    }

    #[test]
    fn nothing_is_drawn_before_the_first_frame() {
        let mut device = HeadlessDevice::new();
        let mut pipeline = pipeline(&mut device);
        pipeline.set_viewport(640, 480);

        let report = pipeline
            .tick(&mut device, None, &DiscardRecycler)
            .expect("tick");
        assert_eq!(report, TickReport::default());
        assert!(device.draws().is_empty());
        pipeline.release(&mut device);
    }

    #[test]
    fn zero_viewport_still_accumulates() {
        let mut device = HeadlessDevice::new();
        let mut pipeline = pipeline(&mut device);
        let frame = IncomingFrame::new(vec![50; 16], 4, 4);

        let report = pipeline
            .tick(&mut device, Some(frame), &DiscardRecycler)
            .expect("tick");
        assert!(report.accumulated && report.swapped);
        assert!(!report.presented);
        assert_eq!(device.draws().len(), 1);
        assert_eq!(report.phase, TickPhase::PassOneComplete);
        pipeline.release(&mut device);
    }

    #[test]
    fn malformed_frame_is_dropped_not_fatal() {
        let mut device = HeadlessDevice::new();
        let mut pipeline = pipeline(&mut device);
        let frame = IncomingFrame::new(vec![0; 10], 4, 4);

        let report = pipeline
            .tick(&mut device, Some(frame), &DiscardRecycler)
            .expect("tick");
        assert!(!report.captured);
        assert_eq!(pipeline.capture().size(), (0, 0));
        pipeline.release(&mut device);
    }

    #[test]
    fn effect_settings_reach_the_programs() {
        let mut device = HeadlessDevice::new();
        let mut pipeline = pipeline(&mut device);
        pipeline.set_effect(
            &mut device,
            EffectSettings {
                decay: 0.5,
                gain: 2.0,
                idle: IdlePolicy::Represent,
            },
        );
        pipeline.set_viewport(8, 8);
        pipeline
            .tick(&mut device, Some(IncomingFrame::new(vec![1; 8], 4, 2)), &DiscardRecycler)
            .expect("tick");

        let draws = device.draws();
        let uniform = |index: usize, name: &str| {
            draws[index]
                .uniforms
                .iter()
                .find(|(uniform, _)| uniform == name)
                .map(|(_, value)| *value)
        };
        assert_eq!(uniform(0, "decay"), Some(0.5f32.into()));
        assert_eq!(uniform(0, "duv"), Some([0.25f32, 0.5].into()));
        assert_eq!(uniform(1, "gain"), Some(2.0f32.into()));
        pipeline.release(&mut device);
    }

    #[test]
    fn release_frees_every_object() {
        let mut device = HeadlessDevice::new();
        let pipeline = pipeline(&mut device);
        assert!(device.live_objects().total() > 0);
        pipeline.release(&mut device);
        assert_eq!(device.live_objects().total(), 0);
        assert!(device.errors().is_empty(), "{:?}", device.errors());
    }
}
