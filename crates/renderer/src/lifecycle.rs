use std::sync::Arc;

use crate::accumulate::{AccumulationPipeline, TickReport};
use crate::device::GraphicsDevice;
use crate::error::PipelineResult;
use crate::handoff::{FrameRecycler, LatestFrame};
use crate::sources::ShaderSources;
use crate::types::EffectSettings;

/// Render-loop entry points driven by the host.
///
/// All GPU objects are created in [`on_surface_created`](Self::on_surface_created)
/// and must be released with [`shutdown`](Self::shutdown) on the thread that
/// owns the device.
pub struct TrailRenderer {
    sources: ShaderSources,
    effect: EffectSettings,
    frames: Arc<LatestFrame>,
    recycler: Arc<dyn FrameRecycler>,
    pipeline: Option<AccumulationPipeline>,
    surface: (u32, u32),
    ticks: u64,
}

impl TrailRenderer {
    pub fn new(
        sources: ShaderSources,
        effect: EffectSettings,
        frames: Arc<LatestFrame>,
        recycler: Arc<dyn FrameRecycler>,
    ) -> Self {
        Self {
            sources,
            effect,
            frames,
            recycler,
            pipeline: None,
            surface: (0, 0),
            ticks: 0,
        }
    }

    /// Builds the pipeline, replacing (and releasing) any previous one.
    pub fn on_surface_created<D: GraphicsDevice + ?Sized>(
        &mut self,
        device: &mut D,
    ) -> PipelineResult<()> {
        if let Some(previous) = self.pipeline.take() {
            tracing::debug!("surface re-created; rebuilding pipeline");
            previous.release(device);
        }
        let mut pipeline = AccumulationPipeline::new(device, &self.sources, self.effect)?;
        pipeline.set_viewport(self.surface.0, self.surface.1);
        self.pipeline = Some(pipeline);
        tracing::info!("trail pipeline ready");
        Ok(())
    }

    /// Only changes the display viewport; the composites follow the camera size.
    pub fn on_surface_resized(&mut self, width: u32, height: u32) {
        self.surface = (width, height);
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.set_viewport(width, height);
        }
    }

    /// Consumes the latest pending frame, if any, and renders one frame.
    pub fn on_frame_tick<D: GraphicsDevice + ?Sized>(
        &mut self,
        device: &mut D,
    ) -> PipelineResult<TickReport> {
        let Some(pipeline) = self.pipeline.as_mut() else {
            return Ok(TickReport::default());
        };
        self.ticks += 1;
        let frame = self.frames.take();
        pipeline.tick(device, frame, self.recycler.as_ref())
    }

    pub fn set_effect<D: GraphicsDevice + ?Sized>(&mut self, device: &mut D, effect: EffectSettings) {
        self.effect = effect;
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.set_effect(device, effect);
        }
    }

    pub fn effect(&self) -> EffectSettings {
        self.effect
    }

    pub fn frames(&self) -> &Arc<LatestFrame> {
        &self.frames
    }

    pub fn pipeline(&self) -> Option<&AccumulationPipeline> {
        self.pipeline.as_ref()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Stops rendering and releases every GPU object.
    pub fn shutdown<D: GraphicsDevice + ?Sized>(&mut self, device: &mut D) {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.release(device);
            let stats = self.frames.stats();
            tracing::info!(
                ticks = self.ticks,
                published = stats.published,
                consumed = stats.consumed,
                dropped = stats.dropped,
                "trail pipeline released"
            );
        }
    }
}

impl Drop for TrailRenderer {
    fn drop(&mut self) {
        if self.pipeline.is_some() {
            tracing::warn!("trail renderer dropped without shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handoff::{DiscardRecycler, IncomingFrame};
    use crate::headless::HeadlessDevice;

    fn renderer() -> TrailRenderer {
        TrailRenderer::new(
            ShaderSources::default(),
            EffectSettings::default(),
            Arc::new(LatestFrame::new()),
            Arc::new(DiscardRecycler),
        )
    }

    #[test]
    fn tick_before_surface_is_a_no_op() {
        let mut device = HeadlessDevice::new();
        let mut renderer = renderer();
        renderer
            .frames()
            .publish(IncomingFrame::new(vec![0; 4], 2, 2));
        let report = renderer.on_frame_tick(&mut device).unwrap();
        assert_eq!(report, TickReport::default());
        assert!(renderer.frames().is_pending());
    }

    #[test]
    fn recreating_the_surface_releases_the_old_pipeline() {
        let mut device = HeadlessDevice::new();
        let mut renderer = renderer();
        renderer.on_surface_resized(320, 240);
        renderer.on_surface_created(&mut device).unwrap();
        let live = device.live_objects();
        renderer.on_surface_created(&mut device).unwrap();
        assert_eq!(device.live_objects(), live);
        assert_eq!(renderer.pipeline().map(|p| p.viewport()), Some((320, 240)));

        renderer.shutdown(&mut device);
        assert_eq!(device.live_objects().total(), 0);
    }

    #[test]
    fn tick_consumes_the_pending_frame() {
        let mut device = HeadlessDevice::new();
        let mut renderer = renderer();
        renderer.on_surface_created(&mut device).unwrap();
        renderer.on_surface_resized(64, 48);
        renderer
            .frames()
            .publish(IncomingFrame::new(vec![9; 64 * 48], 64, 48));

        let report = renderer.on_frame_tick(&mut device).unwrap();
        assert!(report.captured && report.presented && report.swapped);
        assert!(!renderer.frames().is_pending());
        assert_eq!(renderer.ticks(), 1);
        renderer.shutdown(&mut device);
    }
}
