use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, KeyEvent, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoopBuilder};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowBuilder};

use crate::accumulate::TickReport;
use crate::gpu::WgpuDevice;
use crate::handoff::{FrameRecycler, LatestFrame};
use crate::lifecycle::TrailRenderer;
use crate::runtime::{FramePacer, FrameStats};
use crate::types::{IdlePolicy, PreviewConfig};

const SOFTWARE_FPS_CAP: f32 = 15.0;

/// Window, device and renderer for the preview path.
///
/// Field order matters: the renderer's objects belong to the device, and the
/// device's surface must go before the window it was created from.
struct PreviewState {
    renderer: TrailRenderer,
    device: WgpuDevice,
    window: Arc<Window>,
}

impl PreviewState {
    fn window(&self) -> &Window {
        &self.window
    }

    fn resize(&mut self, size: PhysicalSize<u32>) {
        self.device.resize_surface(size);
        self.renderer.on_surface_resized(size.width, size.height);
    }

    /// Renders one tick. Pipeline failures only cost this frame; surface
    /// errors are handed back to the event loop.
    fn render_frame(&mut self) -> Result<TickReport, wgpu::SurfaceError> {
        self.device.begin_frame()?;
        let report = match self.renderer.on_frame_tick(&mut self.device) {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!(error = %err, "frame skipped");
                TickReport::default()
            }
        };
        self.device.present();
        Ok(report)
    }

    fn toggle_idle_policy(&mut self) {
        let mut effect = self.renderer.effect();
        effect.idle = match effect.idle {
            IdlePolicy::Represent => IdlePolicy::Reblend,
            IdlePolicy::Reblend => IdlePolicy::Represent,
        };
        tracing::info!(idle = ?effect.idle, "idle policy changed");
        self.renderer.set_effect(&mut self.device, effect);
    }

    fn shutdown(&mut self) {
        self.renderer.shutdown(&mut self.device);
    }
}

fn is_quit_key(event: &KeyEvent) -> bool {
    match &event.logical_key {
        Key::Named(NamedKey::Escape) => true,
        Key::Character(value) => value.as_str() == "q",
        _ => false,
    }
}

fn is_toggle_key(event: &KeyEvent) -> bool {
    matches!(event.logical_key, Key::Named(NamedKey::Space))
        || matches!(event.logical_key, Key::Character(ref value) if value.as_str() == " ")
}

/// Opens the preview window and renders `frames` into it until the window closes.
///
/// Must be called on the main thread. Frames are returned to `recycler` as
/// soon as they are uploaded.
pub fn run_preview(
    config: PreviewConfig,
    frames: Arc<LatestFrame>,
    recycler: Arc<dyn FrameRecycler>,
) -> Result<()> {
    let event_loop = EventLoopBuilder::new()
        .build()
        .map_err(|err| anyhow!("failed to create event loop: {err}"))?;

    let window_size = PhysicalSize::new(config.surface_size.0, config.surface_size.1);
    let window = WindowBuilder::new()
        .with_title(config.title.as_str())
        .with_inner_size(window_size)
        .build(&event_loop)
        .map_err(|err| anyhow!("failed to create preview window: {err}"))?;
    let window = Arc::new(window);

    let size = window.inner_size();
    let device = WgpuDevice::new(window.as_ref(), size, config.vsync)
        .context("failed to initialise preview renderer")?;
    let mut renderer = TrailRenderer::new(config.sources.clone(), config.effect, frames, recycler);
    renderer.on_surface_resized(size.width, size.height);
    let mut state = PreviewState {
        renderer,
        device,
        window,
    };
    if let Err(err) = state.renderer.on_surface_created(&mut state.device) {
        state.shutdown();
        return Err(anyhow!(err).context("failed to build the trail pipeline"));
    }

    let mut target_fps = config.target_fps;
    if state.device.is_software() && target_fps.is_none() {
        target_fps = Some(SOFTWARE_FPS_CAP);
        tracing::warn!(
            cap = SOFTWARE_FPS_CAP,
            "software rasterizer detected; capping preview to {} FPS (override with --fps)",
            SOFTWARE_FPS_CAP
        );
    }
    let mut pacer = FramePacer::new(target_fps);
    let mut stats = FrameStats::new(Instant::now());
    if pacer.ready_for_frame(Instant::now()) {
        state.window().request_redraw();
    }

    let failure: Rc<RefCell<Option<anyhow::Error>>> = Rc::new(RefCell::new(None));
    let loop_failure = Rc::clone(&failure);
    let run_result = event_loop.run(move |event, elwt| match event {
        Event::WindowEvent { window_id, event } if window_id == state.window().id() => match event
        {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                elwt.exit();
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed && !event.repeat {
                    if is_quit_key(&event) {
                        elwt.exit();
                    } else if is_toggle_key(&event) {
                        state.toggle_idle_policy();
                    }
                }
            }
            WindowEvent::Resized(new_size) => {
                tracing::debug!(width = new_size.width, height = new_size.height, "window resized");
                state.resize(new_size);
            }
            WindowEvent::RedrawRequested => match state.render_frame() {
                Ok(report) => {
                    pacer.mark_rendered();
                    if let Some(rates) = stats.record(Instant::now(), report.captured) {
                        let handoff = state.renderer.frames().stats();
                        tracing::debug!(
                            fps = rates.fps,
                            capture_fps = rates.capture_fps,
                            dropped = handoff.dropped,
                            "render stats"
                        );
                    }
                }
                Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                    let size = state.device.size();
                    state.resize(size);
                }
                Err(wgpu::SurfaceError::OutOfMemory) => {
                    tracing::error!("surface out of memory; closing preview");
                    *loop_failure.borrow_mut() = Some(anyhow!("surface out of memory"));
                    elwt.exit();
                }
                Err(wgpu::SurfaceError::Timeout) => {
                    tracing::warn!("surface timeout; retrying next frame");
                }
                Err(other) => {
                    tracing::warn!("surface error: {other:?}; retrying next frame");
                }
            },
            _ => {}
        },
        Event::AboutToWait => {
            let now = Instant::now();
            if pacer.ready_for_frame(now) {
                state.window().request_redraw();
                elwt.set_control_flow(ControlFlow::Wait);
            } else if let Some(deadline) = pacer.next_deadline() {
                let ms = deadline.saturating_duration_since(now).as_millis();
                tracing::trace!(deadline_ms = ms, "pacer: waiting until next frame");
                elwt.set_control_flow(ControlFlow::WaitUntil(deadline));
            } else {
                elwt.set_control_flow(ControlFlow::Wait);
            }
        }
        Event::LoopExiting => {
            tracing::info!(frames = stats.total(), "preview closing");
            state.shutdown();
        }
        _ => {}
    });

    run_result.map_err(|err| anyhow!("window event loop error: {err}"))?;
    let failure = failure.borrow_mut().take();
    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
