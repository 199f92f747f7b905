use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use camera::{CaptureThread, FramePool, FrameProducer};
use renderer::{FrameRecycler, HeadlessDevice, LatestFrame, ShaderSources, TrailRenderer};
use tracing_subscriber::EnvFilter;
use trailconfig::TrailConfig;

use crate::bootstrap::{
    build_producer, effect_settings, load_config, load_shader_sources, preview_config,
};
use crate::cli::Args;
use crate::paths::AppPaths;

/// Display rate assumed by `--headless` when no FPS cap is configured.
const HEADLESS_DEFAULT_FPS: f32 = 60.0;

pub fn run(args: Args) -> Result<()> {
    initialise_tracing();

    let paths = AppPaths::discover()?;
    tracing::debug!(config = %paths.config_dir().display(), "resolved lumatrail paths");

    let config = load_config(&args, &paths)?;
    let sources = load_shader_sources(&config.shaders)?;
    let producer = build_producer(&config.capture)?;
    tracing::info!(
        source = %producer.describe(),
        decay = config.effect.decay,
        gain = config.effect.gain,
        idle = ?config.effect.idle,
        "bootstrapping lumatrail"
    );

    let frames = Arc::new(LatestFrame::new());
    let pool = Arc::new(FramePool::new(config.capture.pool));
    match args.headless {
        Some(ticks) => run_headless(&config, sources, producer, frames, pool, ticks),
        None => run_window(&config, sources, producer, frames, pool),
    }
}

fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run_window(
    config: &TrailConfig,
    sources: ShaderSources,
    producer: Box<dyn FrameProducer>,
    frames: Arc<LatestFrame>,
    pool: Arc<FramePool>,
) -> Result<()> {
    let capture = CaptureThread::spawn(
        producer,
        config.capture.interval,
        Arc::clone(&frames),
        Arc::clone(&pool),
    )?;

    let recycler: Arc<dyn FrameRecycler> = pool.clone();
    let preview = renderer::run_preview(preview_config(config, sources), frames, recycler);

    let captured = capture.stop();
    tracing::info!(
        allocated = pool.allocated(),
        idle = pool.idle(),
        "frame pool drained"
    );
    preview?;
    let produced = captured.context("capture thread failed")?;
    tracing::info!(produced, "lumatrail exited");
    Ok(())
}

/// Drives the pipeline against [`HeadlessDevice`] for `ticks` display frames.
///
/// Capture is simulated on the same thread: each tick advances a capture
/// clock by one display period and publishes a frame whenever it passes the
/// capture interval, so a slow camera leaves idle ticks and a fast one
/// overwrites unconsumed frames.
fn run_headless(
    config: &TrailConfig,
    sources: ShaderSources,
    mut producer: Box<dyn FrameProducer>,
    frames: Arc<LatestFrame>,
    pool: Arc<FramePool>,
    ticks: u32,
) -> Result<()> {
    let mut device = HeadlessDevice::new();
    let recycler: Arc<dyn FrameRecycler> = pool.clone();
    let mut renderer = TrailRenderer::new(
        sources,
        effect_settings(&config.effect),
        Arc::clone(&frames),
        recycler,
    );
    let (width, height) = config.display.size.as_tuple();
    renderer.on_surface_resized(width, height);
    renderer
        .on_surface_created(&mut device)
        .context("failed to build the trail pipeline")?;

    let period = config
        .frame_period()
        .unwrap_or_else(|| Duration::from_secs_f32(HEADLESS_DEFAULT_FPS.recip()));
    let interval = config.capture.interval;
    let mut capture_clock = Duration::ZERO;
    let mut totals = [0u32; 3];

    for tick in 0..ticks {
        capture_clock += period;
        while capture_clock >= interval {
            capture_clock -= interval;
            let frame = producer
                .next_frame(&pool)
                .with_context(|| format!("{} failed", producer.describe()))?;
            if let Some(displaced) = frames.publish(frame) {
                pool.recycle(displaced.pixels);
            }
        }

        let report = match renderer.on_frame_tick(&mut device) {
            Ok(report) => report,
            Err(err) => {
                renderer.shutdown(&mut device);
                return Err(anyhow::Error::new(err).context(format!("tick {tick} failed")));
            }
        };
        tracing::debug!(
            tick,
            captured = report.captured,
            accumulated = report.accumulated,
            presented = report.presented,
            "headless tick"
        );
        for (total, hit) in totals
            .iter_mut()
            .zip([report.captured, report.accumulated, report.presented])
        {
            *total += u32::from(hit);
        }
    }

    let stats = frames.stats();
    let [captured, accumulated, presented] = totals;
    tracing::info!(
        ticks,
        captured,
        accumulated,
        presented,
        published = stats.published,
        dropped = stats.dropped,
        draws = device.draws().len(),
        uploads = device.upload_count(),
        "headless run complete"
    );
    for error in device.errors() {
        tracing::warn!(%error, "device reported misuse");
    }

    renderer.shutdown(&mut device);
    let live = device.live_objects();
    if live.total() > 0 {
        tracing::warn!(?live, "GPU objects outlived the pipeline");
    }
    Ok(())
}
