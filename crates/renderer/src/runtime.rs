use std::time::{Duration, Instant};

/// Decides when the preview window should render its next frame.
///
/// Without a target FPS every `AboutToWait` asks for a redraw and the
/// surface's present mode does the pacing.
#[derive(Debug, Clone)]
pub struct FramePacer {
    interval: Option<Duration>,
    last_render: Option<Instant>,
}

fn normalize_fps(value: Option<f32>) -> Option<f32> {
    value.filter(|fps| fps.is_finite() && *fps > 0.0)
}

impl FramePacer {
    pub fn new(target_fps: Option<f32>) -> Self {
        Self {
            interval: normalize_fps(target_fps)
                .and_then(|fps| Duration::try_from_secs_f32(fps.recip()).ok()),
            last_render: None,
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub fn ready_for_frame(&self, now: Instant) -> bool {
        match (self.interval, self.last_render) {
            (Some(interval), Some(last)) => now.saturating_duration_since(last) >= interval,
            _ => true,
        }
    }

    pub fn mark_rendered(&mut self) {
        self.mark_rendered_at(Instant::now());
    }

    pub fn mark_rendered_at(&mut self, now: Instant) {
        self.last_render = Some(now);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        Some(self.last_render? + self.interval?)
    }

    pub fn reset(&mut self) {
        self.last_render = None;
    }
}

/// Frame counter that reports a rate roughly once per second.
#[derive(Debug)]
pub struct FrameStats {
    window_start: Instant,
    frames: u32,
    captured: u32,
    total: u64,
}

/// Rates over one reporting window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRates {
    pub fps: f32,
    pub capture_fps: f32,
}

const REPORT_WINDOW: Duration = Duration::from_secs(1);

impl FrameStats {
    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            frames: 0,
            captured: 0,
            total: 0,
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Counts one rendered frame; returns the rates when a window closes.
    pub fn record(&mut self, now: Instant, captured: bool) -> Option<FrameRates> {
        self.frames += 1;
        self.total += 1;
        if captured {
            self.captured += 1;
        }
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < REPORT_WINDOW {
            return None;
        }
        let seconds = elapsed.as_secs_f32();
        let rates = FrameRates {
            fps: self.frames as f32 / seconds,
            capture_fps: self.captured as f32 / seconds,
        };
        self.window_start = now;
        self.frames = 0;
        self.captured = 0;
        Some(rates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpaced_is_always_ready() {
        let mut pacer = FramePacer::new(None);
        let now = Instant::now();
        assert!(pacer.ready_for_frame(now));
        pacer.mark_rendered_at(now);
        assert!(pacer.ready_for_frame(now));
        assert_eq!(pacer.next_deadline(), None);
    }

    #[test]
    fn non_positive_fps_disables_pacing() {
        assert_eq!(FramePacer::new(Some(0.0)).interval(), None);
        assert_eq!(FramePacer::new(Some(-5.0)).interval(), None);
        assert_eq!(FramePacer::new(Some(f32::NAN)).interval(), None);
    }

    #[test]
    fn vanishing_fps_disables_pacing() {
        assert_eq!(FramePacer::new(Some(1e-40)).interval(), None);
        assert_eq!(FramePacer::new(Some(1e-25)).interval(), None);
        assert!(FramePacer::new(Some(f32::MIN_POSITIVE)).ready_for_frame(Instant::now()));
    }

    #[test]
    fn paced_waits_for_the_interval() {
        let mut pacer = FramePacer::new(Some(10.0));
        let start = Instant::now();
        assert!(pacer.ready_for_frame(start));
        pacer.mark_rendered_at(start);

        assert!(!pacer.ready_for_frame(start + Duration::from_millis(50)));
        let deadline = pacer.next_deadline().unwrap();
        assert!(deadline > start);
        assert!(pacer.ready_for_frame(deadline));

        pacer.reset();
        assert!(pacer.ready_for_frame(start));
    }

    #[test]
    fn stats_report_once_per_window() {
        let start = Instant::now();
        let mut stats = FrameStats::new(start);
        for i in 1..10 {
            let at = start + Duration::from_millis(i * 100);
            assert_eq!(stats.record(at, i % 3 == 0), None);
        }
        let rates = stats
            .record(start + Duration::from_secs(1), true)
            .expect("window closed");
        assert!((rates.fps - 10.0).abs() < 1e-3);
        assert!((rates.capture_fps - 4.0).abs() < 1e-3);
        assert_eq!(stats.total(), 10);
        assert_eq!(stats.record(start + Duration::from_millis(1100), false), None);
    }
}
