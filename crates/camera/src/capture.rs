use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use renderer::{FrameRecycler, IncomingFrame, LatestFrame};

use crate::error::CameraResult;
use crate::pool::FramePool;

/// Something that can produce camera frames on demand.
pub trait FrameProducer: Send {
    /// Fills a buffer taken from `pool` with the next frame.
    fn next_frame(&mut self, pool: &FramePool) -> CameraResult<IncomingFrame>;

    /// Short human-readable name for logs.
    fn describe(&self) -> String;
}

impl<P: FrameProducer + ?Sized> FrameProducer for Box<P> {
    fn next_frame(&mut self, pool: &FramePool) -> CameraResult<IncomingFrame> {
        (**self).next_frame(pool)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Runs a [`FrameProducer`] on its own thread, publishing into a [`LatestFrame`].
///
/// Frames displaced before the renderer took them go straight back to the
/// pool. The thread stops on [`stop`](Self::stop) or drop.
pub struct CaptureThread {
    stop_tx: Sender<()>,
    join_handle: Option<JoinHandle<Result<u64>>>,
}

impl CaptureThread {
    pub fn spawn<P>(
        mut producer: P,
        interval: Duration,
        frames: Arc<LatestFrame>,
        pool: Arc<FramePool>,
    ) -> Result<Self>
    where
        P: FrameProducer + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("lumatrail-capture".into())
            .spawn(move || -> Result<u64> {
                let source = producer.describe();
                tracing::info!(%source, interval_ms = interval.as_millis() as u64, "capture started");
                let mut produced = 0u64;
                let mut next = Instant::now();
                loop {
                    let wait = next.saturating_duration_since(Instant::now());
                    match stop_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    let frame = match producer.next_frame(&pool) {
                        Ok(frame) => frame,
                        Err(err) => {
                            tracing::error!(%source, error = %err, "capture failed");
                            return Err(anyhow!("{source}: {err}"));
                        }
                    };
                    if let Some(displaced) = frames.publish(frame) {
                        pool.recycle(displaced.pixels);
                    }
                    produced += 1;

                    next += interval;
                    let now = Instant::now();
                    if next < now {
                        // Fell behind; don't try to catch up with a burst.
                        next = now;
                    }
                }
                tracing::info!(%source, produced, "capture stopped");
                Ok(produced)
            })
            .map_err(|err| anyhow!("failed to spawn capture thread: {err}"))?;

        Ok(Self {
            stop_tx,
            join_handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.join_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stops the thread and returns how many frames it published.
    pub fn stop(mut self) -> Result<u64> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<u64> {
        let Some(handle) = self.join_handle.take() else {
            return Ok(0);
        };
        let _ = self.stop_tx.try_send(());
        handle
            .join()
            .map_err(|err| anyhow!("capture thread panicked: {err:?}"))?
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::warn!(error = %err, "capture thread ended with an error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CameraError;

    struct Counter {
        next: u8,
    }

    impl FrameProducer for Counter {
        fn next_frame(&mut self, pool: &FramePool) -> CameraResult<IncomingFrame> {
            let mut pixels = pool.acquire(4);
            pixels.fill(self.next);
            self.next = self.next.wrapping_add(1);
            Ok(IncomingFrame::new(pixels, 2, 2))
        }

        fn describe(&self) -> String {
            "counter".into()
        }
    }

    struct Broken;

    impl FrameProducer for Broken {
        fn next_frame(&mut self, _pool: &FramePool) -> CameraResult<IncomingFrame> {
            Err(CameraError::EmptyFrame {
                width: 0,
                height: 0,
            })
        }

        fn describe(&self) -> String {
            "broken".into()
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn publishes_until_stopped() {
        let frames = Arc::new(LatestFrame::new());
        let pool = Arc::new(FramePool::new(4));
        let capture = CaptureThread::spawn(
            Counter { next: 0 },
            Duration::from_millis(1),
            Arc::clone(&frames),
            Arc::clone(&pool),
        )
        .unwrap();

        wait_for(|| frames.stats().published >= 3);
        let produced = capture.stop().unwrap();
        let stats = frames.stats();
        assert_eq!(stats.published, produced);
        assert_eq!(stats.dropped, produced - 1);
        assert!(frames.take().is_some());
        assert!(pool.idle() >= 1);
    }

    #[test]
    fn producer_errors_end_the_thread() {
        let capture = CaptureThread::spawn(
            Broken,
            Duration::from_millis(1),
            Arc::new(LatestFrame::new()),
            Arc::new(FramePool::new(1)),
        )
        .unwrap();
        wait_for(|| !capture.is_running());
        let err = capture.stop().expect_err("producer failed");
        assert!(err.to_string().contains("broken"), "{err}");
    }
}
