//! Single-slot exchange between the capture thread and the render loop.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// One camera frame: a tightly packed luma plane, possibly followed by
/// other planes the renderer ignores.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingFrame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl IncomingFrame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            pixels,
            width,
            height,
        }
    }

    /// Bytes the luma plane occupies.
    pub fn luma_len(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Takes consumed frame buffers back to wherever they came from.
pub trait FrameRecycler: Send + Sync {
    fn recycle(&self, buffer: Vec<u8>);
}

/// Recycler that simply frees the buffer.
#[derive(Clone, Copy, Debug, Default)]
pub struct DiscardRecycler;

impl FrameRecycler for DiscardRecycler {
    fn recycle(&self, _buffer: Vec<u8>) {}
}

/// Counters kept by [`LatestFrame`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HandoffStats {
    pub published: u64,
    pub consumed: u64,
    /// Frames overwritten before the renderer took them.
    pub dropped: u64,
}

/// Holds at most one pending frame; a newer frame replaces an unconsumed one.
///
/// This is deliberately not a queue: the renderer only ever wants the most
/// recent image.
#[derive(Debug, Default)]
pub struct LatestFrame {
    slot: Mutex<Option<IncomingFrame>>,
    published: AtomicU64,
    consumed: AtomicU64,
    dropped: AtomicU64,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `frame`, returning the frame it displaced so its buffer can be recycled.
    pub fn publish(&self, frame: IncomingFrame) -> Option<IncomingFrame> {
        let displaced = self.slot.lock().replace(frame);
        self.published.fetch_add(1, Ordering::Relaxed);
        if displaced.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        displaced
    }

    /// Empties the slot.
    pub fn take(&self) -> Option<IncomingFrame> {
        let frame = self.slot.lock().take();
        if frame.is_some() {
            self.consumed.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    pub fn is_pending(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub fn stats(&self) -> HandoffStats {
        HandoffStats {
            published: self.published.load(Ordering::Relaxed),
            consumed: self.consumed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn frame(tag: u8) -> IncomingFrame {
        IncomingFrame::new(vec![tag; 4], 2, 2)
    }

    #[test]
    fn newer_frame_displaces_pending_one() {
        let latest = LatestFrame::new();
        assert!(latest.publish(frame(1)).is_none());
        let displaced = latest.publish(frame(2)).expect("first frame displaced");
        assert_eq!(displaced.pixels[0], 1);

        let taken = latest.take().expect("pending frame");
        assert_eq!(taken.pixels[0], 2);
        assert!(latest.take().is_none());
        assert_eq!(
            latest.stats(),
            HandoffStats {
                published: 2,
                consumed: 1,
                dropped: 1
            }
        );
    }

    #[test]
    fn concurrent_publishers_never_lose_the_slot() {
        let latest = Arc::new(LatestFrame::new());
        let handles: Vec<_> = (0..4u8)
            .map(|tag| {
                let latest = Arc::clone(&latest);
                thread::spawn(move || {
                    for _ in 0..100 {
                        latest.publish(frame(tag));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = latest.stats();
        assert_eq!(stats.published, 400);
        assert_eq!(stats.dropped, 399);
        assert!(latest.take().is_some());
    }
}
