use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use renderer::FrameRecycler;

/// Bounded set of reusable frame buffers.
///
/// Producers [`acquire`](Self::acquire) a buffer per frame and the renderer
/// hands it back through [`FrameRecycler`] once uploaded. When more buffers
/// are returned than the pool holds, the extras are freed.
#[derive(Debug)]
pub struct FramePool {
    sender: Sender<Vec<u8>>,
    receiver: Receiver<Vec<u8>>,
    allocated: AtomicUsize,
}

impl FramePool {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self {
            sender,
            receiver,
            allocated: AtomicUsize::new(0),
        }
    }

    /// Returns a zeroed buffer of exactly `len` bytes, reusing an idle one if possible.
    pub fn acquire(&self, len: usize) -> Vec<u8> {
        match self.receiver.try_recv() {
            Ok(mut buffer) => {
                buffer.clear();
                buffer.resize(len, 0);
                buffer
            }
            Err(_) => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                vec![0; len]
            }
        }
    }

    /// Buffers waiting to be reused.
    pub fn idle(&self) -> usize {
        self.receiver.len()
    }

    /// Buffers allocated because none was idle.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}

impl FrameRecycler for FramePool {
    fn recycle(&self, buffer: Vec<u8>) {
        match self.sender.try_send(buffer) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => tracing::trace!("frame pool full; freeing buffer"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recycled_buffers_are_reused() {
        let pool = FramePool::new(2);
        let mut buffer = pool.acquire(16);
        buffer[0] = 7;
        pool.recycle(buffer);
        assert_eq!(pool.idle(), 1);

        let reused = pool.acquire(8);
        assert_eq!(reused, vec![0; 8]);
        assert_eq!(pool.allocated(), 1);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn extra_buffers_are_freed() {
        let pool = FramePool::new(1);
        pool.recycle(vec![1; 4]);
        pool.recycle(vec![2; 4]);
        assert_eq!(pool.idle(), 1);
        assert_eq!(pool.acquire(4), vec![0; 4]);
        assert_eq!(pool.allocated(), 0);
    }

    #[test]
    fn growing_a_recycled_buffer_zero_fills() {
        let pool = FramePool::new(1);
        pool.recycle(vec![9; 2]);
        assert_eq!(pool.acquire(6), vec![0; 6]);
    }
}
