use rand::prelude::*;
use renderer::IncomingFrame;

use crate::capture::FrameProducer;
use crate::error::{CameraError, CameraResult};
use crate::layout::PixelLayout;
use crate::pool::FramePool;

const BAR_WIDTH: u32 = 24;
const BRIGHT: u8 = 210;
const DARK: u8 = 40;
const NEUTRAL_CHROMA: u8 = 128;

/// Synthetic camera: vertical bars sliding sideways, with a bright square
/// bouncing across them and per-pixel sensor noise.
///
/// With [`switch_every`](Self::switch_every) the output size cycles through
/// the configured sizes, which exercises the renderer's resize path.
#[derive(Debug)]
pub struct TestPattern {
    sizes: Vec<(u32, u32)>,
    layout: PixelLayout,
    switch_every: Option<u32>,
    noise: u8,
    frame_index: u64,
    rng: StdRng,
}

impl TestPattern {
    pub fn new(width: u32, height: u32, layout: PixelLayout) -> CameraResult<Self> {
        if width == 0 || height == 0 {
            return Err(CameraError::EmptyFrame { width, height });
        }
        Ok(Self {
            sizes: vec![(width, height)],
            layout,
            switch_every: None,
            noise: 12,
            frame_index: 0,
            rng: StdRng::from_entropy(),
        })
    }

    /// Cycles to the next size in `sizes` every `frames` frames.
    pub fn switch_every(mut self, frames: u32, extra_sizes: &[(u32, u32)]) -> CameraResult<Self> {
        if let Some(&(width, height)) = extra_sizes.iter().find(|(w, h)| *w == 0 || *h == 0) {
            return Err(CameraError::EmptyFrame { width, height });
        }
        self.sizes.extend_from_slice(extra_sizes);
        self.switch_every = (frames > 0).then_some(frames);
        Ok(self)
    }

    pub fn with_noise(mut self, noise: u8) -> Self {
        self.noise = noise;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Size of the next frame.
    pub fn current_size(&self) -> (u32, u32) {
        let slot = match self.switch_every {
            Some(every) => (self.frame_index / u64::from(every)) as usize % self.sizes.len(),
            None => 0,
        };
        self.sizes[slot]
    }

    fn render(&mut self, pixels: &mut [u8], width: u32, height: u32) {
        let t = self.frame_index as u32;
        let offset = t.wrapping_mul(3);
        let square = (width.min(height) / 6).max(1);
        let span_x = width.saturating_sub(square).max(1);
        let span_y = height.saturating_sub(square).max(1);
        let square_x = bounce(t.wrapping_mul(5), span_x);
        let square_y = bounce(t.wrapping_mul(3), span_y);

        let luma = &mut pixels[..PixelLayout::luma_len(width, height)];
        for (index, pixel) in luma.iter_mut().enumerate() {
            let x = index as u32 % width;
            let y = index as u32 / width;
            let in_square = (square_x..square_x + square).contains(&x)
                && (square_y..square_y + square).contains(&y);
            let base = if in_square {
                255
            } else if (x.wrapping_add(offset) / BAR_WIDTH) % 2 == 0 {
                BRIGHT
            } else {
                DARK
            };
            let noise = if self.noise > 0 {
                self.rng.gen_range(0..=self.noise)
            } else {
                0
            };
            *pixel = base.saturating_sub(noise);
        }

        let chroma_start = PixelLayout::luma_len(width, height);
        pixels[chroma_start..].fill(NEUTRAL_CHROMA);
    }
}

/// Triangle wave over `0..span`.
fn bounce(step: u32, span: u32) -> u32 {
    let period = span * 2;
    let phase = step % period;
    if phase < span {
        phase
    } else {
        period - phase
    }
}

impl FrameProducer for TestPattern {
    fn next_frame(&mut self, pool: &FramePool) -> CameraResult<IncomingFrame> {
        let (width, height) = self.current_size();
        let mut pixels = pool.acquire(self.layout.buffer_len(width, height));
        self.render(&mut pixels, width, height);
        self.frame_index += 1;
        Ok(IncomingFrame::new(pixels, width, height))
    }

    fn describe(&self) -> String {
        let (width, height) = self.sizes[0];
        format!("test pattern {width}x{height} {}", self.layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_layout_sized_buffers() {
        let pool = FramePool::new(2);
        let mut pattern = TestPattern::new(64, 48, PixelLayout::Nv21)
            .unwrap()
            .with_seed(1);
        let frame = pattern.next_frame(&pool).unwrap();
        assert_eq!((frame.width, frame.height), (64, 48));
        assert_eq!(frame.pixels.len(), 64 * 48 * 3 / 2);
        assert!(frame.pixels[64 * 48..]
            .iter()
            .all(|&byte| byte == NEUTRAL_CHROMA));
    }

    #[test]
    fn frames_move_over_time() {
        let pool = FramePool::new(2);
        let mut pattern = TestPattern::new(64, 48, PixelLayout::Luma8)
            .unwrap()
            .with_noise(0);
        let first = pattern.next_frame(&pool).unwrap();
        let second = pattern.next_frame(&pool).unwrap();
        assert_ne!(first.pixels, second.pixels);
    }

    #[test]
    fn seeded_patterns_are_reproducible() {
        let pool = FramePool::new(2);
        let mut a = TestPattern::new(16, 16, PixelLayout::Luma8).unwrap().with_seed(7);
        let mut b = TestPattern::new(16, 16, PixelLayout::Luma8).unwrap().with_seed(7);
        assert_eq!(
            a.next_frame(&pool).unwrap().pixels,
            b.next_frame(&pool).unwrap().pixels
        );
    }

    #[test]
    fn switches_between_sizes() {
        let pool = FramePool::new(2);
        let mut pattern = TestPattern::new(64, 48, PixelLayout::Luma8)
            .unwrap()
            .switch_every(2, &[(32, 24)])
            .unwrap();
        let sizes: Vec<(u32, u32)> = (0..6)
            .map(|_| {
                let frame = pattern.next_frame(&pool).unwrap();
                (frame.width, frame.height)
            })
            .collect();
        assert_eq!(
            sizes,
            vec![(64, 48), (64, 48), (32, 24), (32, 24), (64, 48), (64, 48)]
        );
    }

    #[test]
    fn rejects_empty_sizes() {
        assert!(TestPattern::new(0, 10, PixelLayout::Luma8).is_err());
        assert!(TestPattern::new(4, 4, PixelLayout::Luma8)
            .unwrap()
            .switch_every(1, &[(4, 0)])
            .is_err());
    }

    #[test]
    fn bounce_stays_in_range() {
        assert_eq!(bounce(0, 10), 0);
        assert_eq!(bounce(10, 10), 10);
        assert_eq!(bounce(15, 10), 5);
        assert_eq!(bounce(20, 10), 0);
    }
}
