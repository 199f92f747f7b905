use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use renderer::IncomingFrame;

use crate::capture::FrameProducer;
use crate::error::{CameraError, CameraResult};
use crate::layout::PixelLayout;
use crate::pool::FramePool;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif"];

struct LumaImage {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
}

/// Replays a directory of still images as camera frames, in file-name order.
///
/// Images are decoded to luma once, up front. Each keeps its own size unless
/// a fixed size is requested, so a mixed directory also exercises resizing.
pub struct ImageSequence {
    directory: PathBuf,
    images: Vec<LumaImage>,
    layout: PixelLayout,
    next: usize,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

impl ImageSequence {
    pub fn open(
        directory: &Path,
        layout: PixelLayout,
        size: Option<(u32, u32)>,
    ) -> CameraResult<Self> {
        let entries = fs::read_dir(directory).map_err(|source| CameraError::Io {
            path: directory.to_path_buf(),
            source,
        })?;
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| CameraError::Io {
                path: directory.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path.is_file() && is_image(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut images = Vec::with_capacity(paths.len());
        for path in paths {
            let decoded = image::open(&path).map_err(|source| CameraError::Decode {
                path: path.clone(),
                source,
            })?;
            let mut luma = decoded.to_luma8();
            if let Some((width, height)) = size {
                if luma.dimensions() != (width, height) {
                    luma = imageops::resize(&luma, width, height, FilterType::Triangle);
                }
            }
            let (width, height) = luma.dimensions();
            if width == 0 || height == 0 {
                tracing::warn!(path = %path.display(), "skipping empty image");
                continue;
            }
            tracing::debug!(path = %path.display(), width, height, "loaded frame image");
            images.push(LumaImage {
                pixels: luma.into_raw(),
                width,
                height,
            });
        }

        if images.is_empty() {
            return Err(CameraError::NoImages(directory.to_path_buf()));
        }
        Ok(Self {
            directory: directory.to_path_buf(),
            images,
            layout,
            next: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl FrameProducer for ImageSequence {
    fn next_frame(&mut self, pool: &FramePool) -> CameraResult<IncomingFrame> {
        let image = &self.images[self.next];
        self.next = (self.next + 1) % self.images.len();

        let mut pixels = pool.acquire(self.layout.buffer_len(image.width, image.height));
        let luma_len = image.pixels.len();
        pixels[..luma_len].copy_from_slice(&image.pixels);
        pixels[luma_len..].fill(128);
        Ok(IncomingFrame::new(pixels, image.width, image.height))
    }

    fn describe(&self) -> String {
        format!(
            "{} images from {} ({})",
            self.images.len(),
            self.directory.display(),
            self.layout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    #[test]
    fn cycles_through_images_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        GrayImage::from_pixel(4, 2, Luma([200]))
            .save(dir.path().join("b.png"))
            .unwrap();
        GrayImage::from_pixel(2, 2, Luma([10]))
            .save(dir.path().join("a.png"))
            .unwrap();
        fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

        let pool = FramePool::new(2);
        let mut sequence = ImageSequence::open(dir.path(), PixelLayout::Luma8, None).unwrap();
        assert_eq!(sequence.len(), 2);

        let first = sequence.next_frame(&pool).unwrap();
        assert_eq!((first.width, first.height), (2, 2));
        assert_eq!(first.pixels, vec![10; 4]);
        let second = sequence.next_frame(&pool).unwrap();
        assert_eq!((second.width, second.height), (4, 2));
        let third = sequence.next_frame(&pool).unwrap();
        assert_eq!((third.width, third.height), (2, 2));
    }

    #[test]
    fn color_images_become_luma_at_the_requested_size() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::from_pixel(8, 8, Rgb([255, 255, 255]))
            .save(dir.path().join("white.png"))
            .unwrap();

        let pool = FramePool::new(1);
        let mut sequence =
            ImageSequence::open(dir.path(), PixelLayout::Nv21, Some((4, 2))).unwrap();
        let frame = sequence.next_frame(&pool).unwrap();
        assert_eq!((frame.width, frame.height), (4, 2));
        assert_eq!(frame.pixels.len(), 12);
        assert!(frame.pixels[..8].iter().all(|&v| v == 255));
        assert!(frame.pixels[8..].iter().all(|&v| v == 128));
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageSequence::open(dir.path(), PixelLayout::Luma8, None),
            Err(CameraError::NoImages(_))
        ));
    }
}
