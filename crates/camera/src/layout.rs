use std::fmt;
use std::str::FromStr;

use crate::error::CameraError;

/// Byte layout of the buffers a frame source hands out.
///
/// Both layouts start with a tightly packed luma plane, which is all the
/// renderer reads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PixelLayout {
    #[default]
    Luma8,
    /// Luma plane followed by interleaved V/U at quarter resolution.
    Nv21,
}

impl PixelLayout {
    pub fn bits_per_pixel(self) -> usize {
        match self {
            PixelLayout::Luma8 => 8,
            PixelLayout::Nv21 => 12,
        }
    }

    /// Size of a whole `width`x`height` buffer in this layout.
    pub fn buffer_len(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        (pixels * self.bits_per_pixel()).div_ceil(8)
    }

    pub fn luma_len(width: u32, height: u32) -> usize {
        width as usize * height as usize
    }
}

impl fmt::Display for PixelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelLayout::Luma8 => f.write_str("luma8"),
            PixelLayout::Nv21 => f.write_str("nv21"),
        }
    }
}

impl FromStr for PixelLayout {
    type Err = CameraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "luma8" | "luma" | "gray" | "grey" => Ok(PixelLayout::Luma8),
            "nv21" => Ok(PixelLayout::Nv21),
            other => Err(CameraError::UnknownLayout(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_sizes_follow_bits_per_pixel() {
        assert_eq!(PixelLayout::Luma8.buffer_len(640, 480), 640 * 480);
        assert_eq!(PixelLayout::Nv21.buffer_len(640, 480), 640 * 480 * 3 / 2);
        assert_eq!(PixelLayout::Nv21.buffer_len(3, 3), 14);
        assert!(PixelLayout::Nv21.buffer_len(3, 3) >= PixelLayout::luma_len(3, 3));
    }

    #[test]
    fn parses_names() {
        assert_eq!("NV21".parse::<PixelLayout>().unwrap(), PixelLayout::Nv21);
        assert_eq!(" gray ".parse::<PixelLayout>().unwrap(), PixelLayout::Luma8);
        assert!(matches!(
            "yuyv".parse::<PixelLayout>(),
            Err(CameraError::UnknownLayout(name)) if name == "yuyv"
        ));
        assert_eq!(PixelLayout::Nv21.to_string(), "nv21");
    }
}
