use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("unknown pixel layout '{0}' (expected luma8 or nv21)")]
    UnknownLayout(String),
    #[error("frame size {width}x{height} is empty")]
    EmptyFrame { width: u32, height: u32 },
    #[error("no decodable images in {0}")]
    NoImages(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

pub type CameraResult<T> = Result<T, CameraError>;
