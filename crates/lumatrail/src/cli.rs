use std::path::PathBuf;

use clap::Parser;
use trailconfig::{FrameSize, IdleMode, LayoutSetting, SourceKind};

#[derive(Parser, Debug)]
#[command(
    name = "lumatrail",
    author,
    version,
    about = "Camera preview with a decaying luminance trail"
)]
pub struct Args {
    /// Configuration file; defaults to `lumatrail.toml` in the config directory.
    #[arg(long, value_name = "PATH", env = "LUMATRAIL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Preview window size (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT")]
    pub size: Option<FrameSize>,

    /// Optional FPS cap for the preview (0=uncapped).
    #[arg(long, value_name = "FPS")]
    pub fps: Option<f32>,

    /// Disable vsync and present as soon as a frame is ready.
    #[arg(long)]
    pub no_vsync: bool,

    /// Frame source: `pattern` or `images`.
    #[arg(long, value_name = "SOURCE", value_parser = parse_source)]
    pub source: Option<SourceKind>,

    /// Directory of still images replayed as camera frames (implies `--source images`).
    #[arg(long, value_name = "DIR")]
    pub images: Option<PathBuf>,

    /// Camera frame size (e.g. `640x480`).
    #[arg(long, value_name = "WIDTHxHEIGHT")]
    pub capture_size: Option<FrameSize>,

    /// Camera buffer layout: `luma8` or `nv21`.
    #[arg(long, value_name = "LAYOUT", value_parser = parse_layout)]
    pub layout: Option<LayoutSetting>,

    /// Trail persistence between 0 (none) and 1 (frozen).
    #[arg(long, value_name = "DECAY")]
    pub decay: Option<f32>,

    /// Brightness multiplier for the displayed composite.
    #[arg(long, value_name = "GAIN")]
    pub gain: Option<f32>,

    /// What to show when no new frame arrived: `represent` or `reblend`.
    #[arg(long, value_name = "MODE", value_parser = parse_idle)]
    pub idle: Option<IdleMode>,

    /// Run N ticks against an in-memory device instead of opening a window.
    #[arg(long, value_name = "TICKS")]
    pub headless: Option<u32>,

    /// Vertex shader file replacing the built-in one.
    #[arg(long, value_name = "FILE")]
    pub vertex: Option<PathBuf>,

    /// Accumulation fragment shader file.
    #[arg(long, value_name = "FILE")]
    pub accumulation: Option<PathBuf>,

    /// Display fragment shader file.
    #[arg(long, value_name = "FILE")]
    pub display: Option<PathBuf>,
}

pub fn parse() -> Args {
    Args::parse()
}

fn parse_source(value: &str) -> Result<SourceKind, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "pattern" | "test" => Ok(SourceKind::Pattern),
        "images" | "image" => Ok(SourceKind::Images),
        other => Err(format!("unknown source '{other}'; expected pattern or images")),
    }
}

fn parse_layout(value: &str) -> Result<LayoutSetting, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "luma8" | "luma" | "gray" | "grey" => Ok(LayoutSetting::Luma8),
        "nv21" => Ok(LayoutSetting::Nv21),
        other => Err(format!("unknown layout '{other}'; expected luma8 or nv21")),
    }
}

fn parse_idle(value: &str) -> Result<IdleMode, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "represent" => Ok(IdleMode::Represent),
        "reblend" => Ok(IdleMode::Reblend),
        other => Err(format!("unknown idle mode '{other}'; expected represent or reblend")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sizes_and_modes() {
        let args = Args::try_parse_from([
            "lumatrail",
            "--size",
            "800x600",
            "--capture-size",
            "320X240",
            "--source",
            "images",
            "--layout",
            "NV21",
            "--idle",
            "reblend",
            "--headless",
            "12",
        ])
        .unwrap();
        assert_eq!(args.size, Some(FrameSize::new(800, 600)));
        assert_eq!(args.capture_size, Some(FrameSize::new(320, 240)));
        assert_eq!(args.source, Some(SourceKind::Images));
        assert_eq!(args.layout, Some(LayoutSetting::Nv21));
        assert_eq!(args.idle, Some(IdleMode::Reblend));
        assert_eq!(args.headless, Some(12));
    }

    #[test]
    fn rejects_malformed_sizes() {
        for size in ["1920", "0x100", "wide x tall"] {
            assert!(
                Args::try_parse_from(["lumatrail", "--size", size]).is_err(),
                "{size}"
            );
        }
    }

    #[test]
    fn rejects_unknown_modes() {
        assert!(Args::try_parse_from(["lumatrail", "--idle", "freeze"]).is_err());
        assert!(Args::try_parse_from(["lumatrail", "--source", "webcam"]).is_err());
        assert!(Args::try_parse_from(["lumatrail", "--layout", "yuyv"]).is_err());
    }

    #[test]
    fn everything_is_optional() {
        let args = Args::try_parse_from(["lumatrail"]).unwrap();
        assert!(args.size.is_none());
        assert!(args.headless.is_none());
        assert!(!args.no_vsync);
    }
}
