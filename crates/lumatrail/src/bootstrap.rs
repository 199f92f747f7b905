use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use camera::{FrameProducer, ImageSequence, PixelLayout, TestPattern};
use renderer::{EffectSettings, IdlePolicy, PreviewConfig, ShaderSources};
use trailconfig::{
    CaptureConfig, EffectConfig, IdleMode, LayoutSetting, ShaderPaths, SourceKind, TrailConfig,
};

use crate::cli::Args;
use crate::paths::AppPaths;

/// Loads the configuration file and layers the command-line flags over it.
///
/// An explicit `--config` must exist; the default location may be absent.
pub fn load_config(args: &Args, paths: &AppPaths) -> Result<TrailConfig> {
    let (mut config, base) = match args.config.as_ref() {
        Some(path) => {
            let config = TrailConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?;
            tracing::info!(path = %path.display(), "loaded configuration");
            (config, parent_dir(path))
        }
        None => {
            let path = paths.config_file();
            let config = TrailConfig::load_or_default(&path)
                .with_context(|| format!("failed to load config {}", path.display()))?;
            tracing::debug!(path = %path.display(), "resolved configuration");
            (config, paths.config_dir().to_path_buf())
        }
    };
    rebase_paths(&mut config, &base);
    apply_overrides(&mut config, args);
    config
        .validate()
        .context("command-line overrides produced an invalid configuration")?;
    Ok(config)
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Paths written in a config file are relative to that file.
fn rebase_paths(config: &mut TrailConfig, base: &Path) {
    let rebase = |slot: &mut Option<PathBuf>| {
        if let Some(path) = slot.as_mut() {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    };
    rebase(&mut config.capture.images);
    rebase(&mut config.shaders.vertex);
    rebase(&mut config.shaders.accumulation);
    rebase(&mut config.shaders.display);
}

pub fn apply_overrides(config: &mut TrailConfig, args: &Args) {
    if let Some(size) = args.size {
        config.display.size = size;
    }
    if let Some(fps) = args.fps {
        config.display.fps = Some(fps);
    }
    if args.no_vsync {
        config.display.vsync = false;
    }

    if let Some(source) = args.source {
        config.capture.source = source;
    }
    if let Some(images) = args.images.as_ref() {
        config.capture.images = Some(images.clone());
        if args.source.is_none() {
            config.capture.source = SourceKind::Images;
        }
    }
    if let Some(size) = args.capture_size {
        config.capture.size = size;
    }
    if let Some(layout) = args.layout {
        config.capture.layout = layout;
    }

    if let Some(decay) = args.decay {
        config.effect.decay = decay;
    }
    if let Some(gain) = args.gain {
        config.effect.gain = gain;
    }
    if let Some(idle) = args.idle {
        config.effect.idle = idle;
    }

    let shaders = &mut config.shaders;
    for (flag, slot) in [
        (&args.vertex, &mut shaders.vertex),
        (&args.accumulation, &mut shaders.accumulation),
        (&args.display, &mut shaders.display),
    ] {
        if let Some(path) = flag {
            *slot = Some(path.clone());
        }
    }
}

/// Built-in stages, each replaced by its file when one is configured.
pub fn load_shader_sources(paths: &ShaderPaths) -> Result<ShaderSources> {
    let mut sources = ShaderSources::builtin();
    for (stage, path, slot) in [
        ("vertex", &paths.vertex, &mut sources.vertex),
        ("accumulation", &paths.accumulation, &mut sources.accumulation),
        ("display", &paths.display, &mut sources.display),
    ] {
        if let Some(path) = path {
            *slot = fs::read_to_string(path).with_context(|| {
                format!("failed to read {stage} shader {}", path.display())
            })?;
            tracing::info!(stage, path = %path.display(), "using shader override");
        }
    }
    Ok(sources)
}

pub fn effect_settings(effect: &EffectConfig) -> EffectSettings {
    EffectSettings {
        decay: effect.decay,
        gain: effect.gain,
        idle: match effect.idle {
            IdleMode::Represent => IdlePolicy::Represent,
            IdleMode::Reblend => IdlePolicy::Reblend,
        },
    }
}

pub fn pixel_layout(layout: LayoutSetting) -> PixelLayout {
    match layout {
        LayoutSetting::Luma8 => PixelLayout::Luma8,
        LayoutSetting::Nv21 => PixelLayout::Nv21,
    }
}

pub fn build_producer(capture: &CaptureConfig) -> Result<Box<dyn FrameProducer>> {
    let layout = pixel_layout(capture.layout);
    match capture.source {
        SourceKind::Pattern => {
            let (width, height) = capture.size.as_tuple();
            let extra: Vec<(u32, u32)> = capture
                .switch_sizes
                .iter()
                .map(|size| size.as_tuple())
                .collect();
            let pattern = TestPattern::new(width, height, layout)
                .context("invalid test pattern size")?
                .switch_every(capture.switch_every, &extra)
                .context("invalid test pattern switch sizes")?
                .with_noise(capture.noise);
            Ok(Box::new(pattern))
        }
        SourceKind::Images => {
            let directory = capture
                .images
                .as_deref()
                .context("image source selected without an image directory")?;
            let sequence = ImageSequence::open(directory, layout, Some(capture.size.as_tuple()))
                .with_context(|| format!("failed to load images from {}", directory.display()))?;
            Ok(Box::new(sequence))
        }
    }
}

pub fn preview_config(config: &TrailConfig, sources: ShaderSources) -> PreviewConfig {
    PreviewConfig {
        surface_size: config.display.size.as_tuple(),
        title: config.display.title.clone(),
        target_fps: config.target_fps(),
        vsync: config.display.vsync,
        effect: effect_settings(&config.effect),
        sources,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;
    use trailconfig::FrameSize;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["lumatrail"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn flags_override_config_values() {
        let mut config =
            TrailConfig::from_toml_str("[effect]\ndecay = 0.5\n[display]\nfps = 30\n").unwrap();
        apply_overrides(
            &mut config,
            &args(&["--decay", "0.25", "--size", "640x360", "--no-vsync"]),
        );
        assert_eq!(config.effect.decay, 0.25);
        assert_eq!(config.display.size, FrameSize::new(640, 360));
        assert_eq!(config.target_fps(), Some(30.0));
        assert!(!config.display.vsync);
    }

    #[test]
    fn images_flag_selects_image_source() {
        let mut config = TrailConfig::default();
        apply_overrides(&mut config, &args(&["--images", "frames"]));
        assert_eq!(config.capture.source, SourceKind::Images);
        assert_eq!(config.capture.images, Some(PathBuf::from("frames")));

        let mut config = TrailConfig::default();
        apply_overrides(
            &mut config,
            &args(&["--images", "frames", "--source", "pattern"]),
        );
        assert_eq!(config.capture.source, SourceKind::Pattern);
    }

    #[test]
    fn out_of_range_override_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lumatrail.toml");
        fs::write(&path, "").unwrap();
        let paths = AppPaths::discover().unwrap();
        let cli = args(&["--config", path.to_str().unwrap(), "--decay", "2"]);
        assert!(load_config(&cli, &paths).is_err());
    }

    #[test]
    fn explicit_config_must_exist() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.toml");
        let paths = AppPaths::discover().unwrap();
        let cli = args(&["--config", missing.to_str().unwrap()]);
        assert!(load_config(&cli, &paths).is_err());
    }

    #[test]
    fn config_paths_are_relative_to_the_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lumatrail.toml");
        fs::write(&path, "[shaders]\ndisplay = \"display.frag\"\n").unwrap();
        let paths = AppPaths::discover().unwrap();
        let config = load_config(&args(&["--config", path.to_str().unwrap()]), &paths).unwrap();
        assert_eq!(config.shaders.display, Some(dir.path().join("display.frag")));
    }

    #[test]
    fn shader_files_replace_builtins() {
        let dir = TempDir::new().unwrap();
        let display = dir.path().join("display.frag");
        fs::write(&display, "#version 450\nvoid main() {}\n").unwrap();
        let sources = load_shader_sources(&ShaderPaths {
            display: Some(display),
            ..ShaderPaths::default()
        })
        .unwrap();
        let builtin = ShaderSources::builtin();
        assert_eq!(sources.display, "#version 450\nvoid main() {}\n");
        assert_eq!(sources.vertex, builtin.vertex);
        assert_eq!(sources.accumulation, builtin.accumulation);

        let missing = ShaderPaths {
            vertex: Some(dir.path().join("nope.vert")),
            ..ShaderPaths::default()
        };
        assert!(load_shader_sources(&missing).is_err());
    }

    #[test]
    fn producers_follow_the_capture_config() {
        let pool = camera::FramePool::new(1);
        let mut config = TrailConfig::default();
        config.capture.size = FrameSize::new(8, 4);
        config.capture.layout = LayoutSetting::Luma8;
        let mut producer = build_producer(&config.capture).unwrap();
        let frame = producer.next_frame(&pool).unwrap();
        assert_eq!((frame.width, frame.height, frame.pixels.len()), (8, 4, 32));

        config.capture.source = SourceKind::Images;
        config.capture.images = Some(TempDir::new().unwrap().path().to_path_buf());
        assert!(build_producer(&config.capture).is_err());
    }

    #[test]
    fn effect_maps_onto_renderer_settings() {
        let effect = EffectConfig {
            decay: 0.5,
            gain: 2.0,
            idle: IdleMode::Reblend,
        };
        assert_eq!(
            effect_settings(&effect),
            EffectSettings {
                decay: 0.5,
                gain: 2.0,
                idle: IdlePolicy::Reblend,
            }
        );
    }
}
