use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// `WIDTHxHEIGHT`, both non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn as_tuple(self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for FrameSize {
    type Err = String;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let trimmed = spec.trim();
        let (width, height) = trimmed
            .split_once(['x', 'X', '×'])
            .ok_or_else(|| format!("expected WxH format, e.g. 1280x720, got '{trimmed}'"))?;
        let width: u32 = width
            .trim()
            .parse()
            .map_err(|_| format!("invalid width in size '{trimmed}'"))?;
        let height: u32 = height
            .trim()
            .parse()
            .map_err(|_| format!("invalid height in size '{trimmed}'"))?;
        if width == 0 || height == 0 {
            return Err(format!("size '{trimmed}' must be greater than zero"));
        }
        Ok(Self { width, height })
    }
}

impl<'de> Deserialize<'de> for FrameSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

impl Serialize for FrameSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Pattern,
    Images,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutSetting {
    Luma8,
    #[default]
    Nv21,
}

/// What the renderer does on a tick without a new camera frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdleMode {
    /// Show the last composite again.
    #[default]
    Represent,
    /// Blend the last capture in again.
    Reblend,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TrailConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub effect: EffectConfig,
    #[serde(default)]
    pub shaders: ShaderPaths,
}

impl Default for TrailConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            display: DisplayConfig::default(),
            capture: CaptureConfig::default(),
            effect: EffectConfig::default(),
            shaders: ShaderPaths::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisplayConfig {
    pub size: FrameSize,
    /// Frame cap; 0 or absent leaves pacing to vsync.
    pub fps: Option<f32>,
    pub vsync: bool,
    pub title: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            size: FrameSize::new(1280, 720),
            fps: None,
            vsync: true,
            title: "lumatrail".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    pub source: SourceKind,
    pub size: FrameSize,
    pub layout: LayoutSetting,
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub interval: Duration,
    pub images: Option<PathBuf>,
    /// Cycle through `switch_sizes` every this many frames (test pattern only).
    pub switch_every: u32,
    pub switch_sizes: Vec<FrameSize>,
    pub noise: u8,
    pub pool: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::default(),
            size: FrameSize::new(640, 480),
            layout: LayoutSetting::default(),
            interval: default_interval(),
            images: None,
            switch_every: 0,
            switch_sizes: Vec::new(),
            noise: 12,
            pool: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct EffectConfig {
    /// Share of the previous composite kept each frame, `0.0..=1.0`.
    pub decay: f32,
    pub gain: f32,
    pub idle: IdleMode,
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            decay: 0.9,
            gain: 1.0,
            idle: IdleMode::default(),
        }
    }
}

/// Files overriding the built-in GLSL stages.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShaderPaths {
    pub vertex: Option<PathBuf>,
    pub accumulation: Option<PathBuf>,
    pub display: Option<PathBuf>,
}

fn default_version() -> u32 {
    1
}

fn default_interval() -> Duration {
    Duration::from_millis(33)
}

fn serialize_duration<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&humantime::format_duration(*value))
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v.trim())
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs(v as u64))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if !v.is_finite() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs_f64(v))
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl TrailConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: TrailConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Display frame cap, `None` when uncapped.
    pub fn target_fps(&self) -> Option<f32> {
        self.display.fps.filter(|fps| *fps > 0.0)
    }

    /// Time between capped display frames, `None` when uncapped or when the
    /// cap is too small for its period to fit a [`Duration`].
    pub fn frame_period(&self) -> Option<Duration> {
        self.target_fps()
            .and_then(|fps| Duration::try_from_secs_f32(fps.recip()).ok())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        if let Some(fps) = self.display.fps {
            if !fps.is_finite() || fps < 0.0 {
                return Err(ConfigError::Invalid("display.fps must be >= 0".into()));
            }
            if fps > 0.0 && self.frame_period().is_none() {
                return Err(ConfigError::Invalid(format!(
                    "display.fps = {fps} is too small to pace frames"
                )));
            }
        }

        let capture = &self.capture;
        if capture.interval.is_zero() {
            return Err(ConfigError::Invalid(
                "capture.interval must be greater than zero".into(),
            ));
        }
        if capture.pool == 0 {
            return Err(ConfigError::Invalid("capture.pool must be at least 1".into()));
        }
        if capture.source == SourceKind::Images && capture.images.is_none() {
            return Err(ConfigError::Invalid(
                "capture.source = \"images\" requires capture.images".into(),
            ));
        }
        if capture.switch_every > 0 && capture.switch_sizes.is_empty() {
            return Err(ConfigError::Invalid(
                "capture.switch_every needs at least one entry in capture.switch_sizes".into(),
            ));
        }

        let effect = &self.effect;
        if !(0.0..=1.0).contains(&effect.decay) {
            return Err(ConfigError::Invalid(format!(
                "effect.decay must be between 0 and 1, got {}",
                effect.decay
            )));
        }
        if !effect.gain.is_finite() || effect.gain < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "effect.gain must be >= 0, got {}",
                effect.gain
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version = 1

[display]
size = "800x600"
fps = 30
vsync = false

[capture]
source = "images"
images = "/tmp/frames"
size = "320 x 240"
layout = "luma8"
interval = "50ms"
switch_every = 90
switch_sizes = ["160x120"]

[effect]
decay = 0.75
gain = 1.5
idle = "reblend"

[shaders]
display = "shaders/display.frag"
"#;

    #[test]
    fn parses_sample_config() {
        let config = TrailConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.display.size, FrameSize::new(800, 600));
        assert_eq!(config.target_fps(), Some(30.0));
        assert!(!config.display.vsync);
        assert_eq!(config.capture.source, SourceKind::Images);
        assert_eq!(config.capture.size, FrameSize::new(320, 240));
        assert_eq!(config.capture.layout, LayoutSetting::Luma8);
        assert_eq!(config.capture.interval, Duration::from_millis(50));
        assert_eq!(config.capture.switch_sizes, vec![FrameSize::new(160, 120)]);
        assert_eq!(config.effect.idle, IdleMode::Reblend);
        assert_eq!(
            config.shaders.display.as_deref(),
            Some(Path::new("shaders/display.frag"))
        );
        assert_eq!(config.shaders.vertex, None);
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config = TrailConfig::from_toml_str("").unwrap();
        assert_eq!(config, TrailConfig::default());
        assert_eq!(config.version, 1);
        assert_eq!(config.capture.interval, Duration::from_millis(33));
        assert_eq!(config.effect.decay, 0.9);
        assert_eq!(config.target_fps(), None);
    }

    #[test]
    fn durations_accept_numbers() {
        let config = TrailConfig::from_toml_str("[capture]\ninterval = 0.25\n").unwrap();
        assert_eq!(config.capture.interval, Duration::from_millis(250));
        let config = TrailConfig::from_toml_str("[capture]\ninterval = 2\n").unwrap();
        assert_eq!(config.capture.interval, Duration::from_secs(2));
        assert!(TrailConfig::from_toml_str("[capture]\ninterval = -1\n").is_err());
        assert!(TrailConfig::from_toml_str("[capture]\ninterval = \"soon\"\n").is_err());
    }

    #[test]
    fn zero_fps_means_uncapped() {
        let config = TrailConfig::from_toml_str("[display]\nfps = 0\n").unwrap();
        assert_eq!(config.target_fps(), None);
        assert_eq!(config.frame_period(), None);

        let config = TrailConfig::from_toml_str("[display]\nfps = 4\n").unwrap();
        assert_eq!(config.frame_period(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn rejects_out_of_range_values() {
        for input in [
            "version = 2\n",
            "[effect]\ndecay = 1.5\n",
            "[effect]\ngain = -1.0\n",
            "[display]\nfps = -5\n",
            "[display]\nfps = 1e-40\n",
            "[display]\nfps = 1e-25\n",
            "[capture]\ninterval = \"0s\"\n",
            "[capture]\npool = 0\n",
            "[capture]\nsource = \"images\"\n",
            "[capture]\nswitch_every = 10\n",
        ] {
            let err = TrailConfig::from_toml_str(input).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{input}: {err}");
        }
    }

    #[test]
    fn rejects_malformed_input() {
        for input in [
            "[display]\nsize = \"wide\"\n",
            "[display]\nsize = \"0x10\"\n",
            "[capture]\nlayout = \"yuyv\"\n",
            "[effect]\ndecai = 0.5\n",
        ] {
            let err = TrailConfig::from_toml_str(input).unwrap_err();
            assert!(matches!(err, ConfigError::Parse(_)), "{input}: {err}");
        }
    }

    #[test]
    fn size_parsing() {
        assert_eq!("1920x1080".parse(), Ok(FrameSize::new(1920, 1080)));
        assert_eq!("64 × 48".parse(), Ok(FrameSize::new(64, 48)));
        assert!("1920".parse::<FrameSize>().is_err());
        assert!("ax1".parse::<FrameSize>().is_err());
        assert_eq!(FrameSize::new(4, 3).to_string(), "4x3");
    }

    #[test]
    fn load_reads_files_and_tolerates_missing_ones() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lumatrail.toml");
        assert_eq!(
            TrailConfig::load_or_default(&path).unwrap(),
            TrailConfig::default()
        );
        assert!(matches!(
            TrailConfig::load(&path),
            Err(ConfigError::Io { .. })
        ));

        fs::write(&path, "[effect]\ndecay = 0.5\n").unwrap();
        let config = TrailConfig::load_or_default(&path).unwrap();
        assert_eq!(config.effect.decay, 0.5);
    }

    #[test]
    fn round_trips_through_toml() {
        let config = TrailConfig::from_toml_str(SAMPLE).unwrap();
        let text = toml::to_string(&config).unwrap();
        assert_eq!(TrailConfig::from_toml_str(&text).unwrap(), config);
    }
}
