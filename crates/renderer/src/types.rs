use std::fmt;

use crate::sources::ShaderSources;

/// Pipeline stage a shader unit is compiled for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderKind::Vertex => f.write_str("vertex"),
            ShaderKind::Fragment => f.write_str("fragment"),
        }
    }
}

/// Value written into a named program uniform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Int(i32),
}

impl UniformValue {
    /// Number of scalar components carried by the value.
    pub fn components(&self) -> usize {
        match self {
            UniformValue::Float(_) | UniformValue::Int(_) => 1,
            UniformValue::Vec2(_) => 2,
            UniformValue::Vec3(_) => 3,
            UniformValue::Vec4(_) => 4,
        }
    }
}

impl From<f32> for UniformValue {
    fn from(value: f32) -> Self {
        UniformValue::Float(value)
    }
}

impl From<[f32; 2]> for UniformValue {
    fn from(value: [f32; 2]) -> Self {
        UniformValue::Vec2(value)
    }
}

impl From<(f32, f32)> for UniformValue {
    fn from((x, y): (f32, f32)) -> Self {
        UniformValue::Vec2([x, y])
    }
}

impl From<[f32; 3]> for UniformValue {
    fn from(value: [f32; 3]) -> Self {
        UniformValue::Vec3(value)
    }
}

impl From<[f32; 4]> for UniformValue {
    fn from(value: [f32; 4]) -> Self {
        UniformValue::Vec4(value)
    }
}

impl From<i32> for UniformValue {
    fn from(value: i32) -> Self {
        UniformValue::Int(value)
    }
}

/// Texel layout of texture storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// One unsigned byte per texel (camera luma plane).
    Luminance,
    /// Four unsigned bytes per texel; the color-attachment format.
    Rgba,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Luminance => 1,
            PixelFormat::Rgba => 4,
        }
    }

    /// Bytes needed for a tightly packed `width`x`height` image.
    pub fn image_len(self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bytes_per_pixel()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    #[default]
    Nearest,
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum WrapMode {
    #[default]
    ClampToEdge,
    Repeat,
}

/// Sampling state attached to a texture object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct SamplerParams {
    pub filter: FilterMode,
    pub wrap: WrapMode,
}

/// Result of a framebuffer completeness check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramebufferStatus {
    Complete,
    /// No texture is attached as the color attachment.
    MissingAttachment,
    /// The attached texture has no storage (never allocated or zero-sized).
    IncompleteAttachment,
}

/// Primitive assembly used by a draw call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Primitive {
    Triangles,
    TriangleStrip,
}

/// Output rectangle in physical pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn sized(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// What a tick does when the camera has not delivered a new frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum IdlePolicy {
    /// Present the last composite again, leaving the history untouched.
    #[default]
    Represent,
    /// Re-run the accumulation pass with the last capture so the trail keeps converging.
    Reblend,
}

/// Tunables fed to the accumulation and display programs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EffectSettings {
    /// Weight of the previous composite in the blend (0 = no trail, 1 = frozen).
    pub decay: f32,
    /// Brightness multiplier applied by the display pass.
    pub gain: f32,
    pub idle: IdlePolicy,
}

impl Default for EffectSettings {
    fn default() -> Self {
        Self {
            decay: 0.9,
            gain: 1.0,
            idle: IdlePolicy::default(),
        }
    }
}

/// Immutable configuration passed to the preview window at start-up.
#[derive(Clone, Debug)]
pub struct PreviewConfig {
    /// Initial window size in physical pixels.
    pub surface_size: (u32, u32),
    /// Window title.
    pub title: String,
    /// Optional FPS cap; None = render on every redraw opportunity.
    pub target_fps: Option<f32>,
    /// Prefer a tear-free (FIFO) present mode.
    pub vsync: bool,
    pub effect: EffectSettings,
    pub sources: ShaderSources,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            surface_size: (1280, 720),
            title: "lumatrail".to_string(),
            target_fps: None,
            vsync: true,
            effect: EffectSettings::default(),
            sources: ShaderSources::default(),
        }
    }
}
