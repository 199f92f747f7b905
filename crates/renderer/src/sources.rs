//! Shader text for the two passes.
//!
//! The core treats sources as opaque; these built-ins follow the binding
//! convention the wgpu device expects: one std140 parameter block at
//! `set = 0, binding = 0`, texture unit `N` at `set = 1` bindings `2N`
//! (texture) and `2N + 1` (sampler), and a `vec2 xy` vertex input at
//! location 0.

/// Text of the three shader stages the pipeline links.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderSources {
    /// Shared by both programs.
    pub vertex: String,
    pub accumulation: String,
    pub display: String,
}

impl ShaderSources {
    pub fn builtin() -> Self {
        Self {
            vertex: VERTEX_SHADER_GLSL.to_string(),
            accumulation: ACCUMULATION_SHADER_GLSL.to_string(),
            display: DISPLAY_SHADER_GLSL.to_string(),
        }
    }
}

impl Default for ShaderSources {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Pass-through quad vertex shader; maps clip space onto top-left-origin UVs.
pub const VERTEX_SHADER_GLSL: &str = r"#version 450
layout(location = 0) in vec2 xy;
layout(location = 0) out vec2 uv;

void main() {
    uv = vec2(xy.x * 0.5 + 0.5, 0.5 - xy.y * 0.5);
    gl_Position = vec4(xy, 0.0, 1.0);
}
";

/// Blends the fresh capture (unit 0) with a softened copy of the previous
/// composite (unit 1).
pub const ACCUMULATION_SHADER_GLSL: &str = r"#version 450
layout(location = 0) in vec2 uv;
layout(location = 0) out vec4 outColor;

layout(std140, set = 0, binding = 0) uniform Params {
    vec2 duv;
    float decay;
} params;

layout(set = 1, binding = 0) uniform texture2D capture_texture;
layout(set = 1, binding = 1) uniform sampler capture_sampler;
layout(set = 1, binding = 2) uniform texture2D history_texture;
layout(set = 1, binding = 3) uniform sampler history_sampler;

float history(vec2 at) {
    return texture(sampler2D(history_texture, history_sampler), at).r;
}

void main() {
    float fresh = texture(sampler2D(capture_texture, capture_sampler), uv).r;
    vec2 dx = vec2(params.duv.x, 0.0);
    vec2 dy = vec2(0.0, params.duv.y);
    float spread = 0.25 * (history(uv + dx) + history(uv - dx) + history(uv + dy) + history(uv - dy));
    float previous = mix(history(uv), spread, 0.5);
    float value = mix(fresh, previous, params.decay);
    outColor = vec4(value, value, value, 1.0);
}
";

/// Draws the composite (unit 0) as grey scale.
pub const DISPLAY_SHADER_GLSL: &str = r"#version 450
layout(location = 0) in vec2 uv;
layout(location = 0) out vec4 outColor;

layout(std140, set = 0, binding = 0) uniform Params {
    float gain;
} params;

layout(set = 1, binding = 0) uniform texture2D composite_texture;
layout(set = 1, binding = 1) uniform sampler composite_sampler;

void main() {
    float value = texture(sampler2D(composite_texture, composite_sampler), uv).r * params.gain;
    outColor = vec4(vec3(clamp(value, 0.0, 1.0)), 1.0);
}
";
