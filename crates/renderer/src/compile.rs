use std::borrow::Cow;

use wgpu::naga::ShaderStage;

/// Compiles the static full-screen triangle vertex shader.
pub(crate) fn compile_vertex_shader(device: &wgpu::Device) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("fullscreen triangle vertex"),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Borrowed(VERTEX_SHADER_GLSL),
            stage: ShaderStage::Vertex,
            defines: &[],
        },
    })
}

/// Compiles the calibration fragment program.
pub(crate) fn compile_fragment_shader(device: &wgpu::Device) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("calibrate fragment"),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Borrowed(FRAGMENT_SHADER_GLSL),
            stage: ShaderStage::Fragment,
            defines: &[],
        },
    })
}

/// Calibration program: one quad, four modes.
///
/// The uniform block layout must match `CalibrateUniforms` in
/// `gpu/uniforms.rs`. Texels are addressed with `texelFetch` so results do not
/// depend on filtering; `u_target_rect` and `u_source_rect` map the viewport
/// onto the sampled region the same way `QuadRegion::source_texel` does.
const FRAGMENT_SHADER_GLSL: &str = r"#version 450
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 outColor;

layout(std140, set = 0, binding = 0) uniform CalibrateParams {
    int u_mode;
    float u_num_frames;
    vec2 _padding0;
    vec4 u_target_rect;
    vec4 u_source_rect;
} ubo;

layout(set = 1, binding = 0) uniform texture2D frame_tx;
layout(set = 1, binding = 1) uniform texture2D sum_tx;
layout(set = 1, binding = 2) uniform texture2D sum_sq_tx;
layout(set = 1, binding = 3) uniform sampler texel_sampler;

ivec2 source_texel() {
    vec2 scale = ubo.u_source_rect.zw / max(ubo.u_target_rect.zw, vec2(1.0));
    vec2 local = floor((gl_FragCoord.xy - ubo.u_target_rect.xy) * scale);
    ivec2 lo = ivec2(ubo.u_source_rect.xy);
    ivec2 hi = lo + ivec2(ubo.u_source_rect.zw) - ivec2(1);
    return clamp(lo + ivec2(local), lo, hi);
}

void main() {
    ivec2 texel = source_texel();
    vec4 frame = texelFetch(sampler2D(frame_tx, texel_sampler), texel, 0);
    vec4 sum = texelFetch(sampler2D(sum_tx, texel_sampler), texel, 0);
    vec4 sum_sq = texelFetch(sampler2D(sum_sq_tx, texel_sampler), texel, 0);
    float n = ubo.u_num_frames > 0.0 ? ubo.u_num_frames : 1.0;

    if (ubo.u_mode == 1) {
        outColor = sum + frame / n;
    } else if (ubo.u_mode == 2) {
        vec4 delta = frame - sum;
        outColor = sum_sq + delta * delta / n;
    } else if (ubo.u_mode == 3) {
        outColor = vec4(sqrt(sum_sq.rgb), 1.0);
    } else {
        outColor = vec4(frame.rgb, 1.0);
    }
}
";

/// Minimal full-screen triangle vertex shader.
const VERTEX_SHADER_GLSL: &str = r"#version 450
layout(location = 0) out vec2 v_uv;

const vec2 positions[3] = vec2[3](
    vec2(-1.0, -3.0),
    vec2(3.0, 1.0),
    vec2(-1.0, 1.0)
);

void main() {
    uint vertex_index = uint(gl_VertexIndex);
    vec2 pos = positions[vertex_index];
    v_uv = pos * 0.5 + vec2(0.5, 0.5);
    gl_Position = vec4(pos, 0.0, 1.0);
}
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_program_declares_every_mode() {
        for needle in ["u_mode == 1", "u_mode == 2", "u_mode == 3", "sqrt(sum_sq.rgb)"] {
            assert!(FRAGMENT_SHADER_GLSL.contains(needle), "missing {needle}");
        }
    }

    #[test]
    fn fragment_program_parses_as_glsl() {
        let mut frontend = wgpu::naga::front::glsl::Frontend::default();
        let options = wgpu::naga::front::glsl::Options::from(ShaderStage::Fragment);
        frontend
            .parse(&options, FRAGMENT_SHADER_GLSL)
            .expect("fragment shader should parse");
        let options = wgpu::naga::front::glsl::Options::from(ShaderStage::Vertex);
        frontend
            .parse(&options, VERTEX_SHADER_GLSL)
            .expect("vertex shader should parse");
    }
}
