use dxrt_common::ShaderSource;

/// Textured triangle: position + uv, sampled from group 0.
pub const TEXTURED_SHADER: &str = r#"
struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) uv: vec2<f32>,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@group(0) @binding(0)
var t_diffuse: texture_2d<f32>;
@group(0) @binding(1)
var s_point: sampler;

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(in.position, 1.0);
    out.uv = in.uv;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(t_diffuse, s_point, in.uv);
}
"#;

/// Colored triangle: position + per-vertex color.
pub const COLORED_SHADER: &str = r#"
struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) color: vec4<f32>,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) color: vec4<f32>,
};

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(in.position, 1.0);
    out.color = in.color;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return in.color;
}
"#;

pub fn textured() -> ShaderSource {
    ShaderSource::new("builtin:textured.wgsl", TEXTURED_SHADER)
}

pub fn colored() -> ShaderSource {
    ShaderSource::new("builtin:colored.wgsl", COLORED_SHADER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_define_both_entry_points() {
        for shader in [textured(), colored()] {
            assert!(shader.code.contains(&format!("fn {}(", shader.vertex_entry)));
            assert!(shader.code.contains(&format!("fn {}(", shader.pixel_entry)));
        }
    }
}
