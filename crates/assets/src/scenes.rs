//! Scene presets.
//!
//! Each preset is the same triangle on the same clear color; they differ only
//! in vertex layout, texture and shader. The renderer treats all of them
//! identically.

use dxrt_common::{ColoredVertex, Geometry, Scene, ShaderSource, TexturedVertex};

use crate::texture::default_checkerboard;

/// Triangle vertices scaled so the shape keeps its proportions at `aspect`.
fn triangle_positions(aspect: f32) -> [[f32; 3]; 3] {
    [
        [0.0, 0.25 * aspect, 0.0],
        [0.25, -0.25 * aspect, 0.0],
        [-0.25, -0.25 * aspect, 0.0],
    ]
}

pub fn textured_triangle_vertices(aspect: f32) -> [TexturedVertex; 3] {
    let [a, b, c] = triangle_positions(aspect);
    [
        TexturedVertex::new(a, [0.5, 0.0]),
        TexturedVertex::new(b, [1.0, 1.0]),
        TexturedVertex::new(c, [0.0, 1.0]),
    ]
}

pub fn colored_triangle_vertices(aspect: f32) -> [ColoredVertex; 3] {
    let [a, b, c] = triangle_positions(aspect);
    [
        ColoredVertex::new(a, [1.0, 0.0, 0.0, 1.0]),
        ColoredVertex::new(b, [0.0, 1.0, 0.0, 1.0]),
        ColoredVertex::new(c, [0.0, 0.0, 1.0, 1.0]),
    ]
}

/// Checkerboard-textured triangle.
pub fn textured_triangle(aspect: f32, shader: ShaderSource) -> Scene {
    Scene {
        name: "textured".into(),
        geometry: Some(Geometry::from_vertices(&textured_triangle_vertices(aspect))),
        texture: Some(default_checkerboard()),
        shader: Some(shader),
    }
}

/// Vertex-colored triangle.
pub fn colored_triangle(aspect: f32, shader: ShaderSource) -> Scene {
    Scene {
        name: "colored".into(),
        geometry: Some(Geometry::from_vertices(&colored_triangle_vertices(aspect))),
        texture: None,
        shader: Some(shader),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triangle_scales_with_aspect() {
        let v = textured_triangle_vertices(2.0);
        assert_eq!(v[0].position, [0.0, 0.5, 0.0]);
        assert_eq!(v[1].position, [0.25, -0.5, 0.0]);
        assert_eq!(v[2].uv, [0.0, 1.0]);
    }

    #[test]
    fn textured_scene_carries_texture() {
        let scene = textured_triangle(1.0, ShaderSource::new("t", "code"));
        assert!(scene.draws());
        assert_eq!(scene.texture.as_ref().map(|t| t.width), Some(256));
        assert_eq!(scene.geometry.as_ref().map(|g| g.vertex_count), Some(3));
    }

    #[test]
    fn colored_scene_has_no_texture() {
        let scene = colored_triangle(1.0, ShaderSource::new("c", "code"));
        assert!(scene.texture.is_none());
        assert_eq!(scene.geometry.as_ref().map(|g| g.layout.stride), Some(28));
    }
}
