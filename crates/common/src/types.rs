use serde::{Deserialize, Serialize};

use crate::vertex::{VertexLayout, VertexType};

/// Size of a surface or texture in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width over height. A zero height yields 1.0 so callers never divide by zero.
    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            return 1.0;
        }
        self.width as f32 / self.height as f32
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Linear RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::new(0.3, 0.3, 0.8, 1.0)
    }
}

/// Platform virtual-key code forwarded by the host shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyCode(pub u8);

/// Vertex data ready for upload, with the layout it must be bound with.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub bytes: Vec<u8>,
    pub layout: VertexLayout,
    pub vertex_count: u32,
}

impl Geometry {
    pub fn from_vertices<V: VertexType>(vertices: &[V]) -> Self {
        Self {
            bytes: bytemuck::cast_slice(vertices).to_vec(),
            layout: V::layout(),
            vertex_count: vertices.len() as u32,
        }
    }

    pub fn size_in_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Tightly packed RGBA8 pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureImage {
    pub const BYTES_PER_PIXEL: u32 = 4;

    /// Largest width or height a 2D texture may have.
    pub const MAX_DIMENSION: u32 = 16384;

    /// Bytes in a tightly packed `width` x `height` image.
    ///
    /// `None` when either side exceeds [`Self::MAX_DIMENSION`] or the size
    /// does not fit in memory.
    pub fn byte_len(width: u32, height: u32, bytes_per_pixel: u32) -> Option<usize> {
        if width > Self::MAX_DIMENSION || height > Self::MAX_DIMENSION {
            return None;
        }
        let bytes = u64::from(width)
            .checked_mul(u64::from(height))?
            .checked_mul(u64::from(bytes_per_pixel))?;
        usize::try_from(bytes).ok()
    }

    /// Bytes in one unpadded row.
    pub fn row_pitch(&self) -> usize {
        self.width as usize * Self::BYTES_PER_PIXEL as usize
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let at = y as usize * self.row_pitch() + x as usize * Self::BYTES_PER_PIXEL as usize;
        let px = self.pixels.get(at..at + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

/// Shader program text plus the entry points the pipeline binds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    /// Where the source came from; used in diagnostics.
    pub label: String,
    pub code: String,
    pub vertex_entry: String,
    pub pixel_entry: String,
}

impl ShaderSource {
    pub fn new(label: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            code: code.into(),
            vertex_entry: "vs_main".into(),
            pixel_entry: "fs_main".into(),
        }
    }

    pub fn with_entries(mut self, vertex: impl Into<String>, pixel: impl Into<String>) -> Self {
        self.vertex_entry = vertex.into();
        self.pixel_entry = pixel.into();
        self
    }
}

/// Static content a renderer uploads once at init.
///
/// A scene without geometry only clears; a scene without a texture binds no
/// descriptor table.
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub name: String,
    pub geometry: Option<Geometry>,
    pub texture: Option<TextureImage>,
    pub shader: Option<ShaderSource>,
}

impl Scene {
    pub fn clear_only() -> Self {
        Self {
            name: "clear".into(),
            geometry: None,
            texture: None,
            shader: None,
        }
    }

    pub fn draws(&self) -> bool {
        self.geometry.is_some() && self.shader.is_some()
    }
}
