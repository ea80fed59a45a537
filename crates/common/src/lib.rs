//! Shared types for the DXRT renderer.
//!
//! Everything here is plain data: no GPU handles, no I/O. The render core,
//! the asset loader and the host shell all speak these types.

pub mod types;
pub mod vertex;

pub use types::{Color, Extent, Geometry, KeyCode, Scene, ShaderSource, TextureImage};
pub use vertex::{
    ColoredVertex, TexturedVertex, VertexAttribute, VertexFormat, VertexLayout, VertexType,
};
