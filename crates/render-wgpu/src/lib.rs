//! wgpu backend for the DXRT render core.
//!
//! Translates recorded command batches into wgpu render passes and copies,
//! and presents through a wgpu surface bound to the host's window.
//!
//! # Invariants
//! - Recorded barriers must match the backend's view of each resource; with
//!   the debug layer on, a mismatch fails the submission.
//! - A render pass never outlives the barrier that moves its target out of
//!   `RenderTarget`.

pub mod encode;
mod gpu;
pub mod shaders;

pub use gpu::WgpuBackend;

pub fn crate_info() -> &'static str {
    "dxrt-render-wgpu v0.1.0"
}
