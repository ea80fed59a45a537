//! DXRT render core: explicit-API frame rendering behind a backend seam.
//!
//! The core owns the protocol a low-level graphics API leaves to the
//! application: adapter policy, resource-state barriers, command allocator
//! reuse, fence accounting and teardown order. A [`GpuBackend`] performs the
//! native operations. [`HeadlessBackend`] simulates a GPU on a worker thread.
//!
//! # Invariants
//! - A back buffer is transitioned `PRESENT -> RENDER_TARGET` before any
//!   render-target use and back to `PRESENT` before it is presented.
//! - Fence `completed <= requested`; every waited value was signaled first.
//! - A command allocator is reset only after its last submission completed.
//! - Teardown drains the fence, then releases in reverse creation order.

pub mod backend;
pub mod command;
pub mod config;
pub mod device;
mod error;
pub mod headless;
pub mod recorder;
mod renderer;
pub mod state;
pub mod store;
pub mod surface;
pub mod sync;

pub use backend::{AdapterDesc, AdapterKind, GpuBackend, TextureFormat};
pub use config::{ConfigError, RendererConfig};
pub use error::RenderError;
pub use headless::{HeadlessAdapter, HeadlessBackend};
pub use renderer::{HostShell, Lifecycle, Renderer};
pub use state::{PipelineId, ResourceId, ResourceState};
pub use sync::FenceValue;

pub fn crate_info() -> &'static str {
    "dxrt-render v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("render"));
    }
}
