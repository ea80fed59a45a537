//! Presentation surface: the swapchain and its ring of back buffers.

use dxrt_common::Extent;

use crate::backend::{GpuBackend, SwapchainDesc, TextureFormat};
use crate::error::RenderError;
use crate::state::ResourceId;

/// Back buffers in the ring.
pub const BUFFER_COUNT: u32 = 2;

/// Render-target handle of one back buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTargetView {
    pub index: u32,
    pub resource: ResourceId,
}

/// Swapchain bound to the graphics queue and a host-owned window.
///
/// Fullscreen is never entered on the swapchain's own initiative; the host
/// decides window modes.
#[derive(Debug)]
pub struct PresentationSurface {
    back_buffers: Vec<ResourceId>,
    format: TextureFormat,
    extent: Extent,
}

impl PresentationSurface {
    pub fn create<B: GpuBackend>(
        backend: &mut B,
        target: B::SurfaceTarget,
        extent: Extent,
        buffer_count: u32,
        vsync_interval: u32,
    ) -> Result<Self, RenderError> {
        if extent.is_empty() {
            return Err(RenderError::SurfaceCreation(format!(
                "surface must be non-empty, got {}x{}",
                extent.width, extent.height
            )));
        }

        let desc = SwapchainDesc {
            extent,
            buffer_count,
            format: TextureFormat::Rgba8Unorm,
            vsync: vsync_interval >= 1,
        };
        let info = backend.create_swapchain(target, &desc)?;
        if info.back_buffers.len() != buffer_count as usize {
            return Err(RenderError::SurfaceCreation(format!(
                "requested {buffer_count} back buffers, backend created {}",
                info.back_buffers.len()
            )));
        }

        tracing::info!(
            "swapchain created: {}x{}, {} buffers, {:?}",
            extent.width,
            extent.height,
            buffer_count,
            info.format
        );
        Ok(Self {
            back_buffers: info.back_buffers,
            format: info.format,
            extent,
        })
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn back_buffers(&self) -> &[ResourceId] {
        &self.back_buffers
    }

    pub fn current_back_buffer_index<B: GpuBackend>(&self, backend: &B) -> u32 {
        backend.current_back_buffer_index()
    }

    pub fn acquire_render_target_view(&self, index: u32) -> Result<RenderTargetView, RenderError> {
        let resource = self
            .back_buffers
            .get(index as usize)
            .copied()
            .ok_or_else(|| {
                RenderError::Validation(format!(
                    "back buffer {index} out of range ({} buffers)",
                    self.back_buffers.len()
                ))
            })?;
        Ok(RenderTargetView { index, resource })
    }

    /// Display the current back buffer. Blocks on vertical blank when
    /// `vsync_intervals >= 1`.
    pub fn present<B: GpuBackend>(
        &self,
        backend: &mut B,
        vsync_intervals: u32,
    ) -> Result<(), RenderError> {
        backend.present(vsync_intervals)
    }

    /// Resize the back buffers. Caller guarantees the GPU is idle.
    /// Empty extents (minimized windows) are ignored.
    pub fn resize<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        extent: Extent,
    ) -> Result<bool, RenderError> {
        if extent.is_empty() || extent == self.extent {
            return Ok(false);
        }
        backend.resize_swapchain(extent)?;
        self.extent = extent;
        Ok(true)
    }

    pub fn release<B: GpuBackend>(self, backend: &mut B) {
        backend.release_swapchain();
    }
}
