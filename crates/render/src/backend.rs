//! The seam between the render core and a native graphics API.
//!
//! The core owns the protocol (adapter policy, barriers, fences, lifecycle);
//! a backend owns the native objects and performs one native operation per
//! method. Resources cross the seam as [`ResourceId`]/[`PipelineId`].

use dxrt_common::{Extent, ShaderSource, VertexLayout};

use crate::command::{CommandBatch, PrimitiveTopology};
use crate::error::RenderError;
use crate::state::{PipelineId, ResourceId, ResourceState};
use crate::sync::FenceValue;

/// Adapter class, ordered by how much power it is expected to draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    DiscreteGpu,
    IntegratedGpu,
    VirtualGpu,
    Other,
    /// CPU-emulated adapter (WARP, llvmpipe, SwiftShader).
    Software,
}

impl AdapterKind {
    pub fn is_software(self) -> bool {
        self == Self::Software
    }

    /// Higher is more powerful.
    pub fn power_rank(self) -> u8 {
        match self {
            Self::DiscreteGpu => 4,
            Self::IntegratedGpu => 3,
            Self::VirtualGpu => 2,
            Self::Other => 1,
            Self::Software => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterDesc {
    /// Position in the backend's enumeration order.
    pub index: usize,
    pub name: String,
    pub kind: AdapterKind,
    pub backend: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Bgra8Unorm,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        4
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDesc {
    pub extent: Extent,
    pub buffer_count: u32,
    pub format: TextureFormat,
    /// Present waits for vertical blank.
    pub vsync: bool,
}

/// What the backend created for a swapchain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainInfo {
    /// One id per back buffer, in ring order. Each starts in `Present`.
    pub back_buffers: Vec<ResourceId>,
    pub format: TextureFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    /// CPU-visible vertex data read directly by the input assembler.
    Vertex,
    /// CPU-visible source of a buffer-to-texture copy.
    Staging,
}

impl BufferUsage {
    /// State a buffer of this usage is created in.
    pub fn initial_state(self) -> ResourceState {
        ResourceState::GenericRead
    }
}

/// A CPU-visible buffer written once through a mapped range at creation.
#[derive(Debug, Clone, Copy)]
pub struct BufferDesc<'a> {
    pub label: &'a str,
    pub usage: BufferUsage,
    pub contents: &'a [u8],
}

/// A GPU-local, sampled 2D texture with one mip level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub extent: Extent,
    pub format: TextureFormat,
}

impl TextureDesc {
    /// State a texture is created in: ready to receive its upload.
    pub const INITIAL_STATE: ResourceState = ResourceState::CopyDest;
}

/// Which resources the pipeline's shader stages may access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BindingSignature {
    /// Number of pixel-visible texture slots, each paired with a static
    /// point sampler.
    pub texture_slots: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineDesc<'a> {
    pub label: &'a str,
    pub shader: &'a ShaderSource,
    pub vertex_layout: &'a VertexLayout,
    pub target_format: TextureFormat,
    pub topology: PrimitiveTopology,
    pub binding: BindingSignature,
}

/// One native graphics API, as seen by the render core.
///
/// Calls arrive from a single thread. The only asynchronous actor is the GPU,
/// observed through the fence methods.
pub trait GpuBackend {
    /// Host-owned handle the swapchain presents into.
    type SurfaceTarget;

    fn enumerate_adapters(&mut self) -> Result<Vec<AdapterDesc>, RenderError>;

    /// Create the device and its graphics queue on `adapter`.
    fn create_device(
        &mut self,
        adapter: &AdapterDesc,
        debug_layer: bool,
    ) -> Result<(), RenderError>;

    /// Create a swapchain bound to the queue and to `target`.
    fn create_swapchain(
        &mut self,
        target: Self::SurfaceTarget,
        desc: &SwapchainDesc,
    ) -> Result<SwapchainInfo, RenderError>;

    /// Resize the back buffers. The GPU must be idle.
    fn resize_swapchain(&mut self, extent: Extent) -> Result<(), RenderError>;

    /// Back buffer the next present will display.
    fn current_back_buffer_index(&self) -> u32;

    fn present(&mut self, sync_interval: u32) -> Result<(), RenderError>;

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<ResourceId, RenderError>;

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<ResourceId, RenderError>;

    fn create_pipeline(&mut self, desc: &PipelineDesc<'_>) -> Result<PipelineId, RenderError>;

    /// Submit a closed batch to the tail of the queue.
    fn execute(&mut self, batch: &CommandBatch) -> Result<(), RenderError>;

    /// Enqueue a fence signal to `value` behind everything submitted so far.
    fn signal(&mut self, value: FenceValue) -> Result<(), RenderError>;

    fn completed_fence_value(&self) -> FenceValue;

    /// Block the calling thread until the fence reaches `value`.
    fn wait_for_fence(&self, value: FenceValue) -> Result<(), RenderError>;

    fn release_resource(&mut self, id: ResourceId);

    fn release_pipeline(&mut self, id: PipelineId);

    fn release_swapchain(&mut self);

    fn release_device(&mut self);
}
