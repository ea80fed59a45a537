//! Headless backend: a simulated GPU for tests and the CLI.
//!
//! Submitted work runs on a worker thread that plays the GPU. It consumes the
//! queue in order, checks every barrier against the resource's actual state,
//! performs buffer-to-texture copies and advances the fence. CPU waits park
//! on a condition variable.

use std::collections::HashMap;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use dxrt_common::{Color, Extent, TextureImage};
use parking_lot::{Condvar, Mutex};

use crate::backend::{
    AdapterDesc, AdapterKind, BufferDesc, GpuBackend, PipelineDesc, SwapchainDesc, SwapchainInfo,
    TextureDesc, TextureFormat,
};
use crate::command::{Command, CommandBatch};
use crate::error::RenderError;
use crate::state::{PipelineId, ResourceId, ResourceState};
use crate::sync::FenceValue;

/// An adapter the headless backend reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessAdapter {
    pub name: String,
    pub kind: AdapterKind,
    supports_device: bool,
}

impl HeadlessAdapter {
    pub fn new(name: impl Into<String>, kind: AdapterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            supports_device: true,
        }
    }

    /// Device creation on this adapter fails.
    pub fn without_device_support(mut self) -> Self {
        self.supports_device = false;
        self
    }
}

#[derive(Debug, Clone)]
enum Contents {
    Buffer(Vec<u8>),
    Texture { extent: Extent, pixels: Vec<u8> },
    BackBuffer { clear: Option<Color> },
}

#[derive(Debug, Clone)]
struct SimResource {
    contents: Contents,
    state: ResourceState,
}

#[derive(Debug, Default)]
struct DeviceMemory {
    resources: HashMap<ResourceId, SimResource>,
    executed: Vec<CommandBatch>,
    validation: Vec<String>,
    completed: FenceValue,
    presents: u64,
    debug_layer: bool,
}

impl DeviceMemory {
    fn report(&mut self, message: String) {
        if self.debug_layer {
            tracing::warn!("validation: {message}");
            self.validation.push(message);
        }
    }

    fn expect_state(&mut self, id: ResourceId, expected: ResourceState, what: &str) {
        match self.resources.get(&id).map(|r| r.state) {
            Some(actual) if actual == expected => {}
            Some(actual) => {
                self.report(format!("{what}: {id} is {actual:?}, expected {expected:?}"))
            }
            None => self.report(format!("{what}: {id} does not exist")),
        }
    }

    fn run(&mut self, batch: CommandBatch) {
        let mut target = None;
        for command in &batch.commands {
            match command {
                Command::ResourceBarrier(b) => {
                    self.expect_state(b.resource, b.before, "barrier");
                    if let Some(r) = self.resources.get_mut(&b.resource) {
                        r.state = b.after;
                    }
                }
                Command::SetRenderTarget(id) => {
                    self.expect_state(*id, ResourceState::RenderTarget, "set render target");
                    target = Some(*id);
                }
                Command::ClearRenderTarget { target: id, color } => {
                    self.expect_state(*id, ResourceState::RenderTarget, "clear");
                    if let Some(SimResource {
                        contents: Contents::BackBuffer { clear },
                        ..
                    }) = self.resources.get_mut(id)
                    {
                        *clear = Some(*color);
                    }
                }
                Command::SetDescriptorTable { texture, .. } => {
                    self.expect_state(*texture, ResourceState::PixelShaderResource, "bind texture")
                }
                Command::SetVertexBuffer(view) => {
                    self.expect_state(view.buffer, ResourceState::GenericRead, "bind vertices")
                }
                Command::Draw { .. } => match target {
                    Some(id) => self.expect_state(id, ResourceState::RenderTarget, "draw"),
                    None => self.report("draw without a render target".into()),
                },
                Command::CopyBufferToTexture {
                    source,
                    destination,
                    layout,
                } => {
                    self.expect_state(*destination, ResourceState::CopyDest, "copy");
                    let staged = match self.resources.get(source).map(|r| &r.contents) {
                        Some(Contents::Buffer(bytes)) => bytes.clone(),
                        _ => {
                            self.report(format!("copy: {source} is not a buffer"));
                            continue;
                        }
                    };
                    if let Some(SimResource {
                        contents: Contents::Texture { extent, pixels },
                        ..
                    }) = self.resources.get_mut(destination)
                    {
                        let row = extent.width as usize * TextureImage::BYTES_PER_PIXEL as usize;
                        for (dst, src) in pixels
                            .chunks_exact_mut(row)
                            .zip(staged.chunks(layout.bytes_per_row as usize))
                            .take(layout.rows as usize)
                        {
                            let n = row.min(src.len());
                            dst[..n].copy_from_slice(&src[..n]);
                        }
                    }
                }
                Command::SetRootSignature(_)
                | Command::SetViewport(_)
                | Command::SetScissorRect(_)
                | Command::SetPrimitiveTopology(_) => {}
            }
        }
        self.executed.push(batch);
    }
}

#[derive(Debug, Default)]
struct Shared {
    memory: Mutex<DeviceMemory>,
    fence_reached: Condvar,
}

enum Work {
    Execute(CommandBatch),
    Present(ResourceId),
    Signal(FenceValue),
}

fn gpu_thread(shared: Arc<Shared>, queue: mpsc::Receiver<Work>) {
    for work in queue {
        let mut memory = shared.memory.lock();
        match work {
            Work::Execute(batch) => memory.run(batch),
            Work::Present(id) => {
                memory.expect_state(id, ResourceState::Present, "present");
                memory.presents += 1;
            }
            Work::Signal(value) => {
                memory.completed = memory.completed.max(value);
                shared.fence_reached.notify_all();
            }
        }
    }
}

#[derive(Debug)]
struct Device {
    queue: Sender<Work>,
    gpu: JoinHandle<()>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Swapchain {
    back_buffers: Vec<ResourceId>,
    extent: Extent,
    current: u32,
}

/// Simulated GPU. Every method is a single native operation, as on a real
/// backend, and can be inspected afterwards.
#[derive(Debug)]
pub struct HeadlessBackend {
    adapters: Vec<HeadlessAdapter>,
    shared: Arc<Shared>,
    device: Option<Device>,
    swapchain: Option<Swapchain>,
    pipelines: HashMap<PipelineId, u32>,
    next_id: u32,
    released: Vec<ResourceId>,
    released_pipelines: Vec<PipelineId>,
    surface_lost: bool,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessBackend {
    /// An integrated GPU, a discrete GPU and a software adapter.
    pub fn new() -> Self {
        Self::with_adapters(vec![
            HeadlessAdapter::new("Headless Integrated GPU", AdapterKind::IntegratedGpu),
            HeadlessAdapter::new("Headless Discrete GPU", AdapterKind::DiscreteGpu),
            HeadlessAdapter::new("Headless WARP", AdapterKind::Software),
        ])
    }

    pub fn with_adapters(adapters: Vec<HeadlessAdapter>) -> Self {
        Self {
            adapters,
            shared: Arc::default(),
            device: None,
            swapchain: None,
            pipelines: HashMap::new(),
            next_id: 1,
            released: Vec::new(),
            released_pipelines: Vec::new(),
            surface_lost: false,
        }
    }

    /// Make the next present fail as if the window went away.
    pub fn lose_surface(&mut self) {
        self.surface_lost = true;
    }

    pub fn has_device(&self) -> bool {
        self.device.is_some()
    }

    pub fn has_swapchain(&self) -> bool {
        self.swapchain.is_some()
    }

    pub fn swapchain_extent(&self) -> Option<Extent> {
        self.swapchain.as_ref().map(|s| s.extent)
    }

    pub fn executed(&self) -> Vec<CommandBatch> {
        self.shared.memory.lock().executed.clone()
    }

    pub fn validation_messages(&self) -> Vec<String> {
        self.shared.memory.lock().validation.clone()
    }

    pub fn presents(&self) -> u64 {
        self.shared.memory.lock().presents
    }

    /// State the simulated GPU last left `id` in.
    pub fn actual_state(&self, id: ResourceId) -> Option<ResourceState> {
        self.shared.memory.lock().resources.get(&id).map(|r| r.state)
    }

    pub fn buffer_contents(&self, id: ResourceId) -> Option<Vec<u8>> {
        match &self.shared.memory.lock().resources.get(&id)?.contents {
            Contents::Buffer(bytes) => Some(bytes.clone()),
            _ => None,
        }
    }

    pub fn texture_contents(&self, id: ResourceId) -> Option<TextureImage> {
        match &self.shared.memory.lock().resources.get(&id)?.contents {
            Contents::Texture { extent, pixels } => Some(TextureImage {
                width: extent.width,
                height: extent.height,
                pixels: pixels.clone(),
            }),
            _ => None,
        }
    }

    /// Color the back buffer was last cleared to.
    pub fn clear_color(&self, id: ResourceId) -> Option<Color> {
        match &self.shared.memory.lock().resources.get(&id)?.contents {
            Contents::BackBuffer { clear } => *clear,
            _ => None,
        }
    }

    /// Resources released so far, in release order.
    pub fn released(&self) -> Vec<ResourceId> {
        self.released.clone()
    }

    pub fn released_pipelines(&self) -> Vec<PipelineId> {
        self.released_pipelines.clone()
    }

    pub fn live_resources(&self) -> usize {
        self.shared.memory.lock().resources.len()
    }

    fn device(&self) -> Result<&Device, RenderError> {
        self.device
            .as_ref()
            .ok_or_else(|| RenderError::Validation("no device".into()))
    }

    fn send(&self, work: Work) -> Result<(), RenderError> {
        self.device()?
            .queue
            .send(work)
            .map_err(|_| RenderError::Validation("GPU thread has stopped".into()))
    }

    fn allocate(&mut self, contents: Contents, state: ResourceState) -> ResourceId {
        let id = ResourceId(self.next_id);
        self.next_id += 1;
        self.shared
            .memory
            .lock()
            .resources
            .insert(id, SimResource { contents, state });
        id
    }
}

/// Minimal stand-in for a shader compiler: both entry points must be
/// defined as functions in the source.
fn compile(desc: &PipelineDesc<'_>) -> Result<(), String> {
    let mut diagnostics = Vec::new();
    for entry in [&desc.shader.vertex_entry, &desc.shader.pixel_entry] {
        if !desc.shader.code.contains(&format!("fn {entry}(")) {
            diagnostics.push(format!("error: entry point `{entry}` not found"));
        }
    }
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics.join("\n"))
    }
}

impl GpuBackend for HeadlessBackend {
    type SurfaceTarget = ();

    fn enumerate_adapters(&mut self) -> Result<Vec<AdapterDesc>, RenderError> {
        Ok(self
            .adapters
            .iter()
            .enumerate()
            .map(|(index, a)| AdapterDesc {
                index,
                name: a.name.clone(),
                kind: a.kind,
                backend: "headless".into(),
            })
            .collect())
    }

    fn create_device(
        &mut self,
        adapter: &AdapterDesc,
        debug_layer: bool,
    ) -> Result<(), RenderError> {
        let supported = self
            .adapters
            .get(adapter.index)
            .is_some_and(|a| a.supports_device);
        if !supported {
            return Err(RenderError::DeviceCreation {
                adapter: adapter.name.clone(),
                reason: "feature level not supported".into(),
            });
        }
        if self.device.is_some() {
            return Err(RenderError::DeviceCreation {
                adapter: adapter.name.clone(),
                reason: "a device already exists".into(),
            });
        }

        self.shared.memory.lock().debug_layer = debug_layer;
        let (queue, rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let gpu = std::thread::Builder::new()
            .name("headless-gpu".into())
            .spawn(move || gpu_thread(shared, rx))
            .map_err(|e| RenderError::DeviceCreation {
                adapter: adapter.name.clone(),
                reason: e.to_string(),
            })?;
        self.device = Some(Device { queue, gpu });
        Ok(())
    }

    fn create_swapchain(
        &mut self,
        _target: (),
        desc: &SwapchainDesc,
    ) -> Result<SwapchainInfo, RenderError> {
        if self.device.is_none() {
            return Err(RenderError::SurfaceCreation("no device".into()));
        }
        if self.swapchain.is_some() {
            return Err(RenderError::SurfaceCreation(
                "window already has a swapchain".into(),
            ));
        }
        if desc.buffer_count < 2 {
            return Err(RenderError::SurfaceCreation(format!(
                "flip-model swapchains need at least 2 buffers, got {}",
                desc.buffer_count
            )));
        }
        let back_buffers: Vec<_> = (0..desc.buffer_count)
            .map(|_| self.allocate(Contents::BackBuffer { clear: None }, ResourceState::Present))
            .collect();
        self.swapchain = Some(Swapchain {
            back_buffers: back_buffers.clone(),
            extent: desc.extent,
            current: 0,
        });
        Ok(SwapchainInfo {
            back_buffers,
            format: desc.format,
        })
    }

    fn resize_swapchain(&mut self, extent: Extent) -> Result<(), RenderError> {
        let swapchain = self
            .swapchain
            .as_mut()
            .ok_or_else(|| RenderError::Validation("no swapchain".into()))?;
        swapchain.extent = extent;
        Ok(())
    }

    fn current_back_buffer_index(&self) -> u32 {
        self.swapchain.as_ref().map_or(0, |s| s.current)
    }

    fn present(&mut self, _sync_interval: u32) -> Result<(), RenderError> {
        if self.surface_lost {
            return Err(RenderError::SurfaceLost("window was destroyed".into()));
        }
        let (id, next) = {
            let swapchain = self
                .swapchain
                .as_ref()
                .ok_or_else(|| RenderError::SurfaceLost("no swapchain".into()))?;
            let count = swapchain.back_buffers.len() as u32;
            (
                swapchain.back_buffers[swapchain.current as usize],
                (swapchain.current + 1) % count,
            )
        };
        self.send(Work::Present(id))?;
        if let Some(swapchain) = self.swapchain.as_mut() {
            swapchain.current = next;
        }
        Ok(())
    }

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<ResourceId, RenderError> {
        self.device()?;
        if desc.contents.is_empty() {
            return Err(RenderError::ResourceAllocation(format!(
                "{}: zero-sized buffer",
                desc.label
            )));
        }
        Ok(self.allocate(
            Contents::Buffer(desc.contents.to_vec()),
            desc.usage.initial_state(),
        ))
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<ResourceId, RenderError> {
        self.device()?;
        if desc.extent.is_empty() {
            return Err(RenderError::ResourceAllocation("zero-sized texture".into()));
        }
        let size = TextureImage::byte_len(
            desc.extent.width,
            desc.extent.height,
            desc.format.bytes_per_pixel(),
        )
        .ok_or_else(|| {
            RenderError::ResourceAllocation(format!(
                "{}x{} texture exceeds the device limits",
                desc.extent.width, desc.extent.height
            ))
        })?;
        Ok(self.allocate(
            Contents::Texture {
                extent: desc.extent,
                pixels: vec![0; size],
            },
            TextureDesc::INITIAL_STATE,
        ))
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc<'_>) -> Result<PipelineId, RenderError> {
        self.device()?;
        compile(desc).map_err(|diagnostic| RenderError::ShaderCompile {
            shader: desc.label.to_string(),
            diagnostic,
        })?;
        if desc.target_format != TextureFormat::Rgba8Unorm {
            return Err(RenderError::Validation(format!(
                "render target format {:?} does not match the swapchain",
                desc.target_format
            )));
        }
        let id = PipelineId(self.next_id);
        self.next_id += 1;
        self.pipelines.insert(id, desc.binding.texture_slots);
        Ok(id)
    }

    fn execute(&mut self, batch: &CommandBatch) -> Result<(), RenderError> {
        if let Some(id) = batch.pipeline {
            if !self.pipelines.contains_key(&id) {
                return Err(RenderError::Validation(format!(
                    "batch '{}' uses an unknown pipeline",
                    batch.label
                )));
            }
        }
        self.send(Work::Execute(batch.clone()))
    }

    fn signal(&mut self, value: FenceValue) -> Result<(), RenderError> {
        self.send(Work::Signal(value))
    }

    fn completed_fence_value(&self) -> FenceValue {
        self.shared.memory.lock().completed
    }

    fn wait_for_fence(&self, value: FenceValue) -> Result<(), RenderError> {
        self.device()?;
        let mut memory = self.shared.memory.lock();
        while memory.completed < value {
            self.shared.fence_reached.wait(&mut memory);
        }
        Ok(())
    }

    fn release_resource(&mut self, id: ResourceId) {
        let mut memory = self.shared.memory.lock();
        if memory.resources.remove(&id).is_none() {
            memory.report(format!("release: {id} is not alive"));
            return;
        }
        drop(memory);
        self.released.push(id);
    }

    fn release_pipeline(&mut self, id: PipelineId) {
        if self.pipelines.remove(&id).is_none() {
            self.shared
                .memory
                .lock()
                .report(format!("release: pipeline {} is not alive", id.0));
            return;
        }
        self.released_pipelines.push(id);
    }

    fn release_swapchain(&mut self) {
        if let Some(swapchain) = self.swapchain.take() {
            for id in swapchain.back_buffers {
                self.release_resource(id);
            }
        }
    }

    fn release_device(&mut self) {
        if let Some(Device { queue, gpu }) = self.device.take() {
            drop(queue);
            if gpu.join().is_err() {
                tracing::error!("headless GPU thread panicked");
            }
        }
    }
}

impl Drop for HeadlessBackend {
    fn drop(&mut self) {
        self.release_device();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BufferUsage, SwapchainDesc};
    use crate::command::Barrier;

    fn device(debug_layer: bool) -> HeadlessBackend {
        let mut backend = HeadlessBackend::new();
        let adapters = backend.enumerate_adapters().unwrap();
        backend.create_device(&adapters[0], debug_layer).unwrap();
        backend
    }

    fn swapchain(backend: &mut HeadlessBackend) -> SwapchainInfo {
        backend
            .create_swapchain(
                (),
                &SwapchainDesc {
                    extent: Extent::new(16, 16),
                    buffer_count: 2,
                    format: TextureFormat::Rgba8Unorm,
                    vsync: false,
                },
            )
            .unwrap()
    }

    fn drain(backend: &mut HeadlessBackend, value: FenceValue) {
        backend.signal(value).unwrap();
        backend.wait_for_fence(value).unwrap();
    }

    #[test]
    fn default_adapters_include_software() {
        let mut backend = HeadlessBackend::new();
        let adapters = backend.enumerate_adapters().unwrap();
        assert_eq!(adapters.len(), 3);
        assert!(adapters.iter().any(|a| a.kind.is_software()));
    }

    #[test]
    fn inspection_survives_a_panicking_lock_holder() {
        let backend = device(true);
        let shared = Arc::clone(&backend.shared);
        let joined = std::thread::spawn(move || {
            let _memory = shared.memory.lock();
            panic!("panicked while holding device memory");
        })
        .join();
        assert!(joined.is_err());
        assert_eq!(backend.presents(), 0);
        assert!(backend.validation_messages().is_empty());
    }

    #[test]
    fn texture_beyond_device_limits_is_refused() {
        let mut backend = device(true);
        let err = backend
            .create_texture(&TextureDesc {
                extent: Extent::new(65536, 65536),
                format: TextureFormat::Rgba8Unorm,
            })
            .unwrap_err();
        assert!(matches!(err, RenderError::ResourceAllocation(_)));
        assert_eq!(backend.live_resources(), 0);
    }

    #[test]
    fn present_advances_ring() {
        let mut backend = device(true);
        swapchain(&mut backend);
        assert_eq!(backend.current_back_buffer_index(), 0);
        backend.present(1).unwrap();
        assert_eq!(backend.current_back_buffer_index(), 1);
        backend.present(1).unwrap();
        assert_eq!(backend.current_back_buffer_index(), 0);
        drain(&mut backend, 1);
        assert_eq!(backend.presents(), 2);
    }

    #[test]
    fn stale_barrier_is_reported() {
        let mut backend = device(true);
        let info = swapchain(&mut backend);
        let back = info.back_buffers[0];
        backend
            .execute(&CommandBatch {
                label: "bad",
                pipeline: None,
                commands: vec![Command::ResourceBarrier(Barrier {
                    resource: back,
                    before: ResourceState::RenderTarget,
                    after: ResourceState::Present,
                })],
            })
            .unwrap();
        drain(&mut backend, 1);
        let messages = backend.validation_messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("barrier"));
    }

    #[test]
    fn validation_needs_debug_layer() {
        let mut backend = device(false);
        let info = swapchain(&mut backend);
        backend
            .execute(&CommandBatch {
                label: "bad",
                pipeline: None,
                commands: vec![Command::ClearRenderTarget {
                    target: info.back_buffers[0],
                    color: Color::BLACK,
                }],
            })
            .unwrap();
        drain(&mut backend, 1);
        assert!(backend.validation_messages().is_empty());
    }

    #[test]
    fn lost_surface_fails_present() {
        let mut backend = device(false);
        swapchain(&mut backend);
        backend.lose_surface();
        assert!(matches!(
            backend.present(1),
            Err(RenderError::SurfaceLost(_))
        ));
    }

    #[test]
    fn double_release_is_reported() {
        let mut backend = device(true);
        let id = backend
            .create_buffer(&BufferDesc {
                label: "vb",
                usage: BufferUsage::Vertex,
                contents: &[1, 2, 3, 4],
            })
            .unwrap();
        backend.release_resource(id);
        backend.release_resource(id);
        assert_eq!(backend.released(), vec![id]);
        assert_eq!(backend.validation_messages().len(), 1);
    }

    #[test]
    fn unsupported_adapter_refuses_device() {
        let mut backend = HeadlessBackend::with_adapters(vec![
            HeadlessAdapter::new("old", AdapterKind::Other).without_device_support(),
        ]);
        let adapters = backend.enumerate_adapters().unwrap();
        assert!(matches!(
            backend.create_device(&adapters[0], false),
            Err(RenderError::DeviceCreation { .. })
        ));
        assert!(!backend.has_device());
    }
}
