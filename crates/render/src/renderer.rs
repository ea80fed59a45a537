//! Renderer façade: composes the device, surface, assets, recorder and
//! synchronizer behind `init / update / render / destroy`.
//!
//! # Invariants
//! - `Uninitialized -> Ready -> Rendering -> Destroyed`. A failed `init`
//!   releases whatever it created and stays `Uninitialized`.
//! - Each `render` signals the fence once and waits on that value before
//!   returning, so `completed == requested` between frames.
//! - GPU objects are released at most once, in reverse creation order, after
//!   the fence has drained.

use std::collections::BTreeSet;

use dxrt_common::{Extent, KeyCode, Scene};

use crate::backend::{AdapterDesc, BindingSignature, GpuBackend, TextureFormat};
use crate::config::RendererConfig;
use crate::device::DeviceContext;
use crate::error::RenderError;
use crate::recorder::{DrawSet, FrameRecorder};
use crate::state::{ResourceId, ResourceState};
use crate::store::{AssetStore, PipelineHandle, TextureHandle, VertexBufferHandle};
use crate::surface::PresentationSurface;
use crate::sync::{FenceValue, FrameSynchronizer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Ready,
    Rendering,
    Destroyed,
}

/// What the renderer needs from the window that hosts it.
pub trait HostShell {
    type SurfaceTarget;

    /// Native handle the swapchain presents into.
    fn surface_target(&self) -> Result<Self::SurfaceTarget, RenderError>;

    fn set_window_title(&self, title: &str);
}

/// GPU objects owned between `init` and `destroy`.
#[derive(Debug)]
struct Gpu {
    device: DeviceContext,
    surface: Option<PresentationSurface>,
    store: AssetStore,
    recorder: FrameRecorder,
    sync: FrameSynchronizer,
    vertices: Option<VertexBufferHandle>,
    texture: Option<TextureHandle>,
    pipeline: Option<PipelineHandle>,
    draw: Option<DrawSet>,
}

impl Gpu {
    fn new(device: DeviceContext) -> Self {
        Self {
            device,
            surface: None,
            store: AssetStore::new(),
            recorder: FrameRecorder::new(),
            sync: FrameSynchronizer::new(),
            vertices: None,
            texture: None,
            pipeline: None,
            draw: None,
        }
    }

    /// Everything after device creation, in creation order.
    fn build<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        target: B::SurfaceTarget,
        config: &RendererConfig,
        scene: &Scene,
    ) -> Result<(), RenderError> {
        let surface = PresentationSurface::create(
            backend,
            target,
            config.extent(),
            config.buffer_count,
            config.vsync_interval,
        )?;
        for &id in surface.back_buffers() {
            self.recorder.register(id, ResourceState::Present);
        }
        let format = surface.format();
        self.surface = Some(surface);

        let (Some(geometry), Some(shader)) = (&scene.geometry, &scene.shader) else {
            tracing::info!("scene '{}' only clears", scene.name);
            return Ok(());
        };

        let vertices = self.store.build_static_geometry(backend, geometry)?;
        self.recorder
            .register(vertices.view.buffer, ResourceState::GenericRead);

        let binding = BindingSignature {
            texture_slots: u32::from(scene.texture.is_some()),
        };
        let pipeline =
            self.store
                .build_pipeline(backend, shader, &geometry.layout, format, binding)?;

        if let Some(image) = &scene.texture {
            let completed = self.sync.completed(backend);
            let mut init = self.recorder.begin("init", Some(pipeline.id), completed)?;
            let texture = self
                .store
                .build_texture(backend, &mut init, image, TextureFormat::Rgba8Unorm)?;
            let batch = init.finish()?;
            backend.execute(&batch)?;

            let value = self.sync.signal_after(backend)?;
            self.recorder.mark_submitted(value);
            self.store.retire_staging(value);
            self.sync.wait_until(backend, value)?;
            self.collect_staging(backend);
            tracing::info!(
                "texture uploaded: {}x{}",
                texture.extent.width,
                texture.extent.height
            );
            self.texture = Some(texture);
        }

        self.draw = Some(DrawSet {
            pipeline: pipeline.id,
            vertex_buffer: vertices.view,
            vertex_count: vertices.vertex_count,
            topology: pipeline.topology,
            texture: self.texture.map(|t| t.id),
        });
        self.vertices = Some(vertices);
        self.pipeline = Some(pipeline);
        Ok(())
    }

    fn collect_staging<B: GpuBackend>(&mut self, backend: &mut B) {
        let completed = self.sync.completed(backend);
        for id in self.store.release_completed(backend, completed) {
            self.recorder.forget(id);
        }
    }

    /// Drain the queue, then release in reverse creation order.
    fn teardown<B: GpuBackend>(mut self, backend: &mut B) -> Result<(), RenderError> {
        let drained = self.sync.drain(backend);
        if let Err(e) = &drained {
            tracing::error!("GPU did not drain before teardown: {e}");
        }
        self.store.release_all(backend);
        if let Some(surface) = self.surface.take() {
            surface.release(backend);
        }
        self.device.release(backend);
        drained
    }
}

/// The renderer a host shell drives: `init` once, then `update` and
/// `render` per displayed frame, then `destroy`.
#[derive(Debug)]
pub struct Renderer<B: GpuBackend> {
    backend: B,
    config: RendererConfig,
    scene: Scene,
    lifecycle: Lifecycle,
    gpu: Option<Gpu>,
    held_keys: BTreeSet<KeyCode>,
    frames: u64,
}

impl<B: GpuBackend> Renderer<B> {
    pub fn new(backend: B, config: RendererConfig, scene: Scene) -> Self {
        Self {
            backend,
            config,
            scene,
            lifecycle: Lifecycle::Uninitialized,
            gpu: None,
            held_keys: BTreeSet::new(),
            frames: 0,
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Window title: the configured title, marked when running on WARP.
    pub fn title(&self) -> String {
        if self.config.use_software_adapter {
            format!("{} (WARP)", self.config.title)
        } else {
            self.config.title.clone()
        }
    }

    pub fn preferred_surface_size(&self) -> Extent {
        self.config.extent()
    }

    /// Replace the scene `init` will upload. Only valid before `init`.
    pub fn set_scene(&mut self, scene: Scene) -> Result<(), RenderError> {
        self.require_state("set scene", &[Lifecycle::Uninitialized])?;
        self.scene = scene;
        Ok(())
    }

    /// Create every GPU object. `Uninitialized -> Ready`.
    pub fn init<H>(&mut self, host: &H) -> Result<(), RenderError>
    where
        H: HostShell<SurfaceTarget = B::SurfaceTarget>,
    {
        self.require_state("init", &[Lifecycle::Uninitialized])?;
        self.config
            .validate()
            .map_err(|e| RenderError::Validation(e.to_string()))?;

        let device = DeviceContext::initialize(
            &mut self.backend,
            self.config.prefer_high_performance,
            self.config.use_software_adapter,
            self.config.debug_layer,
        )?;
        host.set_window_title(&format!("{}: {}", self.title(), device.adapter().name));

        let mut gpu = Gpu::new(device);
        let built = host.surface_target().and_then(|target| {
            gpu.build(&mut self.backend, target, &self.config, &self.scene)
        });
        if let Err(e) = built {
            tracing::error!("init failed: {e}");
            if let Err(teardown) = gpu.teardown(&mut self.backend) {
                tracing::warn!("teardown after failed init: {teardown}");
            }
            return Err(e);
        }

        self.gpu = Some(gpu);
        self.lifecycle = Lifecycle::Ready;
        tracing::info!("renderer ready");
        Ok(())
    }

    /// Advance CPU-side state. Nothing animates yet.
    pub fn update(&mut self) -> Result<(), RenderError> {
        self.require_state("update", &[Lifecycle::Ready, Lifecycle::Rendering])?;
        self.lifecycle = Lifecycle::Rendering;
        Ok(())
    }

    /// Record, submit and present one frame, then wait for the GPU.
    pub fn render(&mut self) -> Result<(), RenderError> {
        self.require_state("render", &[Lifecycle::Ready, Lifecycle::Rendering])?;
        let gpu = self.gpu.as_mut().ok_or(RenderError::WrongState {
            operation: "render",
            state: self.lifecycle,
        })?;
        let surface = gpu
            .surface
            .as_ref()
            .ok_or_else(|| RenderError::Validation("renderer has no surface".into()))?;

        let index = surface.current_back_buffer_index(&self.backend);
        let target = surface.acquire_render_target_view(index)?;
        let completed = gpu.sync.completed(&self.backend);
        let batch = gpu.recorder.record_frame(
            completed,
            target,
            gpu.draw.as_ref(),
            self.config.clear_color,
            surface.extent(),
        )?;

        self.backend.execute(&batch)?;
        surface.present(&mut self.backend, self.config.vsync_interval)?;

        let value = gpu.sync.signal_after(&mut self.backend)?;
        gpu.recorder.mark_submitted(value);
        gpu.sync.wait_until(&self.backend, value)?;
        gpu.collect_staging(&mut self.backend);

        self.frames += 1;
        self.lifecycle = Lifecycle::Rendering;
        tracing::debug!(
            "frame {} presented from back buffer {index}, fence {value}",
            self.frames
        );
        Ok(())
    }

    /// Resize the back buffers after draining the GPU. Zero sizes are
    /// ignored; before `init` the size only updates the preferred size.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        let extent = Extent::new(width, height);
        if extent.is_empty() {
            tracing::debug!("ignoring resize to {width}x{height}");
            return Ok(());
        }
        let Some(gpu) = self.gpu.as_mut() else {
            self.config.width = width;
            self.config.height = height;
            return Ok(());
        };
        let Some(surface) = gpu.surface.as_mut() else {
            return Ok(());
        };

        gpu.sync.drain(&self.backend)?;
        if surface.resize(&mut self.backend, extent)? {
            self.config.width = width;
            self.config.height = height;
            tracing::info!("swapchain resized to {width}x{height}");
        }
        Ok(())
    }

    /// Drain the GPU and release everything. Safe to call more than once.
    pub fn destroy(&mut self) -> Result<(), RenderError> {
        if self.lifecycle == Lifecycle::Destroyed {
            return Ok(());
        }
        self.lifecycle = Lifecycle::Destroyed;
        match self.gpu.take() {
            Some(gpu) => {
                let result = gpu.teardown(&mut self.backend);
                tracing::info!("renderer destroyed after {} frames", self.frames);
                result
            }
            None => Ok(()),
        }
    }

    pub fn on_key_down(&mut self, key: KeyCode) {
        if self.held_keys.insert(key) {
            tracing::debug!("key down: {}", key.0);
        }
    }

    pub fn on_key_up(&mut self, key: KeyCode) {
        if self.held_keys.remove(&key) {
            tracing::debug!("key up: {}", key.0);
        }
    }

    pub fn is_key_down(&self, key: KeyCode) -> bool {
        self.held_keys.contains(&key)
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn adapter(&self) -> Option<&AdapterDesc> {
        self.gpu.as_ref().map(|g| g.device.adapter())
    }

    pub fn fence_requested(&self) -> FenceValue {
        self.gpu.as_ref().map_or(0, |g| g.sync.requested())
    }

    pub fn fence_completed(&self) -> FenceValue {
        self.gpu
            .as_ref()
            .map_or(0, |g| g.sync.completed(&self.backend))
    }

    pub fn current_back_buffer_index(&self) -> Option<u32> {
        let surface = self.gpu.as_ref()?.surface.as_ref()?;
        Some(surface.current_back_buffer_index(&self.backend))
    }

    pub fn back_buffers(&self) -> &[ResourceId] {
        self.gpu
            .as_ref()
            .and_then(|g| g.surface.as_ref())
            .map_or(&[], |s| s.back_buffers())
    }

    pub fn vertex_buffer(&self) -> Option<&VertexBufferHandle> {
        self.gpu.as_ref()?.vertices.as_ref()
    }

    pub fn texture(&self) -> Option<&TextureHandle> {
        self.gpu.as_ref()?.texture.as_ref()
    }

    pub fn pipeline(&self) -> Option<&PipelineHandle> {
        self.gpu.as_ref()?.pipeline.as_ref()
    }

    /// State the recorder last committed for `id`.
    pub fn resource_state(&self, id: ResourceId) -> Option<ResourceState> {
        self.gpu.as_ref()?.recorder.state(id)
    }

    fn require_state(
        &self,
        operation: &'static str,
        allowed: &[Lifecycle],
    ) -> Result<(), RenderError> {
        if allowed.contains(&self.lifecycle) {
            Ok(())
        } else {
            Err(RenderError::WrongState {
                operation,
                state: self.lifecycle,
            })
        }
    }
}

impl<B: GpuBackend> Drop for Renderer<B> {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            tracing::error!("renderer teardown failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::AdapterKind;
    use crate::command::Command;
    use crate::headless::{HeadlessAdapter, HeadlessBackend};
    use dxrt_common::{Color, ShaderSource};
    use std::cell::RefCell;

    const SHADER: &str = "
        @vertex fn vs_main(@location(0) p: vec3<f32>) -> @builtin(position) vec4<f32> {
            return vec4<f32>(p, 1.0);
        }
        @fragment fn fs_main() -> @location(0) vec4<f32> {
            return vec4<f32>(1.0);
        }
    ";

    #[derive(Default)]
    struct TestHost {
        titles: RefCell<Vec<String>>,
    }

    impl HostShell for TestHost {
        type SurfaceTarget = ();

        fn surface_target(&self) -> Result<(), RenderError> {
            Ok(())
        }

        fn set_window_title(&self, title: &str) {
            self.titles.borrow_mut().push(title.to_string());
        }
    }

    fn config() -> RendererConfig {
        RendererConfig {
            width: 64,
            height: 32,
            debug_layer: true,
            ..RendererConfig::default()
        }
    }

    fn shader() -> ShaderSource {
        ShaderSource::new("test.wgsl", SHADER)
    }

    fn textured() -> Scene {
        dxrt_assets::scenes::textured_triangle(2.0, shader())
    }

    fn colored() -> Scene {
        dxrt_assets::scenes::colored_triangle(2.0, shader())
    }

    fn ready(scene: Scene) -> Renderer<HeadlessBackend> {
        let mut r = Renderer::new(HeadlessBackend::new(), config(), scene);
        r.init(&TestHost::default()).unwrap();
        r
    }

    #[test]
    fn drain_invariant_holds_every_frame() {
        let mut r = ready(colored());
        assert_eq!(r.fence_requested(), 0);
        for k in 1..=5 {
            r.update().unwrap();
            r.render().unwrap();
            assert_eq!(r.fence_requested(), k);
            assert_eq!(r.fence_completed(), r.fence_requested());
        }
        assert!(r.backend().validation_messages().is_empty());
    }

    #[test]
    fn scene_can_be_replaced_until_init() {
        let mut r = Renderer::new(HeadlessBackend::new(), config(), Scene::clear_only());
        r.set_scene(textured()).unwrap();
        r.init(&TestHost::default()).unwrap();
        assert!(r.texture().is_some());
        assert!(matches!(
            r.set_scene(colored()),
            Err(RenderError::WrongState {
                operation: "set scene",
                state: Lifecycle::Ready,
            })
        ));
    }

    #[test]
    fn texture_upload_adds_one_signal() {
        let mut r = ready(textured());
        assert_eq!(r.fence_requested(), 1);
        for _ in 0..3 {
            r.render().unwrap();
        }
        assert_eq!(r.fence_requested(), 4);
        assert_eq!(r.fence_completed(), 4);
    }

    #[test]
    fn back_buffers_are_bracketed_every_frame() {
        let mut r = ready(textured());
        for _ in 0..4 {
            r.render().unwrap();
        }
        let frames: Vec<_> = r
            .backend()
            .executed()
            .into_iter()
            .filter(|b| b.label == "frame")
            .collect();
        assert_eq!(frames.len(), 4);
        for (i, batch) in frames.iter().enumerate() {
            let back = r.back_buffers()[i % 2];
            let mut states = vec![ResourceState::Present];
            states.extend(batch.barriers().filter(|b| b.resource == back).map(|b| b.after));
            assert_eq!(
                states,
                [
                    ResourceState::Present,
                    ResourceState::RenderTarget,
                    ResourceState::Present
                ]
            );
            assert_eq!(batch.draw_count(), 1);
        }
        for &id in r.back_buffers() {
            assert_eq!(r.backend().actual_state(id), Some(ResourceState::Present));
        }
        assert!(r.backend().validation_messages().is_empty());
    }

    #[test]
    fn one_frame_advances_back_buffer_index() {
        let mut r = ready(colored());
        let before = r.current_back_buffer_index().unwrap();
        r.render().unwrap();
        assert_eq!(before, 0);
        assert_eq!(r.current_back_buffer_index(), Some(1));
    }

    #[test]
    fn geometry_view_reports_stride_and_size() {
        let r = ready(textured());
        let vb = r.vertex_buffer().unwrap();
        assert_eq!(vb.view.stride, 20);
        assert_eq!(vb.view.size, 3 * 20);
    }

    #[test]
    fn checkerboard_upload_is_shader_readable() {
        let r = ready(textured());
        let texture = *r.texture().unwrap();
        assert_eq!(
            r.resource_state(texture.id),
            Some(ResourceState::PixelShaderResource)
        );
        assert_eq!(
            r.backend().actual_state(texture.id),
            Some(ResourceState::PixelShaderResource)
        );
        let uploaded = r.backend().texture_contents(texture.id).unwrap();
        assert_eq!(uploaded, dxrt_assets::default_checkerboard());
        // The staging buffer went away with the init fence.
        assert_eq!(r.backend().released().len(), 1);
        assert_eq!(r.pipeline().unwrap().binding.texture_slots, 1);
    }

    #[test]
    fn destroy_twice_releases_once() {
        let mut r = ready(textured());
        r.render().unwrap();
        r.destroy().unwrap();
        let released = r.backend().released();
        r.destroy().unwrap();
        assert_eq!(r.backend().released(), released);
        assert_eq!(r.lifecycle(), Lifecycle::Destroyed);

        let mut unique = released.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), released.len());
        assert_eq!(r.backend().live_resources(), 0);
        assert!(!r.backend().has_device());
        assert!(r.backend().validation_messages().is_empty());
    }

    #[test]
    fn teardown_is_reverse_creation_order() {
        let mut r = ready(colored());
        let vb = r.vertex_buffer().unwrap().view.buffer;
        let backs = r.back_buffers().to_vec();
        r.destroy().unwrap();
        assert_eq!(r.backend().released(), [vec![vb], backs].concat());
        assert_eq!(r.backend().released_pipelines().len(), 1);
    }

    #[test]
    fn render_before_init_is_wrong_state() {
        let mut r = Renderer::new(HeadlessBackend::new(), config(), colored());
        assert!(matches!(
            r.render(),
            Err(RenderError::WrongState {
                operation: "render",
                state: Lifecycle::Uninitialized
            })
        ));
        r.destroy().unwrap();
        assert!(matches!(r.update(), Err(RenderError::WrongState { .. })));
    }

    #[test]
    fn shader_errors_carry_diagnostics_and_abort_init() {
        let broken = ShaderSource::new("broken.wgsl", SHADER).with_entries("vs_main", "ps_main");
        let mut r = Renderer::new(
            HeadlessBackend::new(),
            config(),
            dxrt_assets::scenes::colored_triangle(1.0, broken),
        );
        let err = r.init(&TestHost::default()).unwrap_err();
        match err {
            RenderError::ShaderCompile { shader, diagnostic } => {
                assert_eq!(shader, "broken.wgsl");
                assert!(diagnostic.contains("ps_main"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(r.lifecycle(), Lifecycle::Uninitialized);
        assert!(!r.backend().has_device());
        assert_eq!(r.backend().live_resources(), 0);
    }

    #[test]
    fn lost_surface_is_fatal() {
        let mut r = ready(colored());
        r.backend_mut().lose_surface();
        assert!(matches!(r.render(), Err(RenderError::SurfaceLost(_))));
    }

    #[test]
    fn clear_only_scene_still_presents() {
        let mut r = ready(Scene::clear_only());
        r.render().unwrap();
        let back = r.back_buffers()[0];
        assert_eq!(r.backend().clear_color(back), Some(Color::default()));
        assert_eq!(r.backend().presents(), 1);
        assert!(r.vertex_buffer().is_none());
    }

    #[test]
    fn software_mode_titles_and_adapter() {
        let host = TestHost::default();
        let mut r = Renderer::new(
            HeadlessBackend::new(),
            RendererConfig {
                use_software_adapter: true,
                ..config()
            },
            colored(),
        );
        assert_eq!(r.title(), "DXRT (WARP)");
        r.init(&host).unwrap();
        assert_eq!(r.adapter().unwrap().kind, AdapterKind::Software);
        assert_eq!(*host.titles.borrow(), ["DXRT (WARP): Headless WARP"]);
    }

    #[test]
    fn software_mode_without_software_adapter_fails() {
        let mut r = Renderer::new(
            HeadlessBackend::with_adapters(vec![HeadlessAdapter::new(
                "dgpu",
                AdapterKind::DiscreteGpu,
            )]),
            RendererConfig {
                use_software_adapter: true,
                ..config()
            },
            colored(),
        );
        let err = r.init(&TestHost::default()).unwrap_err();
        assert!(matches!(err, RenderError::NoCompatibleAdapter { .. }));
    }

    #[test]
    fn resize_drains_and_ignores_minimize() {
        let mut r = ready(colored());
        r.render().unwrap();
        r.resize(0, 0).unwrap();
        assert_eq!(r.backend().swapchain_extent(), Some(Extent::new(64, 32)));
        r.resize(128, 64).unwrap();
        assert_eq!(r.backend().swapchain_extent(), Some(Extent::new(128, 64)));
        assert_eq!(r.preferred_surface_size(), Extent::new(128, 64));
        r.render().unwrap();
        let last = r.backend().executed().pop().unwrap();
        assert!(last.commands.iter().any(|c| matches!(
            c,
            Command::SetScissorRect(s) if s.width == 128 && s.height == 64
        )));
    }

    #[test]
    fn held_keys_are_tracked() {
        let mut r = ready(colored());
        r.on_key_down(KeyCode(0x41));
        r.on_key_down(KeyCode(0x41));
        assert!(r.is_key_down(KeyCode(0x41)));
        r.on_key_up(KeyCode(0x41));
        assert!(!r.is_key_down(KeyCode(0x41)));
    }

    #[test]
    fn init_twice_is_rejected() {
        let mut r = ready(colored());
        assert!(matches!(
            r.init(&TestHost::default()),
            Err(RenderError::WrongState { operation: "init", .. })
        ));
    }
}
