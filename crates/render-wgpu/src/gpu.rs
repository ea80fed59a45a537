use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dxrt_common::{Color, Extent, TextureImage, VertexFormat, VertexLayout};
use dxrt_render::backend::{
    AdapterDesc, AdapterKind, BufferDesc, BufferUsage, GpuBackend, PipelineDesc, SwapchainDesc,
    SwapchainInfo, TextureDesc, TextureFormat,
};
use dxrt_render::command::{CommandBatch, PrimitiveTopology, TextureCopyLayout};
use dxrt_render::{FenceValue, PipelineId, RenderError, ResourceId, ResourceState};
use parking_lot::Mutex;
use wgpu::util::DeviceExt;

use crate::encode::{self, DrawCall, PassPlan, Step};

fn to_wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
    }
}

fn from_wgpu_format(format: wgpu::TextureFormat) -> Option<TextureFormat> {
    match format {
        wgpu::TextureFormat::Rgba8Unorm => Some(TextureFormat::Rgba8Unorm),
        wgpu::TextureFormat::Bgra8Unorm => Some(TextureFormat::Bgra8Unorm),
        _ => None,
    }
}

fn to_wgpu_vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
    match format {
        VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
        VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
        VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
    }
}

fn to_wgpu_topology(topology: PrimitiveTopology) -> wgpu::PrimitiveTopology {
    match topology {
        PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
        PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
    }
}

fn to_wgpu_color(color: Color) -> wgpu::Color {
    wgpu::Color {
        r: color.r as f64,
        g: color.g as f64,
        b: color.b as f64,
        a: color.a as f64,
    }
}

fn adapter_kind(device_type: wgpu::DeviceType) -> AdapterKind {
    match device_type {
        wgpu::DeviceType::DiscreteGpu => AdapterKind::DiscreteGpu,
        wgpu::DeviceType::IntegratedGpu => AdapterKind::IntegratedGpu,
        wgpu::DeviceType::VirtualGpu => AdapterKind::VirtualGpu,
        wgpu::DeviceType::Cpu => AdapterKind::Software,
        wgpu::DeviceType::Other => AdapterKind::Other,
    }
}

fn vertex_attributes(layout: &VertexLayout) -> Vec<wgpu::VertexAttribute> {
    layout
        .attributes
        .iter()
        .map(|a| wgpu::VertexAttribute {
            format: to_wgpu_vertex_format(a.format),
            offset: a.offset as u64,
            shader_location: a.location,
        })
        .collect()
}

/// Static point sampler of the texture table.
///
/// Addresses outside `[0, 1]` read transparent black when the device has
/// border clamping, and clamp to the edge texel otherwise.
fn static_sampler(border_clamp: bool) -> wgpu::SamplerDescriptor<'static> {
    let (address_mode, border_color) = if border_clamp {
        (
            wgpu::AddressMode::ClampToBorder,
            Some(wgpu::SamplerBorderColor::TransparentBlack),
        )
    } else {
        (wgpu::AddressMode::ClampToEdge, None)
    };
    wgpu::SamplerDescriptor {
        label: Some("static_point_sampler"),
        address_mode_u: address_mode,
        address_mode_v: address_mode,
        address_mode_w: address_mode,
        mag_filter: wgpu::FilterMode::Nearest,
        min_filter: wgpu::FilterMode::Nearest,
        mipmap_filter: wgpu::FilterMode::Nearest,
        border_color,
        ..Default::default()
    }
}

/// wgpu bakes topology into the pipeline, so the recorded one must agree.
fn check_topology(draw: &DrawCall, baked: PrimitiveTopology) -> Result<(), RenderError> {
    if draw.bindings.topology == baked {
        Ok(())
    } else {
        Err(RenderError::Validation(format!(
            "draw binds {:?} but its pipeline was built for {baked:?}",
            draw.bindings.topology
        )))
    }
}

struct Gpu {
    /// Position in `WgpuBackend::adapters`.
    adapter: usize,
    device: wgpu::Device,
    queue: wgpu::Queue,
    border_clamp: bool,
}

struct Swapchain {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    back_buffers: Vec<ResourceId>,
    current: u32,
    /// Surface texture acquired for the current back buffer, if any.
    frame: Option<(wgpu::SurfaceTexture, wgpu::TextureView)>,
}

struct Texture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct Pipeline {
    pipeline: wgpu::RenderPipeline,
    /// Layout of the texture table and its static point sampler.
    table: Option<(wgpu::BindGroupLayout, wgpu::Sampler)>,
    topology: PrimitiveTopology,
}

/// [`GpuBackend`] over wgpu.
///
/// wgpu tracks resource states and hazards itself, so recorded barriers are
/// checked against the backend's own view of each resource and used to split
/// render passes. The fence is emulated with an empty submission per signal
/// and a work-done callback.
pub struct WgpuBackend {
    instance: wgpu::Instance,
    adapters: Vec<wgpu::Adapter>,
    gpu: Option<Gpu>,
    swapchain: Option<Swapchain>,
    buffers: HashMap<ResourceId, wgpu::Buffer>,
    textures: HashMap<ResourceId, Texture>,
    pipelines: HashMap<PipelineId, Pipeline>,
    bind_groups: HashMap<(PipelineId, ResourceId), wgpu::BindGroup>,
    states: HashMap<ResourceId, ResourceState>,
    submissions: VecDeque<(FenceValue, wgpu::SubmissionIndex)>,
    completed: Arc<AtomicU64>,
    device_errors: Arc<Mutex<Vec<String>>>,
    debug_layer: bool,
    next_id: u32,
}

impl WgpuBackend {
    /// `debug_layer` turns on the API validation layers of the native backend.
    pub fn new(debug_layer: bool) -> Self {
        let flags = if debug_layer {
            wgpu::InstanceFlags::debugging()
        } else {
            wgpu::InstanceFlags::empty()
        };
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags,
            ..Default::default()
        });
        Self {
            instance,
            adapters: Vec::new(),
            gpu: None,
            swapchain: None,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            pipelines: HashMap::new(),
            bind_groups: HashMap::new(),
            states: HashMap::new(),
            submissions: VecDeque::new(),
            completed: Arc::new(AtomicU64::new(0)),
            device_errors: Arc::default(),
            debug_layer,
            next_id: 1,
        }
    }

    /// Uncaptured device errors reported so far.
    pub fn device_errors(&self) -> Vec<String> {
        self.device_errors.lock().clone()
    }

    fn gpu(&self) -> Result<&Gpu, RenderError> {
        self.gpu
            .as_ref()
            .ok_or_else(|| RenderError::Validation("no device".into()))
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Run `create` inside an error scope and turn a captured error into
    /// `on_error`.
    fn scoped<T>(
        &self,
        filter: wgpu::ErrorFilter,
        create: impl FnOnce(&wgpu::Device) -> T,
        on_error: impl FnOnce(wgpu::Error) -> RenderError,
    ) -> Result<T, RenderError> {
        let device = &self.gpu()?.device;
        device.push_error_scope(filter);
        let value = create(device);
        match pollster::block_on(device.pop_error_scope()) {
            Some(error) => Err(on_error(error)),
            None => Ok(value),
        }
    }

    fn check_barriers(&mut self, batch: &CommandBatch) -> Result<(), RenderError> {
        for barrier in batch.barriers() {
            let actual = self.states.get(&barrier.resource).copied();
            if actual != Some(barrier.before) {
                let message = format!(
                    "batch '{}': barrier on {} expects {:?}, resource is {actual:?}",
                    batch.label, barrier.resource, barrier.before
                );
                tracing::warn!("{message}");
                if self.debug_layer {
                    return Err(RenderError::Validation(message));
                }
            }
            self.states.insert(barrier.resource, barrier.after);
        }
        Ok(())
    }

    fn acquire_frame(&mut self) -> Result<(), RenderError> {
        let swapchain = self
            .swapchain
            .as_mut()
            .ok_or_else(|| RenderError::SurfaceLost("no swapchain".into()))?;
        if swapchain.frame.is_some() {
            return Ok(());
        }
        let texture = swapchain
            .surface
            .get_current_texture()
            .map_err(|e| RenderError::SurfaceLost(e.to_string()))?;
        let view = texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        swapchain.frame = Some((texture, view));
        Ok(())
    }

    fn is_back_buffer(&self, id: ResourceId) -> bool {
        self.swapchain
            .as_ref()
            .is_some_and(|s| s.back_buffers.contains(&id))
    }

    fn ensure_bind_group(
        &mut self,
        pipeline: PipelineId,
        texture: ResourceId,
    ) -> Result<(), RenderError> {
        if self.bind_groups.contains_key(&(pipeline, texture)) {
            return Ok(());
        }
        let Some((layout, sampler)) = self.pipelines.get(&pipeline).and_then(|p| p.table.as_ref())
        else {
            return Err(RenderError::Validation(
                "descriptor table bound to a pipeline without texture slots".into(),
            ));
        };
        let view = &self
            .textures
            .get(&texture)
            .ok_or(RenderError::UntrackedResource(texture))?
            .view;
        let bind_group = self.gpu()?.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("texture_table"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        });
        self.bind_groups.insert((pipeline, texture), bind_group);
        Ok(())
    }

    fn encode_copy(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        source: ResourceId,
        destination: ResourceId,
        layout: TextureCopyLayout,
    ) -> Result<(), RenderError> {
        let buffer = self
            .buffers
            .get(&source)
            .ok_or(RenderError::UntrackedResource(source))?;
        let texture = &self
            .textures
            .get(&destination)
            .ok_or(RenderError::UntrackedResource(destination))?
            .texture;
        encoder.copy_buffer_to_texture(
            wgpu::TexelCopyBufferInfo {
                buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(layout.bytes_per_row),
                    rows_per_image: Some(layout.rows),
                },
            },
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: layout.extent.width,
                height: layout.extent.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn encode_pass(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        pass: &PassPlan,
    ) -> Result<(), RenderError> {
        if self.is_back_buffer(pass.target) {
            self.acquire_frame()?;
        }
        for draw in &pass.draws {
            if let (Some(pipeline), Some(texture)) = (draw.bindings.pipeline, draw.bindings.texture)
            {
                self.ensure_bind_group(pipeline, texture)?;
            }
        }

        let view = if self.is_back_buffer(pass.target) {
            self.swapchain
                .as_ref()
                .and_then(|s| s.frame.as_ref())
                .map(|(_, view)| view)
        } else {
            self.textures.get(&pass.target).map(|t| &t.view)
        }
        .ok_or(RenderError::UntrackedResource(pass.target))?;

        let load = match pass.clear {
            Some(color) => wgpu::LoadOp::Clear(to_wgpu_color(color)),
            None => wgpu::LoadOp::Load,
        };
        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("frame_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            ..Default::default()
        });
        for draw in &pass.draws {
            self.encode_draw(&mut rpass, draw)?;
        }
        Ok(())
    }

    fn encode_draw(
        &self,
        rpass: &mut wgpu::RenderPass<'_>,
        draw: &DrawCall,
    ) -> Result<(), RenderError> {
        let b = &draw.bindings;
        let pipeline_id = b
            .pipeline
            .ok_or_else(|| RenderError::Validation("draw without a pipeline".into()))?;
        let pipeline = self
            .pipelines
            .get(&pipeline_id)
            .ok_or_else(|| RenderError::Validation("draw with a released pipeline".into()))?;
        let view = b
            .vertex_buffer
            .ok_or_else(|| RenderError::Validation("draw without a vertex buffer".into()))?;
        let buffer = self
            .buffers
            .get(&view.buffer)
            .ok_or(RenderError::UntrackedResource(view.buffer))?;

        check_topology(draw, pipeline.topology)?;
        rpass.set_pipeline(&pipeline.pipeline);
        if let Some(texture) = b.texture {
            if let Some(group) = self.bind_groups.get(&(pipeline_id, texture)) {
                rpass.set_bind_group(0, group, &[]);
            }
        }
        if let Some(v) = b.viewport {
            rpass.set_viewport(v.x, v.y, v.width, v.height, v.min_depth, v.max_depth);
        }
        if let Some(s) = b.scissor {
            rpass.set_scissor_rect(s.x, s.y, s.width, s.height);
        }
        rpass.set_vertex_buffer(0, buffer.slice(..view.size));
        rpass.draw(0..draw.vertex_count, 0..draw.instance_count);
        Ok(())
    }
}

impl GpuBackend for WgpuBackend {
    type SurfaceTarget = wgpu::SurfaceTarget<'static>;

    fn enumerate_adapters(&mut self) -> Result<Vec<AdapterDesc>, RenderError> {
        self.adapters = self.instance.enumerate_adapters(wgpu::Backends::all());
        if self.adapters.is_empty() {
            return Err(RenderError::AdapterEnumeration(
                "no adapters exposed by any backend".into(),
            ));
        }
        Ok(self
            .adapters
            .iter()
            .enumerate()
            .map(|(index, adapter)| {
                let info = adapter.get_info();
                AdapterDesc {
                    index,
                    name: info.name,
                    kind: adapter_kind(info.device_type),
                    backend: info.backend.to_str().to_string(),
                }
            })
            .collect())
    }

    fn create_device(
        &mut self,
        adapter: &AdapterDesc,
        debug_layer: bool,
    ) -> Result<(), RenderError> {
        let wgpu_adapter = self.adapters.get(adapter.index).ok_or_else(|| {
            RenderError::DeviceCreation {
                adapter: adapter.name.clone(),
                reason: "adapter is no longer enumerated".into(),
            }
        })?;
        let limits = wgpu::Limits::downlevel_defaults().using_resolution(wgpu_adapter.limits());
        let features = wgpu_adapter.features() & wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER;
        let (device, queue) = pollster::block_on(wgpu_adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("dxrt_device"),
                required_features: features,
                required_limits: limits,
                memory_hints: Default::default(),
            },
            None,
        ))
        .map_err(|e| RenderError::DeviceCreation {
            adapter: adapter.name.clone(),
            reason: e.to_string(),
        })?;

        let errors = Arc::clone(&self.device_errors);
        device.on_uncaptured_error(Box::new(move |error| {
            tracing::error!("uncaptured device error: {error}");
            errors.lock().push(error.to_string());
        }));

        self.debug_layer = debug_layer;
        let border_clamp = features.contains(wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER);
        if !border_clamp {
            tracing::info!("{}: no border clamping, sampler clamps to edge", adapter.name);
        }
        self.gpu = Some(Gpu {
            adapter: adapter.index,
            device,
            queue,
            border_clamp,
        });
        Ok(())
    }

    fn create_swapchain(
        &mut self,
        target: wgpu::SurfaceTarget<'static>,
        desc: &SwapchainDesc,
    ) -> Result<SwapchainInfo, RenderError> {
        let surface = self
            .instance
            .create_surface(target)
            .map_err(|e| RenderError::SurfaceCreation(e.to_string()))?;
        let gpu = self
            .gpu
            .as_ref()
            .ok_or_else(|| RenderError::SurfaceCreation("no device".into()))?;

        let adapter = self
            .adapters
            .get(gpu.adapter)
            .ok_or_else(|| RenderError::SurfaceCreation("adapter went away".into()))?;
        let caps = surface.get_capabilities(adapter);
        let wanted = to_wgpu_format(desc.format);
        let format = if caps.formats.contains(&wanted) {
            wanted
        } else {
            caps.formats
                .iter()
                .copied()
                .find(|f| from_wgpu_format(*f).is_some())
                .ok_or_else(|| {
                    RenderError::SurfaceCreation(format!(
                        "surface supports none of RGBA8/BGRA8 unorm: {:?}",
                        caps.formats
                    ))
                })?
        };
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: desc.extent.width,
            height: desc.extent.height,
            present_mode: if desc.vsync {
                wgpu::PresentMode::Fifo
            } else {
                wgpu::PresentMode::AutoNoVsync
            },
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: desc.buffer_count.saturating_sub(1).max(1),
        };
        surface.configure(&gpu.device, &config);

        let back_buffers: Vec<_> = (0..desc.buffer_count)
            .map(|_| ResourceId(self.allocate_id()))
            .collect();
        for &id in &back_buffers {
            self.states.insert(id, ResourceState::Present);
        }
        self.swapchain = Some(Swapchain {
            surface,
            config,
            back_buffers: back_buffers.clone(),
            current: 0,
            frame: None,
        });

        let format = from_wgpu_format(format).unwrap_or(desc.format);
        Ok(SwapchainInfo {
            back_buffers,
            format,
        })
    }

    fn resize_swapchain(&mut self, extent: Extent) -> Result<(), RenderError> {
        let gpu = self
            .gpu
            .as_ref()
            .ok_or_else(|| RenderError::Validation("no device".into()))?;
        let swapchain = self
            .swapchain
            .as_mut()
            .ok_or_else(|| RenderError::Validation("no swapchain".into()))?;
        swapchain.frame = None;
        swapchain.config.width = extent.width;
        swapchain.config.height = extent.height;
        swapchain.surface.configure(&gpu.device, &swapchain.config);
        Ok(())
    }

    fn current_back_buffer_index(&self) -> u32 {
        self.swapchain.as_ref().map_or(0, |s| s.current)
    }

    /// The sync interval is fixed by the present mode chosen at creation.
    fn present(&mut self, _sync_interval: u32) -> Result<(), RenderError> {
        self.acquire_frame()?;
        let swapchain = self
            .swapchain
            .as_mut()
            .ok_or_else(|| RenderError::SurfaceLost("no swapchain".into()))?;
        if let Some((texture, _view)) = swapchain.frame.take() {
            texture.present();
        }
        swapchain.current = (swapchain.current + 1) % swapchain.back_buffers.len().max(1) as u32;
        Ok(())
    }

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<ResourceId, RenderError> {
        let usage = match desc.usage {
            BufferUsage::Vertex => wgpu::BufferUsages::VERTEX,
            BufferUsage::Staging => wgpu::BufferUsages::COPY_SRC,
        };
        let buffer = self.scoped(
            wgpu::ErrorFilter::OutOfMemory,
            |device| {
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(desc.label),
                    contents: desc.contents,
                    usage,
                })
            },
            |e| RenderError::ResourceAllocation(format!("{}: {e}", desc.label)),
        )?;
        let id = ResourceId(self.allocate_id());
        self.buffers.insert(id, buffer);
        self.states.insert(id, desc.usage.initial_state());
        Ok(id)
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<ResourceId, RenderError> {
        let (width, height) = (desc.extent.width, desc.extent.height);
        if TextureImage::byte_len(width, height, desc.format.bytes_per_pixel()).is_none() {
            return Err(RenderError::ResourceAllocation(format!(
                "{width}x{height} texture exceeds the device limits"
            )));
        }
        let texture = self.scoped(
            wgpu::ErrorFilter::OutOfMemory,
            |device| {
                device.create_texture(&wgpu::TextureDescriptor {
                    label: Some("scene_texture"),
                    size: wgpu::Extent3d {
                        width: desc.extent.width,
                        height: desc.extent.height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: to_wgpu_format(desc.format),
                    usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                })
            },
            |e| RenderError::ResourceAllocation(e.to_string()),
        )?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = ResourceId(self.allocate_id());
        self.textures.insert(id, Texture { texture, view });
        self.states.insert(id, TextureDesc::INITIAL_STATE);
        Ok(id)
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc<'_>) -> Result<PipelineId, RenderError> {
        let shader_error = |e: wgpu::Error| RenderError::ShaderCompile {
            shader: desc.label.to_string(),
            diagnostic: e.to_string(),
        };
        let module = self.scoped(
            wgpu::ErrorFilter::Validation,
            |device| {
                device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(desc.label),
                    source: wgpu::ShaderSource::Wgsl(desc.shader.code.as_str().into()),
                })
            },
            shader_error,
        )?;

        let gpu = self.gpu()?;
        let device = &gpu.device;
        let table = (desc.binding.texture_slots > 0).then(|| {
            let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("texture_table_layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            multisampled: false,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ],
            });
            let sampler = device.create_sampler(&static_sampler(gpu.border_clamp));
            (layout, sampler)
        });

        let bind_group_layouts: Vec<&wgpu::BindGroupLayout> =
            table.iter().map(|(layout, _)| layout).collect();
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("root_signature"),
            bind_group_layouts: &bind_group_layouts,
            push_constant_ranges: &[],
        });
        let attributes = vertex_attributes(desc.vertex_layout);

        let pipeline = self.scoped(
            wgpu::ErrorFilter::Validation,
            |device| {
                device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(desc.label),
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &module,
                        entry_point: Some(desc.shader.vertex_entry.as_str()),
                        compilation_options: Default::default(),
                        buffers: &[wgpu::VertexBufferLayout {
                            array_stride: desc.vertex_layout.stride as u64,
                            step_mode: wgpu::VertexStepMode::Vertex,
                            attributes: &attributes,
                        }],
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &module,
                        entry_point: Some(desc.shader.pixel_entry.as_str()),
                        compilation_options: Default::default(),
                        targets: &[Some(wgpu::ColorTargetState {
                            format: to_wgpu_format(desc.target_format),
                            blend: Some(wgpu::BlendState::REPLACE),
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                    }),
                    primitive: wgpu::PrimitiveState {
                        topology: to_wgpu_topology(desc.topology),
                        cull_mode: None,
                        ..Default::default()
                    },
                    depth_stencil: None,
                    multisample: Default::default(),
                    multiview: None,
                    cache: None,
                })
            },
            shader_error,
        )?;

        let id = PipelineId(self.allocate_id());
        self.pipelines.insert(
            id,
            Pipeline {
                pipeline,
                table,
                topology: desc.topology,
            },
        );
        Ok(id)
    }

    fn execute(&mut self, batch: &CommandBatch) -> Result<(), RenderError> {
        let steps = encode::plan(batch)?;
        self.check_barriers(batch)?;

        let mut encoder = self
            .gpu()?
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(batch.label),
            });
        for step in &steps {
            match step {
                Step::Copy {
                    source,
                    destination,
                    layout,
                } => self.encode_copy(&mut encoder, *source, *destination, *layout)?,
                Step::Pass(pass) => self.encode_pass(&mut encoder, pass)?,
            }
        }
        self.gpu()?.queue.submit(std::iter::once(encoder.finish()));
        tracing::debug!("submitted batch '{}' ({} steps)", batch.label, steps.len());
        Ok(())
    }

    fn signal(&mut self, value: FenceValue) -> Result<(), RenderError> {
        let gpu = self.gpu()?;
        let index = gpu.queue.submit(std::iter::empty::<wgpu::CommandBuffer>());
        let completed = Arc::clone(&self.completed);
        gpu.queue.on_submitted_work_done(move || {
            completed.fetch_max(value, Ordering::AcqRel);
        });
        self.submissions.push_back((value, index));
        while self.submissions.len() > 16 {
            self.submissions.pop_front();
        }
        Ok(())
    }

    fn completed_fence_value(&self) -> FenceValue {
        if let Some(gpu) = &self.gpu {
            gpu.device.poll(wgpu::Maintain::Poll);
        }
        self.completed.load(Ordering::Acquire)
    }

    fn wait_for_fence(&self, value: FenceValue) -> Result<(), RenderError> {
        let gpu = self.gpu()?;
        let signaled = self.submissions.back().map_or(0, |(v, _)| *v);
        if value > signaled {
            return Err(RenderError::UnissuedFenceValue { value, signaled });
        }
        let index = self
            .submissions
            .iter()
            .find(|(v, _)| *v >= value)
            .map(|(_, index)| index.clone());
        let maintain = match index {
            Some(index) => wgpu::Maintain::WaitForSubmissionIndex(index),
            None => wgpu::Maintain::Wait,
        };
        gpu.device.poll(maintain);
        while self.completed.load(Ordering::Acquire) < value {
            gpu.device.poll(wgpu::Maintain::Wait);
        }
        Ok(())
    }

    fn release_resource(&mut self, id: ResourceId) {
        self.states.remove(&id);
        self.bind_groups.retain(|(_, texture), _| *texture != id);
        if let Some(buffer) = self.buffers.remove(&id) {
            buffer.destroy();
        } else if let Some(texture) = self.textures.remove(&id) {
            texture.texture.destroy();
        }
    }

    fn release_pipeline(&mut self, id: PipelineId) {
        self.bind_groups.retain(|(pipeline, _), _| *pipeline != id);
        self.pipelines.remove(&id);
    }

    fn release_swapchain(&mut self) {
        if let Some(swapchain) = self.swapchain.take() {
            for id in &swapchain.back_buffers {
                self.states.remove(id);
            }
        }
    }

    fn release_device(&mut self) {
        self.submissions.clear();
        if let Some(gpu) = self.gpu.take() {
            gpu.device.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::Bindings;

    fn draw(topology: PrimitiveTopology) -> DrawCall {
        DrawCall {
            bindings: Bindings {
                pipeline: Some(PipelineId(1)),
                texture: None,
                viewport: None,
                scissor: None,
                topology,
                vertex_buffer: None,
            },
            vertex_count: 3,
            instance_count: 1,
        }
    }

    #[test]
    fn topology_must_match_the_pipeline() {
        let list = PrimitiveTopology::TriangleList;
        assert!(check_topology(&draw(list), list).is_ok());
        let err = check_topology(
            &draw(PrimitiveTopology::TriangleStrip),
            PrimitiveTopology::TriangleList,
        )
        .unwrap_err();
        assert!(matches!(err, RenderError::Validation(_)));
    }

    #[test]
    fn sampler_reads_transparent_black_outside_with_border_clamp() {
        let desc = static_sampler(true);
        assert_eq!(desc.address_mode_u, wgpu::AddressMode::ClampToBorder);
        assert_eq!(desc.address_mode_v, wgpu::AddressMode::ClampToBorder);
        assert_eq!(
            desc.border_color,
            Some(wgpu::SamplerBorderColor::TransparentBlack)
        );
        assert_eq!(desc.mag_filter, wgpu::FilterMode::Nearest);
    }

    #[test]
    fn sampler_falls_back_to_edge_clamp() {
        let desc = static_sampler(false);
        assert_eq!(desc.address_mode_u, wgpu::AddressMode::ClampToEdge);
        assert_eq!(desc.border_color, None);
    }
}
