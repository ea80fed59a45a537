//! Asset store: GPU-resident static geometry, textures and pipelines.
//!
//! Everything here is built once during init. Staging buffers used by texture
//! uploads stay alive until the fence value of the submission that reads them
//! completes.

use dxrt_common::{Extent, Geometry, ShaderSource, TextureImage, VertexLayout};

use crate::backend::{
    BindingSignature, BufferDesc, BufferUsage, GpuBackend, PipelineDesc, TextureDesc,
    TextureFormat,
};
use crate::command::{Command, PrimitiveTopology, TextureCopyLayout, VertexBufferView};
use crate::error::RenderError;
use crate::recorder::Recording;
use crate::state::{PipelineId, ResourceId, ResourceState};
use crate::sync::FenceValue;

/// Row pitch alignment required of buffer-to-texture copies.
pub const TEXTURE_ROW_PITCH_ALIGNMENT: u32 = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexBufferHandle {
    pub view: VertexBufferView,
    pub layout: VertexLayout,
    pub vertex_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureHandle {
    pub id: ResourceId,
    pub extent: Extent,
    pub format: TextureFormat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineHandle {
    pub id: PipelineId,
    pub label: String,
    pub binding: BindingSignature,
    pub topology: PrimitiveTopology,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owned {
    Resource(ResourceId),
    Pipeline(PipelineId),
}

#[derive(Debug, Clone, Copy)]
struct Staging {
    id: ResourceId,
    /// Fence value of the submission reading it; unknown until submitted.
    retire_at: Option<FenceValue>,
}

#[derive(Debug, Default)]
pub struct AssetStore {
    owned: Vec<Owned>,
    staging: Vec<Staging>,
}

fn align_up(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

impl AssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upload vertex data into a CPU-visible buffer and describe its binding.
    ///
    /// The buffer is readable by the input assembler as created, so no copy
    /// or barrier is recorded.
    pub fn build_static_geometry<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        geometry: &Geometry,
    ) -> Result<VertexBufferHandle, RenderError> {
        if geometry.bytes.is_empty() || geometry.vertex_count == 0 {
            return Err(RenderError::ResourceAllocation(
                "vertex buffer would be empty".into(),
            ));
        }
        let expected = geometry.vertex_count as u64 * geometry.layout.stride as u64;
        if expected != geometry.size_in_bytes() {
            return Err(RenderError::ResourceAllocation(format!(
                "{} vertices of stride {} need {expected} bytes, got {}",
                geometry.vertex_count,
                geometry.layout.stride,
                geometry.size_in_bytes()
            )));
        }

        let buffer = backend.create_buffer(&BufferDesc {
            label: "vertex buffer",
            usage: BufferUsage::Vertex,
            contents: &geometry.bytes,
        })?;
        self.owned.push(Owned::Resource(buffer));

        Ok(VertexBufferHandle {
            view: VertexBufferView {
                buffer,
                stride: geometry.layout.stride,
                size: geometry.size_in_bytes(),
            },
            layout: geometry.layout.clone(),
            vertex_count: geometry.vertex_count,
        })
    }

    /// Create a texture and record its upload into `recording`.
    ///
    /// Records a copy from a staging buffer, then a `COPY_DEST ->
    /// PIXEL_SHADER_RESOURCE` barrier. Call [`AssetStore::retire_staging`]
    /// with the fence value of the submission carrying `recording`.
    pub fn build_texture<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        recording: &mut Recording<'_>,
        image: &TextureImage,
        format: TextureFormat,
    ) -> Result<TextureHandle, RenderError> {
        let extent = Extent::new(image.width, image.height);
        let expected = TextureImage::byte_len(image.width, image.height, format.bytes_per_pixel())
            .ok_or_else(|| {
                RenderError::ResourceAllocation(format!(
                    "{}x{} texture exceeds the {} texel limit",
                    image.width,
                    image.height,
                    TextureImage::MAX_DIMENSION
                ))
            })?;
        if extent.is_empty() || image.pixels.len() != expected {
            return Err(RenderError::ResourceAllocation(format!(
                "{}x{} texture needs {expected} bytes, got {}",
                image.width,
                image.height,
                image.pixels.len()
            )));
        }
        // Both sides are within MAX_DIMENSION, so pitches fit in u32.
        let row_pitch = image.width * format.bytes_per_pixel();

        let texture = backend.create_texture(&TextureDesc { extent, format })?;
        self.owned.push(Owned::Resource(texture));
        recording.track(texture, TextureDesc::INITIAL_STATE);

        let padded_pitch = align_up(row_pitch, TEXTURE_ROW_PITCH_ALIGNMENT);
        let mut staged = vec![0u8; padded_pitch as usize * image.height as usize];
        for (dst, src) in staged
            .chunks_exact_mut(padded_pitch as usize)
            .zip(image.pixels.chunks_exact(row_pitch as usize))
        {
            dst[..src.len()].copy_from_slice(src);
        }

        let staging = backend.create_buffer(&BufferDesc {
            label: "texture staging buffer",
            usage: BufferUsage::Staging,
            contents: &staged,
        })?;
        recording.track(staging, BufferUsage::Staging.initial_state());
        self.staging.push(Staging {
            id: staging,
            retire_at: None,
        });

        recording.push(Command::CopyBufferToTexture {
            source: staging,
            destination: texture,
            layout: TextureCopyLayout {
                bytes_per_row: padded_pitch,
                rows: image.height,
                extent,
            },
        })?;
        recording.barrier(
            texture,
            ResourceState::CopyDest,
            ResourceState::PixelShaderResource,
        )?;

        Ok(TextureHandle {
            id: texture,
            extent,
            format,
        })
    }

    /// Compile the shader stages and bind them to a fixed vertex layout.
    pub fn build_pipeline<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        shader: &ShaderSource,
        vertex_layout: &VertexLayout,
        target_format: TextureFormat,
        binding: BindingSignature,
    ) -> Result<PipelineHandle, RenderError> {
        let topology = PrimitiveTopology::TriangleList;
        let id = backend.create_pipeline(&PipelineDesc {
            label: &shader.label,
            shader,
            vertex_layout,
            target_format,
            topology,
            binding,
        })?;
        self.owned.push(Owned::Pipeline(id));
        tracing::info!("pipeline built from {}", shader.label);

        Ok(PipelineHandle {
            id,
            label: shader.label.clone(),
            binding,
            topology,
        })
    }

    /// Bind every unretired staging buffer to the submission under `value`.
    pub fn retire_staging(&mut self, value: FenceValue) {
        for staging in self.staging.iter_mut().filter(|s| s.retire_at.is_none()) {
            staging.retire_at = Some(value);
        }
    }

    pub fn pending_staging(&self) -> usize {
        self.staging.len()
    }

    /// Release staging buffers whose submission has completed.
    pub fn release_completed<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        completed: FenceValue,
    ) -> Vec<ResourceId> {
        let mut released = Vec::new();
        self.staging.retain(|s| match s.retire_at {
            Some(value) if value <= completed => {
                backend.release_resource(s.id);
                released.push(s.id);
                false
            }
            _ => true,
        });
        if !released.is_empty() {
            tracing::debug!("released {} staging buffer(s)", released.len());
        }
        released
    }

    /// Release everything in reverse creation order. The GPU must be idle.
    pub fn release_all<B: GpuBackend>(&mut self, backend: &mut B) {
        for staging in self.staging.drain(..) {
            backend.release_resource(staging.id);
        }
        while let Some(owned) = self.owned.pop() {
            match owned {
                Owned::Resource(id) => backend.release_resource(id),
                Owned::Pipeline(id) => backend.release_pipeline(id),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessBackend;
    use crate::recorder::FrameRecorder;
    use dxrt_common::{TexturedVertex, VertexType};

    fn device() -> HeadlessBackend {
        let mut backend = HeadlessBackend::new();
        let adapters = backend.enumerate_adapters().unwrap();
        backend.create_device(&adapters[0], true).unwrap();
        backend
    }

    fn triangle() -> [TexturedVertex; 3] {
        [
            TexturedVertex::new([0.0, 0.25, 0.0], [0.5, 0.0]),
            TexturedVertex::new([0.25, -0.25, 0.0], [1.0, 1.0]),
            TexturedVertex::new([-0.25, -0.25, 0.0], [0.0, 1.0]),
        ]
    }

    #[test]
    fn geometry_binding_round_trips() {
        let mut backend = device();
        let mut store = AssetStore::new();
        let verts = triangle();
        let handle = store
            .build_static_geometry(&mut backend, &Geometry::from_vertices(&verts))
            .unwrap();

        let one = std::mem::size_of::<TexturedVertex>();
        assert_eq!(handle.view.stride as usize, one);
        assert_eq!(handle.view.size as usize, verts.len() * one);
        assert_eq!(handle.view.vertex_count(), 3);
        assert_eq!(handle.layout, TexturedVertex::layout());
        assert_eq!(
            backend.buffer_contents(handle.view.buffer).unwrap(),
            bytemuck::cast_slice::<_, u8>(&verts)
        );
    }

    #[test]
    fn empty_geometry_is_rejected() {
        let mut backend = device();
        let mut store = AssetStore::new();
        let empty = Geometry::from_vertices::<TexturedVertex>(&[]);
        assert!(matches!(
            store.build_static_geometry(&mut backend, &empty),
            Err(RenderError::ResourceAllocation(_))
        ));
    }

    #[test]
    fn texture_upload_records_copy_then_barrier() {
        let mut backend = device();
        let mut store = AssetStore::new();
        let mut recorder = FrameRecorder::new();
        let image = TextureImage {
            width: 8,
            height: 2,
            pixels: vec![7; 8 * 2 * 4],
        };

        let mut recording = recorder.begin("init", None, 0).unwrap();
        let texture = store
            .build_texture(&mut backend, &mut recording, &image, TextureFormat::Rgba8Unorm)
            .unwrap();
        let batch = recording.finish().unwrap();

        assert!(matches!(
            batch.commands[0],
            Command::CopyBufferToTexture {
                destination,
                layout: TextureCopyLayout { bytes_per_row: 256, rows: 2, .. },
                ..
            } if destination == texture.id
        ));
        let barriers: Vec<_> = batch.barriers().collect();
        assert_eq!(barriers.len(), 1);
        assert_eq!(barriers[0].after, ResourceState::PixelShaderResource);
        assert_eq!(
            recorder.state(texture.id),
            Some(ResourceState::PixelShaderResource)
        );
        assert_eq!(store.pending_staging(), 1);
    }

    #[test]
    fn staging_outlives_its_submission() {
        let mut backend = device();
        let mut store = AssetStore::new();
        let mut recorder = FrameRecorder::new();
        let image = TextureImage {
            width: 4,
            height: 4,
            pixels: vec![0; 64],
        };
        let mut recording = recorder.begin("init", None, 0).unwrap();
        store
            .build_texture(&mut backend, &mut recording, &image, TextureFormat::Rgba8Unorm)
            .unwrap();
        recording.finish().unwrap();

        // Not yet tied to a submission.
        assert!(store.release_completed(&mut backend, 10).is_empty());

        store.retire_staging(3);
        assert!(store.release_completed(&mut backend, 2).is_empty());
        assert_eq!(store.release_completed(&mut backend, 3).len(), 1);
        assert_eq!(store.pending_staging(), 0);
    }

    #[test]
    fn release_all_is_reverse_creation_order() {
        let mut backend = device();
        let mut store = AssetStore::new();
        let a = store
            .build_static_geometry(&mut backend, &Geometry::from_vertices(&triangle()))
            .unwrap();
        let b = store
            .build_static_geometry(&mut backend, &Geometry::from_vertices(&triangle()))
            .unwrap();
        store.release_all(&mut backend);
        assert_eq!(backend.released(), vec![b.view.buffer, a.view.buffer]);
    }

    #[test]
    fn mis_sized_texture_is_rejected() {
        let mut backend = device();
        let mut store = AssetStore::new();
        let mut recorder = FrameRecorder::new();
        let image = TextureImage {
            width: 4,
            height: 4,
            pixels: vec![0; 10],
        };
        let mut recording = recorder.begin("init", None, 0).unwrap();
        let err = store
            .build_texture(&mut backend, &mut recording, &image, TextureFormat::Rgba8Unorm)
            .unwrap_err();
        assert!(matches!(err, RenderError::ResourceAllocation(_)));
    }

    #[test]
    fn oversized_texture_is_rejected_without_overflow() {
        let mut backend = device();
        let mut store = AssetStore::new();
        let mut recorder = FrameRecorder::new();
        let image = TextureImage {
            width: 65536,
            height: 65536,
            pixels: Vec::new(),
        };
        let mut recording = recorder.begin("init", None, 0).unwrap();
        let err = store
            .build_texture(&mut backend, &mut recording, &image, TextureFormat::Rgba8Unorm)
            .unwrap_err();
        assert!(matches!(err, RenderError::ResourceAllocation(_)));
        assert_eq!(backend.live_resources(), 0);
    }

    #[test]
    fn row_alignment() {
        assert_eq!(align_up(1024, 256), 1024);
        assert_eq!(align_up(32, 256), 256);
        assert_eq!(align_up(257, 256), 512);
    }
}
