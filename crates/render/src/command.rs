//! Recorded GPU commands, and the allocator/list pair that records them.
//!
//! A [`CommandList`] cycles `Closed -> Recording -> Closed`. Closing yields a
//! [`CommandBatch`], the unit submitted to the queue. The [`CommandAllocator`]
//! backing the list may only be reset once the fence value of its last
//! submission has completed.

use dxrt_common::{Color, Extent};

use crate::error::RenderError;
use crate::state::{PipelineId, ResourceId, ResourceState};
use crate::sync::FenceValue;

/// Explicit usage-state transition of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Barrier {
    pub resource: ResourceId,
    pub before: ResourceState,
    pub after: ResourceState,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn full(extent: Extent) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl ScissorRect {
    pub fn full(extent: Extent) -> Self {
        Self {
            x: 0,
            y: 0,
            width: extent.width,
            height: extent.height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopology {
    TriangleList,
    TriangleStrip,
}

/// How a vertex buffer is bound: its resource, stride and total size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBufferView {
    pub buffer: ResourceId,
    pub stride: u32,
    pub size: u64,
}

impl VertexBufferView {
    pub fn vertex_count(&self) -> u32 {
        if self.stride == 0 {
            return 0;
        }
        (self.size / self.stride as u64) as u32
    }
}

/// Placement of texel rows inside a staging buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureCopyLayout {
    pub bytes_per_row: u32,
    pub rows: u32,
    pub extent: Extent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Bind the binding layout of a pipeline.
    SetRootSignature(PipelineId),
    /// Bind a texture to a pixel-visible descriptor table slot.
    SetDescriptorTable { slot: u32, texture: ResourceId },
    SetViewport(Viewport),
    SetScissorRect(ScissorRect),
    ResourceBarrier(Barrier),
    SetRenderTarget(ResourceId),
    ClearRenderTarget { target: ResourceId, color: Color },
    SetPrimitiveTopology(PrimitiveTopology),
    SetVertexBuffer(VertexBufferView),
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    CopyBufferToTexture {
        source: ResourceId,
        destination: ResourceId,
        layout: TextureCopyLayout,
    },
}

/// A closed command list, ready for submission.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandBatch {
    pub label: &'static str,
    /// Pipeline bound as initial state when the list was reset.
    pub pipeline: Option<PipelineId>,
    pub commands: Vec<Command>,
}

impl CommandBatch {
    pub fn barriers(&self) -> impl Iterator<Item = &Barrier> {
        self.commands.iter().filter_map(|c| match c {
            Command::ResourceBarrier(b) => Some(b),
            _ => None,
        })
    }

    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::Draw { .. }))
            .count()
    }
}

/// Backing storage of a command list.
///
/// Tracks the fence value of the last submission recorded through it.
#[derive(Debug, Default)]
pub struct CommandAllocator {
    in_flight: Option<FenceValue>,
    resets: u64,
}

impl CommandAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset for reuse. Fails while the GPU may still read what it recorded.
    pub fn reset(&mut self, completed: FenceValue) -> Result<(), RenderError> {
        if let Some(in_use) = self.in_flight {
            if completed < in_use {
                return Err(RenderError::AllocatorInUse { in_use, completed });
            }
        }
        self.in_flight = None;
        self.resets += 1;
        Ok(())
    }

    /// Record that a batch from this allocator was submitted under `value`.
    pub fn mark_submitted(&mut self, value: FenceValue) {
        self.in_flight = Some(value);
    }

    pub fn in_flight(&self) -> Option<FenceValue> {
        self.in_flight
    }

    pub fn resets(&self) -> u64 {
        self.resets
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListState {
    Closed,
    Recording,
}

/// Reusable recording target.
#[derive(Debug)]
pub struct CommandList {
    state: ListState,
    label: &'static str,
    pipeline: Option<PipelineId>,
    commands: Vec<Command>,
}

impl Default for CommandList {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandList {
    /// A new list starts closed, like a freshly created list that was closed
    /// right away.
    pub fn new() -> Self {
        Self {
            state: ListState::Closed,
            label: "",
            pipeline: None,
            commands: Vec::new(),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.state == ListState::Recording
    }

    /// Begin recording with `pipeline` as the initial pipeline state.
    pub fn reset(
        &mut self,
        label: &'static str,
        pipeline: Option<PipelineId>,
    ) -> Result<(), RenderError> {
        if self.state == ListState::Recording {
            return Err(RenderError::CommandListState("still recording"));
        }
        self.state = ListState::Recording;
        self.label = label;
        self.pipeline = pipeline;
        self.commands.clear();
        Ok(())
    }

    pub fn push(&mut self, command: Command) -> Result<(), RenderError> {
        if self.state != ListState::Recording {
            return Err(RenderError::CommandListState("closed"));
        }
        self.commands.push(command);
        Ok(())
    }

    /// Abandon the current recording without producing a batch.
    pub fn discard(&mut self) {
        self.state = ListState::Closed;
        self.commands.clear();
    }

    /// Finalize the recording for submission.
    pub fn close(&mut self) -> Result<CommandBatch, RenderError> {
        if self.state != ListState::Recording {
            return Err(RenderError::CommandListState("already closed"));
        }
        self.state = ListState::Closed;
        Ok(CommandBatch {
            label: self.label,
            pipeline: self.pipeline,
            commands: std::mem::take(&mut self.commands),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_refuses_reset_while_in_flight() {
        let mut alloc = CommandAllocator::new();
        alloc.reset(0).unwrap();
        alloc.mark_submitted(4);

        let err = alloc.reset(3).unwrap_err();
        assert!(matches!(
            err,
            RenderError::AllocatorInUse {
                in_use: 4,
                completed: 3
            }
        ));
        alloc.reset(4).unwrap();
        assert_eq!(alloc.in_flight(), None);
        assert_eq!(alloc.resets(), 2);
    }

    #[test]
    fn list_lifecycle() {
        let mut list = CommandList::new();
        assert!(list.push(Command::SetRenderTarget(ResourceId(0))).is_err());

        list.reset("frame", Some(PipelineId(1))).unwrap();
        assert!(list.reset("frame", None).is_err());
        list.push(Command::Draw {
            vertex_count: 3,
            instance_count: 1,
        })
        .unwrap();

        let batch = list.close().unwrap();
        assert_eq!(batch.label, "frame");
        assert_eq!(batch.pipeline, Some(PipelineId(1)));
        assert_eq!(batch.draw_count(), 1);
        assert!(list.close().is_err());
    }

    #[test]
    fn discard_returns_to_closed() {
        let mut list = CommandList::new();
        list.reset("init", None).unwrap();
        list.discard();
        assert!(!list.is_recording());
        list.reset("init", None).unwrap();
    }

    #[test]
    fn vertex_view_count() {
        let view = VertexBufferView {
            buffer: ResourceId(2),
            stride: 20,
            size: 60,
        };
        assert_eq!(view.vertex_count(), 3);
    }
}
