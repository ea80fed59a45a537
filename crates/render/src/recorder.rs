//! Frame recorder: turns one frame into one closed [`CommandBatch`].
//!
//! # Invariants
//! - Every barrier's `before` state equals the tracked state of its resource.
//! - A back buffer is in `RenderTarget` whenever a clear or draw targets it,
//!   and is back in `Present` when the batch closes.
//! - Tracked states change only when a recording finishes. An abandoned
//!   recording leaves them as they were.

use dxrt_common::{Color, Extent};

use crate::command::{
    Command, CommandAllocator, CommandBatch, CommandList, PrimitiveTopology, ScissorRect,
    VertexBufferView, Viewport,
};
use crate::error::RenderError;
use crate::state::{PipelineId, ResourceId, ResourceState, StateTracker};
use crate::surface::RenderTargetView;
use crate::sync::FenceValue;

/// What one frame draws, resolved from the asset store's handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawSet {
    pub pipeline: PipelineId,
    pub vertex_buffer: VertexBufferView,
    pub vertex_count: u32,
    pub topology: PrimitiveTopology,
    /// Bound to descriptor table slot 0.
    pub texture: Option<ResourceId>,
}

/// Owns the command allocator, the command list and the committed resource
/// states.
#[derive(Debug, Default)]
pub struct FrameRecorder {
    allocator: CommandAllocator,
    list: CommandList,
    tracker: StateTracker,
}

/// An open recording. Works on a scratch copy of the tracked states, which
/// replaces the committed copy only on [`Recording::finish`].
#[derive(Debug)]
pub struct Recording<'a> {
    list: &'a mut CommandList,
    committed: &'a mut StateTracker,
    scratch: StateTracker,
    finished: bool,
}

impl Recording<'_> {
    /// Track a resource created while this recording is open.
    pub fn track(&mut self, id: ResourceId, state: ResourceState) {
        self.scratch.register(id, state);
    }

    pub fn state(&self, id: ResourceId) -> Option<ResourceState> {
        self.scratch.state(id)
    }

    pub fn push(&mut self, command: Command) -> Result<(), RenderError> {
        self.list.push(command)
    }

    /// Record a transition after checking `before` against the tracked state.
    pub fn barrier(
        &mut self,
        id: ResourceId,
        before: ResourceState,
        after: ResourceState,
    ) -> Result<(), RenderError> {
        let barrier = self.scratch.transition(id, before, after)?;
        self.list.push(Command::ResourceBarrier(barrier))
    }

    pub fn require(&self, id: ResourceId, state: ResourceState) -> Result<(), RenderError> {
        self.scratch.require(id, state)
    }

    /// Close the list and commit the states it leaves resources in.
    pub fn finish(mut self) -> Result<CommandBatch, RenderError> {
        let batch = self.list.close()?;
        *self.committed = std::mem::take(&mut self.scratch);
        self.finished = true;
        Ok(batch)
    }
}

impl Drop for Recording<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.list.discard();
        }
    }
}

impl FrameRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the allocator and the list, then open a recording.
    ///
    /// `completed` is the fence's completed value; the allocator refuses to
    /// reset while its last submission is still running.
    pub fn begin(
        &mut self,
        label: &'static str,
        pipeline: Option<PipelineId>,
        completed: FenceValue,
    ) -> Result<Recording<'_>, RenderError> {
        self.allocator.reset(completed)?;
        self.list.reset(label, pipeline)?;
        Ok(Recording {
            list: &mut self.list,
            scratch: self.tracker.clone(),
            committed: &mut self.tracker,
            finished: false,
        })
    }

    pub fn register(&mut self, id: ResourceId, state: ResourceState) {
        self.tracker.register(id, state);
    }

    pub fn forget(&mut self, id: ResourceId) {
        self.tracker.forget(id);
    }

    pub fn state(&self, id: ResourceId) -> Option<ResourceState> {
        self.tracker.state(id)
    }

    /// The batch last closed from this recorder went out under `value`.
    pub fn mark_submitted(&mut self, value: FenceValue) {
        self.allocator.mark_submitted(value);
    }

    pub fn allocator(&self) -> &CommandAllocator {
        &self.allocator
    }

    /// Record one frame into `target`, clearing it and drawing `draw` if any.
    pub fn record_frame(
        &mut self,
        completed: FenceValue,
        target: RenderTargetView,
        draw: Option<&DrawSet>,
        clear: Color,
        extent: Extent,
    ) -> Result<CommandBatch, RenderError> {
        let mut rec = self.begin("frame", draw.map(|d| d.pipeline), completed)?;

        if let Some(draw) = draw {
            rec.push(Command::SetRootSignature(draw.pipeline))?;
            if let Some(texture) = draw.texture {
                rec.require(texture, ResourceState::PixelShaderResource)?;
                rec.push(Command::SetDescriptorTable { slot: 0, texture })?;
            }
        }
        rec.push(Command::SetViewport(Viewport::full(extent)))?;
        rec.push(Command::SetScissorRect(ScissorRect::full(extent)))?;

        rec.barrier(
            target.resource,
            ResourceState::Present,
            ResourceState::RenderTarget,
        )?;

        rec.require(target.resource, ResourceState::RenderTarget)?;
        rec.push(Command::SetRenderTarget(target.resource))?;
        rec.push(Command::ClearRenderTarget {
            target: target.resource,
            color: clear,
        })?;

        if let Some(draw) = draw {
            rec.require(draw.vertex_buffer.buffer, ResourceState::GenericRead)?;
            rec.push(Command::SetPrimitiveTopology(draw.topology))?;
            rec.push(Command::SetVertexBuffer(draw.vertex_buffer))?;
            rec.push(Command::Draw {
                vertex_count: draw.vertex_count,
                instance_count: 1,
            })?;
        }

        rec.barrier(
            target.resource,
            ResourceState::RenderTarget,
            ResourceState::Present,
        )?;
        rec.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BACK: ResourceId = ResourceId(1);
    const VB: ResourceId = ResourceId(2);
    const TEX: ResourceId = ResourceId(3);

    fn recorder() -> FrameRecorder {
        let mut r = FrameRecorder::new();
        r.register(BACK, ResourceState::Present);
        r.register(VB, ResourceState::GenericRead);
        r.register(TEX, ResourceState::PixelShaderResource);
        r
    }

    fn target() -> RenderTargetView {
        RenderTargetView {
            index: 0,
            resource: BACK,
        }
    }

    fn draw_set(texture: Option<ResourceId>) -> DrawSet {
        DrawSet {
            pipeline: PipelineId(7),
            vertex_buffer: VertexBufferView {
                buffer: VB,
                stride: 20,
                size: 60,
            },
            vertex_count: 3,
            topology: PrimitiveTopology::TriangleList,
            texture,
        }
    }

    fn back_buffer_states(batch: &CommandBatch) -> Vec<ResourceState> {
        let mut states = vec![ResourceState::Present];
        states.extend(
            batch
                .barriers()
                .filter(|b| b.resource == BACK)
                .map(|b| b.after),
        );
        states
    }

    #[test]
    fn frame_follows_recording_order() {
        let mut r = recorder();
        let draw = draw_set(Some(TEX));
        let extent = Extent::new(640, 480);
        let batch = r
            .record_frame(0, target(), Some(&draw), Color::default(), extent)
            .unwrap();

        assert_eq!(batch.pipeline, Some(PipelineId(7)));
        let expected = [
            Command::SetRootSignature(PipelineId(7)),
            Command::SetDescriptorTable { slot: 0, texture: TEX },
            Command::SetViewport(Viewport::full(extent)),
            Command::SetScissorRect(ScissorRect::full(extent)),
            Command::ResourceBarrier(crate::command::Barrier {
                resource: BACK,
                before: ResourceState::Present,
                after: ResourceState::RenderTarget,
            }),
            Command::SetRenderTarget(BACK),
            Command::ClearRenderTarget {
                target: BACK,
                color: Color::default(),
            },
            Command::SetPrimitiveTopology(PrimitiveTopology::TriangleList),
            Command::SetVertexBuffer(draw.vertex_buffer),
            Command::Draw {
                vertex_count: 3,
                instance_count: 1,
            },
            Command::ResourceBarrier(crate::command::Barrier {
                resource: BACK,
                before: ResourceState::RenderTarget,
                after: ResourceState::Present,
            }),
        ];
        assert_eq!(batch.commands, expected);
    }

    #[test]
    fn back_buffer_is_bracketed() {
        let mut r = recorder();
        for completed in 0..3 {
            let batch = r
                .record_frame(
                    completed,
                    target(),
                    Some(&draw_set(None)),
                    Color::BLACK,
                    Extent::new(8, 8),
                )
                .unwrap();
            r.mark_submitted(completed + 1);
            assert_eq!(
                back_buffer_states(&batch),
                [
                    ResourceState::Present,
                    ResourceState::RenderTarget,
                    ResourceState::Present
                ]
            );
        }
        assert_eq!(r.state(BACK), Some(ResourceState::Present));
    }

    #[test]
    fn no_draw_is_recorded_while_presenting() {
        let mut r = recorder();
        let batch = r
            .record_frame(0, target(), Some(&draw_set(None)), Color::BLACK, Extent::new(8, 8))
            .unwrap();

        let mut state = ResourceState::Present;
        for command in &batch.commands {
            match command {
                Command::ResourceBarrier(b) if b.resource == BACK => state = b.after,
                Command::Draw { .. } | Command::ClearRenderTarget { .. } => {
                    assert_eq!(state, ResourceState::RenderTarget)
                }
                _ => {}
            }
        }
    }

    #[test]
    fn clear_only_frame_binds_nothing() {
        let mut r = recorder();
        let batch = r
            .record_frame(0, target(), None, Color::BLACK, Extent::new(8, 8))
            .unwrap();
        assert_eq!(batch.pipeline, None);
        assert_eq!(batch.draw_count(), 0);
        assert!(!batch
            .commands
            .iter()
            .any(|c| matches!(c, Command::SetRootSignature(_))));
        assert_eq!(batch.barriers().count(), 2);
    }

    #[test]
    fn mismatched_state_fails_and_keeps_tracker() {
        let mut r = recorder();
        r.register(BACK, ResourceState::RenderTarget);
        let err = r
            .record_frame(0, target(), None, Color::BLACK, Extent::new(8, 8))
            .unwrap_err();
        assert!(matches!(err, RenderError::InvalidTransition { .. }));
        assert_eq!(r.state(BACK), Some(ResourceState::RenderTarget));

        // The list was discarded, so the next recording can start.
        r.register(BACK, ResourceState::Present);
        r.record_frame(0, target(), None, Color::BLACK, Extent::new(8, 8))
            .unwrap();
    }

    #[test]
    fn allocator_in_flight_blocks_recording() {
        let mut r = recorder();
        r.record_frame(0, target(), None, Color::BLACK, Extent::new(8, 8))
            .unwrap();
        r.mark_submitted(1);
        let err = r
            .record_frame(0, target(), None, Color::BLACK, Extent::new(8, 8))
            .unwrap_err();
        assert!(matches!(err, RenderError::AllocatorInUse { in_use: 1, completed: 0 }));
    }

    #[test]
    fn unbarriered_texture_is_rejected() {
        let mut r = recorder();
        r.register(TEX, ResourceState::CopyDest);
        let err = r
            .record_frame(
                0,
                target(),
                Some(&draw_set(Some(TEX))),
                Color::BLACK,
                Extent::new(8, 8),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            RenderError::InvalidTransition {
                actual: ResourceState::CopyDest,
                ..
            }
        ));
    }
}
