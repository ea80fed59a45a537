//! Lowering of recorded batches into wgpu-shaped steps.
//!
//! wgpu groups render-target work into render passes and tracks resource
//! states itself. A batch is therefore split into passes: a pass opens at
//! `SetRenderTarget` and closes at the barrier that moves its target out of
//! `RenderTarget`, at a copy, or at the end of the batch. Every draw carries
//! a snapshot of the bindings in effect when it was recorded.

use dxrt_common::Color;
use dxrt_render::command::{
    Command, CommandBatch, PrimitiveTopology, ScissorRect, TextureCopyLayout, VertexBufferView,
    Viewport,
};
use dxrt_render::{PipelineId, RenderError, ResourceId, ResourceState};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bindings {
    pub pipeline: Option<PipelineId>,
    pub texture: Option<ResourceId>,
    pub viewport: Option<Viewport>,
    pub scissor: Option<ScissorRect>,
    pub topology: PrimitiveTopology,
    pub vertex_buffer: Option<VertexBufferView>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCall {
    pub bindings: Bindings,
    pub vertex_count: u32,
    pub instance_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PassPlan {
    pub target: ResourceId,
    /// Cleared on load when set; loaded otherwise.
    pub clear: Option<Color>,
    pub draws: Vec<DrawCall>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Copy {
        source: ResourceId,
        destination: ResourceId,
        layout: TextureCopyLayout,
    },
    Pass(PassPlan),
}

pub fn plan(batch: &CommandBatch) -> Result<Vec<Step>, RenderError> {
    let mut steps = Vec::new();
    let mut open: Option<PassPlan> = None;
    let mut bindings = Bindings {
        pipeline: batch.pipeline,
        texture: None,
        viewport: None,
        scissor: None,
        topology: PrimitiveTopology::TriangleList,
        vertex_buffer: None,
    };

    for command in &batch.commands {
        match command {
            Command::SetRootSignature(id) => bindings.pipeline = Some(*id),
            Command::SetDescriptorTable { texture, .. } => bindings.texture = Some(*texture),
            Command::SetViewport(v) => bindings.viewport = Some(*v),
            Command::SetScissorRect(s) => bindings.scissor = Some(*s),
            Command::SetPrimitiveTopology(t) => bindings.topology = *t,
            Command::SetVertexBuffer(view) => bindings.vertex_buffer = Some(*view),
            Command::SetRenderTarget(target) => {
                steps.extend(open.take().map(Step::Pass));
                open = Some(PassPlan {
                    target: *target,
                    clear: None,
                    draws: Vec::new(),
                });
            }
            Command::ClearRenderTarget { target, color } => match open.as_mut() {
                Some(pass) if pass.target == *target && pass.draws.is_empty() => {
                    pass.clear = Some(*color);
                }
                _ => {
                    steps.extend(open.take().map(Step::Pass));
                    open = Some(PassPlan {
                        target: *target,
                        clear: Some(*color),
                        draws: Vec::new(),
                    });
                }
            },
            Command::Draw {
                vertex_count,
                instance_count,
            } => {
                let pass = open.as_mut().ok_or_else(|| {
                    RenderError::Validation(format!(
                        "batch '{}' draws without a render target",
                        batch.label
                    ))
                })?;
                if bindings.pipeline.is_none() || bindings.vertex_buffer.is_none() {
                    return Err(RenderError::Validation(format!(
                        "batch '{}' draws without a pipeline or vertex buffer",
                        batch.label
                    )));
                }
                pass.draws.push(DrawCall {
                    bindings,
                    vertex_count: *vertex_count,
                    instance_count: *instance_count,
                });
            }
            Command::ResourceBarrier(barrier) => {
                let closes = open.as_ref().is_some_and(|pass| {
                    pass.target == barrier.resource
                        && barrier.before == ResourceState::RenderTarget
                });
                if closes {
                    steps.extend(open.take().map(Step::Pass));
                }
            }
            Command::CopyBufferToTexture {
                source,
                destination,
                layout,
            } => {
                steps.extend(open.take().map(Step::Pass));
                steps.push(Step::Copy {
                    source: *source,
                    destination: *destination,
                    layout: *layout,
                });
            }
        }
    }
    steps.extend(open.take().map(Step::Pass));
    Ok(steps)
}
