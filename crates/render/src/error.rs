use crate::renderer::Lifecycle;
use crate::state::{ResourceId, ResourceState};
use crate::sync::FenceValue;

/// Every failure the render core can report.
///
/// Any of these during `init` aborts startup. During the frame loop they are
/// all fatal as well: a skipped frame would leave barrier or fence state
/// inconsistent.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("adapter enumeration failed: {0}")]
    AdapterEnumeration(String),
    #[error("no compatible adapter ({considered} considered, software mode: {software})")]
    NoCompatibleAdapter { considered: usize, software: bool },
    #[error("device creation failed on {adapter}: {reason}")]
    DeviceCreation { adapter: String, reason: String },
    #[error("surface creation failed: {0}")]
    SurfaceCreation(String),
    #[error("shader compilation failed for {shader}:\n{diagnostic}")]
    ShaderCompile { shader: String, diagnostic: String },
    #[error("resource allocation failed: {0}")]
    ResourceAllocation(String),
    #[error("presentation surface lost: {0}")]
    SurfaceLost(String),
    #[error("fence value {value} was never signaled (last signaled: {signaled})")]
    UnissuedFenceValue {
        value: FenceValue,
        signaled: FenceValue,
    },
    #[error("barrier on {resource} expects {expected:?} but tracked state is {actual:?}")]
    InvalidTransition {
        resource: ResourceId,
        expected: ResourceState,
        actual: ResourceState,
    },
    #[error("{0} has no tracked state")]
    UntrackedResource(ResourceId),
    #[error("command allocator is in use until fence value {in_use} (completed: {completed})")]
    AllocatorInUse {
        in_use: FenceValue,
        completed: FenceValue,
    },
    #[error("command list is {0}")]
    CommandListState(&'static str),
    #[error("cannot {operation} while the renderer is {state:?}")]
    WrongState {
        operation: &'static str,
        state: Lifecycle,
    },
    #[error("validation: {0}")]
    Validation(String),
}
