//! Resource identity and explicit usage-state tracking.

use std::collections::HashMap;
use std::fmt;

use crate::command::Barrier;
use crate::error::RenderError;

/// Backend-issued identity of a GPU resource (buffer, texture, back buffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u32);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource #{}", self.0)
    }
}

/// Backend-issued identity of an immutable pipeline state object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineId(pub u32);

/// How the GPU is allowed to use a resource at a point in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common,
    GenericRead,
    CopyDest,
    PixelShaderResource,
    RenderTarget,
    Present,
}

/// Last-known state of every resource the recorder may emit barriers for.
///
/// Updated only when a barrier is recorded. A barrier is valid only when its
/// `before` state equals the tracked state.
#[derive(Debug, Clone, Default)]
pub struct StateTracker {
    states: HashMap<ResourceId, ResourceState>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a resource in the state it was created in.
    pub fn register(&mut self, id: ResourceId, state: ResourceState) {
        self.states.insert(id, state);
    }

    pub fn forget(&mut self, id: ResourceId) -> Option<ResourceState> {
        self.states.remove(&id)
    }

    pub fn state(&self, id: ResourceId) -> Option<ResourceState> {
        self.states.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Fail unless `id` is currently tracked in `state`.
    pub fn require(&self, id: ResourceId, state: ResourceState) -> Result<(), RenderError> {
        let actual = self.state(id).ok_or(RenderError::UntrackedResource(id))?;
        if actual != state {
            return Err(RenderError::InvalidTransition {
                resource: id,
                expected: state,
                actual,
            });
        }
        Ok(())
    }

    /// Move `id` from `before` to `after`, returning the barrier to record.
    pub fn transition(
        &mut self,
        id: ResourceId,
        before: ResourceState,
        after: ResourceState,
    ) -> Result<Barrier, RenderError> {
        self.require(id, before)?;
        self.states.insert(id, after);
        Ok(Barrier {
            resource: id,
            before,
            after,
        })
    }
}
