//! CPU/GPU synchronization through a monotonic fence.
//!
//! # Invariants
//! - `completed <= requested` at all times.
//! - Every value waited on was produced by an earlier `signal_after`.
//!
//! The renderer signals once per submission and waits on that value right
//! away, so at most one frame is ever in flight.

use crate::backend::GpuBackend;
use crate::error::RenderError;

/// Value of the 64-bit fence counter.
pub type FenceValue = u64;

#[derive(Debug, Default)]
pub struct FrameSynchronizer {
    requested: FenceValue,
}

impl FrameSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last value a signal was enqueued for; 0 before the first signal.
    pub fn requested(&self) -> FenceValue {
        self.requested
    }

    /// Last value the GPU reached.
    pub fn completed<B: GpuBackend>(&self, backend: &B) -> FenceValue {
        backend.completed_fence_value()
    }

    /// Enqueue a signal behind all work submitted so far and return its value.
    pub fn signal_after<B: GpuBackend>(
        &mut self,
        backend: &mut B,
    ) -> Result<FenceValue, RenderError> {
        let value = self.requested + 1;
        backend.signal(value)?;
        self.requested = value;
        tracing::debug!("fence signal enqueued: {value}");
        Ok(value)
    }

    /// Block until the fence reaches `value`.
    ///
    /// Returns immediately if the value already completed; otherwise parks
    /// the thread in the backend's OS-level wait.
    pub fn wait_until<B: GpuBackend>(
        &self,
        backend: &B,
        value: FenceValue,
    ) -> Result<(), RenderError> {
        if value > self.requested {
            return Err(RenderError::UnissuedFenceValue {
                value,
                signaled: self.requested,
            });
        }

        if backend.completed_fence_value() < value {
            backend.wait_for_fence(value)?;
        }

        let completed = backend.completed_fence_value();
        if completed < value || completed > self.requested {
            return Err(RenderError::Validation(format!(
                "fence reports {completed} after waiting for {value} (requested: {})",
                self.requested
            )));
        }
        Ok(())
    }

    /// Wait for everything signaled so far.
    pub fn drain<B: GpuBackend>(&self, backend: &B) -> Result<(), RenderError> {
        if self.requested == 0 {
            return Ok(());
        }
        self.wait_until(backend, self.requested)
    }
}
