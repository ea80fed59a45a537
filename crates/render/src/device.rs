//! Device context: adapter selection and device/queue creation.

use crate::backend::{AdapterDesc, GpuBackend};
use crate::error::RenderError;

/// Order in which adapters are tried.
///
/// In software mode only software adapters are candidates. Otherwise software
/// adapters are skipped, and with `prefer_high_performance` the hardware
/// adapters are tried most powerful first (stable within a class).
pub fn candidate_adapters(
    adapters: &[AdapterDesc],
    prefer_high_performance: bool,
    use_software: bool,
) -> Vec<&AdapterDesc> {
    let mut candidates: Vec<&AdapterDesc> = adapters
        .iter()
        .filter(|a| a.kind.is_software() == use_software)
        .collect();

    if prefer_high_performance && !use_software {
        candidates.sort_by_key(|a| std::cmp::Reverse(a.kind.power_rank()));
    }
    candidates
}

/// Owns the selected adapter's device and graphics queue.
#[derive(Debug)]
pub struct DeviceContext {
    adapter: AdapterDesc,
    debug_layer: bool,
}

impl DeviceContext {
    /// Create a device on the first candidate adapter that accepts it.
    ///
    /// `debug_layer` only adds diagnostics; it never changes what is drawn.
    pub fn initialize<B: GpuBackend>(
        backend: &mut B,
        prefer_high_performance: bool,
        use_software_fallback: bool,
        debug_layer: bool,
    ) -> Result<Self, RenderError> {
        let adapters = backend.enumerate_adapters()?;
        let candidates =
            candidate_adapters(&adapters, prefer_high_performance, use_software_fallback);

        for adapter in &candidates {
            match backend.create_device(adapter, debug_layer) {
                Ok(()) => {
                    tracing::info!(
                        "device created on {} ({:?}, {})",
                        adapter.name,
                        adapter.kind,
                        adapter.backend
                    );
                    return Ok(Self {
                        adapter: (*adapter).clone(),
                        debug_layer,
                    });
                }
                Err(e) => tracing::warn!("skipping adapter {}: {e}", adapter.name),
            }
        }

        Err(RenderError::NoCompatibleAdapter {
            considered: candidates.len(),
            software: use_software_fallback,
        })
    }

    pub fn adapter(&self) -> &AdapterDesc {
        &self.adapter
    }

    pub fn is_software(&self) -> bool {
        self.adapter.kind.is_software()
    }

    pub fn debug_layer(&self) -> bool {
        self.debug_layer
    }

    /// Destroy the device. Every other GPU object must already be released.
    pub fn release<B: GpuBackend>(self, backend: &mut B) {
        backend.release_device();
        tracing::info!("device on {} released", self.adapter.name);
    }
}
