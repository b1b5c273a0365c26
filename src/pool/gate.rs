// ABOUTME: Per-host admission gate serializing connect-or-reuse decisions
//
// One gate exists per HostIdentity that has an entry or an in-flight acquire.
// Gates for different hosts are independent, so a slow connect to one host never
// blocks another. A gate may only be retired while nobody holds or waits on it.

use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Mutual-exclusion primitive keyed by host identity
#[derive(Debug, Clone, Default)]
pub struct AdmissionGate {
    inner: Arc<Mutex<()>>,
}

/// Proof of holding a host's gate; released on drop (including cancellation)
#[derive(Debug)]
pub struct GatePass {
    _guard: OwnedMutexGuard<()>,
}

impl AdmissionGate {
    /// Create an unlocked gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to the host's connect decision
    pub async fn enter(&self) -> GatePass {
        GatePass {
            _guard: Arc::clone(&self.inner).lock_owned().await,
        }
    }

    /// Whether this is the only reference, i.e. no caller holds or awaits the gate.
    ///
    /// Only meaningful while the directory's structural guard is held, because
    /// every clone is taken under that guard.
    pub fn is_unused(&self) -> bool {
        Arc::strong_count(&self.inner) == 1
    }

    /// Whether the gate is currently held
    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}
