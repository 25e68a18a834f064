//! Activation gate for the coordinator.
//!
//! Exactly one process in a fleet is designated to run jobs, and it may only
//! start once its store is ready. The two signals arrive independently and
//! in either order; the gate opens when both have been seen.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

#[derive(Debug)]
struct Flags {
    designated: watch::Sender<bool>,
    store_ready: watch::Sender<bool>,
}

/// Two latching flags, `designated` and `store_ready`. Clones share state.
#[derive(Debug, Clone)]
pub struct ActivationGate {
    flags: Arc<Flags>,
}

impl Default for ActivationGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivationGate {
    pub fn new() -> Self {
        let (designated, _) = watch::channel(false);
        let (store_ready, _) = watch::channel(false);
        Self {
            flags: Arc::new(Flags {
                designated,
                store_ready,
            }),
        }
    }

    /// Mark this process as the fleet's job processor. Idempotent.
    pub fn designate(&self) {
        if !self.flags.designated.send_replace(true) {
            info!(
                subsystem = "jobs",
                component = "gate",
                op = "designate",
                "Designated as job processor"
            );
        }
    }

    /// Mark the job store as reachable and migrated. Idempotent.
    pub fn mark_store_ready(&self) {
        if !self.flags.store_ready.send_replace(true) {
            info!(
                subsystem = "jobs",
                component = "gate",
                op = "store_ready",
                "Job store ready"
            );
        }
    }

    pub fn is_designated(&self) -> bool {
        *self.flags.designated.borrow()
    }

    pub fn is_store_ready(&self) -> bool {
        *self.flags.store_ready.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.is_designated() && self.is_store_ready()
    }

    /// Resolve once both flags are set.
    pub async fn wait_active(&self) {
        let mut designated = self.flags.designated.subscribe();
        let mut store_ready = self.flags.store_ready.subscribe();
        // Senders live as long as `self`, so waits only end on a `true`.
        let _ = designated.wait_for(|v| *v).await;
        let _ = store_ready.wait_for(|v| *v).await;
    }
}
