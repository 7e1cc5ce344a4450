//! Shutdown coordination and the shared daemon context.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::events::EventBus;
use crate::scheduler::Scheduler;

// ---------------------------------------------------------------------------
// ShutdownSignal
// ---------------------------------------------------------------------------

/// Single-use permission for the daemon to terminate.
///
/// Clones share the same signal. Waiting before the grant suspends; waiting
/// after it returns immediately.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    granted: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { granted: Arc::new(tx) }
    }

    /// Returns `true` on the first call only.
    pub fn grant(&self) -> bool {
        let first = self.granted.send_if_modified(|granted| {
            if *granted {
                false
            } else {
                *granted = true;
                true
            }
        });
        if first {
            info!("Shutdown granted");
        } else {
            debug!("Shutdown already granted");
        }
        first
    }

    pub fn is_granted(&self) -> bool {
        *self.granted.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.granted.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|granted| *granted).await;
    }
}

// ---------------------------------------------------------------------------
// DaemonContext
// ---------------------------------------------------------------------------

/// Process-wide collaborators handed to the daemon at construction.
#[derive(Clone)]
pub struct DaemonContext {
    pub shutdown: ShutdownSignal,
    pub scheduler: Scheduler,
    pub events: Arc<EventBus>,
}

impl DaemonContext {
    pub fn new(scheduler: Scheduler, events: Arc<EventBus>) -> Self {
        Self {
            shutdown: ShutdownSignal::new(),
            scheduler,
            events,
        }
    }
}
