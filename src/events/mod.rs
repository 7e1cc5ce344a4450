//! Daemon lifecycle and investment events.
//!
//! Events are fired through an [`EventBus`] to every registered
//! [`EventListener`]. A failing listener is logged and skipped; it never
//! affects the daemon or the other listeners.

use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::types::{AutolendError, Investment, Recommendation};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    DaemonStarted {
        daemon: String,
        marketplace: String,
    },
    InvestmentRequested {
        batch_id: Uuid,
        recommendation: Recommendation,
    },
    BatchEvaluated {
        batch_id: Uuid,
        offered: usize,
        investments: Vec<Investment>,
    },
    BatchFailed {
        batch_id: Uuid,
        reason: String,
    },
    DaemonEnding {
        daemon: String,
    },
    DaemonCrashed {
        daemon: String,
        cause: String,
    },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::DaemonStarted { .. } => "daemon_started",
            Event::InvestmentRequested { .. } => "investment_requested",
            Event::BatchEvaluated { .. } => "batch_evaluated",
            Event::BatchFailed { .. } => "batch_failed",
            Event::DaemonEnding { .. } => "daemon_ending",
            Event::DaemonCrashed { .. } => "daemon_crashed",
        }
    }

    /// Whether the event describes the outcome of one offer batch.
    pub fn is_evaluation(&self) -> bool {
        matches!(self, Event::BatchEvaluated { .. } | Event::BatchFailed { .. })
    }
}

// ---------------------------------------------------------------------------
// Listeners & bus
// ---------------------------------------------------------------------------

pub trait EventListener: Send + Sync {
    fn name(&self) -> &str;

    fn handle(&self, event: &Event) -> Result<()>;
}

/// Writes every event to the log.
pub struct LogListener;

impl EventListener for LogListener {
    fn name(&self) -> &str {
        "log"
    }

    fn handle(&self, event: &Event) -> Result<()> {
        match event {
            Event::DaemonStarted { daemon, marketplace } => {
                info!(%daemon, %marketplace, "Daemon started")
            }
            Event::InvestmentRequested { batch_id, recommendation } => {
                info!(%batch_id, loan_id = recommendation.loan_id, amount = %recommendation.amount, "Investment requested")
            }
            Event::BatchEvaluated { batch_id, offered, investments } => {
                info!(%batch_id, offered, invested = investments.len(), "Batch evaluated")
            }
            Event::BatchFailed { batch_id, reason } => {
                warn!(%batch_id, %reason, "Batch failed")
            }
            Event::DaemonEnding { daemon } => info!(%daemon, "Daemon ending"),
            Event::DaemonCrashed { daemon, cause } => warn!(%daemon, %cause, "Daemon crashed"),
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn EventListener>) {
        debug!(listener = listener.name(), "Event listener registered");
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn fire(&self, event: Event) {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner).clone();
        for listener in listeners {
            if let Err(e) = listener.handle(&event) {
                warn!(
                    listener = listener.name(),
                    event = event.kind(),
                    error = %e,
                    "Event listener failed"
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub type ListenerFactory = Box<dyn Fn() -> Arc<dyn EventListener> + Send + Sync>;

/// Named listener factories, selected by `[events] listeners = [...]`.
#[derive(Default)]
pub struct ListenerRegistry {
    factories: HashMap<String, ListenerFactory>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("log", || Arc::new(LogListener));
        registry
    }

    pub fn register(
        &mut self,
        name: &str,
        factory: impl Fn() -> Arc<dyn EventListener> + Send + Sync + 'static,
    ) {
        self.factories.insert(name.to_lowercase(), Box::new(factory));
    }

    /// Build a bus with one listener per name. Unknown names are an error.
    pub fn build(&self, names: &[String]) -> Result<EventBus> {
        let bus = EventBus::new();
        for name in names {
            let factory = self
                .factories
                .get(&name.to_lowercase())
                .ok_or_else(|| AutolendError::UnknownComponent {
                    kind: "event listener",
                    name: name.clone(),
                })?;
            bus.register(factory());
        }
        Ok(bus)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
