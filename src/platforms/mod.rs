//! Marketplace integrations.
//!
//! Defines the `Marketplace` trait the daemon drives, plus:
//! - `PolledMarketplace`: one fetch-and-deliver cycle per `run()`
//! - `StreamingMarketplace`: a single long `run()` pushing at its own cadence
//! - `HttpOfferFeed`: the JSON offer feed both variants read from
//! - `MarketplaceRegistry`: config-driven selection of the variant

pub mod http;
pub mod polled;
pub mod registry;
pub mod streaming;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::types::{Loan, OfferBatch};

pub use http::HttpOfferFeed;
pub use polled::PolledMarketplace;
pub use registry::MarketplaceRegistry;
pub use streaming::StreamingMarketplace;

/// Sending half of the bounded channel batches are delivered through.
pub type OfferListener = mpsc::Sender<OfferBatch>;

// ---------------------------------------------------------------------------
// Treatment & errors
// ---------------------------------------------------------------------------

/// How a marketplace expects to be driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedTreatment {
    /// Call `run()` repeatedly; each call is one fetch-and-deliver cycle.
    Polled,
    /// Call `run()` once; it blocks and pushes batches until closed.
    Listening,
}

impl fmt::Display for ExpectedTreatment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedTreatment::Polled => write!(f, "polled"),
            ExpectedTreatment::Listening => write!(f, "listening"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MarketplaceError {
    /// Worth retrying on the next cycle.
    #[error("Transient marketplace failure: {0:#}")]
    Transient(anyhow::Error),

    /// The marketplace cannot continue.
    #[error("Fatal marketplace failure: {0:#}")]
    Fatal(anyhow::Error),

    #[error("Marketplace is closed")]
    Closed,

    #[error("No offer listener registered")]
    NoListener,
}

impl MarketplaceError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, MarketplaceError::Fatal(_) | MarketplaceError::NoListener)
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A source of loan offers the daemon can drive.
///
/// `close` must be safe to call from another task while `run` is executing,
/// and more than once.
#[async_trait]
pub trait Marketplace: Send + Sync {
    fn name(&self) -> &str;

    /// Install the listener. Replaces any earlier one; rejected once `run`
    /// has started or the marketplace is closed.
    fn register_listener(&self, listener: OfferListener) -> bool;

    fn expected_treatment(&self) -> ExpectedTreatment;

    async fn run(&self) -> Result<(), MarketplaceError>;

    async fn close(&self) -> Result<(), MarketplaceError>;
}

/// Raw access to currently open offers.
#[async_trait]
pub trait OfferFeed: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<Vec<Loan>, MarketplaceError>;
}

// ---------------------------------------------------------------------------
// Listener slot
// ---------------------------------------------------------------------------

/// Listener bookkeeping shared by marketplace implementations.
#[derive(Default)]
pub struct ListenerSlot {
    listener: Mutex<Option<OfferListener>>,
    started: AtomicBool,
    closed: AtomicBool,
    close_token: CancellationToken,
}

impl ListenerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: OfferListener) -> bool {
        if self.started.load(Ordering::Acquire) || self.is_closed() {
            return false;
        }
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
        true
    }

    /// Mark the marketplace as running and hand out the listener.
    pub fn start(&self) -> Result<OfferListener, MarketplaceError> {
        if self.is_closed() {
            return Err(MarketplaceError::Closed);
        }
        self.started.store(true, Ordering::Release);
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(MarketplaceError::NoListener)
    }

    /// Push a batch, giving up as soon as the marketplace is closed.
    pub async fn deliver(&self, listener: &OfferListener, batch: OfferBatch) -> Result<(), MarketplaceError> {
        if self.is_closed() {
            return Err(MarketplaceError::Closed);
        }
        tokio::select! {
            biased;
            _ = self.close_token.cancelled() => Err(MarketplaceError::Closed),
            sent = listener.send(batch) => sent.map_err(|_| MarketplaceError::Closed),
        }
    }

    /// Returns `true` on the first call only.
    pub fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        self.close_token.cancel();
        if first {
            self.listener.lock().unwrap_or_else(PoisonError::into_inner).take();
        }
        first
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once `close` has been called.
    pub async fn closed(&self) {
        self.close_token.cancelled().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
