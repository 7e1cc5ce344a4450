//! Marketplace driven by the caller: one fetch per `run()`.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::{ExpectedTreatment, ListenerSlot, Marketplace, MarketplaceError, OfferFeed, OfferListener};
use crate::types::OfferBatch;

pub struct PolledMarketplace {
    name: String,
    feed: Arc<dyn OfferFeed>,
    slot: ListenerSlot,
}

impl PolledMarketplace {
    pub fn new(feed: Arc<dyn OfferFeed>) -> Self {
        Self {
            name: format!("polled-{}", feed.name()),
            feed,
            slot: ListenerSlot::new(),
        }
    }
}

#[async_trait]
impl Marketplace for PolledMarketplace {
    fn name(&self) -> &str {
        &self.name
    }

    fn register_listener(&self, listener: OfferListener) -> bool {
        self.slot.register(listener)
    }

    fn expected_treatment(&self) -> ExpectedTreatment {
        ExpectedTreatment::Polled
    }

    async fn run(&self) -> Result<(), MarketplaceError> {
        let listener = self.slot.start()?;
        let loans = tokio::select! {
            biased;
            _ = self.slot.closed() => return Err(MarketplaceError::Closed),
            loans = self.feed.fetch() => loans?,
        };
        debug!(marketplace = %self.name, count = loans.len(), "Delivering offers");
        // Empty batches are delivered too; the listener decides what to do with them.
        self.slot.deliver(&listener, OfferBatch::new(loans)).await
    }

    async fn close(&self) -> Result<(), MarketplaceError> {
        if self.slot.close() {
            info!(marketplace = %self.name, "Marketplace closed");
        }
        Ok(())
    }
}
