//! Marketplace that drives itself: `run()` is called once and keeps pushing
//! offers at its own cadence until closed.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{ExpectedTreatment, ListenerSlot, Marketplace, MarketplaceError, OfferFeed, OfferListener};
use crate::types::OfferBatch;

pub struct StreamingMarketplace {
    name: String,
    feed: Arc<dyn OfferFeed>,
    cadence: Duration,
    slot: ListenerSlot,
}

impl StreamingMarketplace {
    pub fn new(feed: Arc<dyn OfferFeed>, cadence: Duration) -> Self {
        Self {
            name: format!("streaming-{}", feed.name()),
            feed,
            cadence,
            slot: ListenerSlot::new(),
        }
    }
}

#[async_trait]
impl Marketplace for StreamingMarketplace {
    fn name(&self) -> &str {
        &self.name
    }

    fn register_listener(&self, listener: OfferListener) -> bool {
        self.slot.register(listener)
    }

    fn expected_treatment(&self) -> ExpectedTreatment {
        ExpectedTreatment::Listening
    }

    async fn run(&self) -> Result<(), MarketplaceError> {
        let listener = self.slot.start()?;
        let mut ticker = tokio::time::interval(self.cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(marketplace = %self.name, cadence_secs = self.cadence.as_secs_f64(), "Streaming offers");

        loop {
            let fetched = tokio::select! {
                biased;
                _ = self.slot.closed() => break,
                _ = ticker.tick() => tokio::select! {
                    biased;
                    _ = self.slot.closed() => break,
                    fetched = self.feed.fetch() => fetched,
                },
            };

            match fetched {
                Ok(loans) => {
                    debug!(marketplace = %self.name, count = loans.len(), "Pushing offers");
                    match self.slot.deliver(&listener, OfferBatch::new(loans)).await {
                        Ok(()) => {}
                        Err(MarketplaceError::Closed) => break,
                        Err(e) => return Err(e),
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(marketplace = %self.name, error = %e, "Fetch failed, retrying next cycle"),
            }
        }

        debug!(marketplace = %self.name, "Streaming stopped");
        Ok(())
    }

    async fn close(&self) -> Result<(), MarketplaceError> {
        if self.slot.close() {
            info!(marketplace = %self.name, "Marketplace closed");
        }
        Ok(())
    }
}
