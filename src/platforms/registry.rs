//! Config-driven marketplace selection.
//!
//! Maps a marketplace kind from `[marketplace] kind = "..."` to a factory.
//! Populated explicitly at start-up; nothing is discovered at runtime.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::{HttpOfferFeed, Marketplace, PolledMarketplace, StreamingMarketplace};
use crate::config::MarketplaceConfig;
use crate::types::AutolendError;

pub type MarketplaceFactory = Box<dyn Fn(&MarketplaceConfig) -> Result<Arc<dyn Marketplace>> + Send + Sync>;

#[derive(Default)]
pub struct MarketplaceRegistry {
    factories: HashMap<String, MarketplaceFactory>,
}

impl MarketplaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `polled` and `streaming` HTTP marketplaces.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("polled", |cfg| {
            let feed = HttpOfferFeed::new(cfg.url.clone(), Duration::from_secs(cfg.timeout_secs))?;
            Ok(Arc::new(PolledMarketplace::new(Arc::new(feed))))
        });
        registry.register("streaming", |cfg| {
            let feed = HttpOfferFeed::new(cfg.url.clone(), Duration::from_secs(cfg.timeout_secs))?;
            Ok(Arc::new(StreamingMarketplace::new(
                Arc::new(feed),
                Duration::from_secs(cfg.cadence_secs.max(1)),
            )))
        });
        registry
    }

    pub fn register(
        &mut self,
        kind: &str,
        factory: impl Fn(&MarketplaceConfig) -> Result<Arc<dyn Marketplace>> + Send + Sync + 'static,
    ) {
        self.factories.insert(kind.to_lowercase(), Box::new(factory));
    }

    pub fn create(&self, cfg: &MarketplaceConfig) -> Result<Arc<dyn Marketplace>> {
        let factory = self
            .factories
            .get(&cfg.kind.to_lowercase())
            .ok_or_else(|| AutolendError::UnknownComponent {
                kind: "marketplace",
                name: cfg.kind.clone(),
            })?;
        let marketplace = factory(cfg)?;
        info!(
            kind = %cfg.kind,
            marketplace = marketplace.name(),
            treatment = %marketplace.expected_treatment(),
            "Marketplace selected"
        );
        Ok(marketplace)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}
