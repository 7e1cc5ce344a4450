//! Investment strategy boundary.
//!
//! The daemon treats the strategy as a black box: it gets a batch of offers
//! plus the current portfolio and returns what to invest into. The active
//! strategy lives in a [`RefreshableCell`] so edits to the strategy file are
//! picked up without a restart.

pub mod rating;

use std::path::Path;
use std::sync::Arc;

use crate::refresh::{FileSource, RefreshableCell};
use crate::types::{Loan, PortfolioOverview, Recommendation};

pub use rating::RatingStrategy;

/// Hot-reloadable strategy slot.
pub type StrategyCell = RefreshableCell<Box<dyn InvestmentStrategy>>;

#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    /// Only this batch is affected; the daemon keeps going.
    #[error("Batch evaluation failed: {0:#}")]
    Batch(anyhow::Error),

    /// The daemon cannot safely continue.
    #[error("Unrecoverable strategy failure: {0:#}")]
    Unrecoverable(anyhow::Error),
}

/// Decides which offers to invest into.
pub trait InvestmentStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn recommend(
        &self,
        loans: &[Loan],
        portfolio: &PortfolioOverview,
    ) -> Result<Vec<Recommendation>, StrategyError>;
}

/// A strategy cell reading a [`RatingStrategy`] from `path`.
pub fn rating_strategy_cell(path: impl AsRef<Path>) -> Arc<StrategyCell> {
    let source = FileSource::new(path.as_ref(), |text: &str| {
        let strategy: Box<dyn InvestmentStrategy> = Box::new(RatingStrategy::parse(text)?);
        Ok(strategy)
    });
    Arc::new(RefreshableCell::new("strategy", source))
}
