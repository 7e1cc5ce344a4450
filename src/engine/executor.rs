//! Investment execution.
//!
//! The daemon hands every recommendation to an [`Investor`]. The supplied
//! [`DryRunInvestor`] never touches real money: it simulates investments
//! against a configured balance so strategies can be validated.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};
use uuid::Uuid;

use crate::types::{Investment, PortfolioOverview, Recommendation};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Investor: Send + Sync {
    /// Current account state, fetched before each batch is evaluated.
    async fn portfolio(&self) -> Result<PortfolioOverview>;

    async fn invest(&self, recommendation: &Recommendation) -> Result<Investment>;
}

// ---------------------------------------------------------------------------
// Dry run
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DryRunError {
    #[error("Insufficient balance: {requested} requested, {available} available")]
    InsufficientBalance { requested: Decimal, available: Decimal },

    #[error("Investment amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),
}

pub struct DryRunInvestor {
    balance: Mutex<Decimal>,
    investments: Mutex<Vec<Investment>>,
}

impl DryRunInvestor {
    pub fn new(balance: Decimal) -> Self {
        info!(%balance, "Dry-run investor ready");
        Self {
            balance: Mutex::new(balance),
            investments: Mutex::new(Vec::new()),
        }
    }

    pub fn balance(&self) -> Decimal {
        *self.balance.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn investments(&self) -> Vec<Investment> {
        self.investments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Investor for DryRunInvestor {
    async fn portfolio(&self) -> Result<PortfolioOverview> {
        Ok(PortfolioOverview {
            available_balance: self.balance(),
        })
    }

    async fn invest(&self, recommendation: &Recommendation) -> Result<Investment> {
        let amount = recommendation.amount;
        if amount <= Decimal::ZERO {
            return Err(DryRunError::NonPositiveAmount(amount).into());
        }

        let remaining = {
            let mut balance = self.balance.lock().unwrap_or_else(PoisonError::into_inner);
            if amount > *balance {
                return Err(DryRunError::InsufficientBalance {
                    requested: amount,
                    available: *balance,
                }
                .into());
            }
            *balance -= amount;
            *balance
        };

        let investment = Investment {
            id: format!("dry-run-{}", Uuid::new_v4()),
            loan_id: recommendation.loan_id,
            amount,
            timestamp: Utc::now(),
        };
        info!(
            loan_id = investment.loan_id,
            %amount,
            %remaining,
            "[DRY RUN] Would invest"
        );
        debug!(investment_id = %investment.id, "Simulated investment recorded");
        self.investments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(investment.clone());
        Ok(investment)
    }
}
