//! Rating-based strategy.
//!
//! Invests a fixed amount into every open loan whose rating is listed,
//! as long as the balance stays above a floor.
//!
//! ```toml
//! minimum_balance = 200
//!
//! [amounts]
//! "A++" = 400
//! B = 200
//! ```

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

use super::{InvestmentStrategy, StrategyError};
use crate::types::{Loan, PortfolioOverview, Rating, Recommendation};

#[derive(Debug, Deserialize)]
struct RatingStrategyFile {
    #[serde(default)]
    minimum_balance: Decimal,
    #[serde(default)]
    confirm_above: Option<Decimal>,
    amounts: HashMap<String, Decimal>,
}

#[derive(Debug, Clone)]
pub struct RatingStrategy {
    minimum_balance: Decimal,
    confirm_above: Option<Decimal>,
    amounts: HashMap<Rating, Decimal>,
}

impl RatingStrategy {
    pub fn parse(text: &str) -> Result<Self> {
        let file: RatingStrategyFile = toml::from_str(text).context("Invalid strategy file")?;
        let mut amounts = HashMap::new();
        for (code, amount) in file.amounts {
            let rating: Rating = code.parse()?;
            if amount <= Decimal::ZERO {
                anyhow::bail!("Amount for rating {rating} must be positive");
            }
            amounts.insert(rating, amount);
        }
        Ok(Self {
            minimum_balance: file.minimum_balance,
            confirm_above: file.confirm_above,
            amounts,
        })
    }

    pub fn amount_for(&self, rating: Rating) -> Option<Decimal> {
        self.amounts.get(&rating).copied()
    }
}

impl InvestmentStrategy for RatingStrategy {
    fn name(&self) -> &str {
        "rating"
    }

    fn recommend(
        &self,
        loans: &[Loan],
        portfolio: &PortfolioOverview,
    ) -> Result<Vec<Recommendation>, StrategyError> {
        let mut balance = portfolio.available_balance;
        let mut recommendations = Vec::new();

        for loan in loans.iter().filter(|l| l.is_open()) {
            let Some(amount) = self.amount_for(loan.rating) else {
                continue;
            };
            let amount = amount.min(loan.remaining_investment);
            if balance - amount < self.minimum_balance {
                debug!(loan_id = loan.id, %balance, "Balance floor reached");
                break;
            }
            balance -= amount;
            recommendations.push(Recommendation {
                loan_id: loan.id,
                amount,
                confirmation_required: self.confirm_above.is_some_and(|limit| amount > limit),
            });
        }

        Ok(recommendations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn portfolio(balance: Decimal) -> PortfolioOverview {
        PortfolioOverview { available_balance: balance }
    }

    #[test]
    fn test_parse_codes_and_names() {
        let s = RatingStrategy::parse("[amounts]\n\"A++\" = 400\nB = 200\n").unwrap();
        assert_eq!(s.amount_for(Rating::AAA), Some(dec!(400)));
        assert_eq!(s.amount_for(Rating::B), Some(dec!(200)));
        assert_eq!(s.amount_for(Rating::D), None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(RatingStrategy::parse("not toml at all [").is_err());
        assert!(RatingStrategy::parse("[amounts]\nZ = 1\n").is_err());
        assert!(RatingStrategy::parse("[amounts]\nA = -5\n").is_err());
    }

    #[test]
    fn test_recommends_only_listed_ratings() {
        let s = RatingStrategy::parse("[amounts]\nA = 200\n").unwrap();
        let loans = vec![Loan::sample(1, Rating::A), Loan::sample(2, Rating::D)];
        let recs = s.recommend(&loans, &portfolio(dec!(10000))).unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].loan_id, 1);
        assert!(!recs[0].confirmation_required);
    }

    #[test]
    fn test_respects_minimum_balance() {
        let s = RatingStrategy::parse("minimum_balance = 500\n[amounts]\nA = 200\n").unwrap();
        let loans: Vec<Loan> = (1..=5).map(|id| Loan::sample(id, Rating::A)).collect();
        let recs = s.recommend(&loans, &portfolio(dec!(1000))).unwrap();
        assert_eq!(recs.len(), 2);
    }

    #[test]
    fn test_caps_at_remaining_investment() {
        let s = RatingStrategy::parse("[amounts]\nA = 200\n").unwrap();
        let mut loan = Loan::sample(1, Rating::A);
        loan.remaining_investment = dec!(50);
        let recs = s.recommend(&[loan], &portfolio(dec!(1000))).unwrap();
        assert_eq!(recs[0].amount, dec!(50));
    }

    #[test]
    fn test_confirmation_threshold() {
        let s = RatingStrategy::parse("confirm_above = 300\n[amounts]\nA = 400\nB = 100\n").unwrap();
        let loans = vec![Loan::sample(1, Rating::A), Loan::sample(2, Rating::B)];
        let recs = s.recommend(&loans, &portfolio(dec!(10000))).unwrap();
        assert!(recs[0].confirmation_required);
        assert!(!recs[1].confirmation_required);
    }
}
