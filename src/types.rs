//! Shared types for the autolend daemon.
//!
//! These types form the data model passed between the marketplace,
//! strategy, and engine modules. They are plain payloads so that
//! every module can depend on them without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Loan
// ---------------------------------------------------------------------------

/// A loan offered on the marketplace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    pub id: u64,
    /// Total amount requested by the borrower.
    pub amount: Decimal,
    /// Amount still open for investment.
    pub remaining_investment: Decimal,
    pub rating: Rating,
    /// Yearly interest rate as a fraction (0.0–1.0).
    pub interest_rate: Decimal,
    pub date_published: DateTime<Utc>,
}

impl fmt::Display for Loan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Loan #{} ({} | {:.2}% | remaining {} of {})",
            self.id,
            self.rating,
            self.interest_rate * Decimal::ONE_HUNDRED,
            self.remaining_investment,
            self.amount,
        )
    }
}

impl Loan {
    /// Whether the loan can still take investments.
    pub fn is_open(&self) -> bool {
        self.remaining_investment > Decimal::ZERO
    }

    /// Helper to build a test loan with sensible defaults.
    pub fn sample(id: u64, rating: Rating) -> Self {
        Loan {
            id,
            amount: Decimal::from(100_000),
            remaining_investment: Decimal::from(50_000),
            rating,
            interest_rate: Decimal::new(899, 4),
            date_published: Utc::now(),
        }
    }
}

/// Risk rating assigned to a loan by the marketplace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rating {
    AAAAA,
    AAAA,
    AAA,
    AA,
    A,
    B,
    C,
    D,
}

impl Rating {
    /// All ratings, best first.
    pub const ALL: &'static [Rating] = &[
        Rating::AAAAA,
        Rating::AAAA,
        Rating::AAA,
        Rating::AA,
        Rating::A,
        Rating::B,
        Rating::C,
        Rating::D,
    ];

    /// Human-facing code as shown on the marketplace.
    pub fn code(&self) -> &'static str {
        match self {
            Rating::AAAAA => "A**",
            Rating::AAAA => "A*",
            Rating::AAA => "A++",
            Rating::AA => "A+",
            Rating::A => "A",
            Rating::B => "B",
            Rating::C => "C",
            Rating::D => "D",
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Parses either the enum name (`AAA`) or the marketplace code (`A++`).
impl std::str::FromStr for Rating {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Rating::ALL
            .iter()
            .copied()
            .find(|r| r.code().eq_ignore_ascii_case(s) || format!("{r:?}").eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::anyhow!("Unknown rating: {s}"))
    }
}

// ---------------------------------------------------------------------------
// Offer batch
// ---------------------------------------------------------------------------

/// Loans delivered by the marketplace in one polling cycle.
#[derive(Debug, Clone)]
pub struct OfferBatch {
    pub id: Uuid,
    pub received_at: DateTime<Utc>,
    pub loans: Vec<Loan>,
}

impl OfferBatch {
    pub fn new(loans: Vec<Loan>) -> Self {
        Self {
            id: Uuid::new_v4(),
            received_at: Utc::now(),
            loans,
        }
    }

    pub fn len(&self) -> usize {
        self.loans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loans.is_empty()
    }
}

impl fmt::Display for OfferBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch {} ({} loans)", self.id, self.loans.len())
    }
}

// ---------------------------------------------------------------------------
// Strategy & execution payloads
// ---------------------------------------------------------------------------

/// A strategy's decision to invest into a loan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub loan_id: u64,
    pub amount: Decimal,
    /// Whether a human must confirm before the money is committed.
    pub confirmation_required: bool,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invest {} into loan #{}", self.amount, self.loan_id)
    }
}

/// An investment made (or simulated) into a loan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Investment {
    pub id: String,
    pub loan_id: u64,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Account state handed to the strategy alongside each batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioOverview {
    pub available_balance: Decimal,
}

// ---------------------------------------------------------------------------
// Return codes
// ---------------------------------------------------------------------------

/// Final status reported to the process for translation into an exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnCode {
    Ok,
    Error,
}

impl ReturnCode {
    pub fn exit_code(&self) -> u8 {
        match self {
            ReturnCode::Ok => 0,
            ReturnCode::Error => 1,
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnCode::Ok => write!(f, "OK"),
            ReturnCode::Error => write!(f, "ERROR"),
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for autolend.
#[derive(Debug, thiserror::Error)]
pub enum AutolendError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Marketplace {0} rejected the offer listener")]
    ListenerRejected(String),

    #[error("Missing secret: {0}")]
    MissingSecret(String),

    #[error("Invalid credentials request: {0}")]
    InvalidCredentials(String),

    #[error("Unknown {kind}: {name}")]
    UnknownComponent { kind: &'static str, name: String },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
