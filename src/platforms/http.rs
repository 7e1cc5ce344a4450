//! JSON offer feed over HTTP.
//!
//! Expects the endpoint to return a JSON array of loans in the marketplace's
//! camelCase shape. Only loans still open for investment are kept.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use super::{MarketplaceError, OfferFeed};
use crate::types::Loan;

const USER_AGENT: &str = concat!("autolend/", env!("CARGO_PKG_VERSION"));

pub struct HttpOfferFeed {
    http: Client,
    url: String,
}

impl HttpOfferFeed {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client for the offer feed")?;

        Ok(Self { http, url: url.into() })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Access problems will not fix themselves; everything else might.
fn classify_status(status: StatusCode) -> Option<MarketplaceError> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Some(MarketplaceError::Fatal(anyhow!("Marketplace refused access: {status}")))
    } else if !status.is_success() {
        Some(MarketplaceError::Transient(anyhow!("Marketplace returned {status}")))
    } else {
        None
    }
}

fn open_loans(loans: Vec<Loan>) -> Vec<Loan> {
    loans.into_iter().filter(Loan::is_open).collect()
}

#[async_trait]
impl OfferFeed for HttpOfferFeed {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self) -> Result<Vec<Loan>, MarketplaceError> {
        debug!(url = %self.url, "Fetching offers");

        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .context("Offer feed request failed")
            .map_err(MarketplaceError::Transient)?;

        if let Some(err) = classify_status(resp.status()) {
            return Err(err);
        }

        let loans: Vec<Loan> = resp
            .json()
            .await
            .context("Failed to parse offer feed response")
            .map_err(MarketplaceError::Transient)?;

        let total = loans.len();
        let open = open_loans(loans);
        debug!(total, open = open.len(), "Offers fetched");
        Ok(open)
    }
}
