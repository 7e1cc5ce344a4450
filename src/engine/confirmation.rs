//! Confirmation of investments the strategy will not make on its own.
//!
//! A recommendation flagged `confirmation_required` is only invested once a
//! [`ConfirmationProvider`] approves it. Providers are looked up by tool id
//! in a [`ConfirmationRegistry`], using [`Credentials`] parsed from config.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::secrets::{Credentials, SecretProvider};
use crate::types::{AutolendError, Recommendation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Approved,
    Rejected,
}

impl fmt::Display for Confirmation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confirmation::Approved => write!(f, "approved"),
            Confirmation::Rejected => write!(f, "rejected"),
        }
    }
}

#[async_trait]
pub trait ConfirmationProvider: Send + Sync {
    fn id(&self) -> &str;

    async fn confirm(&self, recommendation: &Recommendation) -> Result<Confirmation>;
}

/// Approves every request.
pub struct ApproveAll;

#[async_trait]
impl ConfirmationProvider for ApproveAll {
    fn id(&self) -> &str {
        "approve"
    }

    async fn confirm(&self, recommendation: &Recommendation) -> Result<Confirmation> {
        info!(loan_id = recommendation.loan_id, amount = %recommendation.amount, "Confirmation auto-approved");
        Ok(Confirmation::Approved)
    }
}

/// Rejects every request.
pub struct RejectAll;

#[async_trait]
impl ConfirmationProvider for RejectAll {
    fn id(&self) -> &str {
        "reject"
    }

    async fn confirm(&self, _recommendation: &Recommendation) -> Result<Confirmation> {
        Ok(Confirmation::Rejected)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub type ConfirmationFactory =
    Box<dyn Fn(&Credentials) -> Result<Arc<dyn ConfirmationProvider>> + Send + Sync>;

/// Confirmation providers by tool id, selected by `[confirmation]` in config.
#[derive(Default)]
pub struct ConfirmationRegistry {
    factories: HashMap<String, ConfirmationFactory>,
}

impl ConfirmationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("approve", |_| Ok(Arc::new(ApproveAll)));
        registry.register("reject", |_| Ok(Arc::new(RejectAll)));
        registry
    }

    pub fn register(
        &mut self,
        id: &str,
        factory: impl Fn(&Credentials) -> Result<Arc<dyn ConfirmationProvider>> + Send + Sync + 'static,
    ) {
        self.factories.insert(id.to_lowercase(), Box::new(factory));
    }

    /// The provider for `credentials.tool_id()`, if one is registered.
    pub fn find(&self, credentials: &Credentials) -> Option<Result<Arc<dyn ConfirmationProvider>>> {
        debug!(provider = credentials.tool_id(), "Looking up confirmation provider");
        self.factories
            .get(&credentials.tool_id().to_lowercase())
            .map(|factory| factory(credentials))
    }

    /// Parse a `"tool[:token]"` request and build its provider. Unknown tools
    /// are an error.
    pub fn build(&self, request: &str, secrets: Arc<dyn SecretProvider>) -> Result<Arc<dyn ConfirmationProvider>> {
        let credentials = Credentials::parse(request, secrets)?;
        let provider = self
            .find(&credentials)
            .ok_or_else(|| AutolendError::UnknownComponent {
                kind: "confirmation provider",
                name: credentials.tool_id().to_string(),
            })??;
        info!(provider = provider.id(), "Confirmation provider ready");
        Ok(provider)
    }
}
