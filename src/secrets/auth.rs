//! Marketplace authentication.

use anyhow::Result;
use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::info;

use super::SecretProvider;
use crate::types::AutolendError;

/// An authenticated marketplace session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub username: String,
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self) -> Result<Session>;
}

/// Username and password login backed by a [`SecretProvider`].
pub struct PasswordAuthenticator {
    secrets: Arc<dyn SecretProvider>,
}

impl PasswordAuthenticator {
    pub fn new(secrets: Arc<dyn SecretProvider>) -> Self {
        Self { secrets }
    }
}

#[async_trait]
impl Authenticator for PasswordAuthenticator {
    async fn authenticate(&self) -> Result<Session> {
        let username = self
            .secrets
            .username()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| AutolendError::MissingSecret("username".into()))?;
        let password = self
            .secrets
            .password()
            .ok_or_else(|| AutolendError::MissingSecret("password".into()))?;
        if password.expose_secret().is_empty() {
            return Err(AutolendError::Authentication(format!("empty password for {username}")).into());
        }
        info!(%username, "Authenticated");
        Ok(Session { username })
    }
}
