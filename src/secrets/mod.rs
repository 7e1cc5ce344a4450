//! Credential access.
//!
//! The daemon only reads credentials; where they are persisted is up to the
//! provider. Values are wrapped in [`SecretString`] and never logged.

pub mod auth;
pub mod credentials;

use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

pub use auth::{Authenticator, PasswordAuthenticator, Session};
pub use credentials::Credentials;

const USERNAME_KEY: &str = "username";
const PASSWORD_KEY: &str = "password";

pub trait SecretProvider: Send + Sync {
    fn get_secret(&self, key: &str) -> Option<SecretString>;

    /// Returns `false` when the provider is read-only.
    fn set_secret(&self, key: &str, value: SecretString) -> bool;

    fn username(&self) -> Option<String> {
        self.get_secret(USERNAME_KEY)
            .map(|s| s.expose_secret().clone())
    }

    fn password(&self) -> Option<SecretString> {
        self.get_secret(PASSWORD_KEY)
    }
}

/// Keeps secrets in memory for the lifetime of the process.
#[derive(Default)]
pub struct InMemorySecretProvider {
    secrets: RwLock<HashMap<String, SecretString>>,
}

impl InMemorySecretProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider seeded with the marketplace credentials, used when no
    /// external secret store is configured.
    pub fn fallback(username: impl Into<String>, password: SecretString) -> Self {
        let provider = Self::new();
        provider.set_secret(USERNAME_KEY, SecretString::new(username.into()));
        provider.set_secret(PASSWORD_KEY, password);
        provider
    }
}

impl SecretProvider for InMemorySecretProvider {
    fn get_secret(&self, key: &str) -> Option<SecretString> {
        self.secrets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|s| SecretString::new(s.expose_secret().clone()))
    }

    fn set_secret(&self, key: &str, value: SecretString) -> bool {
        self.secrets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
        true
    }
}

impl fmt::Debug for InMemorySecretProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secrets = self.secrets.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<&String> = secrets.keys().collect();
        keys.sort();
        f.debug_struct("InMemorySecretProvider")
            .field("keys", &keys)
            .finish_non_exhaustive()
    }
}
