//! Credentials for third-party tools, such as a confirmation provider.
//!
//! A request names the tool and optionally carries its token:
//! `"tool"` or `"tool:token"`. A token given in the request is stored in the
//! [`SecretProvider`] under the tool id; without one, whatever the provider
//! already holds for that tool is used.

use secrecy::SecretString;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::SecretProvider;
use crate::types::AutolendError;

#[derive(Clone)]
pub struct Credentials {
    tool_id: String,
    secrets: Arc<dyn SecretProvider>,
}

impl Credentials {
    pub fn parse(request: &str, secrets: Arc<dyn SecretProvider>) -> Result<Self, AutolendError> {
        let parts: Vec<&str> = request.split(':').collect();
        let (tool_id, token) = match parts.as_slice() {
            [tool] => (tool.trim(), None),
            [tool, token] => (tool.trim(), Some(*token)),
            _ => {
                return Err(AutolendError::InvalidCredentials(format!(
                    "expected \"tool\" or \"tool:token\", got {} parts",
                    parts.len()
                )))
            }
        };
        if tool_id.is_empty() {
            return Err(AutolendError::InvalidCredentials("empty tool id".into()));
        }

        match token {
            Some(token) => {
                secrets.set_secret(tool_id, SecretString::new(token.to_string()));
                debug!(tool = tool_id, "Credentials token stored");
            }
            None => debug!(tool = tool_id, "Credentials given without a token"),
        }
        Ok(Self {
            tool_id: tool_id.to_string(),
            secrets,
        })
    }

    pub fn tool_id(&self) -> &str {
        &self.tool_id
    }

    pub fn token(&self) -> Option<SecretString> {
        self.secrets.get_secret(&self.tool_id)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("tool_id", &self.tool_id)
            .finish_non_exhaustive()
    }
}
