//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (marketplace username and password) are referenced by env-var
//! name in the config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::scheduler::SchedulerConfig;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub daemon: DaemonSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    pub marketplace: MarketplaceConfig,
    pub strategy: StrategySection,
    #[serde(default)]
    pub events: EventsSection,
    pub secrets: SecretsSection,
    pub confirmation: Option<ConfirmationSection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DaemonSection {
    pub name: String,
    /// Period between polls of a polled marketplace.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Capacity of the channel between marketplace and evaluator.
    #[serde(default = "default_batch_capacity")]
    pub batch_capacity: usize,
    /// Balance the dry-run investor starts with.
    pub dry_run_balance: Decimal,
    /// How long to wait for a listening marketplace to return after close.
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerSection {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub initial_delay_ms: u64,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            initial_delay_ms: 0,
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl SchedulerSection {
    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            workers: self.workers,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MarketplaceConfig {
    /// Registry key: "polled" or "streaming".
    pub kind: String,
    pub url: String,
    /// Own cadence of a streaming marketplace.
    #[serde(default = "default_cadence_secs")]
    pub cadence_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StrategySection {
    pub path: String,
    #[serde(default = "default_strategy_refresh_secs")]
    pub refresh_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EventsSection {
    #[serde(default = "default_listeners")]
    pub listeners: Vec<String>,
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            listeners: default_listeners(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecretsSection {
    pub username_env: String,
    pub password_env: String,
}

/// Env var holding a `"tool[:token]"` confirmation request, e.g.
/// `AUTOLEND_CONFIRMATION=approve`.
#[derive(Debug, Deserialize, Clone)]
pub struct ConfirmationSection {
    pub credentials_env: String,
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_batch_capacity() -> usize {
    16
}

fn default_stop_timeout_secs() -> u64 {
    5
}

fn default_workers() -> usize {
    4
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

fn default_cadence_secs() -> u64 {
    60
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_strategy_refresh_secs() -> u64 {
    60
}

fn default_listeners() -> Vec<String> {
    vec!["log".to_string()]
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
