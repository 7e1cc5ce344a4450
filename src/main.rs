//! autolend: unattended lending marketplace daemon
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the marketplace, strategy and investor together and runs the
//! daemon until Ctrl+C, then shuts everything down in order.

use anyhow::Result;
use secrecy::SecretString;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use autolend::config::{self, AppConfig};
use autolend::engine::{ConfirmationRegistry, Daemon, DaemonConfig, DaemonContext, DryRunInvestor};
use autolend::events::ListenerRegistry;
use autolend::platforms::MarketplaceRegistry;
use autolend::scheduler::{Scheduler, ShutdownOutcome};
use autolend::secrets::{InMemorySecretProvider, PasswordAuthenticator, SecretProvider};
use autolend::strategy;

const BANNER: &str = r#"
              _        _                _
   __ _ _   _| |_ ___ | | ___ _ __   __| |
  / _` | | | | __/ _ \| |/ _ \ '_ \ / _` |
 | (_| | |_| | || (_) | |  __/ | | | (_| |
  \__,_|\__,_|\__\___/|_|\___|_| |_|\__,_|

  Unattended lending marketplace daemon
  v0.1.0
"#;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("autolend failed to start: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run() -> Result<ExitCode> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("AUTOLEND_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging(&cfg);

    println!("{BANNER}");
    info!(
        daemon = %cfg.daemon.name,
        config = %config_path,
        marketplace = %cfg.marketplace.kind,
        dry_run_balance = %cfg.daemon.dry_run_balance,
        "autolend starting up"
    );

    // -- Initialise components -------------------------------------------

    let scheduler = Scheduler::new(cfg.scheduler.to_scheduler_config());
    let events = Arc::new(ListenerRegistry::with_defaults().build(&cfg.events.listeners)?);
    let ctx = DaemonContext::new(scheduler.clone(), events);

    // Strategy is hot-reloaded from disk
    let strategy = strategy::rating_strategy_cell(&cfg.strategy.path);
    let outcome = strategy.refresh().await;
    info!(path = %cfg.strategy.path, ?outcome, "Initial strategy load");
    scheduler.submit(strategy.clone(), Duration::from_secs(cfg.strategy.refresh_secs.max(1)))?;

    let marketplace = MarketplaceRegistry::with_defaults().create(&cfg.marketplace)?;
    let secrets = load_secrets(&cfg);
    let authenticator = Arc::new(PasswordAuthenticator::new(secrets.clone()));
    let investor = Arc::new(DryRunInvestor::new(cfg.daemon.dry_run_balance));

    let mut daemon = Daemon::new(
        ctx.clone(),
        DaemonConfig::from(&cfg.daemon),
        marketplace,
        authenticator,
        strategy,
        investor,
    );
    if let Some(section) = &cfg.confirmation {
        match AppConfig::resolve_env(&section.credentials_env) {
            Ok(request) => {
                let provider = ConfirmationRegistry::with_defaults().build(&request, secrets)?;
                daemon = daemon.with_confirmation(provider);
            }
            Err(e) => warn!(error = %e, "Confirmation provider not configured"),
        }
    }

    // -- Run -------------------------------------------------------------

    let shutdown = ctx.shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received.");
                shutdown.grant();
            }
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
        }
    });

    info!("Daemon running. Press Ctrl+C to stop.");
    let report = daemon.run().await;

    if let ShutdownOutcome::TimedOut { aborted } = scheduler.shutdown().await {
        warn!(aborted, "Background tasks were aborted");
    }

    info!(
        state = %report.state,
        return_code = %report.return_code,
        evaluated = report.batches_evaluated,
        failed = report.batches_failed,
        invested = report.investments.len(),
        total = %report.investments.iter().map(|i| i.amount).sum::<rust_decimal::Decimal>(),
        "autolend shut down."
    );
    if let Some(cause) = &report.cause {
        error!(%cause, "Daemon crashed");
    }

    Ok(ExitCode::from(report.return_code.exit_code()))
}

/// Marketplace credentials from the environment variables named in config.
fn load_secrets(cfg: &config::AppConfig) -> Arc<dyn SecretProvider> {
    let provider = InMemorySecretProvider::new();
    match AppConfig::resolve_env(&cfg.secrets.username_env) {
        Ok(username) => {
            provider.set_secret("username", SecretString::new(username));
        }
        Err(e) => warn!(error = %e, "Marketplace username not configured"),
    }
    match AppConfig::resolve_env(&cfg.secrets.password_env) {
        Ok(password) => {
            provider.set_secret("password", SecretString::new(password));
        }
        Err(e) => warn!(error = %e, "Marketplace password not configured"),
    }
    Arc::new(provider)
}

/// Initialise the `tracing` subscriber.
fn init_logging(cfg: &config::AppConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("autolend=info"));

    let json_logging = std::env::var("AUTOLEND_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }

    info!(daemon = %cfg.daemon.name, json = json_logging, "Logging initialised");
}
