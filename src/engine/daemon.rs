//! The daemon: a small state machine around one marketplace run.
//!
//! ```text
//! Starting ──► Running ──► Stopping ──► Stopped
//!    │            │            │
//!    └────────────┴────────────┴──────► Crashed
//! ```
//!
//! Starting authenticates and registers the offer listener. Running drives
//! the marketplace (scheduled polls or one long-lived listening task) while a
//! single evaluator drains offer batches, and waits for either the shutdown
//! signal or a fatal failure. On the way out the marketplace is closed exactly
//! once, whatever the exit path, and batches it had already delivered are
//! evaluated before the daemon reports that it is ending.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::confirmation::ConfirmationProvider;
use super::evaluator::{EvaluationStats, Evaluator};
use super::executor::Investor;
use super::shutdown::DaemonContext;
use crate::config::DaemonSection;
use crate::events::Event;
use crate::platforms::{ExpectedTreatment, Marketplace, MarketplaceError};
use crate::scheduler::{Task, TaskHandle};
use crate::secrets::Authenticator;
use crate::strategy::StrategyCell;
use crate::types::{AutolendError, Investment, OfferBatch, ReturnCode};

// ---------------------------------------------------------------------------
// State & report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DaemonState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Crashed,
}

impl DaemonState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DaemonState::Stopped | DaemonState::Crashed)
    }
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DaemonState::Starting => "starting",
            DaemonState::Running => "running",
            DaemonState::Stopping => "stopping",
            DaemonState::Stopped => "stopped",
            DaemonState::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

/// Outcome of one daemon run.
#[derive(Debug)]
pub struct DaemonReport {
    pub state: DaemonState,
    /// Every state entered, in order, starting with `Starting`.
    pub transitions: Vec<DaemonState>,
    pub return_code: ReturnCode,
    pub cause: Option<String>,
    pub error: Option<anyhow::Error>,
    pub investments: Vec<Investment>,
    pub batches_evaluated: usize,
    pub batches_failed: usize,
    /// Result of closing the marketplace. Does not affect `return_code`.
    pub close_result: Result<(), String>,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub name: String,
    /// Period between runs of a polled marketplace.
    pub poll_interval: Duration,
    pub batch_capacity: usize,
    /// How long a listening marketplace gets to return after close.
    pub stop_timeout: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            name: "autolend".to_string(),
            poll_interval: Duration::from_secs(60),
            batch_capacity: 16,
            stop_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&DaemonSection> for DaemonConfig {
    fn from(section: &DaemonSection) -> Self {
        Self {
            name: section.name.clone(),
            poll_interval: Duration::from_secs(section.poll_interval_secs.max(1)),
            batch_capacity: section.batch_capacity.max(1),
            stop_timeout: Duration::from_secs(section.stop_timeout_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Marketplace drivers
// ---------------------------------------------------------------------------

/// One scheduled run of a polled marketplace.
struct PollTask {
    name: String,
    marketplace: Arc<dyn Marketplace>,
    fatal: mpsc::UnboundedSender<anyhow::Error>,
}

#[async_trait]
impl Task for PollTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) {
        match self.marketplace.run().await {
            Ok(()) => debug!(marketplace = self.marketplace.name(), "Poll finished"),
            Err(MarketplaceError::Closed) => debug!(marketplace = self.marketplace.name(), "Poll skipped, marketplace closed"),
            Err(e) if e.is_fatal() => {
                error!(marketplace = self.marketplace.name(), error = %e, "Marketplace failed fatally");
                let _ = self.fatal.send(anyhow::Error::new(e));
            }
            Err(e) => warn!(marketplace = self.marketplace.name(), error = %e, "Poll failed, retrying next cycle"),
        }
    }
}

enum Driver {
    Polled(TaskHandle),
    Listening(JoinHandle<()>),
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

pub struct Daemon {
    ctx: DaemonContext,
    config: DaemonConfig,
    marketplace: Arc<dyn Marketplace>,
    authenticator: Arc<dyn Authenticator>,
    strategy: Arc<StrategyCell>,
    investor: Arc<dyn Investor>,
    confirmation: Option<Arc<dyn ConfirmationProvider>>,
    transitions: Vec<DaemonState>,
}

impl Daemon {
    pub fn new(
        ctx: DaemonContext,
        config: DaemonConfig,
        marketplace: Arc<dyn Marketplace>,
        authenticator: Arc<dyn Authenticator>,
        strategy: Arc<StrategyCell>,
        investor: Arc<dyn Investor>,
    ) -> Self {
        Self {
            ctx,
            config,
            marketplace,
            authenticator,
            strategy,
            investor,
            confirmation: None,
            transitions: vec![DaemonState::Starting],
        }
    }

    /// Ask `provider` before investing where the strategy requires it.
    pub fn with_confirmation(mut self, provider: Arc<dyn ConfirmationProvider>) -> Self {
        self.confirmation = Some(provider);
        self
    }

    pub fn state(&self) -> DaemonState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(DaemonState::Starting)
    }

    /// Run until the shutdown signal is granted or something fatal happens.
    pub async fn run(mut self) -> DaemonReport {
        info!(
            daemon = %self.config.name,
            marketplace = self.marketplace.name(),
            treatment = %self.marketplace.expected_treatment(),
            "Daemon starting"
        );

        let (batch_tx, batch_rx) = mpsc::channel(self.config.batch_capacity.max(1));
        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();

        if let Err(e) = self.start(batch_tx).await {
            let close_result = self.close_marketplace().await;
            return self.crashed(e, close_result, EvaluationStats::default());
        }

        self.transition(DaemonState::Running);
        let stop = CancellationToken::new();
        let evaluator = Evaluator::new(
            self.strategy.clone(),
            self.investor.clone(),
            self.confirmation.clone(),
            self.ctx.events.clone(),
            fatal_tx.clone(),
        )
        .spawn(batch_rx, stop.clone());

        let driver = match self.drive(fatal_tx) {
            Ok(driver) => driver,
            Err(e) => {
                let (close_result, stats) = self.release(None, evaluator, stop).await;
                return self.crashed(e, close_result, stats);
            }
        };

        // A fatal failure wins over a shutdown request that races it.
        let failure = tokio::select! {
            biased;
            Some(cause) = fatal_rx.recv() => Some(cause),
            _ = self.ctx.shutdown.wait() => None,
        };

        match failure {
            None => {
                self.transition(DaemonState::Stopping);
                let (close_result, stats) = self.release(Some(driver), evaluator, stop).await;
                if let Ok(cause) = fatal_rx.try_recv() {
                    return self.crashed(cause, close_result, stats);
                }
                self.ctx.events.fire(Event::DaemonEnding {
                    daemon: self.config.name.clone(),
                });
                self.transition(DaemonState::Stopped);
                self.report(ReturnCode::Ok, None, close_result, stats)
            }
            Some(e) => {
                let (close_result, stats) = self.release(Some(driver), evaluator, stop).await;
                self.crashed(e, close_result, stats)
            }
        }
    }

    async fn start(&mut self, listener: mpsc::Sender<OfferBatch>) -> Result<()> {
        let session = self
            .authenticator
            .authenticate()
            .await
            .context("Authentication failed")?;
        debug!(username = %session.username, "Session established");

        if !self.marketplace.register_listener(listener) {
            return Err(AutolendError::ListenerRejected(self.marketplace.name().to_string()).into());
        }

        if !self.strategy.has_value() {
            warn!("No strategy loaded yet, batches will be skipped until one is available");
        }

        self.ctx.events.fire(Event::DaemonStarted {
            daemon: self.config.name.clone(),
            marketplace: self.marketplace.name().to_string(),
        });
        Ok(())
    }

    fn drive(&self, fatal: mpsc::UnboundedSender<anyhow::Error>) -> Result<Driver> {
        match self.marketplace.expected_treatment() {
            ExpectedTreatment::Polled => {
                let task = PollTask {
                    name: format!("poll-{}", self.marketplace.name()),
                    marketplace: self.marketplace.clone(),
                    fatal,
                };
                let handle = self
                    .ctx
                    .scheduler
                    .submit(Arc::new(task), self.config.poll_interval)
                    .context("Failed to schedule marketplace polling")?;
                info!(
                    interval_secs = self.config.poll_interval.as_secs_f64(),
                    "Polling marketplace"
                );
                Ok(Driver::Polled(handle))
            }
            ExpectedTreatment::Listening => {
                let marketplace = self.marketplace.clone();
                let join = tokio::spawn(async move {
                    match marketplace.run().await {
                        Ok(()) | Err(MarketplaceError::Closed) => {
                            debug!(marketplace = marketplace.name(), "Listening marketplace returned")
                        }
                        Err(e) => {
                            error!(marketplace = marketplace.name(), error = %e, "Listening marketplace failed");
                            let _ = fatal.send(anyhow::Error::new(e));
                        }
                    }
                });
                info!("Listening to marketplace");
                Ok(Driver::Listening(join))
            }
        }
    }

    /// Stop marketplace activity, then let the evaluator finish what was
    /// already delivered.
    async fn release(
        &self,
        driver: Option<Driver>,
        evaluator: JoinHandle<EvaluationStats>,
        stop: CancellationToken,
    ) -> (Result<(), String>, EvaluationStats) {
        if let Some(Driver::Polled(handle)) = &driver {
            self.ctx.scheduler.cancel(handle);
        }

        let close_result = self.close_marketplace().await;

        stop.cancel();
        let stats = match evaluator.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "Evaluator did not finish cleanly");
                EvaluationStats::default()
            }
        };

        if let Some(Driver::Listening(mut join)) = driver {
            let timeout = self.config.stop_timeout;
            if tokio::time::timeout(timeout, &mut join).await.is_err() {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Listening marketplace did not return in time, aborting"
                );
                join.abort();
            }
        }

        (close_result, stats)
    }

    async fn close_marketplace(&self) -> Result<(), String> {
        match self.marketplace.close().await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(marketplace = self.marketplace.name(), error = %e, "Failed to close marketplace");
                Err(e.to_string())
            }
        }
    }

    fn transition(&mut self, to: DaemonState) {
        let from = self.state();
        info!(daemon = %self.config.name, %from, %to, "Daemon state changed");
        self.transitions.push(to);
    }

    fn crashed(
        mut self,
        e: anyhow::Error,
        close_result: Result<(), String>,
        stats: EvaluationStats,
    ) -> DaemonReport {
        let cause = format!("{e:#}");
        error!(daemon = %self.config.name, %cause, "Daemon crashed");
        self.transition(DaemonState::Crashed);
        self.ctx.events.fire(Event::DaemonCrashed {
            daemon: self.config.name.clone(),
            cause: cause.clone(),
        });
        let mut report = self.report(ReturnCode::Error, Some(cause), close_result, stats);
        report.error = Some(e);
        report
    }

    fn report(
        self,
        return_code: ReturnCode,
        cause: Option<String>,
        close_result: Result<(), String>,
        stats: EvaluationStats,
    ) -> DaemonReport {
        let state = self.state();
        info!(
            daemon = %self.config.name,
            %state,
            %return_code,
            evaluated = stats.batches_evaluated,
            failed = stats.batches_failed,
            invested = stats.investments.len(),
            "Daemon finished"
        );
        DaemonReport {
            state,
            transitions: self.transitions,
            return_code,
            cause,
            error: None,
            investments: stats.investments,
            batches_evaluated: stats.batches_evaluated,
            batches_failed: stats.batches_failed,
            close_result,
        }
    }
}
