//! Mock marketplace for integration testing.
//!
//! Provides a deterministic `Marketplace` that replays scripted offer
//! batches, counts `run`/`close` calls and can be forced to fail, plus an
//! event recorder and a small strategy, all in-memory.

use anyhow::anyhow;
use async_trait::async_trait;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use autolend::engine::{DaemonConfig, DaemonContext, ShutdownSignal};
use autolend::events::{Event, EventBus, EventListener};
use autolend::platforms::{ExpectedTreatment, ListenerSlot, Marketplace, MarketplaceError, OfferListener};
use autolend::refresh::{FnSource, RefreshableCell};
use autolend::scheduler::{Scheduler, SchedulerConfig};
use autolend::strategy::{InvestmentStrategy, StrategyCell, StrategyError};
use autolend::types::{Loan, OfferBatch, PortfolioOverview, Recommendation};

// ---------------------------------------------------------------------------
// Marketplace
// ---------------------------------------------------------------------------

/// A scripted marketplace.
///
/// Polled: every `run` delivers the next scripted batch, or nothing once the
/// script is exhausted. Listening: the single `run` delivers the whole script,
/// then blocks until closed.
pub struct MockMarketplace {
    treatment: ExpectedTreatment,
    script: Mutex<VecDeque<Vec<Loan>>>,
    slot: ListenerSlot,
    runs: AtomicUsize,
    closes: AtomicUsize,
    /// If set, every `run` fails fatally.
    force_fatal: AtomicBool,
    /// Granted by a listening run right after its last scripted delivery.
    shutdown_after_script: Mutex<Option<ShutdownSignal>>,
}

impl MockMarketplace {
    pub fn polled(script: Vec<Vec<Loan>>) -> Arc<Self> {
        Self::build(ExpectedTreatment::Polled, script)
    }

    pub fn listening(script: Vec<Vec<Loan>>) -> Arc<Self> {
        Self::build(ExpectedTreatment::Listening, script)
    }

    fn build(treatment: ExpectedTreatment, script: Vec<Vec<Loan>>) -> Arc<Self> {
        Arc::new(Self {
            treatment,
            script: Mutex::new(script.into()),
            slot: ListenerSlot::new(),
            runs: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            force_fatal: AtomicBool::new(false),
            shutdown_after_script: Mutex::new(None),
        })
    }

    /// Request shutdown as soon as the whole script has been delivered.
    pub fn shutdown_after_script(&self, signal: ShutdownSignal) {
        *self.shutdown_after_script.lock().unwrap() = Some(signal);
    }

    /// Force all subsequent runs to fail fatally.
    pub fn set_fatal(&self) {
        self.force_fatal.store(true, Ordering::SeqCst);
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn next_batch(&self) -> Option<Vec<Loan>> {
        self.script.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl Marketplace for MockMarketplace {
    fn name(&self) -> &str {
        "mock"
    }

    fn register_listener(&self, listener: OfferListener) -> bool {
        self.slot.register(listener)
    }

    fn expected_treatment(&self) -> ExpectedTreatment {
        self.treatment
    }

    async fn run(&self) -> Result<(), MarketplaceError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let listener = self.slot.start()?;
        if self.force_fatal.load(Ordering::SeqCst) {
            return Err(MarketplaceError::Fatal(anyhow!("account suspended")));
        }

        match self.treatment {
            ExpectedTreatment::Polled => match self.next_batch() {
                Some(loans) => self.slot.deliver(&listener, OfferBatch::new(loans)).await,
                None => Ok(()),
            },
            ExpectedTreatment::Listening => {
                while let Some(loans) = self.next_batch() {
                    self.slot.deliver(&listener, OfferBatch::new(loans)).await?;
                }
                if let Some(signal) = self.shutdown_after_script.lock().unwrap().take() {
                    signal.grant();
                }
                self.slot.closed().await;
                Ok(())
            }
        }
    }

    async fn close(&self) -> Result<(), MarketplaceError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.slot.close();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct EventRecorder {
    events: Mutex<Vec<Event>>,
}

impl EventRecorder {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(Event::kind).collect()
    }

    pub fn evaluations(&self) -> Vec<Event> {
        self.events().into_iter().filter(Event::is_evaluation).collect()
    }

    /// Wait until at least `count` evaluation events were seen.
    pub async fn wait_for_evaluations(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.evaluations().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for evaluation events");
    }
}

impl EventListener for EventRecorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn handle(&self, event: &Event) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Invests 200 into every loan; a batch containing loan id 0 fails.
#[derive(Clone, Copy, Default)]
pub struct PickyStrategy {
    /// Time spent deciding on each batch.
    pub delay: Duration,
}

impl InvestmentStrategy for PickyStrategy {
    fn name(&self) -> &str {
        "picky"
    }

    fn recommend(
        &self,
        loans: &[Loan],
        _portfolio: &PortfolioOverview,
    ) -> Result<Vec<Recommendation>, StrategyError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if loans.iter().any(|l| l.id == 0) {
            return Err(StrategyError::Batch(anyhow!("loan 0 is malformed")));
        }
        Ok(loans
            .iter()
            .map(|l| Recommendation {
                loan_id: l.id,
                amount: dec!(200),
                confirmation_required: false,
            })
            .collect())
    }
}

/// Gives up on the first batch it sees.
pub struct BrokenStrategy;

impl InvestmentStrategy for BrokenStrategy {
    fn name(&self) -> &str {
        "broken"
    }

    fn recommend(
        &self,
        _loans: &[Loan],
        _portfolio: &PortfolioOverview,
    ) -> Result<Vec<Recommendation>, StrategyError> {
        Err(StrategyError::Unrecoverable(anyhow!("ledger corrupted")))
    }
}

pub async fn loaded_strategy(
    make: impl Fn() -> Box<dyn InvestmentStrategy> + Send + Sync + 'static,
) -> Arc<StrategyCell> {
    let cell = Arc::new(RefreshableCell::new(
        "strategy",
        FnSource::new(|| Ok(Some("static".to_string())), move |_: &str| Ok(make())),
    ));
    cell.refresh().await;
    cell
}

pub async fn picky_strategy() -> Arc<StrategyCell> {
    loaded_strategy(|| Box::new(PickyStrategy::default())).await
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub fn context() -> (DaemonContext, Arc<EventRecorder>) {
    let recorder = Arc::new(EventRecorder::default());
    let events = Arc::new(EventBus::new());
    events.register(recorder.clone());
    let scheduler = Scheduler::new(SchedulerConfig {
        workers: 2,
        shutdown_timeout: Duration::from_secs(2),
        ..SchedulerConfig::default()
    });
    (DaemonContext::new(scheduler, events), recorder)
}

pub fn fast_config() -> DaemonConfig {
    DaemonConfig {
        name: "autolend-test".to_string(),
        poll_interval: Duration::from_millis(10),
        batch_capacity: 4,
        stop_timeout: Duration::from_secs(1),
    }
}
