//! Single-consumer evaluation pipeline.
//!
//! Batches are taken off the offer channel one at a time, in arrival order,
//! and run through strategy then investor. A batch that fails is reported
//! and skipped; only an unrecoverable strategy failure stops the pipeline.
//!
//! Once stopped, the channel is closed to new batches and whatever is already
//! queued is still evaluated. The queue is bounded by the channel capacity.

use anyhow::anyhow;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::confirmation::{Confirmation, ConfirmationProvider};
use super::executor::Investor;
use crate::events::{Event, EventBus};
use crate::strategy::{StrategyCell, StrategyError};
use crate::types::{Investment, OfferBatch, Recommendation};

/// What the evaluator did over its lifetime.
#[derive(Debug, Clone, Default)]
pub struct EvaluationStats {
    pub batches_evaluated: usize,
    pub batches_failed: usize,
    pub investments: Vec<Investment>,
}

pub(crate) struct Evaluator {
    strategy: Arc<StrategyCell>,
    investor: Arc<dyn Investor>,
    confirmation: Option<Arc<dyn ConfirmationProvider>>,
    events: Arc<EventBus>,
    fatal: mpsc::UnboundedSender<anyhow::Error>,
    stats: EvaluationStats,
}

impl Evaluator {
    pub(crate) fn new(
        strategy: Arc<StrategyCell>,
        investor: Arc<dyn Investor>,
        confirmation: Option<Arc<dyn ConfirmationProvider>>,
        events: Arc<EventBus>,
        fatal: mpsc::UnboundedSender<anyhow::Error>,
    ) -> Self {
        Self {
            strategy,
            investor,
            confirmation,
            events,
            fatal,
            stats: EvaluationStats::default(),
        }
    }

    /// Consume batches until the channel closes or the strategy fails
    /// unrecoverably. After `stop` fires no new batch is accepted, but those
    /// already queued are evaluated before the task returns.
    pub(crate) fn spawn(
        self,
        batches: mpsc::Receiver<OfferBatch>,
        stop: CancellationToken,
    ) -> JoinHandle<EvaluationStats> {
        tokio::spawn(self.run(batches, stop))
    }

    async fn run(mut self, mut batches: mpsc::Receiver<OfferBatch>, stop: CancellationToken) -> EvaluationStats {
        debug!("Evaluator started");
        let mut draining = false;
        loop {
            let batch = tokio::select! {
                biased;
                _ = stop.cancelled(), if !draining => {
                    batches.close();
                    draining = true;
                    debug!("Evaluator draining queued batches");
                    continue;
                }
                batch = batches.recv() => match batch {
                    Some(batch) => batch,
                    None => break,
                },
            };

            if let Err(e) = self.evaluate(batch).await {
                warn!(error = %format!("{e:#}"), "Evaluator stopping on unrecoverable failure");
                let _ = self.fatal.send(e);
                break;
            }
        }
        debug!(
            evaluated = self.stats.batches_evaluated,
            failed = self.stats.batches_failed,
            "Evaluator stopped"
        );
        self.stats
    }

    async fn evaluate(&mut self, batch: OfferBatch) -> anyhow::Result<()> {
        debug!(batch_id = %batch.id, offered = batch.len(), "Evaluating batch");

        let Some(strategy) = self.strategy.latest() else {
            self.fail(&batch, "no strategy available".to_string());
            return Ok(());
        };

        let portfolio = match self.investor.portfolio().await {
            Ok(portfolio) => portfolio,
            Err(e) => {
                self.fail(&batch, format!("portfolio unavailable: {e:#}"));
                return Ok(());
            }
        };

        let recommendations = match strategy.recommend(&batch.loans, &portfolio) {
            Ok(recommendations) => recommendations,
            Err(StrategyError::Batch(e)) => {
                self.fail(&batch, format!("{e:#}"));
                return Ok(());
            }
            Err(StrategyError::Unrecoverable(e)) => {
                return Err(anyhow!("Strategy {} failed unrecoverably: {e:#}", strategy.name()));
            }
        };

        let mut investments = Vec::with_capacity(recommendations.len());
        for recommendation in recommendations {
            self.events.fire(Event::InvestmentRequested {
                batch_id: batch.id,
                recommendation: recommendation.clone(),
            });
            if recommendation.confirmation_required && !self.confirmed(&recommendation).await {
                continue;
            }
            match self.investor.invest(&recommendation).await {
                Ok(investment) => investments.push(investment),
                Err(e) => warn!(
                    loan_id = recommendation.loan_id,
                    amount = %recommendation.amount,
                    error = %format!("{e:#}"),
                    "Investment failed, skipping"
                ),
            }
        }

        info!(
            batch_id = %batch.id,
            offered = batch.len(),
            invested = investments.len(),
            "Batch evaluated"
        );
        self.stats.batches_evaluated += 1;
        self.stats.investments.extend(investments.iter().cloned());
        self.events.fire(Event::BatchEvaluated {
            batch_id: batch.id,
            offered: batch.len(),
            investments,
        });
        Ok(())
    }

    async fn confirmed(&self, recommendation: &Recommendation) -> bool {
        let Some(provider) = &self.confirmation else {
            warn!(
                loan_id = recommendation.loan_id,
                amount = %recommendation.amount,
                "Confirmation required but no confirmation provider is configured, skipping"
            );
            return false;
        };
        match provider.confirm(recommendation).await {
            Ok(Confirmation::Approved) => true,
            Ok(Confirmation::Rejected) => {
                info!(
                    provider = provider.id(),
                    loan_id = recommendation.loan_id,
                    amount = %recommendation.amount,
                    "Investment rejected by confirmation provider"
                );
                false
            }
            Err(e) => {
                warn!(
                    provider = provider.id(),
                    loan_id = recommendation.loan_id,
                    error = %format!("{e:#}"),
                    "Confirmation failed, skipping"
                );
                false
            }
        }
    }

    fn fail(&mut self, batch: &OfferBatch, reason: String) {
        warn!(batch_id = %batch.id, %reason, "Batch evaluation failed");
        self.stats.batches_failed += 1;
        self.events.fire(Event::BatchFailed {
            batch_id: batch.id,
            reason,
        });
    }
}
