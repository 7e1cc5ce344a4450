//! Background scheduler.
//!
//! Runs registered tasks (refreshable cells, marketplace polls) either once or
//! on a fixed period. A fixed number of worker permits bounds how many runs
//! happen in parallel; a single registration never overlaps with itself.

pub mod task;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use task::{PriorState, Task, TaskHandle};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of task runs in flight at once.
    pub workers: usize,
    /// Delay before the first run of a recurring task.
    pub initial_delay: Duration,
    /// How long `shutdown` waits for in-flight runs before aborting them.
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            initial_delay: Duration::ZERO,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Scheduler has been shut down")]
    Stopped,

    #[error("Period must be greater than zero")]
    InvalidPeriod,
}

/// How a shutdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every in-flight run finished in time.
    Completed,
    /// Some runs did not finish in time and were aborted.
    TimedOut { aborted: usize },
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

struct Entry {
    handle: TaskHandle,
    join: Option<JoinHandle<()>>,
}

struct Inner {
    config: SchedulerConfig,
    permits: Semaphore,
    tasks: Mutex<HashMap<Uuid, Entry>>,
    stopped: AtomicBool,
}

impl Inner {
    fn tasks(&self) -> MutexGuard<'_, HashMap<Uuid, Entry>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cheap to clone; all clones drive the same task table.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        debug!(?config, "Creating scheduler");
        Self {
            inner: Arc::new(Inner {
                permits: Semaphore::new(config.workers.max(1)),
                config,
                tasks: Mutex::new(HashMap::new()),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Run `task` every `period`, measured from the start of one run to the
    /// start of the next.
    pub fn submit(&self, task: Arc<dyn Task>, period: Duration) -> Result<TaskHandle, SchedulerError> {
        if period.is_zero() {
            return Err(SchedulerError::InvalidPeriod);
        }
        self.spawn(task, Some(period))
    }

    /// Run `task` exactly once, right away.
    pub fn submit_once(&self, task: Arc<dyn Task>) -> Result<TaskHandle, SchedulerError> {
        self.spawn(task, None)
    }

    /// Stop `handle` from running again. Idempotent.
    pub fn cancel(&self, handle: &TaskHandle) -> PriorState {
        let prior = handle.cancel();
        if prior != PriorState::AlreadyCancelled {
            info!(task = handle.name(), running = prior == PriorState::Running, "Task cancelled");
        }
        prior
    }

    /// Number of registered tasks that have not finished or been cancelled.
    pub fn active_tasks(&self) -> usize {
        self.inner
            .tasks()
            .values()
            .filter(|e| !e.handle.is_cancelled())
            .count()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Cancel every task and wait (bounded) for in-flight runs.
    ///
    /// After this returns no task run is in progress and no new one starts.
    pub async fn shutdown(&self) -> ShutdownOutcome {
        let entries: Vec<Entry> = {
            let mut tasks = self.inner.tasks();
            if self.inner.stopped.swap(true, Ordering::AcqRel) {
                debug!("Scheduler already stopped");
                return ShutdownOutcome::Completed;
            }
            tasks.drain().map(|(_, e)| e).collect()
        };

        for entry in &entries {
            entry.handle.cancel();
        }
        let joins: Vec<JoinHandle<()>> = entries.into_iter().filter_map(|e| e.join).collect();
        let aborts: Vec<_> = joins.iter().map(|j| j.abort_handle()).collect();
        info!(tasks = joins.len(), "Scheduler shutting down");

        let timeout = self.inner.config.shutdown_timeout;
        match tokio::time::timeout(timeout, futures::future::join_all(joins)).await {
            Ok(_) => {
                info!("Scheduler stopped");
                ShutdownOutcome::Completed
            }
            Err(_) => {
                let aborted = aborts.iter().filter(|a| !a.is_finished()).count();
                for abort in aborts {
                    abort.abort();
                }
                warn!(
                    aborted,
                    timeout_ms = timeout.as_millis() as u64,
                    "Scheduler shutdown timed out, aborted in-flight tasks"
                );
                ShutdownOutcome::TimedOut { aborted }
            }
        }
    }

    fn spawn(&self, task: Arc<dyn Task>, period: Option<Duration>) -> Result<TaskHandle, SchedulerError> {
        let handle = TaskHandle::new(task.name());
        {
            let mut tasks = self.inner.tasks();
            if self.is_stopped() {
                return Err(SchedulerError::Stopped);
            }
            tasks.insert(handle.id(), Entry { handle: handle.clone(), join: None });
        }
        debug!(task = handle.name(), period_ms = period.map(|p| p.as_millis() as u64), "Task submitted");

        let inner = self.inner.clone();
        let worker_handle = handle.clone();
        let join = tokio::spawn(async move {
            match period {
                Some(period) => run_recurring(&inner, task.as_ref(), &worker_handle, period).await,
                None => {
                    run_once(&inner, task.as_ref(), &worker_handle).await;
                }
            }
            inner.tasks().remove(&worker_handle.id());
            debug!(task = worker_handle.name(), "Task retired");
        });

        if let Some(entry) = self.inner.tasks().get_mut(&handle.id()) {
            entry.join = Some(join);
        }
        Ok(handle)
    }
}

async fn run_recurring(inner: &Inner, task: &dyn Task, handle: &TaskHandle, period: Duration) {
    let start = Instant::now() + inner.config.initial_delay;
    let mut ticker = tokio::time::interval_at(start, period);
    // A slow run delays the schedule instead of triggering a burst of catch-up runs.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = handle.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if !run_once(inner, task, handle).await {
            break;
        }
    }
}

/// Returns `false` when the task must not run again.
async fn run_once(inner: &Inner, task: &dyn Task, handle: &TaskHandle) -> bool {
    let _permit = tokio::select! {
        biased;
        _ = handle.cancelled() => return false,
        permit = inner.permits.acquire() => match permit {
            Ok(permit) => permit,
            Err(_) => return false,
        },
    };
    if !handle.begin_run() {
        return false;
    }
    debug!(task = handle.name(), "Running task");
    task.run().await;
    handle.end_run()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
