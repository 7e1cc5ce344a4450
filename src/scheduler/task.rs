//! Scheduled task trait and the handle used to cancel it.

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Unit of work the scheduler can run repeatedly.
#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    /// Run once. Failures are the task's own business to log.
    async fn run(&self);
}

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const CANCELLED: u8 = 2;

/// What a task was doing when [`TaskHandle::cancel`] swapped it to cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorState {
    Idle,
    /// A run was in flight; it is allowed to finish.
    Running,
    AlreadyCancelled,
}

/// Handle to a submitted task.
///
/// Once [`cancel`](Self::cancel) returns, no new run of the task starts. A run
/// already in progress is allowed to finish.
#[derive(Clone)]
pub struct TaskHandle {
    id: Uuid,
    name: Arc<str>,
    state: Arc<AtomicU8>,
    token: CancellationToken,
}

impl TaskHandle {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: Arc::from(name),
            state: Arc::new(AtomicU8::new(IDLE)),
            token: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancel(&self) -> PriorState {
        let previous = self.state.swap(CANCELLED, Ordering::AcqRel);
        self.token.cancel();
        match previous {
            IDLE => PriorState::Idle,
            RUNNING => PriorState::Running,
            _ => PriorState::AlreadyCancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    /// Claim the right to start a run. Fails once cancelled.
    pub(crate) fn begin_run(&self) -> bool {
        self.state
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns `false` if the task was cancelled while running.
    pub(crate) fn end_run(&self) -> bool {
        self.state
            .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
