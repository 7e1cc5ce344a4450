//! The refreshable cell itself.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Dependency, RefreshSource};
use crate::scheduler::Task;

/// Opaque identity of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellId(Uuid);

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a single refresh cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// New value published.
    Updated,
    /// Source identical to the last cycle; transform skipped.
    Unchanged,
    /// The source reported nothing to read.
    NoSource,
    /// Fetching the source failed; retried next cycle.
    SourceUnavailable,
    /// Source changed but could not be transformed; old value kept.
    TransformFailed,
    /// The dependency has not published yet.
    AwaitingDependency,
}

/// Writer-side bookkeeping, guarded by the refresh lock.
#[derive(Default)]
struct RefreshState {
    fingerprint: Option<String>,
    dependency_version: u64,
}

/// A cached value kept in sync with an external textual source.
///
/// Readers call [`latest`](Self::latest) and never wait on a refresh in
/// progress. Refreshes of one cell are serialized.
pub struct RefreshableCell<T> {
    id: CellId,
    name: String,
    source: Box<dyn RefreshSource<T>>,
    dependency: Option<Arc<dyn Dependency>>,
    value: RwLock<Option<Arc<T>>>,
    version: AtomicU64,
    state: Mutex<RefreshState>,
}

impl<T: Send + Sync + 'static> RefreshableCell<T> {
    pub fn new(name: impl Into<String>, source: impl RefreshSource<T> + 'static) -> Self {
        Self {
            id: CellId(Uuid::new_v4()),
            name: name.into(),
            source: Box::new(source),
            dependency: None,
            value: RwLock::new(None),
            version: AtomicU64::new(0),
            state: Mutex::new(RefreshState::default()),
        }
    }

    /// Make this cell wait for `dependency` and re-derive whenever it changes.
    pub fn depends_on(mut self, dependency: Arc<dyn Dependency>) -> Self {
        self.dependency = Some(dependency);
        self
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    /// The current value, if any refresh has succeeded yet.
    pub fn latest(&self) -> Option<Arc<T>> {
        match self.value.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn has_value(&self) -> bool {
        self.version() > 0
    }

    /// Run one fetch → fingerprint → compare → transform → publish cycle.
    ///
    /// Never fails: every problem is logged and reported through the outcome.
    pub async fn refresh(&self) -> RefreshOutcome {
        let mut state = self.state.lock().await;

        let dependency_version = match &self.dependency {
            Some(dep) => {
                let v = dep.version();
                if v == 0 {
                    debug!(cell = %self.name, dependency = dep.name(), "Dependency not yet available");
                    return RefreshOutcome::AwaitingDependency;
                }
                v
            }
            None => 0,
        };
        let forced = dependency_version != state.dependency_version;

        let source = match self.source.latest_source().await {
            Ok(Some(source)) => source,
            Ok(None) => {
                debug!(cell = %self.name, "No source available");
                return RefreshOutcome::NoSource;
            }
            Err(e) => {
                warn!(cell = %self.name, error = %e, "Failed fetching source");
                return RefreshOutcome::SourceUnavailable;
            }
        };

        let fingerprint = fingerprint(&source);
        if !forced && state.fingerprint.as_deref() == Some(fingerprint.as_str()) {
            debug!(cell = %self.name, "Source unchanged");
            return RefreshOutcome::Unchanged;
        }
        state.fingerprint = Some(fingerprint);
        state.dependency_version = dependency_version;

        match self.source.transform(&source) {
            Ok(value) => {
                self.publish(value);
                info!(cell = %self.name, version = self.version(), forced, "Refreshed");
                RefreshOutcome::Updated
            }
            Err(e) => {
                warn!(cell = %self.name, error = %e, "Failed transforming source, keeping previous value");
                RefreshOutcome::TransformFailed
            }
        }
    }

    fn publish(&self, value: T) {
        let value = Some(Arc::new(value));
        match self.value.write() {
            Ok(mut guard) => *guard = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
        // Bumped after the value is visible so dependents never see a version
        // without its value.
        self.version.fetch_add(1, Ordering::AcqRel);
    }
}

impl<T: Send + Sync + 'static> Dependency for RefreshableCell<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> Task for RefreshableCell<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) {
        self.refresh().await;
    }
}

impl<T> fmt::Debug for RefreshableCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshableCell")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version.load(Ordering::Acquire))
            .finish()
    }
}

/// SHA-256 of the raw source, hex encoded.
fn fingerprint(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    format!("{digest:x}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
