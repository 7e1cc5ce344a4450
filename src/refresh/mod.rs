//! Self-refreshing resource cache.
//!
//! A [`RefreshableCell`] re-derives a value from an external textual source
//! whenever the scheduler asks it to, and only re-parses when the source
//! content actually changed. Cells may depend on one other cell and then stay
//! dormant until that dependency has published a value.

pub mod cell;
pub mod sources;

use anyhow::Result;
use async_trait::async_trait;

pub use cell::{CellId, RefreshOutcome, RefreshableCell};
pub use sources::{FileSource, FnSource, ImmutableSource};

/// Where a cell gets its raw text from and how it turns that text into `T`.
#[async_trait]
pub trait RefreshSource<T>: Send + Sync {
    /// Fetch the current raw source.
    ///
    /// `Ok(None)` means no source is available right now; the cached value is
    /// left alone. Errors are treated as transient and retried next cycle.
    async fn latest_source(&self) -> Result<Option<String>>;

    /// Interpret raw source text. Must not have side effects.
    fn transform(&self, source: &str) -> Result<T>;
}

/// A cell that other cells can depend on.
///
/// Only the publish counter is exposed, so dependents can tell "never
/// published" (0) from "published since I last looked".
pub trait Dependency: Send + Sync {
    fn name(&self) -> &str;

    /// Number of successful publishes so far.
    fn version(&self) -> u64;
}
