//! Ready-made [`RefreshSource`] implementations.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::debug;

use super::RefreshSource;

/// Reads the source from a file on every cycle.
///
/// A missing file means "no source"; any other I/O error is transient.
pub struct FileSource<T> {
    path: PathBuf,
    parse: Box<dyn Fn(&str) -> Result<T> + Send + Sync>,
}

impl<T> FileSource<T> {
    pub fn new(
        path: impl Into<PathBuf>,
        parse: impl Fn(&str) -> Result<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            path: path.into(),
            parse: Box::new(parse),
        }
    }
}

#[async_trait]
impl<T: Send + Sync> RefreshSource<T> for FileSource<T> {
    async fn latest_source(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Source file not found");
                Ok(None)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }

    fn transform(&self, source: &str) -> Result<T> {
        (self.parse)(source)
    }
}

/// A fixed value. The first refresh publishes it and every later one is a no-op.
pub struct ImmutableSource<T> {
    value: T,
}

impl<T> ImmutableSource<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> RefreshSource<T> for ImmutableSource<T> {
    async fn latest_source(&self) -> Result<Option<String>> {
        Ok(Some(String::new()))
    }

    fn transform(&self, _source: &str) -> Result<T> {
        Ok(self.value.clone())
    }
}

/// Closure-backed source, handy for in-memory sources and tests.
pub struct FnSource<T> {
    fetch: Box<dyn Fn() -> Result<Option<String>> + Send + Sync>,
    parse: Box<dyn Fn(&str) -> Result<T> + Send + Sync>,
}

impl<T> FnSource<T> {
    pub fn new(
        fetch: impl Fn() -> Result<Option<String>> + Send + Sync + 'static,
        parse: impl Fn(&str) -> Result<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            fetch: Box::new(fetch),
            parse: Box::new(parse),
        }
    }
}

#[async_trait]
impl<T: Send + Sync> RefreshSource<T> for FnSource<T> {
    async fn latest_source(&self) -> Result<Option<String>> {
        (self.fetch)()
    }

    fn transform(&self, source: &str) -> Result<T> {
        (self.parse)(source)
    }
}
