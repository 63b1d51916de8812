use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::warn;

use crate::error::StoreError;
use crate::file::{JsonFile, Record};

/// How many times a collection tries to save before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const fn once() -> Self {
        Self {
            attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    pub const fn fixed(attempts: u32, backoff: Duration) -> Self {
        Self { attempts, backoff }
    }
}

/// A persisted collection with a single serialization point.
///
/// Every read and every read-modify-write queues on one fair mutex, so
/// operations run one at a time in arrival order and an `update` can never
/// interleave with another operation between its load and its save.
pub struct Collection<T> {
    name: &'static str,
    file: Mutex<JsonFile<T>>,
    retry: RetryPolicy,
}

impl<T: Record> Collection<T> {
    pub fn new(name: &'static str, path: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            name,
            file: Mutex::new(JsonFile::new(path)),
            retry,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn initialize(&self) -> Result<bool, StoreError> {
        self.file.lock().await.initialize().await
    }

    /// Snapshot of the whole collection, ordered behind any queued update.
    pub async fn read(&self) -> Vec<T> {
        self.file.lock().await.load().await
    }

    /// Load, apply `mutate`, save. If the load or `mutate` fails nothing is written.
    pub async fn update<R, E, F>(&self, mutate: F) -> Result<R, E>
    where
        F: FnOnce(&mut Vec<T>) -> Result<R, E>,
        E: From<StoreError>,
    {
        let file = self.file.lock().await;
        let mut records = file.load_for_update().await?;
        let out = mutate(&mut records)?;
        self.save_with_retry(&file, &records).await?;
        Ok(out)
    }

    async fn save_with_retry(&self, file: &JsonFile<T>, records: &[T]) -> Result<(), StoreError> {
        let mut attempt = 1;
        loop {
            match file.save(records).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.retry.attempts => {
                    warn!(
                        "Write of {} failed (attempt {}/{}): {}",
                        self.name, attempt, self.retry.attempts, e
                    );
                    tokio::time::sleep(self.retry.backoff).await;
                    attempt += 1;
                }
                Err(e) if self.retry.attempts > 1 => {
                    return Err(StoreError::RetriesExhausted {
                        collection: self.name,
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}
