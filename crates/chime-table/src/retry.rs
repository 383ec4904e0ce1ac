//! Retry wrapper for transient storage failures.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chime_ring::RingRange;
use rand::Rng;
use serde::Deserialize;
use tracing::{error, warn};

use crate::error::{Result, TableError};
use crate::traits::ReminderTable;
use crate::types::{ReminderEntry, ReminderTableData, TargetKey, VersionToken};

/// Exponential backoff with jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    #[serde(rename = "initial_backoff_ms", with = "serde_duration_millis")]
    pub initial_backoff: Duration,
    #[serde(rename = "max_backoff_ms", with = "serde_duration_millis")]
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (starting at 1).
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let ceiling = exp.min(self.max_backoff);
        if ceiling.is_zero() {
            return ceiling;
        }
        let half = ceiling / 2;
        half + rand::thread_rng().gen_range(Duration::ZERO..=half)
    }
}

/// Wraps a table and retries operations that fail with a transient error.
///
/// Concurrency conflicts and every other error are returned immediately.
#[derive(Debug, Clone)]
pub struct RetryingTable<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: ReminderTable> RetryingTable<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    async fn run<'a, R, F, Fut>(&'a self, operation: &'static str, mut call: F) -> Result<R>
    where
        F: FnMut(&'a T) -> Fut + Send,
        Fut: Future<Output = Result<R>> + Send + 'a,
        R: Send,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call(&self.inner).await {
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient table failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    error!(operation, attempts = attempt, error = %e, "Table operation failed");
                    return Err(TableError::StorageUnavailable(format!(
                        "{operation} failed after {attempt} attempts: {e}"
                    )));
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl<T: ReminderTable> ReminderTable for RetryingTable<T> {
    async fn init(&self) -> Result<()> {
        self.run("init", |t| t.init()).await
    }

    async fn read_rows(&self, target: &TargetKey) -> Result<ReminderTableData> {
        self.run("read_rows", |t| t.read_rows(target)).await
    }

    async fn read_range(&self, range: RingRange) -> Result<ReminderTableData> {
        self.run("read_range", |t| t.read_range(range)).await
    }

    async fn read_row(&self, target: &TargetKey, name: &str) -> Result<Option<ReminderEntry>> {
        self.run("read_row", |t| t.read_row(target, name)).await
    }

    async fn upsert_row(&self, entry: &ReminderEntry) -> Result<VersionToken> {
        self.run("upsert_row", |t| t.upsert_row(entry)).await
    }

    async fn remove_row(
        &self,
        target: &TargetKey,
        name: &str,
        version: &VersionToken,
    ) -> Result<bool> {
        self.run("remove_row", |t| t.remove_row(target, name, version))
            .await
    }

    async fn test_only_clear_table(&self) -> Result<()> {
        self.run("test_only_clear_table", |t| t.test_only_clear_table())
            .await
    }
}

mod serde_duration_millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
