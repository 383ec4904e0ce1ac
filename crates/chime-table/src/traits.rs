use std::sync::Arc;

use async_trait::async_trait;
use chime_ring::RingRange;

use crate::error::Result;
use crate::types::{ReminderEntry, ReminderTableData, TargetKey, VersionToken};

/// Durable storage for reminder rows with optimistic concurrency.
///
/// Every successful write issues a fresh [`VersionToken`]. A write or remove
/// carrying a token only succeeds while the stored row still has that token.
#[async_trait]
pub trait ReminderTable: Send + Sync {
    /// Prepares backing storage. Must be called before any other operation.
    async fn init(&self) -> Result<()>;

    /// All reminders of one target.
    async fn read_rows(&self, target: &TargetKey) -> Result<ReminderTableData>;

    /// All reminders whose target hash lies in `range`.
    async fn read_range(&self, range: RingRange) -> Result<ReminderTableData>;

    async fn read_row(&self, target: &TargetKey, name: &str) -> Result<Option<ReminderEntry>>;

    /// Inserts or replaces a row.
    ///
    /// With `entry.version` set the write is conditional and fails with
    /// [`TableError::ConcurrencyConflict`](crate::TableError::ConcurrencyConflict)
    /// if the stored token differs or the row is gone.
    async fn upsert_row(&self, entry: &ReminderEntry) -> Result<VersionToken>;

    /// Removes a row if its stored token equals `version`.
    ///
    /// Returns `false` for a stale token or a missing row.
    async fn remove_row(&self, target: &TargetKey, name: &str, version: &VersionToken)
        -> Result<bool>;

    /// Deletes every row. Intended for tests.
    async fn test_only_clear_table(&self) -> Result<()>;
}

#[async_trait]
impl<T: ReminderTable + ?Sized> ReminderTable for Arc<T> {
    async fn init(&self) -> Result<()> {
        (**self).init().await
    }

    async fn read_rows(&self, target: &TargetKey) -> Result<ReminderTableData> {
        (**self).read_rows(target).await
    }

    async fn read_range(&self, range: RingRange) -> Result<ReminderTableData> {
        (**self).read_range(range).await
    }

    async fn read_row(&self, target: &TargetKey, name: &str) -> Result<Option<ReminderEntry>> {
        (**self).read_row(target, name).await
    }

    async fn upsert_row(&self, entry: &ReminderEntry) -> Result<VersionToken> {
        (**self).upsert_row(entry).await
    }

    async fn remove_row(
        &self,
        target: &TargetKey,
        name: &str,
        version: &VersionToken,
    ) -> Result<bool> {
        (**self).remove_row(target, name, version).await
    }

    async fn test_only_clear_table(&self) -> Result<()> {
        (**self).test_only_clear_table().await
    }
}
