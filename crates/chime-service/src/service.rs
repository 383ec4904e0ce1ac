//! The per-member reminder service contract.

use std::time::Duration;

use async_trait::async_trait;
use chime_table::{ReminderEntry, TargetKey, VersionToken};
use serde::Serialize;

use crate::error::Result;

/// Reference to a stored reminder, carrying the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReminderHandle {
    pub target: TargetKey,
    pub name: String,
    pub version: VersionToken,
}

impl ReminderHandle {
    /// Builds a handle from a stored row. Rows that were never written
    /// have no version and yield `None`.
    pub fn from_entry(entry: ReminderEntry) -> Option<Self> {
        let version = entry.version?;
        Some(Self {
            target: entry.target,
            name: entry.name,
            version,
        })
    }
}

/// Reminder operations served by one cluster member.
///
/// Durations here are already validated: `due` is the delay before the
/// first tick and a zero `period` registers a one-shot reminder.
#[async_trait]
pub trait ReminderService: Send + Sync {
    /// Creates or replaces a reminder, returning a handle to the new version.
    async fn register_or_update(
        &self,
        target: &TargetKey,
        name: &str,
        due: Duration,
        period: Duration,
    ) -> Result<ReminderHandle>;

    /// Removes the reminder if it is still at the handle's version.
    ///
    /// Fails with `ConcurrencyConflict` when it changed or was already removed.
    async fn unregister(&self, handle: &ReminderHandle) -> Result<()>;

    async fn get_reminder(&self, target: &TargetKey, name: &str)
        -> Result<Option<ReminderHandle>>;

    async fn get_reminders(&self, target: &TargetKey) -> Result<Vec<ReminderHandle>>;
}
