use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chime_ring::RingRange;
use tokio::sync::RwLock;

use crate::error::{Result, TableError};
use crate::traits::ReminderTable;
use crate::types::{ReminderEntry, ReminderId, ReminderTableData, TargetKey, VersionToken};

#[derive(Debug, Clone)]
struct StoredRow {
    entry: ReminderEntry,
    hash: u32,
    version: VersionToken,
}

impl StoredRow {
    fn to_entry(&self) -> ReminderEntry {
        self.entry.clone().with_version(self.version.clone())
    }
}

/// In-process reminder table.
///
/// Cloning shares the underlying rows, so several services in one process
/// can use the same table the way a cluster shares a database.
#[derive(Debug, Clone, Default)]
pub struct MemoryReminderTable {
    rows: Arc<RwLock<HashMap<ReminderId, StoredRow>>>,
}

impl MemoryReminderTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows.
    pub async fn row_count(&self) -> usize {
        self.rows.read().await.len()
    }
}

#[async_trait]
impl ReminderTable for MemoryReminderTable {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn read_rows(&self, target: &TargetKey) -> Result<ReminderTableData> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|row| &row.entry.target == target)
            .map(StoredRow::to_entry)
            .collect())
    }

    async fn read_range(&self, range: RingRange) -> Result<ReminderTableData> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|row| range.in_range(row.hash))
            .map(StoredRow::to_entry)
            .collect())
    }

    async fn read_row(&self, target: &TargetKey, name: &str) -> Result<Option<ReminderEntry>> {
        let rows = self.rows.read().await;
        let id = ReminderId::new(target.clone(), name);
        Ok(rows.get(&id).map(StoredRow::to_entry))
    }

    async fn upsert_row(&self, entry: &ReminderEntry) -> Result<VersionToken> {
        let mut rows = self.rows.write().await;
        let id = entry.id();

        if let Some(expected) = &entry.version {
            match rows.get(&id) {
                Some(row) if &row.version == expected => {}
                _ => return Err(TableError::ConcurrencyConflict),
            }
        }

        let version = VersionToken::generate();
        rows.insert(
            id,
            StoredRow {
                entry: entry.unconditional(),
                hash: entry.ring_hash(),
                version: version.clone(),
            },
        );
        Ok(version)
    }

    async fn remove_row(
        &self,
        target: &TargetKey,
        name: &str,
        version: &VersionToken,
    ) -> Result<bool> {
        let mut rows = self.rows.write().await;
        let id = ReminderId::new(target.clone(), name);
        match rows.get(&id) {
            Some(row) if &row.version == version => {
                rows.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn test_only_clear_table(&self) -> Result<()> {
        self.rows.write().await.clear();
        Ok(())
    }
}
