//! PostgreSQL reminder table.

use std::time::Duration;

use async_trait::async_trait;
use chime_ring::RingRange;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use crate::error::{Result, TableError};
use crate::traits::ReminderTable;
use crate::types::{ReminderEntry, ReminderTableData, TargetKey, VersionToken};

/// Reminder rows in a single PostgreSQL table.
///
/// Several logical services can share a table; rows are partitioned by
/// `service_id`. The version token is stored in the `etag` column.
#[derive(Clone)]
pub struct PostgresReminderTable {
    pool: PgPool,
    table: String,
    service_id: String,
}

impl PostgresReminderTable {
    /// Creates a lazily connected table handle.
    ///
    /// No connection is made until [`ReminderTable::init`] runs.
    pub fn new(
        url: &str,
        table: String,
        service_id: String,
        max_connections: u32,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy(url)
            .map_err(|e| TableError::Configuration(e.to_string()))?;

        Ok(Self {
            pool,
            table,
            service_id,
        })
    }

    async fn ensure_table(&self) -> Result<()> {
        let create_table = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                service_id TEXT NOT NULL,
                target_key TEXT NOT NULL,
                reminder_name TEXT NOT NULL,
                target_hash BIGINT NOT NULL,
                start_at TIMESTAMPTZ NOT NULL,
                period_ms BIGINT NOT NULL,
                etag TEXT NOT NULL,
                PRIMARY KEY (service_id, target_key, reminder_name)
            )
            "#,
            self.table
        );
        sqlx::query(&create_table).execute(&self.pool).await?;

        let create_index = format!(
            r#"
            CREATE INDEX IF NOT EXISTS idx_{}_hash
            ON {} (service_id, target_hash)
            "#,
            self.table.replace('.', "_"),
            self.table
        );
        sqlx::query(&create_index).execute(&self.pool).await?;

        Ok(())
    }

    fn columns(&self) -> String {
        format!(
            "SELECT target_key, reminder_name, start_at, period_ms, etag FROM {}",
            self.table
        )
    }
}

fn period_to_millis(period: Duration) -> Result<i64> {
    i64::try_from(period.as_millis())
        .map_err(|_| TableError::Serialisation(format!("period too large: {period:?}")))
}

fn entry_from_row(row: &PgRow) -> Result<ReminderEntry> {
    let target: String = row.try_get("target_key")?;
    let name: String = row.try_get("reminder_name")?;
    let start_at: DateTime<Utc> = row.try_get("start_at")?;
    let period_ms: i64 = row.try_get("period_ms")?;
    let etag: String = row.try_get("etag")?;

    let period_ms = u64::try_from(period_ms)
        .map_err(|_| TableError::Serialisation(format!("negative period: {period_ms}")))?;

    Ok(ReminderEntry::new(
        TargetKey::new(target),
        name,
        start_at,
        Duration::from_millis(period_ms),
    )
    .with_version(VersionToken::new(etag)))
}

fn entries_from_rows(rows: &[PgRow]) -> Result<ReminderTableData> {
    rows.iter().map(entry_from_row).collect()
}

#[async_trait]
impl ReminderTable for PostgresReminderTable {
    async fn init(&self) -> Result<()> {
        self.ensure_table().await
    }

    async fn read_rows(&self, target: &TargetKey) -> Result<ReminderTableData> {
        let query = format!(
            "{} WHERE service_id = $1 AND target_key = $2",
            self.columns()
        );
        let rows = sqlx::query(&query)
            .bind(&self.service_id)
            .bind(target.as_str())
            .fetch_all(&self.pool)
            .await?;
        entries_from_rows(&rows)
    }

    async fn read_range(&self, range: RingRange) -> Result<ReminderTableData> {
        let predicate = if range.wraps() {
            "(target_hash > $2 OR target_hash <= $3)"
        } else {
            "target_hash > $2 AND target_hash <= $3"
        };
        let query = format!(
            "{} WHERE service_id = $1 AND {}",
            self.columns(),
            predicate
        );
        let rows = sqlx::query(&query)
            .bind(&self.service_id)
            .bind(i64::from(range.start()))
            .bind(i64::from(range.end()))
            .fetch_all(&self.pool)
            .await?;
        entries_from_rows(&rows)
    }

    async fn read_row(&self, target: &TargetKey, name: &str) -> Result<Option<ReminderEntry>> {
        let query = format!(
            "{} WHERE service_id = $1 AND target_key = $2 AND reminder_name = $3",
            self.columns()
        );
        let row = sqlx::query(&query)
            .bind(&self.service_id)
            .bind(target.as_str())
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn upsert_row(&self, entry: &ReminderEntry) -> Result<VersionToken> {
        let version = VersionToken::generate();
        let period_ms = period_to_millis(entry.period)?;

        match &entry.version {
            None => {
                let query = format!(
                    r#"
                    INSERT INTO {} (service_id, target_key, reminder_name, target_hash,
                                    start_at, period_ms, etag)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    ON CONFLICT (service_id, target_key, reminder_name) DO UPDATE SET
                        target_hash = EXCLUDED.target_hash,
                        start_at = EXCLUDED.start_at,
                        period_ms = EXCLUDED.period_ms,
                        etag = EXCLUDED.etag
                    "#,
                    self.table
                );
                sqlx::query(&query)
                    .bind(&self.service_id)
                    .bind(entry.target.as_str())
                    .bind(&entry.name)
                    .bind(i64::from(entry.ring_hash()))
                    .bind(entry.start_at)
                    .bind(period_ms)
                    .bind(version.as_str())
                    .execute(&self.pool)
                    .await?;
            }
            Some(expected) => {
                let query = format!(
                    r#"
                    UPDATE {}
                    SET start_at = $4, period_ms = $5, etag = $6
                    WHERE service_id = $1 AND target_key = $2 AND reminder_name = $3
                      AND etag = $7
                    "#,
                    self.table
                );
                let result = sqlx::query(&query)
                    .bind(&self.service_id)
                    .bind(entry.target.as_str())
                    .bind(&entry.name)
                    .bind(entry.start_at)
                    .bind(period_ms)
                    .bind(version.as_str())
                    .bind(expected.as_str())
                    .execute(&self.pool)
                    .await?;
                if result.rows_affected() == 0 {
                    return Err(TableError::ConcurrencyConflict);
                }
            }
        }

        Ok(version)
    }

    async fn remove_row(
        &self,
        target: &TargetKey,
        name: &str,
        version: &VersionToken,
    ) -> Result<bool> {
        let query = format!(
            r#"
            DELETE FROM {}
            WHERE service_id = $1 AND target_key = $2 AND reminder_name = $3 AND etag = $4
            "#,
            self.table
        );
        let result = sqlx::query(&query)
            .bind(&self.service_id)
            .bind(target.as_str())
            .bind(name)
            .bind(version.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn test_only_clear_table(&self) -> Result<()> {
        let query = format!("DELETE FROM {} WHERE service_id = $1", self.table);
        sqlx::query(&query)
            .bind(&self.service_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
