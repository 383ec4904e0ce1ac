//! Durable reminder storage for chime.
//!
//! [`ReminderTable`] is the storage contract: rows keyed by
//! `(target, name)` with optimistic concurrency through [`VersionToken`]s.
//! Backends are in-memory ([`MemoryReminderTable`]) or PostgreSQL (feature
//! `postgres`). [`RetryingTable`] retries transient failures and
//! [`MigrationRouter`] moves a live deployment from one table to another.

mod error;
mod migration;
mod retry;
mod traits;
mod types;

#[cfg(feature = "memory")]
mod memory;

#[cfg(feature = "postgres")]
mod postgres;

#[cfg(feature = "config")]
mod config;

#[cfg(feature = "config")]
mod provider;

pub use error::{Result, TableError};
pub use migration::{
    pending_backfill, select_tables, MigrationMode, MigrationRouter, OperationKind,
    TableRole, TableSelection,
};
pub use retry::{RetryPolicy, RetryingTable};
pub use traits::ReminderTable;
pub use types::{ReminderEntry, ReminderId, ReminderTableData, TargetKey, VersionToken};

#[cfg(feature = "memory")]
pub use memory::MemoryReminderTable;

#[cfg(feature = "postgres")]
pub use postgres::PostgresReminderTable;

#[cfg(feature = "config")]
pub use config::{MigrationConfig, StoreConfig, TableConfig};

#[cfg(feature = "config")]
pub use provider::TableProvider;
