use serde::Deserialize;

use crate::migration::MigrationMode;
use crate::retry::RetryPolicy;

/// Reminder storage settings.
///
/// ```toml
/// [table.store]
/// backend = "postgres"
/// url = "postgres://localhost/chime"
///
/// [table.retry]
/// max_attempts = 5
///
/// [table.migration]
/// mode = "read_source_write_both"
///
/// [table.migration.destination]
/// backend = "memory"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TableConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// When set, `store` becomes the migration source.
    #[serde(default)]
    pub migration: Option<MigrationConfig>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    #[default]
    Memory,
    #[cfg(feature = "postgres")]
    Postgres {
        url: String,
        #[serde(default = "default_table")]
        table: String,
        #[serde(default = "default_service_id")]
        service_id: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct MigrationConfig {
    pub destination: StoreConfig,
    #[serde(default)]
    pub mode: MigrationMode,
}

#[cfg(feature = "postgres")]
fn default_table() -> String {
    "chime_reminders".to_string()
}

#[cfg(feature = "postgres")]
fn default_service_id() -> String {
    "default".to_string()
}

#[cfg(feature = "postgres")]
fn default_max_connections() -> u32 {
    10
}
