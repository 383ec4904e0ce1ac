use std::sync::Arc;

use tracing::info;

use crate::config::{StoreConfig, TableConfig};
use crate::error::{Result, TableError};
use crate::migration::MigrationRouter;
use crate::retry::{RetryPolicy, RetryingTable};
use crate::traits::ReminderTable;

#[cfg(feature = "memory")]
use crate::memory::MemoryReminderTable;

#[cfg(feature = "postgres")]
use crate::postgres::PostgresReminderTable;

/// Builds the reminder table stack described by a [`TableConfig`].
///
/// Each backend is wrapped in a [`RetryingTable`]. With a migration section
/// the configured store becomes the source of a [`MigrationRouter`].
#[derive(Clone)]
pub struct TableProvider {
    table: Arc<dyn ReminderTable>,
    migration: Option<Arc<MigrationRouter>>,
}

impl TableProvider {
    pub fn new(table: Arc<dyn ReminderTable>) -> Self {
        Self {
            table,
            migration: None,
        }
    }

    /// Uses `router` as the table.
    pub fn with_migration(router: Arc<MigrationRouter>) -> Self {
        Self {
            table: router.clone(),
            migration: Some(router),
        }
    }

    pub fn from_config(config: &TableConfig) -> Result<Self> {
        let store = Self::create_store(&config.store, config.retry)?;

        let Some(migration) = &config.migration else {
            return Ok(Self::new(store));
        };

        let destination = Self::create_store(&migration.destination, config.retry)?;
        info!(mode = %migration.mode, "Reminder table migration tooling enabled");
        Ok(Self::with_migration(Arc::new(MigrationRouter::new(
            store,
            destination,
            migration.mode,
        ))))
    }

    /// The table every reminder operation should use.
    pub fn table(&self) -> Arc<dyn ReminderTable> {
        self.table.clone()
    }

    pub fn migration(&self) -> Result<Arc<MigrationRouter>> {
        self.migration
            .clone()
            .ok_or_else(|| TableError::Configuration("migration tooling not configured".into()))
    }

    fn create_store(config: &StoreConfig, retry: RetryPolicy) -> Result<Arc<dyn ReminderTable>> {
        match config {
            #[cfg(feature = "memory")]
            StoreConfig::Memory => Ok(Arc::new(RetryingTable::new(
                MemoryReminderTable::new(),
                retry,
            ))),

            #[cfg(feature = "postgres")]
            StoreConfig::Postgres {
                url,
                table,
                service_id,
                max_connections,
            } => {
                let store = PostgresReminderTable::new(
                    url,
                    table.clone(),
                    service_id.clone(),
                    *max_connections,
                )?;
                Ok(Arc::new(RetryingTable::new(store, retry)))
            }

            #[allow(unreachable_patterns)]
            _ => Err(TableError::Configuration(
                "No suitable reminder table backend enabled".to_string(),
            )),
        }
    }
}

impl std::fmt::Debug for TableProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableProvider")
            .field("migration", &self.migration)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::MigrationConfig;
    use crate::migration::MigrationMode;

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn provider_from_default_config() {
        let provider = TableProvider::from_config(&TableConfig::default()).unwrap();
        provider.table().init().await.unwrap();
        assert!(provider.migration().is_err());
    }

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn provider_with_migration_section() {
        let config = TableConfig {
            migration: Some(MigrationConfig {
                destination: StoreConfig::Memory,
                mode: MigrationMode::ReadSourceWriteBoth,
            }),
            ..TableConfig::default()
        };
        let provider = TableProvider::from_config(&config).unwrap();
        let router = provider.migration().unwrap();
        assert_eq!(router.mode().unwrap(), MigrationMode::ReadSourceWriteBoth);
    }
}
