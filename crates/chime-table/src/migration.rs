//! Routing between a source and a destination table during a live storage
//! migration.
//!
//! A [`MigrationRouter`] is itself a [`ReminderTable`]. Its
//! [`MigrationMode`] decides which backing table serves each read and which
//! tables receive each write. Operators walk the modes in order while a
//! backfill copies rows from source to destination:
//!
//! | mode | point reads | writes | authoritative |
//! |------|-------------|--------|---------------|
//! | `disabled` | source | source | source |
//! | `read_source_write_both` | source | destination, source | source |
//! | `read_destination_with_fallback_write_both` | destination, then source | destination, source | destination |
//! | `read_destination_with_fallback_write_destination` | destination, then source | destination | destination |
//! | `read_write_destination` | destination | destination | destination |
//!
//! Version tokens are only compared on the authoritative table. Secondary
//! copies are written unconditionally, so a token handed to a caller is
//! always the one issued by the authoritative table.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chime_ring::RingRange;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, TableError};
use crate::traits::ReminderTable;
use crate::types::{ReminderEntry, ReminderId, ReminderTableData, TargetKey, VersionToken};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum MigrationMode {
    #[default]
    Disabled = 0,
    ReadSourceWriteBoth = 1,
    ReadDestinationWithFallbackWriteBoth = 2,
    ReadDestinationWithFallbackWriteDestination = 3,
    ReadWriteDestination = 4,
}

impl MigrationMode {
    pub const ALL: [Self; 5] = [
        Self::Disabled,
        Self::ReadSourceWriteBoth,
        Self::ReadDestinationWithFallbackWriteBoth,
        Self::ReadDestinationWithFallbackWriteDestination,
        Self::ReadWriteDestination,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::ReadSourceWriteBoth => "read_source_write_both",
            Self::ReadDestinationWithFallbackWriteBoth => {
                "read_destination_with_fallback_write_both"
            }
            Self::ReadDestinationWithFallbackWriteDestination => {
                "read_destination_with_fallback_write_destination"
            }
            Self::ReadWriteDestination => "read_write_destination",
        }
    }

    /// Decodes the compact form stored in a [`MigrationRouter`].
    pub fn from_repr(value: u8) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|mode| *mode as u8 == value)
            .ok_or_else(|| TableError::InvalidMigrationMode(value.to_string()))
    }
}

impl fmt::Display for MigrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MigrationMode {
    type Err = TableError;

    /// Accepts `read_source_write_both`, `ReadSource_WriteBoth`,
    /// `read-source-write-both` and other spellings that differ only in case
    /// and separators.
    fn from_str(s: &str) -> Result<Self> {
        let wanted = normalise(s);
        Self::ALL
            .into_iter()
            .find(|mode| normalise(mode.as_str()) == wanted)
            .ok_or_else(|| TableError::InvalidMigrationMode(s.to_owned()))
    }
}

fn normalise(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// One of the two tables behind a router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableRole {
    Source,
    Destination,
}

/// Kind of table operation being routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// `read_row` and `read_rows`.
    PointRead,
    /// `read_range`.
    RangeScan,
    /// `upsert_row`.
    Write,
    /// `remove_row`.
    Remove,
    /// `init` and `test_only_clear_table`.
    Maintenance,
}

/// Tables an operation touches, in the order it touches them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSelection {
    pub reads: &'static [TableRole],
    pub writes: &'static [TableRole],
    /// The table whose version tokens are handed to callers.
    pub authoritative: TableRole,
}

impl TableSelection {
    /// Index of the authoritative table within `reads`.
    pub fn authoritative_read_index(&self) -> Option<usize> {
        self.reads.iter().position(|r| *r == self.authoritative)
    }
}

const NONE: &[TableRole] = &[];
const SOURCE: &[TableRole] = &[TableRole::Source];
const DESTINATION: &[TableRole] = &[TableRole::Destination];
const BOTH: &[TableRole] = &[TableRole::Destination, TableRole::Source];

/// Pure routing table: which backing tables serve `kind` under `mode`.
///
/// Multi-table writes always touch the destination first.
pub const fn select_tables(mode: MigrationMode, kind: OperationKind) -> TableSelection {
    // (point reads, writes, every table a mode keeps current, authoritative)
    let (point, write, active, authoritative) = match mode {
        MigrationMode::Disabled => (SOURCE, SOURCE, SOURCE, TableRole::Source),
        MigrationMode::ReadSourceWriteBoth => (SOURCE, BOTH, BOTH, TableRole::Source),
        MigrationMode::ReadDestinationWithFallbackWriteBoth => {
            (BOTH, BOTH, BOTH, TableRole::Destination)
        }
        MigrationMode::ReadDestinationWithFallbackWriteDestination => {
            (BOTH, DESTINATION, BOTH, TableRole::Destination)
        }
        MigrationMode::ReadWriteDestination => {
            (DESTINATION, DESTINATION, DESTINATION, TableRole::Destination)
        }
    };
    let (reads, writes) = match kind {
        OperationKind::PointRead => (point, NONE),
        OperationKind::RangeScan => (active, NONE),
        OperationKind::Write => (NONE, write),
        // Anything a read can still observe must be removed too.
        OperationKind::Remove | OperationKind::Maintenance => (NONE, active),
    };
    TableSelection {
        reads,
        writes,
        authoritative,
    }
}

fn falls_back(mode: MigrationMode) -> bool {
    select_tables(mode, OperationKind::PointRead).reads.len() > 1
}

/// A [`ReminderTable`] that routes between two tables by [`MigrationMode`].
///
/// The mode is read once per operation, so switching modes never splits a
/// single call across two routing decisions.
pub struct MigrationRouter {
    source: Arc<dyn ReminderTable>,
    destination: Arc<dyn ReminderTable>,
    mode: AtomicU8,
}

impl MigrationRouter {
    pub fn new(
        source: Arc<dyn ReminderTable>,
        destination: Arc<dyn ReminderTable>,
        mode: MigrationMode,
    ) -> Self {
        Self {
            source,
            destination,
            mode: AtomicU8::new(mode as u8),
        }
    }

    /// Current mode.
    pub fn mode(&self) -> Result<MigrationMode> {
        MigrationMode::from_repr(self.mode.load(Ordering::Acquire))
    }

    /// Switches to `mode`, initialising any table the new mode starts using.
    pub async fn change_mode(&self, mode: MigrationMode) -> Result<()> {
        let previous = self.mode()?;
        if previous == mode {
            return Ok(());
        }

        let was_active = select_tables(previous, OperationKind::Maintenance).writes;
        for role in select_tables(mode, OperationKind::Maintenance).writes {
            if !was_active.contains(role) {
                self.table(*role).init().await?;
            }
        }

        self.mode.store(mode as u8, Ordering::Release);
        info!(from = %previous, to = %mode, "Migration mode changed");
        Ok(())
    }

    /// Returns to [`MigrationMode::Disabled`] without touching either table.
    pub fn disable_migration_tooling(&self) {
        let previous = self.mode.swap(MigrationMode::Disabled as u8, Ordering::AcqRel);
        if previous != MigrationMode::Disabled as u8 {
            info!("Migration tooling disabled");
        }
    }

    pub fn source(&self) -> &Arc<dyn ReminderTable> {
        &self.source
    }

    pub fn destination(&self) -> &Arc<dyn ReminderTable> {
        &self.destination
    }

    fn table(&self, role: TableRole) -> &dyn ReminderTable {
        match role {
            TableRole::Source => self.source.as_ref(),
            TableRole::Destination => self.destination.as_ref(),
        }
    }

    /// Checks `version` against the copy held by `role`.
    async fn holds_version(
        &self,
        role: TableRole,
        target: &TargetKey,
        name: &str,
        version: &VersionToken,
    ) -> Result<bool> {
        let row = self.table(role).read_row(target, name).await?;
        Ok(row.and_then(|r| r.version).as_ref() == Some(version))
    }

    /// Removes whatever copy `role` holds, regardless of its token.
    async fn remove_mirror(&self, role: TableRole, target: &TargetKey, name: &str) -> Result<()> {
        let table = self.table(role);
        if let Some(version) = table.read_row(target, name).await?.and_then(|r| r.version) {
            table.remove_row(target, name, &version).await?;
        }
        Ok(())
    }

    /// Makes `to` hold a copy of whatever `from` holds, or nothing.
    ///
    /// Run after a conditional operation on `from` fails, since the mirror
    /// was already written on behalf of the losing caller.
    async fn repair_mirror(
        &self,
        from: TableRole,
        to: TableRole,
        target: &TargetKey,
        name: &str,
    ) -> Result<()> {
        match self.table(from).read_row(target, name).await? {
            Some(row) => {
                self.table(to).upsert_row(&row.unconditional()).await?;
            }
            None => self.remove_mirror(to, target, name).await?,
        }
        debug!(reminder_target = %target, name, table = ?to, "Repaired mirror after conflict");
        Ok(())
    }

    async fn upsert_unconditional(
        &self,
        selection: TableSelection,
        entry: &ReminderEntry,
    ) -> Result<VersionToken> {
        let mut issued = None;
        for role in selection.writes {
            let token = self.table(*role).upsert_row(entry).await?;
            if *role == selection.authoritative {
                issued = Some(token);
            }
        }
        issued.ok_or_else(|| TableError::Backend("no authoritative table written".into()))
    }

    async fn upsert_conditional(
        &self,
        mode: MigrationMode,
        selection: TableSelection,
        entry: &ReminderEntry,
        version: &VersionToken,
    ) -> Result<VersionToken> {
        let mirror = entry.unconditional();

        if selection.authoritative == TableRole::Source {
            if selection.writes.len() > 1
                && !self
                    .holds_version(TableRole::Source, &entry.target, &entry.name, version)
                    .await?
            {
                return Err(TableError::ConcurrencyConflict);
            }
            let mut issued = None;
            for role in selection.writes {
                if *role == TableRole::Source {
                    match self.source.upsert_row(entry).await {
                        Ok(token) => issued = Some(token),
                        Err(TableError::ConcurrencyConflict) => {
                            // The mirror already holds this losing write.
                            let mirrors = selection
                                .writes
                                .iter()
                                .filter(|r| **r != TableRole::Source);
                            for other in mirrors {
                                self.repair_mirror(
                                    TableRole::Source,
                                    *other,
                                    &entry.target,
                                    &entry.name,
                                )
                                .await?;
                            }
                            return Err(TableError::ConcurrencyConflict);
                        }
                        Err(e) => return Err(e),
                    }
                } else {
                    self.table(*role).upsert_row(&mirror).await?;
                }
            }
            return issued.ok_or_else(|| TableError::Backend("source not written".into()));
        }

        let issued = match self.destination.upsert_row(entry).await {
            Ok(token) => token,
            Err(TableError::ConcurrencyConflict) if falls_back(mode) => {
                // The token may have come from the source before the row was
                // copied over.
                let copied = self
                    .destination
                    .read_row(&entry.target, &entry.name)
                    .await?
                    .is_some();
                if copied
                    || !self
                        .holds_version(TableRole::Source, &entry.target, &entry.name, version)
                        .await?
                {
                    return Err(TableError::ConcurrencyConflict);
                }
                debug!(reminder = %entry.id(), "Accepted source version token on fallback write");
                self.destination.upsert_row(&mirror).await?
            }
            Err(e) => return Err(e),
        };

        if selection.writes.contains(&TableRole::Source) {
            self.source.upsert_row(&mirror).await?;
        }
        Ok(issued)
    }
}

impl fmt::Debug for MigrationRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationRouter")
            .field("mode", &self.mode())
            .finish_non_exhaustive()
    }
}

/// Merges per-table results, keeping the authoritative copy of each row.
fn merge(
    mut results: Vec<(TableRole, ReminderTableData)>,
    authoritative: TableRole,
) -> ReminderTableData {
    results.sort_by_key(|(role, _)| *role != authoritative);
    let mut seen = HashSet::new();
    results
        .into_iter()
        .flat_map(|(_, data)| data)
        .filter(|entry| seen.insert(entry.id()))
        .collect()
}

#[async_trait]
impl ReminderTable for MigrationRouter {
    async fn init(&self) -> Result<()> {
        let selection = select_tables(self.mode()?, OperationKind::Maintenance);
        for role in selection.writes {
            self.table(*role).init().await?;
        }
        Ok(())
    }

    async fn read_rows(&self, target: &TargetKey) -> Result<ReminderTableData> {
        let selection = select_tables(self.mode()?, OperationKind::PointRead);
        let mut results = Vec::with_capacity(selection.reads.len());
        for role in selection.reads {
            results.push((*role, self.table(*role).read_rows(target).await?));
        }
        Ok(merge(results, selection.authoritative))
    }

    async fn read_range(&self, range: RingRange) -> Result<ReminderTableData> {
        let selection = select_tables(self.mode()?, OperationKind::RangeScan);
        let mut results = Vec::with_capacity(selection.reads.len());
        for role in selection.reads {
            results.push((*role, self.table(*role).read_range(range).await?));
        }
        Ok(merge(results, selection.authoritative))
    }

    async fn read_row(&self, target: &TargetKey, name: &str) -> Result<Option<ReminderEntry>> {
        let selection = select_tables(self.mode()?, OperationKind::PointRead);
        for (i, role) in selection.reads.iter().enumerate() {
            if let Some(row) = self.table(*role).read_row(target, name).await? {
                if i > 0 {
                    debug!(
                        reminder_target = %target,
                        name,
                        table = ?role,
                        "Read served by fallback table"
                    );
                }
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    async fn upsert_row(&self, entry: &ReminderEntry) -> Result<VersionToken> {
        let mode = self.mode()?;
        let selection = select_tables(mode, OperationKind::Write);
        match &entry.version {
            None => self.upsert_unconditional(selection, entry).await,
            Some(version) => {
                self.upsert_conditional(mode, selection, entry, version)
                    .await
            }
        }
    }

    async fn remove_row(
        &self,
        target: &TargetKey,
        name: &str,
        version: &VersionToken,
    ) -> Result<bool> {
        let mode = self.mode()?;
        // Removes reach every table a read can still observe, so in the
        // write-destination fallback mode the source copy goes too and a
        // fallback read never brings a removed reminder back.
        let selection = select_tables(mode, OperationKind::Remove);
        if let [only] = selection.writes {
            return self.table(*only).remove_row(target, name, version).await;
        }

        // Find the table that issued the caller's token.
        let secondary = match selection.authoritative {
            TableRole::Source => TableRole::Destination,
            TableRole::Destination => TableRole::Source,
        };
        let issuer = if self
            .table(selection.authoritative)
            .read_row(target, name)
            .await?
            .is_some()
        {
            selection.authoritative
        } else if falls_back(mode) {
            secondary
        } else {
            return Ok(false);
        };
        if !self.holds_version(issuer, target, name, version).await? {
            return Ok(false);
        }

        let mut removed = false;
        for role in selection.writes {
            if *role == issuer {
                removed = self.table(*role).remove_row(target, name, version).await?;
            } else {
                self.remove_mirror(*role, target, name).await?;
            }
        }
        if !removed {
            // Lost to a concurrent writer after the token check; put back
            // the mirrors removed on this caller's behalf.
            for role in selection.writes.iter().filter(|r| **r != issuer) {
                self.repair_mirror(issuer, *role, target, name).await?;
            }
        }
        Ok(removed)
    }

    async fn test_only_clear_table(&self) -> Result<()> {
        let selection = select_tables(self.mode()?, OperationKind::Maintenance);
        for role in selection.writes {
            self.table(*role).test_only_clear_table().await?;
        }
        Ok(())
    }
}

/// Rows present in the source but missing from the destination.
///
/// Used by backfill tooling to report progress.
pub async fn pending_backfill(
    router: &MigrationRouter,
    range: RingRange,
) -> Result<Vec<ReminderId>> {
    let copied: HashSet<ReminderId> = router
        .destination
        .read_range(range)
        .await?
        .iter()
        .map(ReminderEntry::id)
        .collect();
    Ok(router
        .source
        .read_range(range)
        .await?
        .into_iter()
        .map(|entry| entry.id())
        .filter(|id| !copied.contains(id))
        .collect())
}
