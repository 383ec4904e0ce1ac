//! Cluster-wide reminder queries for operators.
//!
//! These read the table directly rather than asking the owning members, so
//! they work while members are joining or leaving. Full scans walk the ring
//! in fixed segments to keep individual range reads small.

use std::sync::Arc;

use chime_ring::{RingRange, RING_SIZE};
use chime_table::{ReminderEntry, ReminderTable, TargetKey, VersionToken};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{ReminderError, Result};
use crate::registry::ReminderRegistry;
use crate::schedule::next_tick;

/// Page size used when the caller gives none.
pub const DEFAULT_PAGE_SIZE: usize = 256;

/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: usize = 4096;

const SCAN_SEGMENTS: u64 = 128;

/// A stored reminder as reported to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReminderView {
    pub target: TargetKey,
    pub name: String,
    pub start_at: DateTime<Utc>,
    pub period_ms: u64,
    pub next_due: DateTime<Utc>,
    pub version: Option<VersionToken>,
}

impl ReminderView {
    fn new(entry: ReminderEntry, now: DateTime<Utc>) -> Self {
        let next_due = if entry.is_one_shot() {
            entry.start_at
        } else {
            next_tick(entry.start_at, entry.period, now)
        };
        Self {
            period_ms: u64::try_from(entry.period.as_millis()).unwrap_or(u64::MAX),
            next_due,
            target: entry.target,
            name: entry.name,
            start_at: entry.start_at,
            version: entry.version,
        }
    }
}

/// One page of [`ReminderManagement::list_all`].
#[derive(Debug, Clone, Serialize)]
pub struct ReminderPage {
    pub reminders: Vec<ReminderView>,
    /// Pass back to fetch the next page. `None` on the last page.
    pub continuation: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct Cursor {
    target: TargetKey,
    name: String,
}

/// Read-mostly management view over a reminder table.
#[derive(Clone)]
pub struct ReminderManagement {
    table: Arc<dyn ReminderTable>,
    clock: Arc<dyn Clock>,
    registry: Option<Arc<ReminderRegistry>>,
}

impl ReminderManagement {
    pub fn new(table: Arc<dyn ReminderTable>, clock: Arc<dyn Clock>) -> Self {
        Self {
            table,
            clock,
            registry: None,
        }
    }

    /// Routes deletes through `registry` so the owning member stops the
    /// timer at once. Without it a deleted reminder keeps firing until the
    /// owner's next range refresh.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<ReminderRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Lists every reminder ordered by `(target, name)`.
    pub async fn list_all(
        &self,
        page_size: Option<usize>,
        continuation: Option<&str>,
    ) -> Result<ReminderPage> {
        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(ReminderError::OutOfRange {
                name: "page_size",
                detail: format!("{page_size} is outside [1, {MAX_PAGE_SIZE}]"),
            });
        }
        let after = continuation.map(decode_cursor).transpose()?;

        let mut rows = self.scan().await?;
        rows.sort_by(|a, b| (&a.target, &a.name).cmp(&(&b.target, &b.name)));

        let now = self.clock.now();
        let mut remaining = rows
            .into_iter()
            .filter(|e| match &after {
                Some(c) => (&e.target, &e.name) > (&c.target, &c.name),
                None => true,
            })
            .peekable();

        let reminders: Vec<ReminderView> = remaining
            .by_ref()
            .take(page_size)
            .map(|e| ReminderView::new(e, now))
            .collect();

        let continuation = match (remaining.peek(), reminders.last()) {
            (Some(_), Some(last)) => Some(encode_cursor(&last.target, &last.name)?),
            _ => None,
        };
        Ok(ReminderPage {
            reminders,
            continuation,
        })
    }

    /// Reminders whose next tick is more than `overdue_by` in the past.
    ///
    /// Periodic reminders always have a next tick ahead of now, so in
    /// practice this reports one-shot reminders that have not fired.
    pub async fn list_overdue(&self, overdue_by: TimeDelta) -> Result<Vec<ReminderView>> {
        if overdue_by < TimeDelta::zero() {
            return Err(ReminderError::OutOfRange {
                name: "overdue_by",
                detail: "must not be negative".into(),
            });
        }
        let now = self.clock.now();
        let cutoff = now
            .checked_sub_signed(overdue_by)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut views: Vec<ReminderView> = self
            .scan()
            .await?
            .into_iter()
            .map(|e| ReminderView::new(e, now))
            .filter(|v| v.next_due < cutoff)
            .collect();
        views.sort_by(|a, b| a.next_due.cmp(&b.next_due));
        Ok(views)
    }

    /// Reminders due within `horizon`, soonest first.
    pub async fn upcoming(&self, horizon: TimeDelta) -> Result<Vec<ReminderView>> {
        if horizon < TimeDelta::zero() {
            return Err(ReminderError::OutOfRange {
                name: "horizon",
                detail: "must not be negative".into(),
            });
        }
        let now = self.clock.now();
        let until = now.checked_add_signed(horizon).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let mut views: Vec<ReminderView> = self
            .scan()
            .await?
            .into_iter()
            .map(|e| ReminderView::new(e, now))
            .filter(|v| v.next_due <= until)
            .collect();
        views.sort_by(|a, b| {
            (a.next_due, &a.target, &a.name).cmp(&(b.next_due, &b.target, &b.name))
        });
        Ok(views)
    }

    pub async fn list_for_target(&self, target: &TargetKey) -> Result<Vec<ReminderView>> {
        let now = self.clock.now();
        let mut views: Vec<ReminderView> = self
            .table
            .read_rows(target)
            .await?
            .into_iter()
            .map(|e| ReminderView::new(e, now))
            .collect();
        views.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(views)
    }

    pub async fn count_all(&self) -> Result<usize> {
        let mut count = 0;
        for segment in segments() {
            count += self.table.read_range(segment).await?.len();
        }
        Ok(count)
    }

    /// Deletes a reminder at whatever version is stored.
    ///
    /// With a registry attached the delete goes to the owning member.
    ///
    /// Returns false if there was nothing to delete. A concurrent update
    /// between the read and the delete is reported as a conflict.
    pub async fn delete(&self, target: &TargetKey, name: &str) -> Result<bool> {
        if let Some(registry) = &self.registry {
            return registry.remove(target, name).await;
        }
        let Some(row) = self.table.read_row(target, name).await? else {
            return Ok(false);
        };
        let Some(version) = row.version.as_ref() else {
            return Ok(false);
        };
        if self.table.remove_row(target, name, version).await? {
            Ok(true)
        } else {
            Err(ReminderError::ConcurrencyConflict(row.id().to_string()))
        }
    }

    async fn scan(&self) -> Result<Vec<ReminderEntry>> {
        let mut rows = Vec::new();
        for segment in segments() {
            rows.extend(self.table.read_range(segment).await?);
        }
        Ok(rows)
    }
}

impl std::fmt::Debug for ReminderManagement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReminderManagement").finish_non_exhaustive()
    }
}

/// Splits the ring into `SCAN_SEGMENTS` arcs that tile it exactly.
fn segments() -> impl Iterator<Item = RingRange> {
    let step = RING_SIZE / SCAN_SEGMENTS;
    (0..SCAN_SEGMENTS).map(move |i| {
        // The last boundary is RING_SIZE, which wraps to zero.
        let start = (i * step) as u32;
        let end = ((i + 1) * step % RING_SIZE) as u32;
        RingRange::new(start, end)
    })
}

fn encode_cursor(target: &TargetKey, name: &str) -> Result<String> {
    serde_json::to_string(&Cursor {
        target: target.clone(),
        name: name.to_owned(),
    })
    .map_err(|e| ReminderError::InvalidArgument(format!("cannot encode continuation: {e}")))
}

fn decode_cursor(token: &str) -> Result<Cursor> {
    serde_json::from_str(token)
        .map_err(|_| ReminderError::InvalidArgument("malformed continuation token".into()))
}
