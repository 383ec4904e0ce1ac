//! Local timer bookkeeping for the reminders a partition owns.
//!
//! The arena holds plain data. Each reminder moves through
//! `Scheduled -> Fired -> Scheduled` (periodic) or `Scheduled -> Fired ->
//! Stopped` (one-shot); the partition's timer task drives the transitions.
//! Generations tie a firing back to the exact timer that produced it, so a
//! reminder restarted while its callback was running is not rescheduled
//! twice.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

use chime_ring::{MultiRange, RingRange};
use chime_table::{ReminderEntry, ReminderId, ReminderTableData};
use chrono::{DateTime, Utc};
use tracing::trace;

use crate::schedule::{next_tick, next_tick_after};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerState {
    Scheduled,
    Fired,
    /// Kept until the table confirms the reminder is gone.
    Stopped,
}

#[derive(Debug, Clone)]
struct LocalReminder {
    entry: ReminderEntry,
    hash: u32,
    state: TimerState,
    generation: u64,
    /// Orders local changes against table reads.
    sequence: u64,
    next_due: Option<DateTime<Utc>>,
}

/// A tick taken off the due queue.
#[derive(Debug, Clone)]
pub(crate) struct Firing {
    pub id: ReminderId,
    pub entry: ReminderEntry,
    pub generation: u64,
    pub due: DateTime<Utc>,
}

/// What happened to a reminder once its callback returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Completion {
    Rescheduled(DateTime<Utc>),
    /// A one-shot finished; its row should be deleted.
    Finished(ReminderEntry),
    /// The timer was stopped or restarted while the callback ran.
    Stale,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReconcileStats {
    pub started: usize,
    pub restarted: usize,
    pub dropped: usize,
}

#[derive(Debug, Default)]
pub(crate) struct TimerArena {
    reminders: HashMap<ReminderId, LocalReminder>,
    due: BTreeSet<(DateTime<Utc>, u64, ReminderId)>,
    next_generation: u64,
    sequence: u64,
}

impl TimerArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of reminders held locally, including stopped ones.
    pub fn len(&self) -> usize {
        self.reminders.len()
    }

    pub fn is_ticking(&self, id: &ReminderId) -> bool {
        self.reminders
            .get(id)
            .is_some_and(|r| r.state != TimerState::Stopped)
    }

    pub fn ticking_count(&self) -> usize {
        self.reminders
            .values()
            .filter(|r| r.state != TimerState::Stopped)
            .count()
    }

    /// Earliest pending fire time.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.due.first().map(|(at, _, _)| *at)
    }

    /// Marks the start of a table read; the returned value is compared
    /// against local sequence numbers when the read is reconciled.
    pub fn begin_read(&mut self) -> u64 {
        self.bump_sequence()
    }

    /// Starts (or restarts) the timer for `entry`.
    pub fn start(&mut self, entry: ReminderEntry, now: DateTime<Utc>) -> DateTime<Utc> {
        let id = entry.id();
        self.unschedule(&id);

        let generation = self.next_generation;
        self.next_generation += 1;
        let sequence = self.bump_sequence();
        let due = next_tick(entry.start_at, entry.period, now);

        self.due.insert((due, generation, id.clone()));
        self.reminders.insert(
            id,
            LocalReminder {
                hash: entry.ring_hash(),
                entry,
                state: TimerState::Scheduled,
                generation,
                sequence,
                next_due: Some(due),
            },
        );
        due
    }

    /// Stops a timer but remembers that it was stopped locally.
    pub fn stop(&mut self, id: &ReminderId) -> bool {
        if !self.reminders.contains_key(id) {
            return false;
        }
        self.unschedule(id);
        let sequence = self.bump_sequence();
        if let Some(reminder) = self.reminders.get_mut(id) {
            reminder.state = TimerState::Stopped;
            reminder.sequence = sequence;
        }
        true
    }

    /// Forgets every reminder whose target hash is outside `range`.
    pub fn retain_in(&mut self, range: &MultiRange) -> usize {
        let outside: Vec<ReminderId> = self
            .reminders
            .iter()
            .filter(|(_, r)| !range.in_range(r.hash))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &outside {
            trace!(reminder = %id, "No longer in range, dropping timer");
            self.forget(id);
        }
        outside.len()
    }

    pub fn clear(&mut self) {
        self.reminders.clear();
        self.due.clear();
    }

    /// Takes every tick due at or before `now`.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<Firing> {
        let mut firings = Vec::new();
        while let Some((at, generation, id)) = self.due.first().cloned() {
            if at > now {
                break;
            }
            self.due.pop_first();
            let Some(reminder) = self.reminders.get_mut(&id) else {
                continue;
            };
            if reminder.generation != generation || reminder.state != TimerState::Scheduled {
                continue;
            }
            reminder.state = TimerState::Fired;
            reminder.next_due = None;
            firings.push(Firing {
                id,
                entry: reminder.entry.clone(),
                generation,
                due: at,
            });
        }
        firings
    }

    /// Records that a firing's callback returned.
    ///
    /// A failed one-shot delivery is retried after `retry_after`.
    pub fn complete(
        &mut self,
        firing: &Firing,
        delivered: bool,
        now: DateTime<Utc>,
        retry_after: Duration,
    ) -> Completion {
        let sequence = self.sequence + 1;
        let Some(reminder) = self.reminders.get_mut(&firing.id) else {
            return Completion::Stale;
        };
        if reminder.generation != firing.generation || reminder.state != TimerState::Fired {
            return Completion::Stale;
        }

        let next = if !reminder.entry.is_one_shot() {
            next_tick_after(reminder.entry.start_at, reminder.entry.period, firing.due, now)
        } else if delivered {
            reminder.state = TimerState::Stopped;
            reminder.sequence = sequence;
            self.sequence = sequence;
            return Completion::Finished(reminder.entry.clone());
        } else {
            chrono::TimeDelta::from_std(retry_after)
                .ok()
                .and_then(|d| now.checked_add_signed(d))
                .unwrap_or(now)
        };

        reminder.state = TimerState::Scheduled;
        reminder.next_due = Some(next);
        self.due.insert((next, firing.generation, firing.id.clone()));
        Completion::Rescheduled(next)
    }

    /// Applies a table read of `range` started at `read_sequence`.
    ///
    /// Rows the table holds with a version the local copy lacks are
    /// (re)started, unless the local copy changed after the read began.
    /// Local reminders missing from the table are dropped on the same
    /// condition.
    pub fn reconcile(
        &mut self,
        range: RingRange,
        data: ReminderTableData,
        read_sequence: u64,
        now: DateTime<Utc>,
    ) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        let mut not_in_table: HashSet<ReminderId> = self
            .reminders
            .iter()
            .filter(|(_, r)| range.in_range(r.hash))
            .map(|(id, _)| id.clone())
            .collect();

        for entry in data {
            let id = entry.id();
            not_in_table.remove(&id);
            match self.reminders.get(&id) {
                Some(local) if read_sequence > local.sequence => {
                    if local.entry.version != entry.version {
                        trace!(reminder = %id, "Table holds a newer version, restarting");
                        self.start(entry, now);
                        stats.restarted += 1;
                    }
                }
                Some(_) => {
                    trace!(reminder = %id, "Local copy is newer than the table read");
                }
                None => {
                    trace!(reminder = %id, "Found in table, starting");
                    self.start(entry, now);
                    stats.started += 1;
                }
            }
        }

        for id in not_in_table {
            let older = self
                .reminders
                .get(&id)
                .is_some_and(|r| r.sequence < read_sequence);
            if older {
                trace!(reminder = %id, "Missing from table, dropping");
                self.forget(&id);
                stats.dropped += 1;
            }
        }
        stats
    }

    fn forget(&mut self, id: &ReminderId) {
        self.unschedule(id);
        self.reminders.remove(id);
    }

    fn unschedule(&mut self, id: &ReminderId) {
        if let Some(reminder) = self.reminders.get_mut(id) {
            if let Some(due) = reminder.next_due.take() {
                self.due.remove(&(due, reminder.generation, id.clone()));
            }
        }
    }

    fn bump_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }
}
