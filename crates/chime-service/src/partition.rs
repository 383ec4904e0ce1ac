//! Partition ownership and reminder firing for one cluster member.
//!
//! A [`ReminderPartitionService`] owns the reminders whose target hashes
//! fall into its member's ring range. It keeps a local timer for each of
//! them and delivers ticks to a [`ReminderSink`].
//!
//! Two background tasks run per service:
//!
//! - the *range worker* performs the initial load, then drains range-change
//!   notifications and refresh requests one at a time and periodically
//!   re-reads the owned range from the table;
//! - the *timer driver* sleeps until the earliest due reminder and spawns a
//!   delivery for each tick.
//!
//! Ownership hand-off is never pushed between members. A member that loses
//! part of its range drops those timers; the new owner finds the rows when
//! it reads its own range.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chime_ring::{MultiRange, RangeChange, RangeChangeListener, RingProvider, SubscriptionId};
use chime_table::{ReminderEntry, ReminderId, ReminderTable, TableError, TargetKey};
use chrono::TimeDelta;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::clock::Clock;
use crate::config::ServiceConfig;
use crate::error::{ReminderError, Result};
use crate::schedule::TickStatus;
use crate::service::{ReminderHandle, ReminderService};
use crate::sink::ReminderSink;
use crate::timers::{Completion, Firing, TimerArena};

/// Lifecycle of a partition service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    /// Started but the initial load has not completed.
    Booting,
    Started,
    Stopped,
}

struct PartitionState {
    range: MultiRange,
    /// Bumped for every range change this service has applied.
    range_serial: u64,
    arena: TimerArena,
}

struct Inner {
    member: String,
    ring: Arc<dyn RingProvider>,
    table: Arc<dyn ReminderTable>,
    sink: Arc<dyn ReminderSink>,
    clock: Arc<dyn Clock>,
    config: ServiceConfig,
    state: Mutex<PartitionState>,
    status: watch::Sender<ServiceStatus>,
    load_error: Mutex<Option<String>>,
    timer_wake: Notify,
    cancel: CancellationToken,
}

/// Work for the range worker, applied strictly in arrival order.
enum WorkerCommand {
    RangeChanged(RangeChange),
    Refresh(oneshot::Sender<Result<()>>),
}

/// Forwards ring notifications into the range worker's queue.
struct RangeForwarder {
    tx: mpsc::UnboundedSender<WorkerCommand>,
}

impl RangeChangeListener for RangeForwarder {
    fn range_changed(&self, change: RangeChange) {
        // Closed once the service stops.
        let _ = self.tx.send(WorkerCommand::RangeChanged(change));
    }
}

/// Reminder service for one cluster member.
pub struct ReminderPartitionService {
    inner: Arc<Inner>,
    subscription: Mutex<Option<SubscriptionId>>,
    commands: Mutex<Option<mpsc::UnboundedSender<WorkerCommand>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ReminderPartitionService {
    /// Creates a service in the `Booting` state. Nothing runs until
    /// [`start`](Self::start).
    pub fn new(
        ring: Arc<dyn RingProvider>,
        table: Arc<dyn ReminderTable>,
        sink: Arc<dyn ReminderSink>,
        clock: Arc<dyn Clock>,
        config: ServiceConfig,
    ) -> Self {
        let (status, _) = watch::channel(ServiceStatus::Booting);
        Self {
            inner: Arc::new(Inner {
                member: config.member_id.clone(),
                ring,
                table,
                sink,
                clock,
                config,
                state: Mutex::new(PartitionState {
                    range: MultiRange::empty(),
                    range_serial: 0,
                    arena: TimerArena::new(),
                }),
                status,
                load_error: Mutex::new(None),
                timer_wake: Notify::new(),
                cancel: CancellationToken::new(),
            }),
            subscription: Mutex::new(None),
            commands: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Initialises the table, subscribes to range changes and starts the
    /// background tasks. The initial load completes asynchronously.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let running = !self.tasks.lock().is_empty();
        match inner.status() {
            ServiceStatus::Stopped => return Err(ReminderError::Stopped),
            ServiceStatus::Started => return Ok(()),
            ServiceStatus::Booting if running => return Ok(()),
            ServiceStatus::Booting => {}
        }

        match tokio::time::timeout(inner.config.init_timeout, inner.table.init()).await {
            Ok(result) => result?,
            Err(_) => {
                error!(
                    member = %inner.member,
                    timeout_secs = inner.config.init_timeout.as_secs(),
                    "Reminder table initialisation timed out"
                );
                return Err(TableError::Timeout.into());
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = inner.ring.subscribe(Arc::new(RangeForwarder { tx: tx.clone() }));
        *self.subscription.lock() = Some(subscription);
        *self.commands.lock() = Some(tx);

        let range = inner.ring.my_range();
        info!(member = %inner.member, range = %range, "Reminder service starting");
        inner.state.lock().range = range;

        let worker = tokio::spawn(Arc::clone(inner).run_range_worker(rx));
        let timers = tokio::spawn(Arc::clone(inner).run_timer_driver());
        self.tasks.lock().extend([worker, timers]);
        Ok(())
    }

    /// Stops every local timer and unsubscribes from the ring.
    ///
    /// Stored rows are left in place for the next owner. A callback already
    /// running is allowed to finish, but nothing new fires once this returns.
    pub async fn stop(&self) {
        let inner = &self.inner;
        if inner.status.send_replace(ServiceStatus::Stopped) == ServiceStatus::Stopped {
            return;
        }
        inner.cancel.cancel();

        let subscription = self.subscription.lock().take();
        if let Some(id) = subscription {
            inner.ring.unsubscribe(id);
        }
        self.commands.lock().take();
        inner.state.lock().arena.clear();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(member = %inner.member, error = %e, "Reminder task ended abnormally");
            }
        }
        info!(member = %inner.member, "Reminder service stopped");
    }

    pub fn status(&self) -> ServiceStatus {
        self.inner.status()
    }

    pub fn member(&self) -> &str {
        &self.inner.member
    }

    /// The range this service currently believes it owns.
    pub fn range(&self) -> MultiRange {
        self.inner.state.lock().range.clone()
    }

    /// Number of reminders with a live local timer.
    pub fn active_timers(&self) -> usize {
        self.inner.state.lock().arena.ticking_count()
    }

    /// Re-reads the owned range now rather than waiting for the refresh.
    ///
    /// Queued behind any pending range changes, and behind the initial load.
    pub async fn refresh(&self) -> Result<()> {
        let commands = self.commands.lock().clone();
        let Some(commands) = commands else {
            return Err(match self.status() {
                ServiceStatus::Stopped => ReminderError::Stopped,
                _ => ReminderError::NotReady("service not started".into()),
            });
        };
        let (reply, done) = oneshot::channel();
        commands
            .send(WorkerCommand::Refresh(reply))
            .map_err(|_| ReminderError::Stopped)?;
        done.await.map_err(|_| ReminderError::Stopped)?
    }
}

impl std::fmt::Debug for ReminderPartitionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReminderPartitionService")
            .field("member", &self.inner.member)
            .field("status", &self.inner.status())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn status(&self) -> ServiceStatus {
        *self.status.borrow()
    }

    async fn run_range_worker(
        self: Arc<Self>,
        mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
    ) {
        if !self.initial_load().await {
            return;
        }

        let period = self.config.refresh_period;
        let mut refresh = tokio::time::interval_at(Instant::now() + period, period);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break,

                Some(command) = commands.recv() => match command {
                    WorkerCommand::RangeChanged(change) => self.apply_range_change(change).await,
                    WorkerCommand::Refresh(reply) => {
                        // The caller may have given up waiting.
                        let _ = reply.send(self.read_and_update().await);
                    }
                },

                _ = refresh.tick() => {
                    if let Err(e) = self.read_and_update().await {
                        warn!(member = %self.member, error = %e, "Periodic reminder refresh failed");
                    }
                }
            }
        }
        debug!(member = %self.member, "Range worker stopped");
    }

    /// Loads the owned range until it succeeds. Returns false if the
    /// service stopped first.
    async fn initial_load(&self) -> bool {
        let mut attempt = 0_u32;
        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return false,
                result = self.read_and_update() => result,
            };

            match result {
                Ok(()) => {
                    self.load_error.lock().take();
                    let started = self.status.send_if_modified(|status| {
                        if *status == ServiceStatus::Booting {
                            *status = ServiceStatus::Started;
                            true
                        } else {
                            false
                        }
                    });
                    if started {
                        info!(
                            member = %self.member,
                            attempt,
                            reminders = self.state.lock().arena.ticking_count(),
                            "Reminder service started"
                        );
                    }
                    return started;
                }
                Err(e) if attempt >= self.config.initial_load_attempts => {
                    error!(
                        member = %self.member,
                        attempt,
                        error = %e,
                        "Initial reminder load failed, requests will fail until it succeeds"
                    );
                    *self.load_error.lock() = Some(e.to_string());
                }
                Err(e) => {
                    warn!(member = %self.member, attempt, error = %e, "Initial reminder load failed, retrying");
                }
            }

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return false,
                () = tokio::time::sleep(self.config.initial_load_retry_delay) => {}
            }
        }
    }

    async fn apply_range_change(&self, change: RangeChange) {
        let serial = {
            let mut state = self.state.lock();
            state.range_serial += 1;
            state.range = change.new.clone();
            state.range_serial
        };
        info!(
            member = %self.member,
            old = %change.old,
            new = %change.new,
            increased = change.increased,
            ring_serial = change.serial,
            serial,
            "Reminder range changed"
        );

        if let Err(e) = self.read_and_update().await {
            warn!(member = %self.member, error = %e, "Failed to reload reminders after range change");
        }
    }

    /// Drops timers outside the owned range, then reconciles each owned
    /// sub-range with the table.
    async fn read_and_update(&self) -> Result<()> {
        let (range, serial) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let dropped = state.arena.retain_in(&state.range);
            if dropped > 0 {
                info!(member = %self.member, dropped, "Dropped reminders outside the owned range");
            }
            (state.range.clone(), state.range_serial)
        };

        for &sub_range in range.sub_ranges() {
            let read_sequence = self.state.lock().arena.begin_read();
            let data = self.table.read_range(sub_range).await?;

            let stats = {
                let mut state = self.state.lock();
                if state.range_serial != serial {
                    // A newer range change will read again.
                    warn!(
                        member = %self.member,
                        range = %sub_range,
                        "Range changed during table read, discarding result"
                    );
                    return Ok(());
                }
                let rows = data.len();
                let stats = state
                    .arena
                    .reconcile(sub_range, data, read_sequence, self.clock.now());
                trace!(member = %self.member, range = %sub_range, rows, "Reconciled range");
                stats
            };

            if stats.started + stats.restarted + stats.dropped > 0 {
                debug!(
                    member = %self.member,
                    range = %sub_range,
                    started = stats.started,
                    restarted = stats.restarted,
                    dropped = stats.dropped,
                    "Reminder timers updated from table"
                );
            }
        }

        self.timer_wake.notify_one();
        Ok(())
    }

    /// Admits a request once the initial load is done.
    ///
    /// Targets outside the owned range are still served; the next range
    /// read moves their timers to the right member.
    async fn check_responsibility(&self, target: &TargetKey) -> Result<()> {
        let mut status = self.status.subscribe();
        let current = *status.borrow_and_update();
        match current {
            ServiceStatus::Started => {}
            ServiceStatus::Stopped => return Err(ReminderError::Stopped),
            ServiceStatus::Booting => self.wait_for_start(&mut status).await?,
        }

        let hash = target.ring_hash();
        if !self.state.lock().range.in_range(hash) {
            warn!(
                member = %self.member,
                reminder_target = %target,
                hash,
                "Request for a target outside the owned range"
            );
        }
        Ok(())
    }

    async fn wait_for_start(&self, status: &mut watch::Receiver<ServiceStatus>) -> Result<()> {
        if let Some(reason) = self.load_error.lock().clone() {
            return Err(ReminderError::NotReady(reason));
        }

        let max_wait = self.config.initial_load_max_wait;
        let waited = tokio::time::timeout(max_wait, async {
            status
                .wait_for(|s| *s != ServiceStatus::Booting)
                .await
                .map(|s| *s)
        })
        .await;

        match waited {
            Ok(Ok(ServiceStatus::Started)) => Ok(()),
            Ok(_) => Err(ReminderError::Stopped),
            Err(_) => Err(ReminderError::NotReady(format!(
                "initial load did not finish within {}s",
                max_wait.as_secs()
            ))),
        }
    }

    async fn run_timer_driver(self: Arc<Self>) {
        loop {
            let next = self.state.lock().arena.next_due();
            let deadline = next.map(|at| self.clock.instant_at(at));

            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break,

                () = self.timer_wake.notified() => {}

                () = sleep_until(deadline) => self.fire_due(),
            }
        }
        debug!(member = %self.member, "Timer driver stopped");
    }

    fn fire_due(self: &Arc<Self>) {
        let firings = self.state.lock().arena.take_due(self.clock.now());
        for firing in firings {
            let inner = Arc::clone(self);
            tokio::spawn(async move { inner.deliver(firing).await });
        }
    }

    async fn deliver(&self, firing: Firing) {
        let entry = &firing.entry;
        let status = TickStatus {
            first_tick_time: entry.start_at,
            period: entry.period,
            current_tick_time: self.clock.now(),
        };

        let delivered = match self.sink.deliver(&entry.target, &entry.name, status).await {
            Ok(()) => {
                debug!(member = %self.member, reminder = %firing.id, due = %firing.due, "Reminder delivered");
                true
            }
            Err(e) => {
                warn!(member = %self.member, reminder = %firing.id, error = %e, "Reminder delivery failed");
                false
            }
        };

        let completion = self.state.lock().arena.complete(
            &firing,
            delivered,
            self.clock.now(),
            self.config.minimum_period,
        );
        match completion {
            Completion::Rescheduled(next) => {
                trace!(member = %self.member, reminder = %firing.id, next = %next, "Reminder rescheduled");
            }
            Completion::Finished(finished) => self.remove_finished(finished).await,
            Completion::Stale => {
                trace!(member = %self.member, reminder = %firing.id, "Reminder changed while firing");
            }
        }
        self.timer_wake.notify_one();
    }

    async fn remove_finished(&self, entry: ReminderEntry) {
        let Some(version) = entry.version.as_ref() else {
            return;
        };
        match self.table.remove_row(&entry.target, &entry.name, version).await {
            Ok(true) => {
                debug!(member = %self.member, reminder = %entry.id(), "One-shot reminder removed");
            }
            Ok(false) => {
                debug!(
                    member = %self.member,
                    reminder = %entry.id(),
                    "One-shot reminder was replaced before removal"
                );
            }
            Err(e) => {
                warn!(
                    member = %self.member,
                    reminder = %entry.id(),
                    error = %e,
                    "Failed to remove finished one-shot reminder"
                );
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[async_trait]
impl ReminderService for ReminderPartitionService {
    async fn register_or_update(
        &self,
        target: &TargetKey,
        name: &str,
        due: Duration,
        period: Duration,
    ) -> Result<ReminderHandle> {
        let inner = &self.inner;
        inner.check_responsibility(target).await?;

        let now = inner.clock.now();
        let start_at = TimeDelta::from_std(due)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .ok_or_else(|| ReminderError::OutOfRange {
                name: "due",
                detail: format!("{due:?} from now is not representable"),
            })?;

        let entry = ReminderEntry::new(target.clone(), name, start_at, period);
        let version = inner.table.upsert_row(&entry).await?;
        let next = inner
            .state
            .lock()
            .arena
            .start(entry.with_version(version.clone()), now);
        inner.timer_wake.notify_one();

        debug!(
            member = %inner.member,
            reminder_target = %target,
            reminder = name,
            next = %next,
            period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
            "Reminder registered"
        );
        Ok(ReminderHandle {
            target: target.clone(),
            name: name.to_owned(),
            version,
        })
    }

    async fn unregister(&self, handle: &ReminderHandle) -> Result<()> {
        let inner = &self.inner;
        inner.check_responsibility(&handle.target).await?;

        let removed = inner
            .table
            .remove_row(&handle.target, &handle.name, &handle.version)
            .await?;
        let id = ReminderId::new(handle.target.clone(), handle.name.clone());
        if !removed {
            return Err(ReminderError::ConcurrencyConflict(id.to_string()));
        }

        inner.state.lock().arena.stop(&id);
        inner.timer_wake.notify_one();
        debug!(member = %inner.member, reminder = %id, "Reminder unregistered");
        Ok(())
    }

    async fn get_reminder(
        &self,
        target: &TargetKey,
        name: &str,
    ) -> Result<Option<ReminderHandle>> {
        self.inner.check_responsibility(target).await?;
        let row = self.inner.table.read_row(target, name).await?;
        Ok(row.and_then(ReminderHandle::from_entry))
    }

    async fn get_reminders(&self, target: &TargetKey) -> Result<Vec<ReminderHandle>> {
        self.inner.check_responsibility(target).await?;
        let rows = self.inner.table.read_rows(target).await?;
        Ok(rows
            .into_iter()
            .filter_map(ReminderHandle::from_entry)
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::error::DeliveryError;
    use chime_ring::{ClusterRing, PositionStrategy, RingRange};
    use chime_table::{MemoryReminderTable, ReminderTableData, VersionToken};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingSink {
        ticks: AtomicU32,
    }

    #[async_trait]
    impl ReminderSink for CountingSink {
        async fn deliver(
            &self,
            _target: &TargetKey,
            _name: &str,
            _status: TickStatus,
        ) -> std::result::Result<(), DeliveryError> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Fails every range read.
    struct BrokenTable;

    #[async_trait]
    impl ReminderTable for BrokenTable {
        async fn init(&self) -> chime_table::Result<()> {
            Ok(())
        }
        async fn read_rows(&self, _: &TargetKey) -> chime_table::Result<ReminderTableData> {
            Err(TableError::StorageUnavailable("down".into()))
        }
        async fn read_range(&self, _: RingRange) -> chime_table::Result<ReminderTableData> {
            Err(TableError::StorageUnavailable("down".into()))
        }
        async fn read_row(
            &self,
            _: &TargetKey,
            _: &str,
        ) -> chime_table::Result<Option<ReminderEntry>> {
            Err(TableError::StorageUnavailable("down".into()))
        }
        async fn upsert_row(&self, _: &ReminderEntry) -> chime_table::Result<VersionToken> {
            Err(TableError::StorageUnavailable("down".into()))
        }
        async fn remove_row(
            &self,
            _: &TargetKey,
            _: &str,
            _: &VersionToken,
        ) -> chime_table::Result<bool> {
            Err(TableError::StorageUnavailable("down".into()))
        }
        async fn test_only_clear_table(&self) -> chime_table::Result<()> {
            Ok(())
        }
    }

    fn config() -> ServiceConfig {
        ServiceConfig {
            member_id: "silo-a".into(),
            minimum_period: Duration::from_secs(1),
            ..ServiceConfig::default()
        }
    }

    fn service(table: Arc<dyn ReminderTable>, sink: Arc<dyn ReminderSink>) -> ReminderPartitionService {
        let ring = Arc::new(ClusterRing::with_members(PositionStrategy::default(), ["silo-a"]));
        ReminderPartitionService::new(
            Arc::new(ring.member_view("silo-a")),
            table,
            sink,
            Arc::new(MonotonicClock::new()),
            config(),
        )
    }

    async fn wait_started(service: &ReminderPartitionService) {
        for _ in 0..100 {
            if service.status() == ServiceStatus::Started {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("service did not start");
    }

    #[tokio::test(start_paused = true)]
    async fn loads_existing_rows_on_start() {
        let table = Arc::new(MemoryReminderTable::new());
        let start = chrono::Utc::now() + TimeDelta::hours(1);
        table
            .upsert_row(&ReminderEntry::new("user/1", "digest", start, Duration::from_secs(60)))
            .await
            .unwrap();

        let service = service(table, Arc::new(CountingSink::default()));
        service.start().await.unwrap();
        wait_started(&service).await;

        assert_eq!(service.active_timers(), 1);
        service.stop().await;
        assert_eq!(service.status(), ServiceStatus::Stopped);
        assert_eq!(service.active_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unregister_with_stale_handle_conflicts() {
        let table = Arc::new(MemoryReminderTable::new());
        let service = service(table, Arc::new(CountingSink::default()));
        service.start().await.unwrap();
        wait_started(&service).await;

        let target = TargetKey::from("user/7");
        let first = service
            .register_or_update(&target, "ping", Duration::from_secs(10), Duration::from_secs(10))
            .await
            .unwrap();
        let second = service
            .register_or_update(&target, "ping", Duration::from_secs(10), Duration::from_secs(10))
            .await
            .unwrap();

        let result = service.unregister(&first).await;
        assert!(matches!(result, Err(ReminderError::ConcurrencyConflict(_))));

        service.unregister(&second).await.unwrap();
        assert_eq!(service.active_timers(), 0);
        assert!(service.get_reminder(&target, "ping").await.unwrap().is_none());
        service.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_initial_load_fails_requests_fast() {
        let service = service(Arc::new(BrokenTable), Arc::new(CountingSink::default()));
        service.start().await.unwrap();

        // Two attempts separated by the retry delay.
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(service.status(), ServiceStatus::Booting);

        let result = service.get_reminders(&TargetKey::from("user/1")).await;
        assert!(matches!(result, Err(ReminderError::NotReady(_))));
        service.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_runs_on_the_range_worker() {
        let table = Arc::new(MemoryReminderTable::new());
        let service = service(table.clone(), Arc::new(CountingSink::default()));
        assert!(matches!(
            service.refresh().await,
            Err(ReminderError::NotReady(_))
        ));

        service.start().await.unwrap();
        wait_started(&service).await;
        let start = chrono::Utc::now() + TimeDelta::hours(1);
        table
            .upsert_row(&ReminderEntry::new("user/3", "late", start, Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(service.active_timers(), 0);

        // Concurrent refreshes are applied one after the other.
        let (a, b) = tokio::join!(service.refresh(), service.refresh());
        a.unwrap();
        b.unwrap();
        assert_eq!(service.active_timers(), 1);

        service.stop().await;
        assert_eq!(service.refresh().await, Err(ReminderError::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn requests_after_stop_are_rejected() {
        let service = service(
            Arc::new(MemoryReminderTable::new()),
            Arc::new(CountingSink::default()),
        );
        service.start().await.unwrap();
        service.stop().await;

        let result = service.get_reminders(&TargetKey::from("user/1")).await;
        assert_eq!(result, Err(ReminderError::Stopped));
        assert_eq!(service.start().await, Err(ReminderError::Stopped));
    }
}
