//! Integration tests for cluster-wide reminder queries.

use std::sync::Arc;
use std::time::Duration;

use chime_service::{Clock, MonotonicClock, ReminderError, ReminderManagement};
use chime_table::{MemoryReminderTable, ReminderEntry, ReminderTable, TargetKey};
use chrono::{DateTime, TimeDelta, Utc};

struct Fixture {
    table: Arc<MemoryReminderTable>,
    clock: Arc<MonotonicClock>,
    management: ReminderManagement,
}

fn fixture() -> Fixture {
    let table = Arc::new(MemoryReminderTable::new());
    let clock = Arc::new(MonotonicClock::new());
    let management = ReminderManagement::new(table.clone(), clock.clone());
    Fixture {
        table,
        clock,
        management,
    }
}

impl Fixture {
    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn insert(&self, target: &str, name: &str, start_in: TimeDelta, period_secs: u64) {
        self.table
            .upsert_row(&ReminderEntry::new(
                target,
                name,
                self.now() + start_in,
                Duration::from_secs(period_secs),
            ))
            .await
            .unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn pages_through_every_reminder_in_key_order() {
    let f = fixture();
    for i in 0..7 {
        f.insert(&format!("t{i}"), "a", TimeDelta::hours(1), 60).await;
        f.insert(&format!("t{i}"), "b", TimeDelta::hours(1), 60).await;
    }

    let mut seen = Vec::new();
    let mut continuation: Option<String> = None;
    let mut pages = 0;
    loop {
        let page = f
            .management
            .list_all(Some(4), continuation.as_deref())
            .await
            .unwrap();
        pages += 1;
        assert!(page.reminders.len() <= 4);
        seen.extend(
            page.reminders
                .into_iter()
                .map(|v| format!("{}/{}", v.target, v.name)),
        );
        match page.continuation {
            Some(next) => continuation = Some(next),
            None => break,
        }
    }

    assert_eq!(pages, 4);
    assert_eq!(seen.len(), 14);
    let mut sorted = seen.clone();
    sorted.sort();
    assert_eq!(seen, sorted);
    assert_eq!(f.management.count_all().await.unwrap(), 14);
}

#[tokio::test(start_paused = true)]
async fn page_size_is_bounded() {
    let f = fixture();
    for size in [0, 4097] {
        let result = f.management.list_all(Some(size), None).await;
        assert!(matches!(
            result,
            Err(ReminderError::OutOfRange {
                name: "page_size",
                ..
            })
        ));
    }
    let result = f.management.list_all(None, Some("garbage")).await;
    assert!(matches!(result, Err(ReminderError::InvalidArgument(_))));
}

#[tokio::test(start_paused = true)]
async fn overdue_reports_unfired_one_shots() {
    let f = fixture();
    f.insert("late", "once", -TimeDelta::minutes(10), 0).await;
    f.insert("recent", "once", -TimeDelta::seconds(30), 0).await;
    f.insert("future", "once", TimeDelta::minutes(10), 0).await;
    f.insert("periodic", "every", -TimeDelta::hours(5), 60).await;

    let overdue = f.management.list_overdue(TimeDelta::zero()).await.unwrap();
    let targets: Vec<&str> = overdue.iter().map(|v| v.target.as_str()).collect();
    assert_eq!(targets, ["late", "recent"]);

    let overdue = f
        .management
        .list_overdue(TimeDelta::minutes(1))
        .await
        .unwrap();
    assert_eq!(overdue.len(), 1);
    assert_eq!(overdue[0].target.as_str(), "late");

    let result = f.management.list_overdue(TimeDelta::seconds(-1)).await;
    assert!(matches!(result, Err(ReminderError::OutOfRange { .. })));
}

#[tokio::test(start_paused = true)]
async fn overdue_window_past_the_calendar_is_empty() {
    let f = fixture();
    f.insert("late", "once", -TimeDelta::days(365), 0).await;

    let overdue_by = TimeDelta::try_seconds(9_000_000_000_000).unwrap();
    let overdue = f.management.list_overdue(overdue_by).await.unwrap();
    assert!(overdue.is_empty());
}

#[tokio::test(start_paused = true)]
async fn upcoming_is_sorted_by_next_due() {
    let f = fixture();
    f.insert("b", "r", TimeDelta::minutes(20), 0).await;
    f.insert("a", "r", TimeDelta::minutes(40), 0).await;
    f.insert("c", "r", TimeDelta::hours(3), 0).await;
    // Started long ago; next tick is within the next minute.
    f.insert("d", "r", -TimeDelta::days(1), 60).await;

    let upcoming = f.management.upcoming(TimeDelta::hours(1)).await.unwrap();
    let targets: Vec<&str> = upcoming.iter().map(|v| v.target.as_str()).collect();
    assert_eq!(targets, ["d", "b", "a"]);
    assert!(upcoming[0].next_due >= f.now());
}

#[tokio::test(start_paused = true)]
async fn delete_removes_the_current_version() {
    let f = fixture();
    f.insert("user/1", "r", TimeDelta::hours(1), 60).await;
    let target = TargetKey::from("user/1");

    assert!(f.management.delete(&target, "r").await.unwrap());
    assert!(!f.management.delete(&target, "r").await.unwrap());
    assert!(f.management.list_for_target(&target).await.unwrap().is_empty());
}
