//! Behaviour every `ReminderTable` must share.
//!
//! The same checks run against the in-memory table and against a
//! migration router in each of its modes.

use std::sync::Arc;
use std::time::Duration;

use chime_ring::RingRange;
use chime_table::{
    MemoryReminderTable, MigrationMode, MigrationRouter, ReminderEntry, ReminderTable,
    TableError, TargetKey,
};
use chrono::{TimeZone, Utc};

fn entry(target: &str, name: &str) -> ReminderEntry {
    ReminderEntry::new(
        target,
        name,
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        Duration::from_secs(60),
    )
}

fn tables() -> Vec<(String, Arc<dyn ReminderTable>)> {
    let mut tables: Vec<(String, Arc<dyn ReminderTable>)> =
        vec![("memory".into(), Arc::new(MemoryReminderTable::new()))];
    for mode in MigrationMode::ALL {
        let router = MigrationRouter::new(
            Arc::new(MemoryReminderTable::new()),
            Arc::new(MemoryReminderTable::new()),
            mode,
        );
        tables.push((format!("router/{mode}"), Arc::new(router)));
    }
    tables
}

#[tokio::test]
async fn upsert_read_and_conditional_update() {
    for (label, table) in tables() {
        table.init().await.unwrap();

        let first = table.upsert_row(&entry("user/1", "daily")).await.unwrap();
        let row = table
            .read_row(&"user/1".into(), "daily")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.version.as_ref(), Some(&first), "{label}");
        assert_eq!(row.period, Duration::from_secs(60), "{label}");

        let mut update = row.clone();
        update.period = Duration::from_secs(120);
        let second = table.upsert_row(&update).await.unwrap();
        assert_ne!(first, second, "{label}");

        // The first token is now stale.
        let stale = table.upsert_row(&entry("user/1", "daily").with_version(first)).await;
        assert_eq!(stale, Err(TableError::ConcurrencyConflict), "{label}");

        let row = table
            .read_row(&"user/1".into(), "daily")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.period, Duration::from_secs(120), "{label}");
    }
}

#[tokio::test]
async fn remove_requires_current_token() {
    for (label, table) in tables() {
        let first = table.upsert_row(&entry("user/2", "r")).await.unwrap();
        let second = table
            .upsert_row(&entry("user/2", "r").with_version(first.clone()))
            .await
            .unwrap();

        let target = TargetKey::from("user/2");
        assert!(!table.remove_row(&target, "r", &first).await.unwrap(), "{label}");
        assert!(table.read_row(&target, "r").await.unwrap().is_some(), "{label}");

        assert!(table.remove_row(&target, "r", &second).await.unwrap(), "{label}");
        assert!(table.read_row(&target, "r").await.unwrap().is_none(), "{label}");

        // Removing again reports nothing removed.
        assert!(!table.remove_row(&target, "r", &second).await.unwrap(), "{label}");
    }
}

#[tokio::test]
async fn read_rows_returns_every_reminder_of_a_target() {
    for (label, table) in tables() {
        table.upsert_row(&entry("user/3", "a")).await.unwrap();
        table.upsert_row(&entry("user/3", "b")).await.unwrap();
        table.upsert_row(&entry("user/4", "a")).await.unwrap();

        let rows = table.read_rows(&"user/3".into()).await.unwrap();
        let mut names: Vec<_> = rows.iter().map(|r| r.name.clone()).collect();
        names.sort();
        assert_eq!(names, ["a", "b"], "{label}");
        assert!(rows.iter().all(|r| r.version.is_some()), "{label}");
    }
}

#[tokio::test]
async fn range_reads_respect_bounds_and_wraparound() {
    for (label, table) in tables() {
        let targets: Vec<TargetKey> = (0..200).map(|i| TargetKey::new(format!("t{i}"))).collect();
        for target in &targets {
            table
                .upsert_row(&entry(target.as_str(), "r"))
                .await
                .unwrap();
        }

        let mut hashes: Vec<u32> = targets.iter().map(TargetKey::ring_hash).collect();
        hashes.sort_unstable();
        let low = hashes[20];
        let high = hashes[180];

        for range in [
            RingRange::new(low, high),
            RingRange::new(high, low),
            RingRange::new(low, low),
        ] {
            let rows = table.read_range(range).await.unwrap();
            let expected = targets.iter().filter(|t| range.in_range(t.ring_hash())).count();
            assert_eq!(rows.len(), expected, "{label} {range}");
            assert!(
                rows.iter().all(|r| range.in_range(r.ring_hash())),
                "{label} {range}"
            );
        }

        // Start is exclusive and end is inclusive.
        let rows = table.read_range(RingRange::new(high, low)).await.unwrap();
        assert!(rows.iter().any(|r| r.ring_hash() == low), "{label}");
        assert!(!rows.iter().any(|r| r.ring_hash() == high), "{label}");
    }
}

#[tokio::test]
async fn clear_removes_everything() {
    for (label, table) in tables() {
        table.upsert_row(&entry("user/5", "a")).await.unwrap();
        table.test_only_clear_table().await.unwrap();
        let rows = table.read_range(RingRange::full()).await.unwrap();
        assert!(rows.is_empty(), "{label}");
    }
}
