//! Integration tests for reminder firing on a single member.

mod common;

use std::time::Duration;

use chime_service::INFINITE;
use chime_table::TargetKey;
use chrono::TimeDelta;
use common::TestCluster;

#[tokio::test(start_paused = true)]
async fn one_shot_fires_once_and_is_removed() {
    let cluster = TestCluster::new(&["silo-a"]).await;
    let reminders = cluster.registry.for_target("user/1");

    reminders
        .register_or_update("welcome", TimeDelta::zero(), TimeDelta::zero())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(cluster.sink.count("user/1", "welcome"), 1);
    assert!(reminders.get_reminder("welcome").await.unwrap().is_none());
    assert_eq!(cluster.active_timers(), 0);
    cluster.stop().await;
}

#[tokio::test(start_paused = true)]
async fn periodic_reminder_fires_on_schedule() {
    let cluster = TestCluster::new(&["silo-a"]).await;
    let reminders = cluster.registry.for_target("user/2");

    reminders
        .register_or_update("heartbeat", TimeDelta::seconds(1), TimeDelta::seconds(1))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(3500)).await;

    assert_eq!(cluster.sink.count("user/2", "heartbeat"), 3);
    assert!(reminders.get_reminder("heartbeat").await.unwrap().is_some());
    cluster.stop().await;
}

#[tokio::test(start_paused = true)]
async fn slow_callbacks_do_not_shift_the_schedule() {
    let cluster = TestCluster::new(&["silo-a"]).await;
    cluster.sink.set_delay(Duration::from_millis(400));

    let handle = cluster
        .registry
        .for_target("user/3")
        .register_or_update("poll", TimeDelta::seconds(1), TimeDelta::seconds(1))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(3500)).await;

    let ticks = cluster.sink.ticks();
    assert_eq!(ticks.len(), 3);
    let first = ticks[0].status.first_tick_time;
    for (k, tick) in ticks.iter().enumerate() {
        assert_eq!(tick.status.first_tick_time, first);
        assert_eq!(tick.status.period, Duration::from_secs(1));
        let offset = tick.status.current_tick_time - first;
        // Every tick is delivered on the `first + k * period` grid.
        assert!(
            offset >= TimeDelta::seconds(k as i64)
                && offset < TimeDelta::seconds(k as i64) + TimeDelta::milliseconds(50),
            "tick {k} delivered at +{offset}"
        );
    }
    assert_eq!(handle.target, TargetKey::from("user/3"));
    cluster.stop().await;
}

#[tokio::test(start_paused = true)]
async fn infinite_due_time_waits_one_period() {
    let cluster = TestCluster::new(&["silo-a"]).await;
    cluster
        .registry
        .for_target("user/4")
        .register_or_update("later", INFINITE, TimeDelta::seconds(2))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1900)).await;
    assert_eq!(cluster.sink.count("user/4", "later"), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(cluster.sink.count("user/4", "later"), 1);
    cluster.stop().await;
}

#[tokio::test(start_paused = true)]
async fn unregistered_reminder_stops_firing() {
    let cluster = TestCluster::new(&["silo-a"]).await;
    let reminders = cluster.registry.for_target("user/5");
    let handle = reminders
        .register_or_update("tick", TimeDelta::seconds(1), TimeDelta::seconds(1))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(cluster.sink.count("user/5", "tick"), 1);

    reminders.unregister(&handle).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(cluster.sink.count("user/5", "tick"), 1);
    assert!(reminders.get_reminders().await.unwrap().is_empty());
    cluster.stop().await;
}

#[tokio::test(start_paused = true)]
async fn deleted_reminder_stops_firing() {
    let cluster = TestCluster::new(&["silo-a"]).await;
    cluster
        .registry
        .for_target("user/9")
        .register_or_update("tick", TimeDelta::seconds(1), TimeDelta::seconds(1))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(cluster.sink.count("user/9", "tick"), 1);

    let target = TargetKey::from("user/9");
    assert!(cluster.management().delete(&target, "tick").await.unwrap());
    assert_eq!(cluster.active_timers(), 0);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(cluster.sink.count("user/9", "tick"), 1);
    assert!(!cluster.management().delete(&target, "tick").await.unwrap());
    cluster.stop().await;
}

#[tokio::test(start_paused = true)]
async fn updating_a_reminder_replaces_its_schedule() {
    let cluster = TestCluster::new(&["silo-a"]).await;
    let reminders = cluster.registry.for_target("user/6");
    let first = reminders
        .register_or_update("nudge", TimeDelta::seconds(1), TimeDelta::seconds(1))
        .await
        .unwrap();
    let second = reminders
        .register_or_update("nudge", TimeDelta::seconds(10), TimeDelta::seconds(10))
        .await
        .unwrap();
    assert_ne!(first.version, second.version);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(cluster.sink.count("user/6", "nudge"), 0);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(cluster.sink.count("user/6", "nudge"), 1);
    cluster.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failed_one_shot_delivery_is_retried() {
    let cluster = TestCluster::new(&["silo-a"]).await;
    cluster.sink.fail_next(1);

    let reminders = cluster.registry.for_target("user/7");
    reminders
        .register_or_update("invoice", TimeDelta::zero(), INFINITE)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(cluster.sink.count("user/7", "invoice"), 1);
    assert!(reminders.get_reminder("invoice").await.unwrap().is_some());

    // Retried after the minimum period.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(cluster.sink.count("user/7", "invoice"), 2);
    assert!(reminders.get_reminder("invoice").await.unwrap().is_none());
    cluster.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failed_periodic_delivery_keeps_ticking() {
    let cluster = TestCluster::new(&["silo-a"]).await;
    cluster.sink.fail_next(2);

    cluster
        .registry
        .for_target("user/8")
        .register_or_update("sync", TimeDelta::seconds(1), TimeDelta::seconds(1))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(4500)).await;
    assert_eq!(cluster.sink.count("user/8", "sync"), 4);
    cluster.stop().await;
}

#[tokio::test(start_paused = true)]
async fn reminders_survive_a_member_restart() {
    let mut cluster = TestCluster::new(&["silo-a"]).await;
    cluster
        .registry
        .for_target("user/9")
        .register_or_update("daily", TimeDelta::seconds(30), TimeDelta::seconds(60))
        .await
        .unwrap();

    // A replacement member picks the row up from the table.
    cluster.join("silo-b").await;
    cluster.leave("silo-a").await;

    assert_eq!(cluster.member("silo-b").active_timers(), 1);
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(cluster.sink.count("user/9", "daily"), 1);
    cluster.stop().await;
}
