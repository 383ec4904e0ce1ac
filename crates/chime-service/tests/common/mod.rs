//! Common test utilities for reminder service integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

pub mod fixtures;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chime_ring::{ClusterRing, PositionStrategy};
use chime_service::{
    api::AppState, Clock, MonotonicClock, ReminderManagement, ReminderPartitionService,
    ReminderRegistry, ServiceStatus,
};
use chime_table::{MemoryReminderTable, MigrationRouter, ReminderTable};
use chrono::{DateTime, Utc};
use fixtures::{service_config, RecordingSink};

/// A simulated cluster sharing one table, one ring and one sink.
pub struct TestCluster {
    pub table: Arc<dyn ReminderTable>,
    pub ring: Arc<ClusterRing>,
    pub sink: Arc<RecordingSink>,
    pub clock: Arc<MonotonicClock>,
    pub registry: Arc<ReminderRegistry>,
    pub members: BTreeMap<String, Arc<ReminderPartitionService>>,
}

impl TestCluster {
    /// Starts one member per id over an in-memory table.
    pub async fn new(members: &[&str]) -> Self {
        Self::with_table(Arc::new(MemoryReminderTable::new()), members).await
    }

    pub async fn with_table(table: Arc<dyn ReminderTable>, members: &[&str]) -> Self {
        let ring = Arc::new(ClusterRing::with_members(
            PositionStrategy::EvenlySpaced,
            members.iter().copied(),
        ));
        let clock = Arc::new(MonotonicClock::new());
        let registry = Arc::new(ReminderRegistry::new(ring.clone(), Duration::from_secs(1)));

        let mut cluster = Self {
            table,
            ring,
            sink: Arc::new(RecordingSink::new()),
            clock,
            registry,
            members: BTreeMap::new(),
        };
        for member in members {
            cluster.start_member(member).await;
        }
        for member in members {
            cluster.wait_started(member).await;
        }
        cluster
    }

    /// Starts a member's service and then adds it to the ring.
    pub async fn join(&mut self, member: &str) {
        self.start_member(member).await;
        self.wait_started(member).await;
        self.ring.add_member(member).unwrap();
        self.settle().await;
    }

    /// Removes a member from the ring and stops its service.
    pub async fn leave(&mut self, member: &str) {
        self.ring.remove_member(member).unwrap();
        let service = self.members.remove(member).unwrap();
        service.stop().await;
        self.registry.unregister_service(member);
        self.settle().await;
    }

    pub fn member(&self, member: &str) -> &Arc<ReminderPartitionService> {
        &self.members[member]
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Total live timers across the cluster.
    pub fn active_timers(&self) -> usize {
        self.members.values().map(|m| m.active_timers()).sum()
    }

    /// Management view that deletes through the registry.
    pub fn management(&self) -> ReminderManagement {
        ReminderManagement::new(self.table.clone(), self.clock.clone())
            .with_registry(self.registry.clone())
    }

    /// API state for `member`, with an optional migration router.
    pub fn app_state(
        &self,
        member: &str,
        migration: Option<Arc<MigrationRouter>>,
    ) -> Arc<AppState> {
        Arc::new(AppState {
            registry: self.registry.clone(),
            partition: self.member(member).clone(),
            management: self.management(),
            migration,
        })
    }

    /// Lets background tasks catch up.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    pub async fn stop(self) {
        for service in self.members.values() {
            service.stop().await;
        }
    }

    async fn start_member(&mut self, member: &str) {
        let clock: Arc<dyn Clock> = self.clock.clone();
        let service = Arc::new(ReminderPartitionService::new(
            Arc::new(self.ring.member_view(member)),
            self.table.clone(),
            self.sink.clone(),
            clock,
            service_config(member),
        ));
        service.start().await.unwrap();
        self.registry.register_service(member, service.clone());
        self.members.insert(member.to_owned(), service);
    }

    async fn wait_started(&self, member: &str) {
        let service = self.member(member);
        for _ in 0..200 {
            if service.status() == ServiceStatus::Started {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("member {member} did not start");
    }
}
