//! Test fixtures for reminder service integration tests.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chime_service::{DeliveryError, ReminderSink, ServiceConfig, TickStatus};
use chime_table::TargetKey;
use parking_lot::Mutex;

/// A delivered tick.
#[derive(Debug, Clone)]
pub struct Tick {
    pub target: TargetKey,
    pub name: String,
    pub status: TickStatus,
}

/// Sink that records every tick and can be told to fail or stall.
#[derive(Default)]
pub struct RecordingSink {
    ticks: Mutex<Vec<Tick>>,
    /// Outcomes to use before falling back to success.
    failures: Mutex<VecDeque<bool>>,
    delay: Mutex<Duration>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `count` deliveries.
    pub fn fail_next(&self, count: usize) {
        self.failures.lock().extend(std::iter::repeat(true).take(count));
    }

    /// Makes every delivery take `delay` of (simulated) time.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn ticks(&self) -> Vec<Tick> {
        self.ticks.lock().clone()
    }

    pub fn count(&self, target: &str, name: &str) -> usize {
        self.ticks
            .lock()
            .iter()
            .filter(|t| t.target.as_str() == target && t.name == name)
            .count()
    }

    pub fn total(&self) -> usize {
        self.ticks.lock().len()
    }
}

#[async_trait]
impl ReminderSink for RecordingSink {
    async fn deliver(
        &self,
        target: &TargetKey,
        name: &str,
        status: TickStatus,
    ) -> Result<(), DeliveryError> {
        self.ticks.lock().push(Tick {
            target: target.clone(),
            name: name.to_owned(),
            status,
        });

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let fail = self.failures.lock().pop_front().unwrap_or(false);
        if fail {
            Err(DeliveryError::new("target unavailable"))
        } else {
            Ok(())
        }
    }
}

/// Service settings with a one second minimum period.
pub fn service_config(member: &str) -> ServiceConfig {
    ServiceConfig {
        member_id: member.to_owned(),
        minimum_period: Duration::from_secs(1),
        refresh_period: Duration::from_secs(600),
        initial_load_max_wait: Duration::from_secs(5),
        initial_load_retry_delay: Duration::from_secs(1),
        ..ServiceConfig::default()
    }
}
