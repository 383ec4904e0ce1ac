//! Reminder delivery targets.

use async_trait::async_trait;
use chime_table::TargetKey;
use tracing::info;

use crate::error::DeliveryError;
use crate::schedule::TickStatus;

/// Receives reminder ticks.
///
/// Delivery is at least once: a tick may be repeated after a crash or an
/// ownership change, so implementations should be idempotent.
#[async_trait]
pub trait ReminderSink: Send + Sync {
    async fn deliver(
        &self,
        target: &TargetKey,
        name: &str,
        status: TickStatus,
    ) -> Result<(), DeliveryError>;
}

/// Writes every tick to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSink;

#[async_trait]
impl ReminderSink for LoggingSink {
    async fn deliver(
        &self,
        target: &TargetKey,
        name: &str,
        status: TickStatus,
    ) -> Result<(), DeliveryError> {
        info!(
            reminder_target = %target,
            reminder = name,
            first_tick = %status.first_tick_time,
            tick = %status.current_tick_time,
            period_ms = u64::try_from(status.period.as_millis()).unwrap_or(u64::MAX),
            "Reminder tick"
        );
        Ok(())
    }
}
