//! Actor-facing entry point: validates reminder requests and routes them to
//! the member that owns the target.

use std::sync::Arc;
use std::time::Duration;

use chime_ring::{MemberId, OwnerResolver};
use chime_table::TargetKey;
use chrono::TimeDelta;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::error::{ReminderError, Result};
use crate::service::{ReminderHandle, ReminderService};

/// Sentinel meaning "never" for due times and periods.
pub const INFINITE: TimeDelta = match TimeDelta::try_milliseconds(-1) {
    Some(d) => d,
    None => TimeDelta::zero(),
};

/// Largest accepted due time or period.
pub const MAX_DURATION_MS: i64 = 0xFFFF_FFFE;

/// Routes reminder calls to per-member [`ReminderService`]s.
pub struct ReminderRegistry {
    services: DashMap<MemberId, Arc<dyn ReminderService>>,
    resolver: Arc<dyn OwnerResolver>,
    minimum_period: Duration,
}

impl ReminderRegistry {
    pub fn new(resolver: Arc<dyn OwnerResolver>, minimum_period: Duration) -> Self {
        Self {
            services: DashMap::new(),
            resolver,
            minimum_period,
        }
    }

    /// Makes `member`'s service reachable. Replaces any previous one.
    pub fn register_service(&self, member: impl Into<MemberId>, service: Arc<dyn ReminderService>) {
        let member = member.into();
        info!(member = %member, "Reminder service registered");
        self.services.insert(member, service);
    }

    pub fn unregister_service(&self, member: &str) -> bool {
        self.services.remove(member).is_some()
    }

    pub fn minimum_period(&self) -> Duration {
        self.minimum_period
    }

    /// Scopes the reminder calls to one target.
    pub fn for_target(&self, target: impl Into<TargetKey>) -> TargetReminders<'_> {
        TargetReminders {
            registry: self,
            target: target.into(),
        }
    }

    /// Creates or replaces a reminder.
    ///
    /// `due` and `period` accept [`INFINITE`]: an infinite period makes a
    /// one-shot reminder, an infinite due time fires after one period (or
    /// immediately for a one-shot).
    pub async fn register_or_update(
        &self,
        target: &TargetKey,
        name: &str,
        due: TimeDelta,
        period: TimeDelta,
    ) -> Result<ReminderHandle> {
        let name = validate_name(name)?;
        let period = validate_duration("period", period)?.unwrap_or(Duration::ZERO);
        if !period.is_zero() && period < self.minimum_period {
            return Err(ReminderError::InvalidArgument(format!(
                "period {}ms is below the minimum of {}ms",
                period.as_millis(),
                self.minimum_period.as_millis()
            )));
        }
        let due = validate_duration("due", due)?.unwrap_or(period);

        let service = self.service_for(target)?;
        service.register_or_update(target, name, due, period).await
    }

    /// Removes a reminder at the handle's version.
    pub async fn unregister(&self, handle: &ReminderHandle) -> Result<()> {
        self.service_for(&handle.target)?.unregister(handle).await
    }

    /// Removes a reminder at whatever version is stored, stopping its timer
    /// on the owning member. Returns false if there was nothing to remove.
    pub async fn remove(&self, target: &TargetKey, name: &str) -> Result<bool> {
        let name = validate_name(name)?;
        let service = self.service_for(target)?;
        let Some(handle) = service.get_reminder(target, name).await? else {
            return Ok(false);
        };
        service.unregister(&handle).await?;
        Ok(true)
    }

    pub async fn get_reminder(&self, target: &TargetKey, name: &str) -> Result<Option<ReminderHandle>> {
        let name = validate_name(name)?;
        self.service_for(target)?.get_reminder(target, name).await
    }

    pub async fn get_reminders(&self, target: &TargetKey) -> Result<Vec<ReminderHandle>> {
        self.service_for(target)?.get_reminders(target).await
    }

    fn service_for(&self, target: &TargetKey) -> Result<Arc<dyn ReminderService>> {
        let owner = self
            .resolver
            .owner_of(target.ring_hash())
            .ok_or_else(|| ReminderError::NoOwner(target.to_string()))?;
        debug!(reminder_target = %target, owner = %owner, "Routing reminder call");
        self.services
            .get(&owner)
            .map(|s| Arc::clone(s.value()))
            .ok_or(ReminderError::ServiceNotRegistered(owner))
    }
}

impl std::fmt::Debug for ReminderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReminderRegistry")
            .field("services", &self.services.len())
            .field("minimum_period", &self.minimum_period)
            .finish_non_exhaustive()
    }
}

/// Reminder calls bound to a single target.
#[derive(Debug)]
pub struct TargetReminders<'a> {
    registry: &'a ReminderRegistry,
    target: TargetKey,
}

impl TargetReminders<'_> {
    pub fn target(&self) -> &TargetKey {
        &self.target
    }

    pub async fn register_or_update(
        &self,
        name: &str,
        due: TimeDelta,
        period: TimeDelta,
    ) -> Result<ReminderHandle> {
        self.registry
            .register_or_update(&self.target, name, due, period)
            .await
    }

    pub async fn unregister(&self, handle: &ReminderHandle) -> Result<()> {
        if handle.target != self.target {
            return Err(ReminderError::InvalidArgument(format!(
                "handle for {} used with target {}",
                handle.target, self.target
            )));
        }
        self.registry.unregister(handle).await
    }

    pub async fn get_reminder(&self, name: &str) -> Result<Option<ReminderHandle>> {
        self.registry.get_reminder(&self.target, name).await
    }

    pub async fn get_reminders(&self) -> Result<Vec<ReminderHandle>> {
        self.registry.get_reminders(&self.target).await
    }
}

fn validate_name(name: &str) -> Result<&str> {
    if name.trim().is_empty() {
        return Err(ReminderError::InvalidArgument(
            "reminder name must not be empty".into(),
        ));
    }
    Ok(name)
}

/// Returns `None` for [`INFINITE`].
fn validate_duration(name: &'static str, value: TimeDelta) -> Result<Option<Duration>> {
    if value == INFINITE {
        return Ok(None);
    }
    let out_of_range = || ReminderError::OutOfRange {
        name,
        detail: format!(
            "{}ms is outside [-1ms, {MAX_DURATION_MS}ms]",
            value.num_milliseconds()
        ),
    };
    if value < TimeDelta::zero() || value > TimeDelta::milliseconds(MAX_DURATION_MS) {
        return Err(out_of_range());
    }
    value.to_std().map(Some).map_err(|_| out_of_range())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn infinite_is_accepted_as_sentinel() {
        assert_eq!(validate_duration("period", INFINITE), Ok(None));
        assert_eq!(
            validate_duration("period", TimeDelta::seconds(5)),
            Ok(Some(Duration::from_secs(5)))
        );
    }

    #[test]
    fn other_negative_durations_are_out_of_range() {
        for value in [TimeDelta::milliseconds(-2), TimeDelta::microseconds(-500)] {
            assert!(matches!(
                validate_duration("due", value),
                Err(ReminderError::OutOfRange { name: "due", .. })
            ));
        }
    }

    #[test]
    fn upper_bound_is_inclusive() {
        let max = TimeDelta::milliseconds(MAX_DURATION_MS);
        assert!(validate_duration("due", max).is_ok());
        assert!(validate_duration("due", max + TimeDelta::milliseconds(1)).is_err());
    }

    #[test]
    fn blank_names_are_rejected() {
        assert!(validate_name("  ").is_err());
        assert_eq!(validate_name("nightly").unwrap(), "nightly");
    }
}
