use std::fmt;
use std::time::Duration;

use chime_ring::stable_hash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identity of the entity a reminder is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetKey(String);

impl TargetKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Position of this target on the ring. Identical on every process.
    pub fn ring_hash(&self) -> u32 {
        stable_hash(self.0.as_bytes())
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TargetKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for TargetKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Opaque token identifying one stored version of a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Generates a fresh, globally unique token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Primary key of a reminder row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReminderId {
    pub target: TargetKey,
    pub name: String,
}

impl ReminderId {
    pub fn new(target: TargetKey, name: impl Into<String>) -> Self {
        Self {
            target,
            name: name.into(),
        }
    }
}

impl fmt::Display for ReminderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.target, self.name)
    }
}

/// A durable reminder row.
///
/// A zero `period` marks a one-shot reminder that fires once at `start_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderEntry {
    pub target: TargetKey,
    pub name: String,
    pub start_at: DateTime<Utc>,
    pub period: Duration,
    /// Token of the stored version this entry was read from, if any.
    pub version: Option<VersionToken>,
}

impl ReminderEntry {
    pub fn new(
        target: impl Into<TargetKey>,
        name: impl Into<String>,
        start_at: DateTime<Utc>,
        period: Duration,
    ) -> Self {
        Self {
            target: target.into(),
            name: name.into(),
            start_at,
            period,
            version: None,
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: VersionToken) -> Self {
        self.version = Some(version);
        self
    }

    /// Copy of this entry that writes unconditionally.
    #[must_use]
    pub fn unconditional(&self) -> Self {
        Self {
            version: None,
            ..self.clone()
        }
    }

    pub fn id(&self) -> ReminderId {
        ReminderId::new(self.target.clone(), self.name.clone())
    }

    pub fn is_one_shot(&self) -> bool {
        self.period.is_zero()
    }

    pub fn ring_hash(&self) -> u32 {
        self.target.ring_hash()
    }
}

/// The result of a table query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReminderTableData {
    pub reminders: Vec<ReminderEntry>,
}

impl ReminderTableData {
    pub fn new(reminders: Vec<ReminderEntry>) -> Self {
        Self { reminders }
    }

    pub fn len(&self) -> usize {
        self.reminders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reminders.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ReminderEntry> {
        self.reminders.iter()
    }

    pub fn find(&self, target: &TargetKey, name: &str) -> Option<&ReminderEntry> {
        self.reminders
            .iter()
            .find(|r| &r.target == target && r.name == name)
    }
}

impl FromIterator<ReminderEntry> for ReminderTableData {
    fn from_iter<I: IntoIterator<Item = ReminderEntry>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl IntoIterator for ReminderTableData {
    type Item = ReminderEntry;
    type IntoIter = std::vec::IntoIter<ReminderEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.reminders.into_iter()
    }
}

impl<'a> IntoIterator for &'a ReminderTableData {
    type Item = &'a ReminderEntry;
    type IntoIter = std::slice::Iter<'a, ReminderEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.reminders.iter()
    }
}
