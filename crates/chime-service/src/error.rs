//! Error types for the reminder service.

use chime_table::TableError;
use thiserror::Error;

/// Reminder service errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReminderError {
    /// A caller-supplied value is malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A caller-supplied duration is outside the supported range.
    #[error("{name} out of range: {detail}")]
    OutOfRange { name: &'static str, detail: String },

    /// The reminder was changed or removed by someone else; re-read and retry.
    #[error("reminder {0} was modified concurrently")]
    ConcurrencyConflict(String),

    /// No reminder service is registered for the owning member.
    #[error("no reminder service registered for member {0}")]
    ServiceNotRegistered(String),

    /// The ring has no members to own the target.
    #[error("no cluster member owns target {0}")]
    NoOwner(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The service has not finished loading its partition.
    #[error("reminder service not ready: {0}")]
    NotReady(String),

    /// The service has been stopped.
    #[error("reminder service has been stopped")]
    Stopped,

    /// Storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] TableError),
}

/// Result type for reminder operations.
pub type Result<T> = std::result::Result<T, ReminderError>;

/// A reminder callback could not be delivered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("delivery failed: {0}")]
pub struct DeliveryError(pub String);

impl DeliveryError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}
