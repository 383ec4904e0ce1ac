use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Concurrency conflict: version token does not match")]
    ConcurrencyConflict,

    #[error("Serialisation error: {0}")]
    Serialisation(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Invalid migration mode: {0}")]
    InvalidMigrationMode(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl TableError {
    /// Returns true for failures that may succeed if the call is repeated.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_) | Self::Timeout)
    }
}

pub type Result<T> = std::result::Result<T, TableError>;

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for TableError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => Self::Timeout,
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::StorageUnavailable(err.to_string()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Serialisation(err.to_string())
            }
            _ => Self::Backend(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_availability_failures_are_transient() {
        assert!(TableError::StorageUnavailable("down".into()).is_transient());
        assert!(TableError::Timeout.is_transient());
        assert!(!TableError::ConcurrencyConflict.is_transient());
        assert!(!TableError::Backend("syntax".into()).is_transient());
        assert!(!TableError::InvalidMigrationMode("7".into()).is_transient());
    }
}
