//! Error types for ring membership.

use thiserror::Error;

/// Ring membership errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RingError {
    /// Member is already part of the ring.
    #[error("member already in ring: {0}")]
    DuplicateMember(String),

    /// Member is not part of the ring.
    #[error("member not in ring: {0}")]
    UnknownMember(String),
}

/// Result type for ring operations.
pub type Result<T> = std::result::Result<T, RingError>;
