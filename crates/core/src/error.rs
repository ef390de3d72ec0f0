//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid tenant: {0}")]
    InvalidTenant(String),

    #[error("invalid checksum: {0}")]
    InvalidChecksum(String),

    #[error("invalid file metadata: {0}")]
    InvalidFileMeta(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("unknown request kind: {0}")]
    UnknownRequestKind(String),

    #[error("unknown request status: {0}")]
    UnknownRequestStatus(String),

    #[error("unknown job state: {0}")]
    UnknownJobState(String),

    #[error("unknown storage tier: {0}")]
    UnknownTier(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
