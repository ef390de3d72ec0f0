//! Storage error types.

use thiserror::Error;

/// Storage location operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage {0} is unknown or disabled")]
    UnknownLocation(String),

    #[error("operation not supported by storage {location}: {operation}")]
    Unsupported { location: String, operation: String },

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
