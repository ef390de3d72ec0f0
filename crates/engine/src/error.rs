//! Engine error types.

/// Engine error type.
///
/// Domain outcomes (unknown destination, failed copy, missing reference) are
/// reported through events and request status, never through this type. An
/// `EngineError` means the engine itself could not make progress.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] strata_storage::StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] strata_metadata::MetadataError),

    #[error("core error: {0}")]
    Core(#[from] strata_core::Error),
}

impl EngineError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Internal(_) => "internal_error",
            Self::Storage(e) => match e {
                strata_storage::StorageError::NotFound(_) => "not_found",
                strata_storage::StorageError::UnknownLocation(_) => "unknown_location",
                strata_storage::StorageError::ChecksumMismatch { .. } => "checksum_mismatch",
                _ => "storage_error",
            },
            Self::Metadata(e) => match e {
                strata_metadata::MetadataError::NotFound(_) => "not_found",
                strata_metadata::MetadataError::Constraint(_) => "conflict",
                _ => "metadata_error",
            },
            Self::Core(_) => "core_error",
        }
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
