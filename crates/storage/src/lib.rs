//! Storage locations for strata.
//!
//! This crate provides:
//! - The [`StorageLocation`] trait implemented by byte-holding locations
//! - The [`LocationRegistry`] answering which locations exist and their tier
//! - A local filesystem backend for ONLINE and NEARLINE locations

pub mod backends;
pub mod error;
pub mod registry;
pub mod traits;
pub mod url;

pub use backends::filesystem::FilesystemLocation;
pub use error::{StorageError, StorageResult};
pub use registry::LocationRegistry;
pub use traits::{StorageLocation, StoredFile};

use strata_core::config::LocationConfig;

/// Create the location registry from configuration.
pub async fn from_config(configs: &[LocationConfig]) -> StorageResult<LocationRegistry> {
    LocationRegistry::from_config(configs).await
}
