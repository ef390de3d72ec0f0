//! Metadata store abstraction and the SQLite implementation for strata.
//!
//! This crate persists the lifecycle state of the engine:
//! - File references and their owner sets
//! - Storage, deletion and cache requests (one row per checksum, location and kind)
//! - Restored cache entries with expiration
//! - Jobs and the requests they exclusively own

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use store::{MetadataStore, SqliteStore};

use std::sync::Arc;
use strata_core::config::MetadataConfig;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            let store = SqliteStore::new(path, *query_timeout_secs).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
