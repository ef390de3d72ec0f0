//! Storage location trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use std::path::Path;
use strata_core::{FileMeta, StorageTier, TenantContext};

/// Where and how large a stored copy ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Location-specific URL of the stored bytes.
    pub url: String,
    pub size: u64,
}

/// A storage location the engine can physically write to, delete from and
/// restore from.
///
/// Implementations must be idempotent: jobs run with at-least-once semantics,
/// so storing the same file twice or deleting an already removed file must
/// succeed.
#[async_trait]
pub trait StorageLocation: Send + Sync {
    /// Configured location name.
    fn name(&self) -> &str;

    /// Retrieval tier of the location.
    fn tier(&self) -> StorageTier;

    /// Copy the bytes at `origin_url` into the location.
    async fn store(
        &self,
        ctx: &TenantContext,
        meta: &FileMeta,
        origin_url: &str,
    ) -> StorageResult<StoredFile>;

    /// Remove the bytes stored at `url`. Missing bytes are not an error.
    async fn delete(&self, ctx: &TenantContext, url: &str) -> StorageResult<()>;

    /// Copy the bytes stored at `url` to `dest` and return the copied size.
    async fn restore(&self, ctx: &TenantContext, url: &str, dest: &Path) -> StorageResult<u64>;

    /// Check that the location is reachable.
    async fn health_check(&self) -> StorageResult<()>;
}
