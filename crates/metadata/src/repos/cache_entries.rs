//! Cache entry repository.

use crate::error::MetadataResult;
use crate::models::{CacheEntryRow, NewCacheEntry};
use async_trait::async_trait;
use strata_core::{Checksum, TenantContext};
use time::OffsetDateTime;

/// Repository for restored cache copies.
#[async_trait]
pub trait CacheEntryRepo: Send + Sync {
    /// Insert or refresh the entry of a checksum, keeping the later expiration.
    async fn upsert_cache_entry(
        &self,
        ctx: &TenantContext,
        entry: &NewCacheEntry,
    ) -> MetadataResult<CacheEntryRow>;

    /// Get the entry of a checksum, expired or not.
    async fn get_cache_entry(
        &self,
        ctx: &TenantContext,
        checksum: &Checksum,
    ) -> MetadataResult<Option<CacheEntryRow>>;

    /// Delete up to `limit` entries expired at `now` and return them.
    async fn delete_expired_cache_entries(
        &self,
        ctx: &TenantContext,
        now: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<CacheEntryRow>>;

    /// Total size of entries still valid at `now`.
    async fn cache_usage_bytes(&self, ctx: &TenantContext, now: OffsetDateTime)
    -> MetadataResult<u64>;
}
