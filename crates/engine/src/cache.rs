//! Restoration cache of NEARLINE files.
//!
//! A cache entry is usable only before its expiration date. Expired entries
//! are treated as absent by every availability check even while their bytes
//! are still on disk; [`CacheManager::purge_expired`] removes them later.

use crate::error::{EngineError, EngineResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strata_core::config::CacheConfig;
use strata_core::{Checksum, TenantContext};
use strata_metadata::MetadataStore;
use strata_metadata::models::{CacheEntryRow, NewCacheEntry};
use strata_storage::url::local_path;
use time::OffsetDateTime;

/// Upper bound on purge batches in one call.
const MAX_PURGE_BATCHES: u32 = 1000;

/// Tracks locally restored copies and their expiration.
pub struct CacheManager {
    root: PathBuf,
    max_size_bytes: u64,
    purge_batch_size: u32,
    metadata: Arc<dyn MetadataStore>,
}

impl CacheManager {
    pub fn new(config: &CacheConfig, metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            root: config.path.clone(),
            max_size_bytes: config.max_size_bytes,
            purge_batch_size: config.purge_batch_size.max(1),
            metadata,
        }
    }

    /// Root directory of restored copies.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local path a restored copy of `checksum` is written to.
    pub fn entry_path(&self, ctx: &TenantContext, checksum: &Checksum) -> PathBuf {
        // tenant and checksum are validated to [A-Za-z0-9_-]
        self.root
            .join(ctx.tenant_str())
            .join(checksum.shard())
            .join(checksum.as_str())
    }

    /// Record a restored copy, keeping the later expiration when the checksum
    /// is already cached.
    pub async fn add_file(
        &self,
        ctx: &TenantContext,
        checksum: &Checksum,
        size: u64,
        location: &str,
        expiration_date: OffsetDateTime,
        group_id: &str,
    ) -> EngineResult<CacheEntryRow> {
        let entry = NewCacheEntry {
            checksum: checksum.clone(),
            location: location.to_string(),
            file_size: size,
            expiration_date,
            group_id: group_id.to_string(),
        };
        let row = self.metadata.upsert_cache_entry(ctx, &entry).await?;
        tracing::debug!(
            tenant = %ctx.tenant(),
            checksum = %checksum,
            expiration = %row.expiration_date,
            "cache entry recorded"
        );
        Ok(row)
    }

    /// The entry of `checksum` if it is still valid.
    pub async fn valid_entry(
        &self,
        ctx: &TenantContext,
        checksum: &Checksum,
    ) -> EngineResult<Option<CacheEntryRow>> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .metadata
            .get_cache_entry(ctx, checksum)
            .await?
            .filter(|entry| entry.is_valid_at(now)))
    }

    /// Whether a non-expired cache entry exists for `checksum`.
    pub async fn is_available(&self, ctx: &TenantContext, checksum: &Checksum) -> EngineResult<bool> {
        Ok(self.valid_entry(ctx, checksum).await?.is_some())
    }

    /// Total size of valid entries.
    pub async fn used_bytes(&self, ctx: &TenantContext) -> EngineResult<u64> {
        let used = self
            .metadata
            .cache_usage_bytes(ctx, OffsetDateTime::now_utc())
            .await?;
        if used > self.max_size_bytes {
            tracing::warn!(
                tenant = %ctx.tenant(),
                used_bytes = used,
                max_size_bytes = self.max_size_bytes,
                "restoration cache exceeds its size limit"
            );
        }
        Ok(used)
    }

    /// Remove expired entries and their local copies, and expired cache
    /// requests. Returns the number of entries purged.
    pub async fn purge_expired(&self, ctx: &TenantContext) -> EngineResult<u64> {
        let now = OffsetDateTime::now_utc();
        let mut purged = 0u64;

        for _ in 0..MAX_PURGE_BATCHES {
            let expired = self
                .metadata
                .delete_expired_cache_entries(ctx, now, self.purge_batch_size)
                .await?;
            for entry in &expired {
                self.remove_local_copy(entry).await;
            }
            purged += expired.len() as u64;
            if expired.len() < self.purge_batch_size as usize {
                break;
            }
        }

        let mut requests = 0u64;
        for _ in 0..MAX_PURGE_BATCHES {
            let deleted = self
                .metadata
                .purge_expired_cache_requests(ctx, now, self.purge_batch_size)
                .await?;
            requests += deleted;
            if deleted < u64::from(self.purge_batch_size) {
                break;
            }
        }

        crate::metrics::CACHE_ENTRIES_PURGED.inc_by(purged);
        tracing::info!(
            tenant = %ctx.tenant(),
            entries = purged,
            requests,
            "expired cache purged"
        );
        Ok(purged)
    }

    /// Best effort: a copy outside the cache root or already gone is left alone.
    async fn remove_local_copy(&self, entry: &CacheEntryRow) {
        let path = match local_path(&entry.location) {
            Ok(path) => path,
            Err(e) => {
                tracing::debug!(location = %entry.location, error = %e, "cache entry is not a local file");
                return;
            }
        };
        if !path.starts_with(&self.root) {
            tracing::warn!(path = %path.display(), "cache entry outside cache root, not removed");
            return;
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove expired cache file");
            }
        }
    }

    /// Create the cache root.
    pub async fn ensure_root(&self) -> EngineResult<()> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            EngineError::Config(format!(
                "cannot create cache root {}: {e}",
                self.root.display()
            ))
        })
    }
}
