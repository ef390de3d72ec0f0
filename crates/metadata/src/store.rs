//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{CacheEntryRepo, JobRepo, ReferenceRepo, RequestRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    ReferenceRepo + RequestRepo + CacheEntryRepo + JobRepo + Send + Sync
{
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    query_timeout_secs: u64,
}

impl SqliteStore {
    /// Create a new SQLite store. `":memory:"` opens a private in-memory database.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let query_timeout_secs = query_timeout_secs.unwrap_or(600);

        let opts = if path == Path::new(":memory:") {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        };
        let opts = opts
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // A single connection serializes writers, so concurrent merges of the
            // same (kind, checksum, storage) go through the unique index one at a time.
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(query_timeout_secs))
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            query_timeout_secs,
        };
        store.migrate().await?;

        tracing::debug!(
            path = %path.display(),
            query_timeout_secs = store.query_timeout_secs,
            "SQLite metadata store ready"
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Append `cause` to the accumulated error messages of a request.
const APPEND_ERROR_CAUSE: &str = "CASE WHEN error_cause IS NULL OR error_cause = '' THEN ? \
                                  ELSE error_cause || char(10) || ? END";

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use strata_core::{Checksum, JobState, RequestKind, RequestStatus, TenantContext};
    use time::{OffsetDateTime, UtcOffset};
    use uuid::Uuid;

    /// Timestamps are stored as text and compared lexically, which only
    /// orders instants correctly when they share one offset.
    fn utc(at: OffsetDateTime) -> OffsetDateTime {
        at.to_offset(UtcOffset::UTC)
    }

    #[async_trait]
    impl ReferenceRepo for SqliteStore {
        async fn upsert_reference(
            &self,
            ctx: &TenantContext,
            reference: &NewFileReference,
            owner: &str,
        ) -> MetadataResult<FileReferenceRow> {
            let now = OffsetDateTime::now_utc();
            let meta = &reference.meta;
            let mut tx = self.pool.begin().await?;

            let row = sqlx::query_as::<_, FileReferenceRow>(
                r#"
                INSERT INTO file_references (
                    reference_id, tenant, checksum, storage, url, algorithm, file_name,
                    file_size, mime_type, height, width, created_at, updated_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(tenant, checksum, storage) DO UPDATE SET
                    url = COALESCE(excluded.url, file_references.url),
                    algorithm = excluded.algorithm,
                    file_name = excluded.file_name,
                    file_size = COALESCE(excluded.file_size, file_references.file_size),
                    mime_type = excluded.mime_type,
                    height = COALESCE(excluded.height, file_references.height),
                    width = COALESCE(excluded.width, file_references.width),
                    updated_at = excluded.updated_at
                RETURNING *
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(ctx.tenant_str())
            .bind(meta.checksum.as_str())
            .bind(&reference.storage)
            .bind(&reference.url)
            .bind(&meta.algorithm)
            .bind(&meta.file_name)
            .bind(meta.file_size.map(|s| s as i64))
            .bind(&meta.mime_type)
            .bind(meta.height.map(i64::from))
            .bind(meta.width.map(i64::from))
            .bind(now)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query("INSERT OR IGNORE INTO reference_owners (reference_id, owner) VALUES (?, ?)")
                .bind(row.reference_id)
                .bind(owner)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(row)
        }

        async fn get_reference(
            &self,
            ctx: &TenantContext,
            checksum: &Checksum,
            storage: &str,
        ) -> MetadataResult<Option<FileReferenceRow>> {
            let row = sqlx::query_as::<_, FileReferenceRow>(
                "SELECT * FROM file_references WHERE tenant = ? AND checksum = ? AND storage = ?",
            )
            .bind(ctx.tenant_str())
            .bind(checksum.as_str())
            .bind(storage)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_references(
            &self,
            ctx: &TenantContext,
            checksum: &Checksum,
        ) -> MetadataResult<Vec<FileReferenceRow>> {
            let rows = sqlx::query_as::<_, FileReferenceRow>(
                "SELECT * FROM file_references WHERE tenant = ? AND checksum = ? ORDER BY storage",
            )
            .bind(ctx.tenant_str())
            .bind(checksum.as_str())
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn get_reference_owners(
            &self,
            ctx: &TenantContext,
            reference_id: Uuid,
        ) -> MetadataResult<Vec<String>> {
            let owners = sqlx::query_scalar::<_, String>(
                r#"
                SELECT o.owner FROM reference_owners o
                INNER JOIN file_references r ON r.reference_id = o.reference_id
                WHERE r.tenant = ? AND o.reference_id = ?
                ORDER BY o.owner
                "#,
            )
            .bind(ctx.tenant_str())
            .bind(reference_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(owners)
        }

        async fn add_reference_owner(
            &self,
            ctx: &TenantContext,
            reference_id: Uuid,
            owner: &str,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO reference_owners (reference_id, owner)
                SELECT reference_id, ? FROM file_references
                WHERE tenant = ? AND reference_id = ?
                "#,
            )
            .bind(owner)
            .bind(ctx.tenant_str())
            .bind(reference_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn remove_reference_owner(
            &self,
            ctx: &TenantContext,
            reference_id: Uuid,
            owner: &str,
        ) -> MetadataResult<OwnerRemoval> {
            let mut tx = self.pool.begin().await?;

            let removed = sqlx::query(
                r#"
                DELETE FROM reference_owners
                WHERE owner = ?
                  AND reference_id IN (
                    SELECT reference_id FROM file_references WHERE tenant = ? AND reference_id = ?
                  )
                "#,
            )
            .bind(owner)
            .bind(ctx.tenant_str())
            .bind(reference_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            let remaining: i64 = sqlx::query_scalar(
                r#"
                SELECT COUNT(*) FROM reference_owners o
                INNER JOIN file_references r ON r.reference_id = o.reference_id
                WHERE r.tenant = ? AND o.reference_id = ?
                "#,
            )
            .bind(ctx.tenant_str())
            .bind(reference_id)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(OwnerRemoval {
                removed: removed > 0,
                remaining: remaining as u64,
            })
        }

        async fn delete_reference_if_unowned(
            &self,
            ctx: &TenantContext,
            reference_id: Uuid,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                DELETE FROM file_references
                WHERE tenant = ? AND reference_id = ?
                  AND NOT EXISTS (
                    SELECT 1 FROM reference_owners o WHERE o.reference_id = file_references.reference_id
                  )
                "#,
            )
            .bind(ctx.tenant_str())
            .bind(reference_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn delete_reference(
            &self,
            ctx: &TenantContext,
            reference_id: Uuid,
        ) -> MetadataResult<bool> {
            let result =
                sqlx::query("DELETE FROM file_references WHERE tenant = ? AND reference_id = ?")
                    .bind(ctx.tenant_str())
                    .bind(reference_id)
                    .execute(&self.pool)
                    .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn list_references_by_owner(
            &self,
            ctx: &TenantContext,
            owner: &str,
            after: Option<Uuid>,
            limit: u32,
        ) -> MetadataResult<Vec<FileReferenceRow>> {
            let rows = sqlx::query_as::<_, FileReferenceRow>(
                r#"
                SELECT r.* FROM file_references r
                INNER JOIN reference_owners o ON o.reference_id = r.reference_id
                WHERE r.tenant = ? AND o.owner = ?
                  AND (? IS NULL OR r.reference_id > ?)
                ORDER BY r.reference_id
                LIMIT ?
                "#,
            )
            .bind(ctx.tenant_str())
            .bind(owner)
            .bind(after)
            .bind(after)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl RequestRepo for SqliteStore {
        async fn merge_request(
            &self,
            ctx: &TenantContext,
            request: &NewFileRequest,
        ) -> MetadataResult<MergedRequest> {
            let now = OffsetDateTime::now_utc();
            let meta = request.meta.as_ref();
            let mut tx = self.pool.begin().await?;

            let previous = sqlx::query_as::<_, FileRequestRow>(
                "SELECT * FROM file_requests WHERE tenant = ? AND kind = ? AND checksum = ? AND storage = ?",
            )
            .bind(ctx.tenant_str())
            .bind(request.kind.as_str())
            .bind(request.checksum.as_str())
            .bind(&request.storage)
            .fetch_optional(&mut *tx)
            .await?;

            // The unique index on (tenant, kind, checksum, storage) is the merge point:
            // a second submission updates the existing row instead of adding one.
            let row = sqlx::query_as::<_, FileRequestRow>(
                r#"
                INSERT INTO file_requests (
                    request_id, tenant, kind, checksum, storage, status, job_id, origin_url,
                    algorithm, file_name, file_size, mime_type, height, width, force_delete,
                    expiration_date, error_cause, created_at, updated_at
                )
                VALUES (?, ?, ?, ?, ?, 'todo', NULL, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?)
                ON CONFLICT(tenant, kind, checksum, storage) DO UPDATE SET
                    origin_url = COALESCE(excluded.origin_url, file_requests.origin_url),
                    algorithm = COALESCE(excluded.algorithm, file_requests.algorithm),
                    file_name = COALESCE(excluded.file_name, file_requests.file_name),
                    file_size = COALESCE(excluded.file_size, file_requests.file_size),
                    mime_type = COALESCE(excluded.mime_type, file_requests.mime_type),
                    height = COALESCE(excluded.height, file_requests.height),
                    width = COALESCE(excluded.width, file_requests.width),
                    force_delete = MAX(file_requests.force_delete, excluded.force_delete),
                    expiration_date = CASE
                        WHEN excluded.expiration_date IS NULL THEN file_requests.expiration_date
                        WHEN file_requests.expiration_date IS NULL THEN excluded.expiration_date
                        WHEN excluded.expiration_date > file_requests.expiration_date THEN excluded.expiration_date
                        ELSE file_requests.expiration_date
                    END,
                    status = CASE WHEN file_requests.job_id IS NULL THEN 'todo' ELSE file_requests.status END,
                    updated_at = excluded.updated_at
                RETURNING *
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(ctx.tenant_str())
            .bind(request.kind.as_str())
            .bind(request.checksum.as_str())
            .bind(&request.storage)
            .bind(&request.origin_url)
            .bind(meta.map(|m| m.algorithm.clone()))
            .bind(meta.map(|m| m.file_name.clone()))
            .bind(meta.and_then(|m| m.file_size).map(|s| s as i64))
            .bind(meta.map(|m| m.mime_type.clone()))
            .bind(meta.and_then(|m| m.height).map(i64::from))
            .bind(meta.and_then(|m| m.width).map(i64::from))
            .bind(request.force_delete)
            .bind(request.expiration_date.map(utc))
            .bind(now)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

            for owner in &request.owners {
                sqlx::query("INSERT OR IGNORE INTO request_owners (request_id, owner) VALUES (?, ?)")
                    .bind(row.request_id)
                    .bind(owner)
                    .execute(&mut *tx)
                    .await?;
            }
            sqlx::query("INSERT OR IGNORE INTO request_groups (request_id, group_id) VALUES (?, ?)")
                .bind(row.request_id)
                .bind(&request.group_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(MergedRequest {
                request: row,
                previous,
            })
        }

        async fn get_request(
            &self,
            ctx: &TenantContext,
            request_id: Uuid,
        ) -> MetadataResult<Option<FileRequestRow>> {
            let row = sqlx::query_as::<_, FileRequestRow>(
                "SELECT * FROM file_requests WHERE tenant = ? AND request_id = ?",
            )
            .bind(ctx.tenant_str())
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn find_request(
            &self,
            ctx: &TenantContext,
            kind: RequestKind,
            checksum: &Checksum,
            storage: &str,
        ) -> MetadataResult<Option<FileRequestRow>> {
            let row = sqlx::query_as::<_, FileRequestRow>(
                "SELECT * FROM file_requests WHERE tenant = ? AND kind = ? AND checksum = ? AND storage = ?",
            )
            .bind(ctx.tenant_str())
            .bind(kind.as_str())
            .bind(checksum.as_str())
            .bind(storage)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_requests(
            &self,
            ctx: &TenantContext,
            kind: RequestKind,
        ) -> MetadataResult<Vec<FileRequestRow>> {
            let rows = sqlx::query_as::<_, FileRequestRow>(
                "SELECT * FROM file_requests WHERE tenant = ? AND kind = ? ORDER BY created_at, request_id",
            )
            .bind(ctx.tenant_str())
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn get_request_owners(
            &self,
            ctx: &TenantContext,
            request_id: Uuid,
        ) -> MetadataResult<Vec<String>> {
            let owners = sqlx::query_scalar::<_, String>(
                r#"
                SELECT o.owner FROM request_owners o
                INNER JOIN file_requests r ON r.request_id = o.request_id
                WHERE r.tenant = ? AND o.request_id = ?
                ORDER BY o.owner
                "#,
            )
            .bind(ctx.tenant_str())
            .bind(request_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(owners)
        }

        async fn get_request_groups(
            &self,
            ctx: &TenantContext,
            request_id: Uuid,
        ) -> MetadataResult<Vec<String>> {
            let groups = sqlx::query_scalar::<_, String>(
                r#"
                SELECT g.group_id FROM request_groups g
                INNER JOIN file_requests r ON r.request_id = g.request_id
                WHERE r.tenant = ? AND g.request_id = ?
                ORDER BY g.group_id
                "#,
            )
            .bind(ctx.tenant_str())
            .bind(request_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(groups)
        }

        async fn list_pending_storages(
            &self,
            ctx: &TenantContext,
            kind: RequestKind,
            now: OffsetDateTime,
        ) -> MetadataResult<Vec<String>> {
            let storages = sqlx::query_scalar::<_, String>(
                r#"
                SELECT DISTINCT storage FROM file_requests
                WHERE tenant = ? AND kind = ? AND status = 'todo' AND job_id IS NULL
                  AND (kind <> 'cache' OR expiration_date > ?)
                ORDER BY storage
                "#,
            )
            .bind(ctx.tenant_str())
            .bind(kind.as_str())
            .bind(utc(now))
            .fetch_all(&self.pool)
            .await?;
            Ok(storages)
        }

        async fn list_tenants_with_pending_requests(&self) -> MetadataResult<Vec<String>> {
            let tenants = sqlx::query_scalar::<_, String>(
                "SELECT DISTINCT tenant FROM file_requests WHERE status = 'todo' AND job_id IS NULL ORDER BY tenant",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(tenants)
        }

        async fn delete_request(
            &self,
            ctx: &TenantContext,
            request_id: Uuid,
        ) -> MetadataResult<bool> {
            let result =
                sqlx::query("DELETE FROM file_requests WHERE tenant = ? AND request_id = ?")
                    .bind(ctx.tenant_str())
                    .bind(request_id)
                    .execute(&self.pool)
                    .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn delete_unscheduled_request(
            &self,
            ctx: &TenantContext,
            request_id: Uuid,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                "DELETE FROM file_requests WHERE tenant = ? AND request_id = ? AND job_id IS NULL",
            )
            .bind(ctx.tenant_str())
            .bind(request_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn fail_request(
            &self,
            ctx: &TenantContext,
            request_id: Uuid,
            cause: &str,
        ) -> MetadataResult<Option<FileRequestRow>> {
            let query = format!(
                "UPDATE file_requests SET status = 'error', job_id = NULL, error_cause = {APPEND_ERROR_CAUSE}, \
                 updated_at = ? WHERE tenant = ? AND request_id = ? RETURNING *"
            );
            let row = sqlx::query_as::<_, FileRequestRow>(&query)
                .bind(cause)
                .bind(cause)
                .bind(OffsetDateTime::now_utc())
                .bind(ctx.tenant_str())
                .bind(request_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn retry_requests(
            &self,
            ctx: &TenantContext,
            group_id: &str,
            kind: RequestKind,
            now: OffsetDateTime,
        ) -> MetadataResult<u64> {
            let result = sqlx::query(
                r#"
                UPDATE file_requests SET status = 'todo', updated_at = ?
                WHERE tenant = ? AND kind = ? AND status = 'error' AND job_id IS NULL
                  AND request_id IN (SELECT request_id FROM request_groups WHERE group_id = ?)
                  AND (kind <> 'cache' OR expiration_date > ?)
                "#,
            )
            .bind(utc(now))
            .bind(ctx.tenant_str())
            .bind(kind.as_str())
            .bind(group_id)
            .bind(utc(now))
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        }

        async fn count_requests(
            &self,
            ctx: &TenantContext,
            kind: RequestKind,
            status: Option<RequestStatus>,
        ) -> MetadataResult<u64> {
            let status = status.map(|s| s.as_str());
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM file_requests WHERE tenant = ? AND kind = ? AND (? IS NULL OR status = ?)",
            )
            .bind(ctx.tenant_str())
            .bind(kind.as_str())
            .bind(status)
            .bind(status)
            .fetch_one(&self.pool)
            .await?;
            Ok(count as u64)
        }

        async fn purge_expired_cache_requests(
            &self,
            ctx: &TenantContext,
            now: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<u64> {
            let result = sqlx::query(
                r#"
                DELETE FROM file_requests
                WHERE request_id IN (
                    SELECT request_id FROM file_requests
                    WHERE tenant = ? AND kind = 'cache' AND job_id IS NULL AND expiration_date <= ?
                    LIMIT ?
                )
                "#,
            )
            .bind(ctx.tenant_str())
            .bind(utc(now))
            .bind(limit)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        }
    }

    #[async_trait]
    impl CacheEntryRepo for SqliteStore {
        async fn upsert_cache_entry(
            &self,
            ctx: &TenantContext,
            entry: &NewCacheEntry,
        ) -> MetadataResult<CacheEntryRow> {
            let now = OffsetDateTime::now_utc();
            let row = sqlx::query_as::<_, CacheEntryRow>(
                r#"
                INSERT INTO cache_entries (
                    tenant, checksum, location, file_size, expiration_date, group_id,
                    created_at, updated_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(tenant, checksum) DO UPDATE SET
                    location = excluded.location,
                    file_size = excluded.file_size,
                    group_id = excluded.group_id,
                    expiration_date = CASE
                        WHEN excluded.expiration_date > cache_entries.expiration_date THEN excluded.expiration_date
                        ELSE cache_entries.expiration_date
                    END,
                    updated_at = excluded.updated_at
                RETURNING *
                "#,
            )
            .bind(ctx.tenant_str())
            .bind(entry.checksum.as_str())
            .bind(&entry.location)
            .bind(entry.file_size as i64)
            .bind(utc(entry.expiration_date))
            .bind(&entry.group_id)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_cache_entry(
            &self,
            ctx: &TenantContext,
            checksum: &Checksum,
        ) -> MetadataResult<Option<CacheEntryRow>> {
            let row = sqlx::query_as::<_, CacheEntryRow>(
                "SELECT * FROM cache_entries WHERE tenant = ? AND checksum = ?",
            )
            .bind(ctx.tenant_str())
            .bind(checksum.as_str())
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn delete_expired_cache_entries(
            &self,
            ctx: &TenantContext,
            now: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<CacheEntryRow>> {
            let rows = sqlx::query_as::<_, CacheEntryRow>(
                r#"
                DELETE FROM cache_entries
                WHERE tenant = ? AND checksum IN (
                    SELECT checksum FROM cache_entries
                    WHERE tenant = ? AND expiration_date <= ?
                    ORDER BY expiration_date
                    LIMIT ?
                )
                RETURNING *
                "#,
            )
            .bind(ctx.tenant_str())
            .bind(ctx.tenant_str())
            .bind(utc(now))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn cache_usage_bytes(
            &self,
            ctx: &TenantContext,
            now: OffsetDateTime,
        ) -> MetadataResult<u64> {
            let total: i64 = sqlx::query_scalar(
                "SELECT COALESCE(SUM(file_size), 0) FROM cache_entries WHERE tenant = ? AND expiration_date > ?",
            )
            .bind(ctx.tenant_str())
            .bind(utc(now))
            .fetch_one(&self.pool)
            .await?;
            Ok(total as u64)
        }
    }

    #[async_trait]
    impl JobRepo for SqliteStore {
        async fn claim_job(
            &self,
            ctx: &TenantContext,
            claim: &JobClaim,
        ) -> MetadataResult<Option<ClaimedJob>> {
            let job_id = Uuid::new_v4();
            let now = OffsetDateTime::now_utc();
            let mut tx = self.pool.begin().await?;

            sqlx::query(
                r#"
                INSERT INTO jobs (job_id, tenant, kind, storage, state, request_count, error_count, created_at)
                VALUES (?, ?, ?, ?, 'queued', 0, 0, ?)
                "#,
            )
            .bind(job_id)
            .bind(ctx.tenant_str())
            .bind(claim.kind.as_str())
            .bind(&claim.storage)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            let owner_filter = if claim.owners.is_empty() {
                String::new()
            } else {
                let placeholders: Vec<&str> = claim.owners.iter().map(|_| "?").collect();
                format!(
                    "AND EXISTS (SELECT 1 FROM request_owners o WHERE o.request_id = r.request_id AND o.owner IN ({}))",
                    placeholders.join(", ")
                )
            };
            let kind_filter = match claim.kind {
                // Writing a file waits while a job is deleting the same file there.
                RequestKind::Storage | RequestKind::Copy => {
                    "AND NOT EXISTS (SELECT 1 FROM file_requests d WHERE d.tenant = r.tenant \
                     AND d.kind = 'deletion' AND d.checksum = r.checksum AND d.storage = r.storage \
                     AND d.job_id IS NOT NULL)"
                }
                RequestKind::Deletion => "",
                RequestKind::Cache => "AND r.expiration_date > ?",
            };
            let query = format!(
                r#"
                UPDATE file_requests SET job_id = ?, updated_at = ?
                WHERE request_id IN (
                    SELECT r.request_id FROM file_requests r
                    WHERE r.tenant = ? AND r.kind = ? AND r.storage = ?
                      AND r.status = 'todo' AND r.job_id IS NULL
                      {owner_filter}
                      {kind_filter}
                    ORDER BY r.created_at, r.request_id
                    LIMIT ?
                )
                RETURNING *
                "#
            );

            let mut claim_query = sqlx::query_as::<_, FileRequestRow>(&query)
                .bind(job_id)
                .bind(now)
                .bind(ctx.tenant_str())
                .bind(claim.kind.as_str())
                .bind(&claim.storage);
            for owner in &claim.owners {
                claim_query = claim_query.bind(owner);
            }
            if claim.kind == RequestKind::Cache {
                claim_query = claim_query.bind(utc(claim.now));
            }
            let mut requests = claim_query.bind(claim.limit).fetch_all(&mut *tx).await?;

            if requests.is_empty() {
                tx.rollback().await?;
                return Ok(None);
            }
            requests.sort_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then(a.request_id.cmp(&b.request_id))
            });

            let job = sqlx::query_as::<_, JobRow>(
                "UPDATE jobs SET request_count = ? WHERE job_id = ? RETURNING *",
            )
            .bind(requests.len() as i64)
            .bind(job_id)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(Some(ClaimedJob { job, requests }))
        }

        async fn get_job(&self, ctx: &TenantContext, job_id: Uuid) -> MetadataResult<Option<JobRow>> {
            let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE tenant = ? AND job_id = ?")
                .bind(ctx.tenant_str())
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn update_job_state(
            &self,
            ctx: &TenantContext,
            job_id: Uuid,
            state: JobState,
            error_count: u64,
        ) -> MetadataResult<()> {
            let now = OffsetDateTime::now_utc();
            let started_at = (state == JobState::Running).then_some(now);
            let finished_at = state.is_terminal().then_some(now);

            let result = sqlx::query(
                r#"
                UPDATE jobs SET
                    state = ?,
                    error_count = ?,
                    started_at = COALESCE(?, started_at),
                    finished_at = COALESCE(?, finished_at)
                WHERE tenant = ? AND job_id = ?
                "#,
            )
            .bind(state.as_str())
            .bind(error_count as i64)
            .bind(started_at)
            .bind(finished_at)
            .bind(ctx.tenant_str())
            .bind(job_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("job {job_id}")));
            }
            Ok(())
        }

        async fn get_recent_jobs(&self, ctx: &TenantContext, limit: u32) -> MetadataResult<Vec<JobRow>> {
            let rows = sqlx::query_as::<_, JobRow>(
                "SELECT * FROM jobs WHERE tenant = ? ORDER BY created_at DESC LIMIT ?",
            )
            .bind(ctx.tenant_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn get_orphaned_jobs(&self) -> MetadataResult<Vec<JobRow>> {
            // No tenant filter: recovery runs once for every tenant at startup.
            let rows = sqlx::query_as::<_, JobRow>(
                "SELECT * FROM jobs WHERE state IN ('queued', 'running') ORDER BY created_at",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn get_job_requests(
            &self,
            ctx: &TenantContext,
            job_id: Uuid,
        ) -> MetadataResult<Vec<FileRequestRow>> {
            let rows = sqlx::query_as::<_, FileRequestRow>(
                "SELECT * FROM file_requests WHERE tenant = ? AND job_id = ? ORDER BY created_at, request_id",
            )
            .bind(ctx.tenant_str())
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn fail_job_requests(
            &self,
            ctx: &TenantContext,
            job_id: Uuid,
            cause: &str,
        ) -> MetadataResult<Vec<FileRequestRow>> {
            let query = format!(
                "UPDATE file_requests SET status = 'error', job_id = NULL, error_cause = {APPEND_ERROR_CAUSE}, \
                 updated_at = ? WHERE tenant = ? AND job_id = ? RETURNING *"
            );
            let rows = sqlx::query_as::<_, FileRequestRow>(&query)
                .bind(cause)
                .bind(cause)
                .bind(OffsetDateTime::now_utc())
                .bind(ctx.tenant_str())
                .bind(job_id)
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
-- File references: one row per (checksum, storage) replica
CREATE TABLE IF NOT EXISTS file_references (
    reference_id BLOB PRIMARY KEY,
    tenant TEXT NOT NULL,
    checksum TEXT NOT NULL,
    storage TEXT NOT NULL,
    url TEXT,
    algorithm TEXT NOT NULL,
    file_name TEXT NOT NULL,
    file_size INTEGER,
    mime_type TEXT NOT NULL,
    height INTEGER,
    width INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(tenant, checksum, storage)
);
CREATE INDEX IF NOT EXISTS idx_file_references_checksum ON file_references(tenant, checksum);

CREATE TABLE IF NOT EXISTS reference_owners (
    reference_id BLOB NOT NULL REFERENCES file_references(reference_id) ON DELETE CASCADE,
    owner TEXT NOT NULL,
    PRIMARY KEY (reference_id, owner)
);
CREATE INDEX IF NOT EXISTS idx_reference_owners_owner ON reference_owners(owner, reference_id);

-- Requests: at most one row per (tenant, kind, checksum, storage)
CREATE TABLE IF NOT EXISTS file_requests (
    request_id BLOB PRIMARY KEY,
    tenant TEXT NOT NULL,
    kind TEXT NOT NULL,
    checksum TEXT NOT NULL,
    storage TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'todo',
    job_id BLOB,
    origin_url TEXT,
    algorithm TEXT,
    file_name TEXT,
    file_size INTEGER,
    mime_type TEXT,
    height INTEGER,
    width INTEGER,
    force_delete INTEGER NOT NULL DEFAULT 0,
    expiration_date TEXT,
    error_cause TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(tenant, kind, checksum, storage)
);
CREATE INDEX IF NOT EXISTS idx_file_requests_pool
ON file_requests(tenant, kind, storage, status)
WHERE job_id IS NULL;
CREATE INDEX IF NOT EXISTS idx_file_requests_job ON file_requests(job_id);

CREATE TABLE IF NOT EXISTS request_owners (
    request_id BLOB NOT NULL REFERENCES file_requests(request_id) ON DELETE CASCADE,
    owner TEXT NOT NULL,
    PRIMARY KEY (request_id, owner)
);

CREATE TABLE IF NOT EXISTS request_groups (
    request_id BLOB NOT NULL REFERENCES file_requests(request_id) ON DELETE CASCADE,
    group_id TEXT NOT NULL,
    PRIMARY KEY (request_id, group_id)
);
CREATE INDEX IF NOT EXISTS idx_request_groups_group ON request_groups(group_id);

-- Restored copies of nearline files
CREATE TABLE IF NOT EXISTS cache_entries (
    tenant TEXT NOT NULL,
    checksum TEXT NOT NULL,
    location TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    expiration_date TEXT NOT NULL,
    group_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (tenant, checksum)
);
CREATE INDEX IF NOT EXISTS idx_cache_entries_expiration ON cache_entries(tenant, expiration_date);

-- Jobs
CREATE TABLE IF NOT EXISTS jobs (
    job_id BLOB PRIMARY KEY,
    tenant TEXT NOT NULL,
    kind TEXT NOT NULL,
    storage TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'queued',
    request_count INTEGER NOT NULL DEFAULT 0,
    error_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    started_at TEXT,
    finished_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);
CREATE INDEX IF NOT EXISTS idx_jobs_tenant ON jobs(tenant, created_at);
"#;
