//! Request repository covering the Storage, Deletion and Cache request stores.

use crate::error::MetadataResult;
use crate::models::{FileRequestRow, MergedRequest, NewFileRequest};
use async_trait::async_trait;
use strata_core::{Checksum, RequestKind, RequestStatus, TenantContext};
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for pending request rows.
#[async_trait]
pub trait RequestRepo: Send + Sync {
    /// Create a TODO request, or merge into the existing row for the same
    /// (kind, checksum, storage).
    ///
    /// Merging unions owners and group ids, replaces file metadata and origin
    /// URL with the newest values, keeps the later cache expiration, ORs the
    /// force flag and resets an ERROR row that no job owns back to TODO.
    async fn merge_request(
        &self,
        ctx: &TenantContext,
        request: &NewFileRequest,
    ) -> MetadataResult<MergedRequest>;

    /// Get a request by ID.
    async fn get_request(
        &self,
        ctx: &TenantContext,
        request_id: Uuid,
    ) -> MetadataResult<Option<FileRequestRow>>;

    /// Find the request of a kind for (checksum, storage).
    async fn find_request(
        &self,
        ctx: &TenantContext,
        kind: RequestKind,
        checksum: &Checksum,
        storage: &str,
    ) -> MetadataResult<Option<FileRequestRow>>;

    /// All requests of a kind, oldest first.
    async fn list_requests(
        &self,
        ctx: &TenantContext,
        kind: RequestKind,
    ) -> MetadataResult<Vec<FileRequestRow>>;

    /// Owners recorded on a request, sorted.
    async fn get_request_owners(
        &self,
        ctx: &TenantContext,
        request_id: Uuid,
    ) -> MetadataResult<Vec<String>>;

    /// Group ids recorded on a request, sorted.
    async fn get_request_groups(
        &self,
        ctx: &TenantContext,
        request_id: Uuid,
    ) -> MetadataResult<Vec<String>>;

    /// Distinct storage locations having unscheduled TODO requests of a kind.
    async fn list_pending_storages(
        &self,
        ctx: &TenantContext,
        kind: RequestKind,
        now: OffsetDateTime,
    ) -> MetadataResult<Vec<String>>;

    /// Tenants having unscheduled TODO requests of any kind.
    async fn list_tenants_with_pending_requests(&self) -> MetadataResult<Vec<String>>;

    /// Delete a request (and its owner and group sets).
    async fn delete_request(&self, ctx: &TenantContext, request_id: Uuid) -> MetadataResult<bool>;

    /// Delete a request only if no job owns it.
    async fn delete_unscheduled_request(
        &self,
        ctx: &TenantContext,
        request_id: Uuid,
    ) -> MetadataResult<bool>;

    /// Set a request to ERROR, append `cause` and release it from its job.
    async fn fail_request(
        &self,
        ctx: &TenantContext,
        request_id: Uuid,
        cause: &str,
    ) -> MetadataResult<Option<FileRequestRow>>;

    /// Reset every ERROR request of a group and kind to TODO. Expired cache
    /// requests are left untouched. Returns the number of rows reset.
    async fn retry_requests(
        &self,
        ctx: &TenantContext,
        group_id: &str,
        kind: RequestKind,
        now: OffsetDateTime,
    ) -> MetadataResult<u64>;

    /// Count requests of a kind, optionally restricted to one status.
    async fn count_requests(
        &self,
        ctx: &TenantContext,
        kind: RequestKind,
        status: Option<RequestStatus>,
    ) -> MetadataResult<u64>;

    /// Delete cache requests whose expiration has passed and no job owns.
    async fn purge_expired_cache_requests(
        &self,
        ctx: &TenantContext,
        now: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<u64>;
}
