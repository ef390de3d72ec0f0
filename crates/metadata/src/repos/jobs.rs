//! Job repository.

use crate::error::MetadataResult;
use crate::models::{ClaimedJob, FileRequestRow, JobClaim, JobRow};
use async_trait::async_trait;
use strata_core::{JobState, TenantContext};
use uuid::Uuid;

/// Repository for jobs and the requests they own.
#[async_trait]
pub trait JobRepo: Send + Sync {
    /// Create a queued job and, in the same transaction, stamp its id on up to
    /// `claim.limit` unscheduled TODO requests matching the claim.
    ///
    /// Returns `None` (and creates no job) when nothing matched. Storage
    /// requests whose (checksum, storage) has a deletion owned by a job are
    /// skipped; expired cache requests are never claimed.
    async fn claim_job(
        &self,
        ctx: &TenantContext,
        claim: &JobClaim,
    ) -> MetadataResult<Option<ClaimedJob>>;

    /// Get a job by ID.
    async fn get_job(&self, ctx: &TenantContext, job_id: Uuid) -> MetadataResult<Option<JobRow>>;

    /// Update a job's state. Entering `running` stamps `started_at`, terminal
    /// states stamp `finished_at`.
    async fn update_job_state(
        &self,
        ctx: &TenantContext,
        job_id: Uuid,
        state: JobState,
        error_count: u64,
    ) -> MetadataResult<()>;

    /// Most recent jobs of the tenant.
    async fn get_recent_jobs(&self, ctx: &TenantContext, limit: u32) -> MetadataResult<Vec<JobRow>>;

    /// Jobs of any tenant still `queued` or `running`. At startup these are
    /// orphans of a previous process.
    async fn get_orphaned_jobs(&self) -> MetadataResult<Vec<JobRow>>;

    /// Requests still owned by a job.
    async fn get_job_requests(
        &self,
        ctx: &TenantContext,
        job_id: Uuid,
    ) -> MetadataResult<Vec<FileRequestRow>>;

    /// Force every request still owned by the job to ERROR with `cause` and
    /// release them. Returns the failed rows.
    async fn fail_job_requests(
        &self,
        ctx: &TenantContext,
        job_id: Uuid,
        cause: &str,
    ) -> MetadataResult<Vec<FileRequestRow>>;
}
