//! Job scheduling and execution.
//!
//! A scheduling pass claims TODO requests page by page. Each page becomes a
//! job whose requests are stamped with the job id in the same transaction, so
//! no other pass can pick them. Jobs run on spawned tasks bounded by the
//! worker semaphore; every request of a job reaches a terminal outcome on its
//! own, and a failure never stops its siblings.

use crate::error::{EngineError, EngineResult};
use crate::handlers::availability::{Availability, check_availability};
use crate::handlers::common::event;
use crate::state::{AppState, fail_crashed_job};
use std::time::Instant;
use strata_core::{
    FileMeta, FileReferenceEvent, FileReferenceEventType, JOB_CRASH_CAUSE, JobState, RequestKind,
    TenantContext,
};
use strata_metadata::models::{ClaimedJob, FileRequestRow, JobClaim, JobRow, NewFileReference};
use strata_storage::url::file_url;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

/// Schedule storage jobs. Empty `locations` means every location, empty
/// `owners` means any owner.
pub async fn schedule_storage_jobs(
    state: &AppState,
    ctx: &TenantContext,
    locations: &[String],
    owners: &[String],
) -> EngineResult<Vec<JobRow>> {
    schedule_jobs(state, ctx, RequestKind::Storage, locations, owners).await
}

/// Schedule deletion jobs. Filters as in [`schedule_storage_jobs`].
pub async fn schedule_deletion_jobs(
    state: &AppState,
    ctx: &TenantContext,
    locations: &[String],
    owners: &[String],
) -> EngineResult<Vec<JobRow>> {
    schedule_jobs(state, ctx, RequestKind::Deletion, locations, owners).await
}

/// Schedule cache (restore) jobs. Filters as in [`schedule_storage_jobs`].
pub async fn schedule_cache_jobs(
    state: &AppState,
    ctx: &TenantContext,
    locations: &[String],
    owners: &[String],
) -> EngineResult<Vec<JobRow>> {
    schedule_jobs(state, ctx, RequestKind::Cache, locations, owners).await
}

/// Schedule copy jobs. Filters as in [`schedule_storage_jobs`]; locations
/// select copy destinations.
pub async fn schedule_copy_jobs(
    state: &AppState,
    ctx: &TenantContext,
    locations: &[String],
    owners: &[String],
) -> EngineResult<Vec<JobRow>> {
    schedule_jobs(state, ctx, RequestKind::Copy, locations, owners).await
}

/// Claim pending requests of one kind into jobs and spawn them.
///
/// Returns the jobs created, empty when there was no TODO work.
pub async fn schedule_jobs(
    state: &AppState,
    ctx: &TenantContext,
    kind: RequestKind,
    locations: &[String],
    owners: &[String],
) -> EngineResult<Vec<JobRow>> {
    let now = OffsetDateTime::now_utc();
    let page_size = state.config.scheduler.page_size;
    let max_pages = state.config.scheduler.max_pages_per_pass;

    let pending = state.metadata.list_pending_storages(ctx, kind, now).await?;
    let mut jobs = Vec::new();

    for storage in pending
        .into_iter()
        .filter(|s| locations.is_empty() || locations.contains(s))
    {
        let claim = JobClaim {
            kind,
            storage: storage.clone(),
            owners: owners.to_vec(),
            limit: page_size,
            now,
        };

        let mut pages = 0;
        while pages < max_pages {
            let Some(claimed) = state.metadata.claim_job(ctx, &claim).await? else {
                break;
            };
            pages += 1;
            let claimed_count = claimed.requests.len();

            crate::metrics::JOBS_SCHEDULED
                .with_label_values(&[kind.as_str()])
                .inc();
            tracing::info!(
                tenant = %ctx.tenant(),
                job_id = %claimed.job.job_id,
                kind = %kind,
                storage = %storage,
                requests = claimed_count,
                "job scheduled"
            );

            jobs.push(claimed.job.clone());
            spawn_job(state, ctx.clone(), kind, claimed).await;

            if claimed_count < page_size as usize {
                break;
            }
        }
        if pages == max_pages {
            tracing::debug!(
                tenant = %ctx.tenant(),
                kind = %kind,
                storage = %storage,
                max_pages,
                "page bound reached, remaining requests wait for the next pass"
            );
        }
    }

    Ok(jobs)
}

/// One scheduling pass of every kind for a tenant.
pub async fn schedule_all(state: &AppState, ctx: &TenantContext) -> EngineResult<Vec<JobRow>> {
    let mut jobs = Vec::new();
    for kind in RequestKind::ALL {
        jobs.extend(schedule_jobs(state, ctx, kind, &[], &[]).await?);
    }
    Ok(jobs)
}

/// One scheduling pass of every kind for every tenant with pending work.
pub async fn schedule_all_tenants(state: &AppState) -> EngineResult<Vec<JobRow>> {
    let mut jobs = Vec::new();
    for tenant in state.metadata.list_tenants_with_pending_requests().await? {
        let ctx = TenantContext::for_tenant(&tenant)?;
        jobs.extend(schedule_all(state, &ctx).await?);
    }
    Ok(jobs)
}

/// Run [`schedule_all_tenants`] forever at the configured interval.
pub fn spawn_auto_scheduler(state: AppState) -> JoinHandle<()> {
    let interval = state.config.scheduler.auto_schedule_interval();
    tokio::spawn(async move {
        tracing::info!(interval_secs = interval.as_secs(), "automatic scheduling enabled");
        loop {
            tokio::time::sleep(interval).await;
            match schedule_all_tenants(&state).await {
                Ok(jobs) if !jobs.is_empty() => {
                    tracing::info!(jobs = jobs.len(), "automatic scheduling pass done");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "automatic scheduling pass failed");
                }
            }
        }
    })
}

/// Fail every job left queued or running by a previous process.
///
/// Must run before any job is scheduled by this process.
pub async fn recover_orphaned_jobs(state: &AppState) -> EngineResult<usize> {
    let orphaned = state.metadata.get_orphaned_jobs().await?;
    if orphaned.is_empty() {
        return Ok(0);
    }

    tracing::warn!(
        count = orphaned.len(),
        "found jobs from a previous process, failing their requests"
    );

    for job in &orphaned {
        let ctx = TenantContext::for_tenant(&job.tenant)?;
        let kind = job.kind()?;
        let failed = fail_crashed_job(
            state.metadata.as_ref(),
            state.publisher.as_ref(),
            &ctx,
            job.job_id,
            kind,
            JOB_CRASH_CAUSE,
        )
        .await?;
        crate::metrics::JOBS_CRASHED.inc();
        tracing::warn!(
            tenant = %job.tenant,
            job_id = %job.job_id,
            kind = %job.kind,
            job_state = %job.state,
            requests = failed,
            "orphaned job marked failed"
        );
    }
    Ok(orphaned.len())
}

/// Spawn a claimed job and register it with the watchdog.
async fn spawn_job(state: &AppState, ctx: TenantContext, kind: RequestKind, claimed: ClaimedJob) {
    let job_id = claimed.job.job_id;

    // Matches the dec at the end of the task, or in the watchdog on panic
    crate::metrics::JOBS_ACTIVE.inc();

    let task_state = state.clone();
    let task_ctx = ctx.clone();
    let handle = tokio::spawn(async move {
        let state = task_state;
        let ctx = task_ctx;

        let Ok(_permit) = state.workers.clone().acquire_owned().await else {
            crate::metrics::JOBS_ACTIVE.dec();
            tracing::error!(job_id = %job_id, "worker pool closed, failing job");
            if let Err(e) = fail_crashed_job(
                state.metadata.as_ref(),
                state.publisher.as_ref(),
                &ctx,
                job_id,
                kind,
                JOB_CRASH_CAUSE,
            )
            .await
            {
                tracing::error!(job_id = %job_id, error = %e, "failed to fail requests of job");
            }
            return;
        };

        let started = Instant::now();
        let result = run_job(&state, &ctx, kind, &claimed).await;
        crate::metrics::JOB_DURATION.observe(started.elapsed().as_secs_f64());
        crate::metrics::JOBS_ACTIVE.dec();

        match result {
            Ok(errors) => {
                let job_state = if errors == 0 {
                    JobState::Finished
                } else {
                    JobState::Failed
                };
                if let Err(e) = state
                    .metadata
                    .update_job_state(&ctx, job_id, job_state, errors)
                    .await
                {
                    tracing::error!(job_id = %job_id, error = %e, "failed to update job state");
                }
                tracing::info!(
                    tenant = %ctx.tenant(),
                    job_id = %job_id,
                    kind = %kind,
                    state = %job_state,
                    errors,
                    "job done"
                );
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "job aborted");
                if let Err(e) = fail_crashed_job(
                    state.metadata.as_ref(),
                    state.publisher.as_ref(),
                    &ctx,
                    job_id,
                    kind,
                    &format!("job aborted: {e}"),
                )
                .await
                {
                    tracing::error!(job_id = %job_id, error = %e, "failed to fail requests of job");
                }
            }
        }
    });

    state.job_registry.register(ctx, job_id, kind, handle).await;
}

/// Execute every request of a job. Returns the number of failed requests.
///
/// An `Err` means a failure could not even be recorded; the caller then fails
/// whatever the job still owns.
async fn run_job(
    state: &AppState,
    ctx: &TenantContext,
    kind: RequestKind,
    claimed: &ClaimedJob,
) -> EngineResult<u64> {
    let job_id = claimed.job.job_id;
    state
        .metadata
        .update_job_state(ctx, job_id, JobState::Running, 0)
        .await?;
    tracing::info!(
        tenant = %ctx.tenant(),
        job_id = %job_id,
        kind = %kind,
        requests = claimed.requests.len(),
        "job started"
    );

    let mut errors = 0u64;
    for request in &claimed.requests {
        let outcome = match kind {
            RequestKind::Storage => execute_storage(state, ctx, request).await,
            RequestKind::Deletion => execute_deletion(state, ctx, request).await,
            RequestKind::Cache => execute_cache(state, ctx, request).await,
            RequestKind::Copy => execute_copy(state, ctx, request).await,
        };
        match outcome {
            Ok(()) => crate::metrics::record_request_outcome(kind.as_str(), "success"),
            Err(e) => {
                errors += 1;
                crate::metrics::record_request_outcome(kind.as_str(), "error");
                tracing::warn!(
                    tenant = %ctx.tenant(),
                    job_id = %job_id,
                    request_id = %request.request_id,
                    checksum = %request.checksum,
                    storage = %request.storage,
                    kind = %kind,
                    error = %e,
                    "request failed"
                );
                fail_request(state, ctx, kind, request, &e.to_string()).await?;
            }
        }
    }
    Ok(errors)
}

/// Event about a request, carrying its owners and groups.
///
/// Must be built before the request row is deleted.
async fn request_event(
    state: &AppState,
    ctx: &TenantContext,
    request: &FileRequestRow,
    event_type: FileReferenceEventType,
    message: String,
) -> EngineResult<FileReferenceEvent> {
    let owners = state
        .metadata
        .get_request_owners(ctx, request.request_id)
        .await?;
    let groups = state
        .metadata
        .get_request_groups(ctx, request.request_id)
        .await?;
    Ok(event(ctx, &request.checksum()?, event_type, message)
        .with_storage(&request.storage)
        .with_owners(owners)
        .with_groups(groups))
}

async fn fail_request(
    state: &AppState,
    ctx: &TenantContext,
    kind: RequestKind,
    request: &FileRequestRow,
    cause: &str,
) -> EngineResult<()> {
    if state
        .metadata
        .fail_request(ctx, request.request_id, cause)
        .await?
        .is_none()
    {
        return Ok(());
    }
    let event = request_event(state, ctx, request, kind.error_event(), cause.to_string()).await?;
    state.publish(event).await;
    Ok(())
}

async fn execute_storage(
    state: &AppState,
    ctx: &TenantContext,
    request: &FileRequestRow,
) -> EngineResult<()> {
    let location = state.locations.require(&request.storage)?;
    let meta = request.meta()?.ok_or_else(|| {
        EngineError::InvalidRequest("storage request carries no file metadata".to_string())
    })?;
    let origin_url = request.origin_url.as_deref().ok_or_else(|| {
        EngineError::InvalidRequest("storage request carries no origin url".to_string())
    })?;

    let stored = location.store(ctx, &meta, origin_url).await?;

    let owners = state
        .metadata
        .get_request_owners(ctx, request.request_id)
        .await?;
    if owners.is_empty() {
        return Err(EngineError::InvalidRequest(
            "storage request has no owner".to_string(),
        ));
    }
    let reference = NewFileReference {
        storage: request.storage.clone(),
        url: Some(stored.url),
        meta: FileMeta {
            file_size: Some(stored.size),
            ..meta
        },
    };
    for owner in &owners {
        state.metadata.upsert_reference(ctx, &reference, owner).await?;
    }

    let event = request_event(
        state,
        ctx,
        request,
        FileReferenceEventType::Stored,
        format!("file stored on storage {}", request.storage),
    )
    .await?;
    state.metadata.delete_request(ctx, request.request_id).await?;
    state.publish(event).await;
    Ok(())
}

async fn execute_deletion(
    state: &AppState,
    ctx: &TenantContext,
    request: &FileRequestRow,
) -> EngineResult<()> {
    let checksum = request.checksum()?;
    let reference = state
        .metadata
        .get_reference(ctx, &checksum, &request.storage)
        .await?;

    if let Some(reference) = &reference {
        let owners = state
            .metadata
            .get_reference_owners(ctx, reference.reference_id)
            .await?;
        if !owners.is_empty() {
            tracing::info!(
                tenant = %ctx.tenant(),
                checksum = %checksum,
                storage = %request.storage,
                "reference is owned again, deletion dropped"
            );
            state.metadata.delete_request(ctx, request.request_id).await?;
            return Ok(());
        }
    }

    let url = reference
        .as_ref()
        .and_then(|r| r.url.clone())
        .or_else(|| request.origin_url.clone());
    let physical = match url {
        Some(url) => match state.locations.require(&request.storage) {
            Ok(location) => location.delete(ctx, &url).await,
            Err(e) => Err(e),
        },
        None => Ok(()),
    };

    if let Err(e) = physical {
        if !request.force_delete {
            return Err(e.into());
        }
        tracing::warn!(
            tenant = %ctx.tenant(),
            checksum = %checksum,
            storage = %request.storage,
            error = %e,
            "forced deletion: physical deletion failed, stored bytes may be orphaned"
        );
    }

    if let Some(reference) = &reference {
        state
            .metadata
            .delete_reference_if_unowned(ctx, reference.reference_id)
            .await?;
    }

    let event = request_event(
        state,
        ctx,
        request,
        FileReferenceEventType::FullyDeleted,
        format!("file deleted from storage {}", request.storage),
    )
    .await?;
    state.metadata.delete_request(ctx, request.request_id).await?;
    state.publish(event).await;
    Ok(())
}

async fn execute_cache(
    state: &AppState,
    ctx: &TenantContext,
    request: &FileRequestRow,
) -> EngineResult<()> {
    let checksum = request.checksum()?;
    let expiration = request.expiration_date.ok_or_else(|| {
        EngineError::InvalidRequest("cache request carries no expiration date".to_string())
    })?;
    let groups = state
        .metadata
        .get_request_groups(ctx, request.request_id)
        .await?;
    let group_id = groups.first().cloned().unwrap_or_default();

    let message = match state.cache.valid_entry(ctx, &checksum).await? {
        Some(entry) => {
            state
                .cache
                .add_file(ctx, &checksum, entry.file_size as u64, &entry.location, expiration, &group_id)
                .await?;
            "file is available in the restoration cache".to_string()
        }
        None => {
            let location = state.locations.require(&request.storage)?;
            let reference = state
                .metadata
                .get_reference(ctx, &checksum, &request.storage)
                .await?
                .ok_or_else(|| {
                    EngineError::InvalidRequest(format!(
                        "no reference of the file on storage {}",
                        request.storage
                    ))
                })?;
            let url = reference.url.as_deref().ok_or_else(|| {
                EngineError::InvalidRequest(format!(
                    "reference on storage {} has no url",
                    request.storage
                ))
            })?;

            let dest = state.cache.entry_path(ctx, &checksum);
            let size = location.restore(ctx, url, &dest).await?;
            state
                .cache
                .add_file(ctx, &checksum, size, &file_url(&dest), expiration, &group_id)
                .await?;
            format!("file restored from storage {}", request.storage)
        }
    };

    let event = request_event(state, ctx, request, FileReferenceEventType::Available, message).await?;
    state.metadata.delete_request(ctx, request.request_id).await?;
    state.publish(event).await;
    Ok(())
}

async fn execute_copy(
    state: &AppState,
    ctx: &TenantContext,
    request: &FileRequestRow,
) -> EngineResult<()> {
    let checksum = request.checksum()?;
    let location = state.locations.require(&request.storage)?;
    let meta = request.meta()?.ok_or_else(|| {
        EngineError::InvalidRequest("copy request carries no file metadata".to_string())
    })?;
    let owners = state
        .metadata
        .get_request_owners(ctx, request.request_id)
        .await?;
    if owners.is_empty() {
        return Err(EngineError::InvalidRequest(
            "copy request has no owner".to_string(),
        ));
    }

    let existing = state
        .metadata
        .get_reference(ctx, &checksum, &request.storage)
        .await?;
    let mut done = None;
    if let Some(reference) = existing {
        if !state
            .metadata
            .get_reference_owners(ctx, reference.reference_id)
            .await?
            .is_empty()
        {
            done = Some(reference.reference_id);
        }
    }

    match done {
        Some(reference_id) => {
            for owner in &owners {
                state
                    .metadata
                    .add_reference_owner(ctx, reference_id, owner)
                    .await?;
            }
        }
        None => {
            let source_url = copy_source(state, ctx, request).await?;
            let stored = location.store(ctx, &meta, &source_url).await?;
            let reference = NewFileReference {
                storage: request.storage.clone(),
                url: Some(stored.url),
                meta: FileMeta {
                    file_size: Some(stored.size),
                    ..meta
                },
            };
            for owner in &owners {
                state.metadata.upsert_reference(ctx, &reference, owner).await?;
            }
        }
    }

    let event = request_event(
        state,
        ctx,
        request,
        FileReferenceEventType::Copied,
        format!("file copied to storage {}", request.storage),
    )
    .await?;
    state.metadata.delete_request(ctx, request.request_id).await?;
    state.publish(event).await;
    Ok(())
}

/// URL a copy reads from: an ONLINE replica, a valid cache entry, or a
/// NEARLINE replica restored into the cache for the copy retention period.
async fn copy_source(
    state: &AppState,
    ctx: &TenantContext,
    request: &FileRequestRow,
) -> EngineResult<String> {
    let checksum = request.checksum()?;
    match check_availability(state, ctx, &checksum).await? {
        Availability::Online(storage) => state
            .metadata
            .get_reference(ctx, &checksum, &storage)
            .await?
            .and_then(|r| r.url)
            .ok_or_else(|| {
                EngineError::InvalidRequest(format!("reference on storage {storage} has no url"))
            }),
        Availability::Cached => state
            .cache
            .valid_entry(ctx, &checksum)
            .await?
            .map(|entry| entry.location)
            .ok_or_else(|| EngineError::Internal("cache entry expired during copy".to_string())),
        Availability::Restorable(reference) => {
            let source = state.locations.require(&reference.storage)?;
            let url = reference.url.as_deref().ok_or_else(|| {
                EngineError::InvalidRequest(format!(
                    "reference on storage {} has no url",
                    reference.storage
                ))
            })?;
            let groups = state
                .metadata
                .get_request_groups(ctx, request.request_id)
                .await?;
            let group_id = groups.first().cloned().unwrap_or_default();
            let retention = time::Duration::seconds(state.config.cache.copy_retention_secs as i64);

            let dest = state.cache.entry_path(ctx, &checksum);
            let size = source.restore(ctx, url, &dest).await?;
            let cached = file_url(&dest);
            state
                .cache
                .add_file(ctx, &checksum, size, &cached, OffsetDateTime::now_utc() + retention, &group_id)
                .await?;
            tracing::info!(
                tenant = %ctx.tenant(),
                checksum = %checksum,
                source = %reference.storage,
                storage = %request.storage,
                "file restored for copy"
            );
            Ok(cached)
        }
        Availability::Unavailable => Err(EngineError::InvalidRequest(
            "no readable replica of the file".to_string(),
        )),
    }
}
