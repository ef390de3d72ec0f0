//! Engine state shared by handlers, the scheduler and job tasks.

use crate::cache::CacheManager;
use crate::error::{EngineError, EngineResult};
use crate::events::EventPublisher;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use strata_core::config::AppConfig;
use strata_core::{FileReferenceEvent, JOB_CRASH_CAUSE, RequestKind, TenantContext};
use strata_metadata::MetadataStore;
use strata_storage::LocationRegistry;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// A spawned job task and what is needed to clean up after it.
struct TrackedJob {
    ctx: TenantContext,
    kind: RequestKind,
    handle: JoinHandle<()>,
}

/// Registry for tracking spawned job tasks and detecting panics.
///
/// A job task that panics or is cancelled leaves its requests owned by a job
/// that will never finish, hiding them from every scheduling pass. The
/// registry notices such tasks and forces their requests to ERROR with a
/// crash cause so they can be retried.
pub struct JobTaskRegistry {
    /// Map of job_id -> task
    tasks: Arc<Mutex<HashMap<Uuid, TrackedJob>>>,
    metadata: Arc<dyn MetadataStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl JobTaskRegistry {
    pub fn new(metadata: Arc<dyn MetadataStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            metadata,
            publisher,
        }
    }

    /// Register a spawned job task.
    pub async fn register(
        &self,
        ctx: TenantContext,
        job_id: Uuid,
        kind: RequestKind,
        handle: JoinHandle<()>,
    ) {
        self.tasks
            .lock()
            .await
            .insert(job_id, TrackedJob { ctx, kind, handle });
    }

    /// Number of tracked tasks not yet reaped.
    pub async fn tracked(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Spawn a watchdog task that periodically checks for dead job tasks.
    /// Returns the watchdog's JoinHandle (caller should keep it to prevent early termination).
    pub fn spawn_watchdog(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                self.check_tasks().await;
            }
        })
    }

    /// Reap every finished task, handling panicked or cancelled ones.
    pub async fn check_tasks(&self) {
        let finished = {
            let mut tasks = self.tasks.lock().await;
            let done: Vec<Uuid> = tasks
                .iter()
                .filter(|(_, tracked)| tracked.handle.is_finished())
                .map(|(job_id, _)| *job_id)
                .collect();
            done.into_iter()
                .filter_map(|job_id| tasks.remove(&job_id).map(|t| (job_id, t)))
                .collect::<Vec<_>>()
        };

        // Awaited without holding the mutex
        for (job_id, tracked) in finished {
            self.reap(job_id, tracked).await;
        }
    }

    /// Wait until every tracked task has finished and been reaped, including
    /// jobs spawned while waiting.
    pub async fn wait_idle(&self) {
        loop {
            let drained: Vec<(Uuid, TrackedJob)> = self.tasks.lock().await.drain().collect();
            if drained.is_empty() {
                return;
            }
            for (job_id, tracked) in drained {
                self.reap(job_id, tracked).await;
            }
        }
    }

    async fn reap(&self, job_id: Uuid, tracked: TrackedJob) {
        let TrackedJob { ctx, kind, handle } = tracked;
        match handle.await {
            Ok(()) => {
                tracing::debug!(job_id = %job_id, "job task completed");
            }
            Err(join_err) => {
                crate::metrics::JOBS_ACTIVE.dec();
                crate::metrics::JOBS_CRASHED.inc();
                if join_err.is_panic() {
                    tracing::error!(
                        tenant = %ctx.tenant(),
                        job_id = %job_id,
                        kind = %kind,
                        panic = ?join_err,
                        "job task panicked, failing its requests"
                    );
                } else {
                    tracing::warn!(
                        tenant = %ctx.tenant(),
                        job_id = %job_id,
                        kind = %kind,
                        "job task was cancelled, failing its requests"
                    );
                }
                if let Err(e) = fail_crashed_job(
                    self.metadata.as_ref(),
                    self.publisher.as_ref(),
                    &ctx,
                    job_id,
                    kind,
                    JOB_CRASH_CAUSE,
                )
                .await
                {
                    tracing::error!(
                        job_id = %job_id,
                        error = %e,
                        "failed to fail requests of crashed job"
                    );
                }
            }
        }
    }
}

/// Force every request still owned by a job to ERROR with `cause`, publish the
/// kind's error event for each, and mark the job failed.
///
/// Returns the number of requests failed.
pub async fn fail_crashed_job(
    metadata: &dyn MetadataStore,
    publisher: &dyn EventPublisher,
    ctx: &TenantContext,
    job_id: Uuid,
    kind: RequestKind,
    cause: &str,
) -> EngineResult<usize> {
    let failed = metadata.fail_job_requests(ctx, job_id, cause).await?;
    for request in &failed {
        crate::metrics::record_request_outcome(kind.as_str(), "crashed");
        let owners = metadata.get_request_owners(ctx, request.request_id).await?;
        let groups = metadata.get_request_groups(ctx, request.request_id).await?;
        let event = FileReferenceEvent::new(
            ctx.tenant().clone(),
            request.checksum()?,
            kind.error_event(),
            cause,
        )
        .with_storage(&request.storage)
        .with_owners(owners)
        .with_groups(groups);
        crate::events::emit(publisher, event).await;
    }
    metadata
        .update_job_state(ctx, job_id, strata_core::JobState::Failed, failed.len() as u64)
        .await?;
    tracing::warn!(
        tenant = %ctx.tenant(),
        job_id = %job_id,
        kind = %kind,
        requests = failed.len(),
        "job marked failed"
    );
    Ok(failed.len())
}

/// Shared engine state.
#[derive(Clone)]
pub struct AppState {
    /// Engine configuration.
    pub config: Arc<AppConfig>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Configured storage locations.
    pub locations: Arc<LocationRegistry>,
    /// Outbound event sink.
    pub publisher: Arc<dyn EventPublisher>,
    /// Restoration cache.
    pub cache: Arc<CacheManager>,
    /// Spawned job tasks, for crash detection.
    pub job_registry: Arc<JobTaskRegistry>,
    /// Bounded job worker pool.
    pub workers: Arc<Semaphore>,
}

impl AppState {
    /// Create the engine state after validating the configuration.
    pub fn new(
        config: AppConfig,
        metadata: Arc<dyn MetadataStore>,
        locations: LocationRegistry,
        publisher: Arc<dyn EventPublisher>,
    ) -> EngineResult<Self> {
        config.validate().map_err(EngineError::Config)?;

        let cache = Arc::new(CacheManager::new(&config.cache, metadata.clone()));
        let job_registry = Arc::new(JobTaskRegistry::new(metadata.clone(), publisher.clone()));
        let workers = Arc::new(Semaphore::new(config.scheduler.max_concurrent_jobs));

        Ok(Self {
            config: Arc::new(config),
            metadata,
            locations: Arc::new(locations),
            publisher,
            cache,
            job_registry,
            workers,
        })
    }

    /// Publish an event through the configured publisher.
    pub async fn publish(&self, event: FileReferenceEvent) {
        crate::events::emit(self.publisher.as_ref(), event).await;
    }

    /// Spawn the job watchdog at the configured interval.
    pub fn spawn_watchdog(&self) -> JoinHandle<()> {
        self.job_registry
            .clone()
            .spawn_watchdog(self.config.scheduler.watchdog_interval())
    }
}
