//! Engine test harness.

#![allow(dead_code)]

use super::fixtures::sha256_hex;
use super::locations::FlakyLocation;
use std::sync::Arc;
use strata_core::config::AppConfig;
use strata_core::{Checksum, RequestKind, RequestStatus, StorageTier, TenantContext};
use strata_engine::scheduler::schedule_jobs;
use strata_engine::{AppState, MemoryPublisher};
use strata_metadata::models::JobRow;
use strata_metadata::{MetadataStore, SqliteStore};
use strata_storage::LocationRegistry;
use strata_storage::url::file_url;
use tempfile::TempDir;

/// ONLINE location name.
pub const DISK: &str = "disk";
/// NEARLINE location name.
pub const TAPE: &str = "tape";
/// OFFLINE, reference-only location name.
pub const VAULT: &str = "vault";

/// An engine over a temporary SQLite database, an ONLINE `disk`, a NEARLINE
/// `tape` and an OFFLINE `vault`.
pub struct TestEngine {
    pub state: AppState,
    pub events: Arc<MemoryPublisher>,
    pub disk: Arc<FlakyLocation>,
    pub tape: Arc<FlakyLocation>,
    pub temp: TempDir,
}

impl TestEngine {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(configure: impl FnOnce(&mut AppConfig)) -> Self {
        let temp = tempfile::tempdir().expect("Failed to create temp directory");

        let mut config = AppConfig::for_testing();
        config.cache.path = temp.path().join("cache");
        configure(&mut config);

        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(temp.path().join("metadata.db"), None)
                .await
                .expect("create metadata store"),
        );

        let disk = Arc::new(FlakyLocation::new(DISK, StorageTier::Online, &temp.path().join(DISK)).await);
        let tape =
            Arc::new(FlakyLocation::new(TAPE, StorageTier::Nearline, &temp.path().join(TAPE)).await);
        let mut locations = LocationRegistry::new();
        locations.register(disk.clone());
        locations.register(tape.clone());
        locations.register_offline(VAULT);

        let events = Arc::new(MemoryPublisher::new());
        let state = AppState::new(config, metadata, locations, events.clone())
            .expect("valid test configuration");

        Self {
            state,
            events,
            disk,
            tape,
            temp,
        }
    }

    pub fn metadata(&self) -> &dyn MetadataStore {
        self.state.metadata.as_ref()
    }

    /// Write an origin file and return its checksum and URL.
    pub async fn origin_file(&self, content: &[u8]) -> (Checksum, String) {
        let dir = self.temp.path().join("incoming");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let checksum = Checksum::parse(sha256_hex(content)).unwrap();
        let path = dir.join(checksum.as_str());
        tokio::fs::write(&path, content).await.unwrap();
        (checksum, file_url(&path))
    }

    /// Schedule one kind for every location and wait for the jobs.
    pub async fn run_jobs(&self, ctx: &TenantContext, kind: RequestKind) -> Vec<JobRow> {
        let jobs = schedule_jobs(&self.state, ctx, kind, &[], &[])
            .await
            .expect("schedule jobs");
        self.state.job_registry.wait_idle().await;
        jobs
    }

    pub async fn count(&self, ctx: &TenantContext, kind: RequestKind, status: Option<RequestStatus>) -> u64 {
        self.metadata()
            .count_requests(ctx, kind, status)
            .await
            .expect("count requests")
    }

    pub async fn owners(&self, ctx: &TenantContext, checksum: &Checksum, storage: &str) -> Option<Vec<String>> {
        let reference = self
            .metadata()
            .get_reference(ctx, checksum, storage)
            .await
            .expect("get reference")?;
        Some(
            self.metadata()
                .get_reference_owners(ctx, reference.reference_id)
                .await
                .expect("get owners"),
        )
    }
}
