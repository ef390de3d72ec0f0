//! Common test utilities for metadata store tests.

use std::sync::Arc;
use strata_core::{Checksum, FileMeta, RequestKind, TenantContext};
use strata_metadata::models::{NewFileReference, NewFileRequest};
use strata_metadata::{MetadataResult, MetadataStore, SqliteStore};
use tempfile::TempDir;

/// A test metadata store backed by a temporary SQLite file.
#[allow(dead_code)]
pub struct TestMetadata {
    pub store: Arc<dyn MetadataStore>,
    _temp_dir: TempDir,
}

impl TestMetadata {
    pub async fn new() -> MetadataResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let store = SqliteStore::new(temp_dir.path().join("test.db"), None).await?;
        Ok(Self {
            store: Arc::new(store),
            _temp_dir: temp_dir,
        })
    }

    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.store.clone()
    }
}

pub fn tenant(name: &str) -> TenantContext {
    TenantContext::for_tenant(name).expect("valid tenant")
}

pub fn checksum(seed: &str) -> Checksum {
    Checksum::parse(seed).expect("valid checksum")
}

#[allow(dead_code)]
pub fn file_meta(seed: &str) -> FileMeta {
    FileMeta::new(checksum(seed), "SHA-256", format!("{seed}.dat")).with_size(42)
}

#[allow(dead_code)]
pub fn new_reference(seed: &str, storage: &str) -> NewFileReference {
    NewFileReference {
        storage: storage.to_string(),
        url: Some(format!("file:///{storage}/{seed}")),
        meta: file_meta(seed),
    }
}

#[allow(dead_code)]
pub fn storage_request(seed: &str, storage: &str, owner: &str, group: &str) -> NewFileRequest {
    let mut request = NewFileRequest::new(RequestKind::Storage, checksum(seed), storage, group);
    request.origin_url = Some(format!("file:///incoming/{seed}"));
    request.meta = Some(file_meta(seed));
    request.owners = vec![owner.to_string()];
    request
}
