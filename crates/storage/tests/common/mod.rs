//! Common test utilities for storage location tests.

use sha2::{Digest, Sha256};
use std::path::Path;
use strata_core::{Checksum, FileMeta, TenantContext};
use strata_storage::url::file_url;

pub fn tenant(name: &str) -> TenantContext {
    TenantContext::for_tenant(name).expect("valid tenant")
}

/// SHA-256 metadata of `data`.
pub fn meta_for(data: &[u8]) -> FileMeta {
    let checksum = Checksum::parse(hex::encode(Sha256::digest(data))).expect("hex checksum");
    FileMeta::new(checksum, "SHA-256", "payload.bin")
}

/// Write an origin file under `dir` and return its URL.
pub async fn origin(dir: &Path, name: &str, data: &[u8]) -> String {
    let path = dir.join(name);
    tokio::fs::write(&path, data).await.expect("write origin");
    file_url(&path)
}
