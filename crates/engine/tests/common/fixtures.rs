//! Message and file fixtures.

#![allow(dead_code)]

use sha2::{Digest, Sha256};
use strata_core::{
    AddFileReference, Checksum, CopyFile, CopyFiles, DeleteFileReference, RequestAvailability,
    StoreFile, StoreFiles, TenantContext,
};
use time::{Duration, OffsetDateTime};

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn tenant(name: &str) -> TenantContext {
    TenantContext::for_tenant(name).expect("valid tenant")
}

pub fn checksum(seed: &str) -> Checksum {
    Checksum::parse(seed).expect("valid checksum")
}

/// Store one file onto `dest`.
pub fn store_file(checksum: &Checksum, origin_url: &str, dest: &str, owner: &str) -> StoreFile {
    StoreFile {
        file_name: format!("{}.dat", &checksum.as_str()[..8.min(checksum.as_str().len())]),
        checksum: checksum.clone(),
        algorithm: "SHA-256".to_string(),
        mime_type: "application/octet-stream".to_string(),
        size: None,
        height: None,
        width: None,
        owner: owner.to_string(),
        origin_url: origin_url.to_string(),
        dest_storage: dest.to_string(),
    }
}

pub fn store_files(group_id: &str, files: Vec<StoreFile>) -> StoreFiles {
    StoreFiles {
        group_id: group_id.to_string(),
        files,
    }
}

/// Reference a file already present on `storage`.
pub fn add_in_place(checksum: &Checksum, storage: &str, owner: &str) -> AddFileReference {
    AddFileReference {
        file_name: "in-place.dat".to_string(),
        checksum: checksum.clone(),
        algorithm: "SHA-256".to_string(),
        mime_type: "application/octet-stream".to_string(),
        size: Some(4),
        owner: owner.to_string(),
        origin_storage: storage.to_string(),
        origin_url: format!("file:///{storage}/{checksum}"),
        dest_storage: storage.to_string(),
        dest_url: None,
        group_id: "add-group".to_string(),
    }
}

/// Copy a file from `origin_storage` onto `dest`.
pub fn add_copy(
    checksum: &Checksum,
    origin_url: &str,
    dest: &str,
    owner: &str,
) -> AddFileReference {
    AddFileReference {
        file_name: "copy.dat".to_string(),
        checksum: checksum.clone(),
        algorithm: "SHA-256".to_string(),
        mime_type: "application/octet-stream".to_string(),
        size: None,
        owner: owner.to_string(),
        origin_storage: "incoming".to_string(),
        origin_url: origin_url.to_string(),
        dest_storage: dest.to_string(),
        dest_url: None,
        group_id: "copy-group".to_string(),
    }
}

pub fn delete(checksum: &Checksum, storage: &str, owner: &str, force: bool) -> DeleteFileReference {
    DeleteFileReference {
        checksum: checksum.clone(),
        storage: storage.to_string(),
        owner: owner.to_string(),
        force,
        group_id: "delete-group".to_string(),
    }
}

pub fn availability(checksums: &[&Checksum], group_id: &str) -> RequestAvailability {
    RequestAvailability {
        checksums: checksums.iter().map(|c| (*c).clone()).collect(),
        expiration_date: OffsetDateTime::now_utc() + Duration::days(1),
        group_id: group_id.to_string(),
    }
}

pub fn copy(checksums: &[&Checksum], dest: &str, group_id: &str) -> CopyFiles {
    CopyFiles {
        group_id: group_id.to_string(),
        files: checksums
            .iter()
            .map(|c| CopyFile {
                checksum: (*c).clone(),
                dest_storage: dest.to_string(),
            })
            .collect(),
    }
}
