//! Database models mapping to the metadata schema.

use crate::error::MetadataResult;
use sqlx::FromRow;
use strata_core::{Checksum, FileMeta, JobState, RequestKind, RequestStatus};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// File references
// =============================================================================

/// A file known to exist at one storage location. Owners live in `reference_owners`.
#[derive(Debug, Clone, FromRow)]
pub struct FileReferenceRow {
    pub reference_id: Uuid,
    pub tenant: String,
    pub checksum: String,
    pub storage: String,
    /// Location-specific URL of the stored bytes.
    pub url: Option<String>,
    pub algorithm: String,
    pub file_name: String,
    pub file_size: Option<i64>,
    pub mime_type: String,
    pub height: Option<i64>,
    pub width: Option<i64>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl FileReferenceRow {
    /// File metadata of the reference.
    pub fn meta(&self) -> MetadataResult<FileMeta> {
        Ok(FileMeta {
            checksum: Checksum::parse(&self.checksum)?,
            algorithm: self.algorithm.clone(),
            file_name: self.file_name.clone(),
            file_size: self.file_size.map(|s| s as u64),
            mime_type: self.mime_type.clone(),
            height: self.height.map(|h| h as u32),
            width: self.width.map(|w| w as u32),
        })
    }
}

/// Input for creating or refreshing a file reference.
#[derive(Debug, Clone)]
pub struct NewFileReference {
    pub storage: String,
    pub url: Option<String>,
    pub meta: FileMeta,
}

/// Outcome of removing one owner from a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerRemoval {
    /// The owner was present and has been removed.
    pub removed: bool,
    /// Owners left on the reference afterwards.
    pub remaining: u64,
}

// =============================================================================
// Requests
// =============================================================================

/// Pending storage, deletion or cache work for one (checksum, storage) pair.
#[derive(Debug, Clone, FromRow)]
pub struct FileRequestRow {
    pub request_id: Uuid,
    pub tenant: String,
    pub kind: String,
    pub checksum: String,
    pub storage: String,
    pub status: String,
    /// Set while the request is owned by an in-flight job.
    pub job_id: Option<Uuid>,
    pub origin_url: Option<String>,
    pub algorithm: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub mime_type: Option<String>,
    pub height: Option<i64>,
    pub width: Option<i64>,
    pub force_delete: bool,
    pub expiration_date: Option<OffsetDateTime>,
    /// Accumulated error messages, newline separated.
    pub error_cause: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl FileRequestRow {
    pub fn kind(&self) -> MetadataResult<RequestKind> {
        Ok(self.kind.parse()?)
    }

    pub fn status(&self) -> MetadataResult<RequestStatus> {
        Ok(self.status.parse()?)
    }

    pub fn checksum(&self) -> MetadataResult<Checksum> {
        Ok(Checksum::parse(&self.checksum)?)
    }

    /// File metadata carried by a storage request, if any was recorded.
    pub fn meta(&self) -> MetadataResult<Option<FileMeta>> {
        let (Some(algorithm), Some(file_name)) = (&self.algorithm, &self.file_name) else {
            return Ok(None);
        };
        Ok(Some(FileMeta {
            checksum: self.checksum()?,
            algorithm: algorithm.clone(),
            file_name: file_name.clone(),
            file_size: self.file_size.map(|s| s as u64),
            mime_type: self
                .mime_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            height: self.height.map(|h| h as u32),
            width: self.width.map(|w| w as u32),
        }))
    }

    /// Whether the request is in the TODO pool and not owned by a job.
    pub fn is_unscheduled_todo(&self) -> bool {
        self.job_id.is_none() && self.status == RequestStatus::Todo.as_str()
    }
}

/// Input for creating a request or merging into the existing one.
#[derive(Debug, Clone)]
pub struct NewFileRequest {
    pub kind: RequestKind,
    pub checksum: Checksum,
    pub storage: String,
    pub origin_url: Option<String>,
    pub meta: Option<FileMeta>,
    pub owners: Vec<String>,
    pub group_id: String,
    pub force_delete: bool,
    pub expiration_date: Option<OffsetDateTime>,
}

impl NewFileRequest {
    pub fn new(kind: RequestKind, checksum: Checksum, storage: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            kind,
            checksum,
            storage: storage.into(),
            origin_url: None,
            meta: None,
            owners: Vec::new(),
            group_id: group_id.into(),
            force_delete: false,
            expiration_date: None,
        }
    }
}

/// Result of `merge_request`.
#[derive(Debug, Clone)]
pub struct MergedRequest {
    /// The row as stored after the merge.
    pub request: FileRequestRow,
    /// The row before the merge, `None` when the request was created.
    pub previous: Option<FileRequestRow>,
}

impl MergedRequest {
    pub fn created(&self) -> bool {
        self.previous.is_none()
    }
}

// =============================================================================
// Cache entries
// =============================================================================

/// A locally restored copy of a NEARLINE file.
#[derive(Debug, Clone, FromRow)]
pub struct CacheEntryRow {
    pub tenant: String,
    pub checksum: String,
    /// Local path or URL of the restored copy.
    pub location: String,
    pub file_size: i64,
    pub expiration_date: OffsetDateTime,
    pub group_id: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl CacheEntryRow {
    /// Whether the entry may be used at `now`.
    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        now < self.expiration_date
    }
}

/// Input for `upsert_cache_entry`.
#[derive(Debug, Clone)]
pub struct NewCacheEntry {
    pub checksum: Checksum,
    pub location: String,
    pub file_size: u64,
    pub expiration_date: OffsetDateTime,
    pub group_id: String,
}

// =============================================================================
// Jobs
// =============================================================================

/// A bounded batch of requests executed together.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub job_id: Uuid,
    pub tenant: String,
    pub kind: String,
    pub storage: String,
    pub state: String,
    pub request_count: i64,
    pub error_count: i64,
    pub created_at: OffsetDateTime,
    pub started_at: Option<OffsetDateTime>,
    pub finished_at: Option<OffsetDateTime>,
}

impl JobRow {
    pub fn kind(&self) -> MetadataResult<RequestKind> {
        Ok(self.kind.parse()?)
    }

    pub fn state(&self) -> MetadataResult<JobState> {
        Ok(self.state.parse()?)
    }
}

/// Selection of TODO requests claimed into a new job.
#[derive(Debug, Clone)]
pub struct JobClaim {
    pub kind: RequestKind,
    pub storage: String,
    /// Restrict to requests having at least one of these owners; empty means any.
    pub owners: Vec<String>,
    pub limit: u32,
    /// Reference time for cache request expiration.
    pub now: OffsetDateTime,
}

/// A newly created job and the requests it exclusively owns.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job: JobRow,
    pub requests: Vec<FileRequestRow>,
}
