//! Core domain types shared by every strata crate.
//!
//! This crate defines the canonical data model of the file reference engine:
//! - Tenant context threaded through every store and handler call
//! - Checksums and file metadata
//! - Storage tiers (ONLINE / NEARLINE / OFFLINE)
//! - Request kinds, request status and job state
//! - Inbound flow messages and outbound file reference events
//! - Configuration

pub mod checksum;
pub mod config;
pub mod error;
pub mod event;
pub mod file;
pub mod message;
pub mod request;
pub mod tenant;
pub mod tier;

pub use checksum::Checksum;
pub use error::{Error, Result};
pub use event::{FileReferenceEvent, FileReferenceEventType};
pub use file::FileMeta;
pub use message::{
    AddFileReference, CopyFile, CopyFiles, DeleteFileReference, FlowEnvelope, FlowMessage,
    RequestAvailability, RetryRequests, StoreFile, StoreFiles,
};
pub use request::{JobState, RequestKind, RequestStatus, RequestTransition};
pub use tenant::{TenantContext, TenantId};
pub use tier::StorageTier;

/// Default number of requests picked into a single job.
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Error cause recorded on requests owned by a job whose executor died.
pub const JOB_CRASH_CAUSE: &str = "job executor terminated before the request reached a terminal state";
