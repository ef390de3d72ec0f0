//! Repository traits for metadata operations.
//!
//! Every method takes the caller's [`TenantContext`](strata_core::TenantContext);
//! rows of other tenants are never visible through these traits.

pub mod cache_entries;
pub mod jobs;
pub mod references;
pub mod requests;

pub use cache_entries::CacheEntryRepo;
pub use jobs::JobRepo;
pub use references::ReferenceRepo;
pub use requests::RequestRepo;
