//! File reference repository.

use crate::error::MetadataResult;
use crate::models::{FileReferenceRow, NewFileReference, OwnerRemoval};
use async_trait::async_trait;
use strata_core::{Checksum, TenantContext};
use uuid::Uuid;

/// Repository for file references and their owner sets.
#[async_trait]
pub trait ReferenceRepo: Send + Sync {
    /// Create the reference for (checksum, storage) or refresh its metadata,
    /// then add `owner`. Adding an existing owner is a no-op.
    async fn upsert_reference(
        &self,
        ctx: &TenantContext,
        reference: &NewFileReference,
        owner: &str,
    ) -> MetadataResult<FileReferenceRow>;

    /// Get the reference of a checksum at one storage location.
    async fn get_reference(
        &self,
        ctx: &TenantContext,
        checksum: &Checksum,
        storage: &str,
    ) -> MetadataResult<Option<FileReferenceRow>>;

    /// All references (replicas) of a checksum.
    async fn list_references(
        &self,
        ctx: &TenantContext,
        checksum: &Checksum,
    ) -> MetadataResult<Vec<FileReferenceRow>>;

    /// Owners of a reference, sorted.
    async fn get_reference_owners(
        &self,
        ctx: &TenantContext,
        reference_id: Uuid,
    ) -> MetadataResult<Vec<String>>;

    /// Add an owner. Returns false when it was already present.
    async fn add_reference_owner(
        &self,
        ctx: &TenantContext,
        reference_id: Uuid,
        owner: &str,
    ) -> MetadataResult<bool>;

    /// Remove an owner and report how many owners remain.
    async fn remove_reference_owner(
        &self,
        ctx: &TenantContext,
        reference_id: Uuid,
        owner: &str,
    ) -> MetadataResult<OwnerRemoval>;

    /// Delete the reference only if it has no owner left.
    async fn delete_reference_if_unowned(
        &self,
        ctx: &TenantContext,
        reference_id: Uuid,
    ) -> MetadataResult<bool>;

    /// Delete the reference regardless of owners.
    async fn delete_reference(&self, ctx: &TenantContext, reference_id: Uuid)
    -> MetadataResult<bool>;

    /// Page through references owned by `owner`, ordered by reference id.
    /// `after` is the last reference id of the previous page.
    async fn list_references_by_owner(
        &self,
        ctx: &TenantContext,
        owner: &str,
        after: Option<Uuid>,
        limit: u32,
    ) -> MetadataResult<Vec<FileReferenceRow>>;
}
