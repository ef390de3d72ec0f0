//! Shared handler helpers.

use crate::error::EngineResult;
use crate::state::AppState;
use strata_core::{
    Checksum, FileReferenceEvent, FileReferenceEventType, RequestKind, TenantContext,
};
use strata_metadata::models::{MergedRequest, NewFileRequest};

/// Start an event about `checksum` for the context's tenant.
pub fn event(
    ctx: &TenantContext,
    checksum: &Checksum,
    event_type: FileReferenceEventType,
    message: impl Into<String>,
) -> FileReferenceEvent {
    FileReferenceEvent::new(ctx.tenant().clone(), checksum.clone(), event_type, message)
}

/// Create a request or merge the submission into the outstanding one.
pub async fn merge_request(
    state: &AppState,
    ctx: &TenantContext,
    request: &NewFileRequest,
) -> EngineResult<MergedRequest> {
    let merged = state.metadata.merge_request(ctx, request).await?;
    let kind = request.kind.as_str();

    match &merged.previous {
        None => {
            crate::metrics::REQUESTS_CREATED.with_label_values(&[kind]).inc();
            tracing::debug!(
                tenant = %ctx.tenant(),
                checksum = %request.checksum,
                storage = %request.storage,
                kind,
                request_id = %merged.request.request_id,
                "request created"
            );
        }
        Some(previous) => {
            crate::metrics::REQUESTS_MERGED.with_label_values(&[kind]).inc();
            let previous_meta = previous.meta()?;
            let meta_replaced = match (&request.meta, &previous_meta) {
                (Some(new), Some(old)) => new != old,
                _ => false,
            };
            if meta_replaced {
                tracing::warn!(
                    tenant = %ctx.tenant(),
                    checksum = %request.checksum,
                    storage = %request.storage,
                    kind,
                    "file metadata replaced by a newer submission"
                );
            }
            if request.origin_url.is_some()
                && previous.origin_url.is_some()
                && previous.origin_url != request.origin_url
            {
                tracing::warn!(
                    tenant = %ctx.tenant(),
                    checksum = %request.checksum,
                    storage = %request.storage,
                    kind,
                    previous = ?previous.origin_url,
                    "origin url replaced by a newer submission"
                );
            }
            tracing::debug!(
                tenant = %ctx.tenant(),
                checksum = %request.checksum,
                storage = %request.storage,
                kind,
                request_id = %merged.request.request_id,
                status = %merged.request.status,
                "submission merged into outstanding request"
            );
        }
    }
    Ok(merged)
}

/// State of the deletion request of a reference when it is claimed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingDeletion {
    None,
    /// A TODO or ERROR deletion was removed before any job picked it.
    Cancelled,
    /// A job owns the deletion; it can no longer be cancelled.
    InFlight,
}

/// Cancel the deletion of (checksum, storage) if no job owns it yet.
pub async fn cancel_pending_deletion(
    state: &AppState,
    ctx: &TenantContext,
    checksum: &Checksum,
    storage: &str,
) -> EngineResult<PendingDeletion> {
    let Some(deletion) = state
        .metadata
        .find_request(ctx, RequestKind::Deletion, checksum, storage)
        .await?
    else {
        return Ok(PendingDeletion::None);
    };

    if deletion.job_id.is_none()
        && state
            .metadata
            .delete_unscheduled_request(ctx, deletion.request_id)
            .await?
    {
        tracing::info!(
            tenant = %ctx.tenant(),
            checksum = %checksum,
            storage,
            request_id = %deletion.request_id,
            "pending deletion cancelled, file is owned again"
        );
        return Ok(PendingDeletion::Cancelled);
    }
    Ok(PendingDeletion::InFlight)
}
