//! Availability and retry handlers.

use super::common::{event, merge_request};
use crate::error::EngineResult;
use crate::state::AppState;
use std::collections::HashSet;
use strata_core::{
    Checksum, FileReferenceEventType, RequestAvailability, RequestKind, RetryRequests,
    StorageTier, TenantContext,
};
use strata_metadata::models::{FileReferenceRow, NewFileRequest};
use time::OffsetDateTime;

/// How a checksum can be made readable.
#[derive(Debug, Clone)]
pub enum Availability {
    /// An ONLINE replica exists on this storage.
    Online(String),
    /// A valid restored copy exists in the cache.
    Cached,
    /// Only NEARLINE replicas exist; the first one can be restored.
    Restorable(FileReferenceRow),
    /// Nothing retrievable is known.
    Unavailable,
}

/// Classify a checksum. Unregistered storages count as OFFLINE.
///
/// References without owners are waiting for their deletion job and are not
/// counted as replicas.
pub async fn check_availability(
    state: &AppState,
    ctx: &TenantContext,
    checksum: &Checksum,
) -> EngineResult<Availability> {
    let mut references = Vec::new();
    for reference in state.metadata.list_references(ctx, checksum).await? {
        let owners = state
            .metadata
            .get_reference_owners(ctx, reference.reference_id)
            .await?;
        if !owners.is_empty() {
            references.push(reference);
        }
    }
    let tier = |r: &FileReferenceRow| {
        state
            .locations
            .tier_of(&r.storage)
            .unwrap_or(StorageTier::Offline)
    };

    if let Some(online) = references.iter().find(|r| tier(r) == StorageTier::Online) {
        return Ok(Availability::Online(online.storage.clone()));
    }
    if state.cache.is_available(ctx, checksum).await? {
        crate::metrics::CACHE_HITS.inc();
        return Ok(Availability::Cached);
    }
    Ok(references
        .into_iter()
        .find(|r| tier(r) == StorageTier::Nearline)
        .map(Availability::Restorable)
        .unwrap_or(Availability::Unavailable))
}

/// Handle a `RequestAvailability` message, checksum by checksum.
pub async fn handle_availability(
    state: &AppState,
    ctx: &TenantContext,
    msg: RequestAvailability,
) -> EngineResult<()> {
    let now = OffsetDateTime::now_utc();
    let mut seen = HashSet::new();

    for checksum in &msg.checksums {
        if !seen.insert(checksum) {
            continue;
        }
        let available = |message: String| {
            event(ctx, checksum, FileReferenceEventType::Available, message)
                .with_groups([msg.group_id.as_str()])
        };
        let unavailable = |message: String| {
            event(ctx, checksum, FileReferenceEventType::AvailabilityError, message)
                .with_groups([msg.group_id.as_str()])
        };

        match check_availability(state, ctx, checksum).await? {
            Availability::Online(storage) => {
                state
                    .publish(available(format!("file is online on storage {storage}")).with_storage(storage))
                    .await;
            }
            Availability::Cached => {
                state
                    .publish(available("file is available in the restoration cache".to_string()))
                    .await;
            }
            Availability::Restorable(_) if msg.expiration_date <= now => {
                state
                    .publish(unavailable(format!(
                        "expiration date {} is already past",
                        msg.expiration_date
                    )))
                    .await;
            }
            Availability::Restorable(reference) => {
                let mut request = NewFileRequest::new(
                    RequestKind::Cache,
                    checksum.clone(),
                    &reference.storage,
                    &msg.group_id,
                );
                request.origin_url = reference.url.clone();
                request.expiration_date = Some(msg.expiration_date);
                merge_request(state, ctx, &request).await?;
            }
            Availability::Unavailable => {
                state
                    .publish(unavailable(
                        "no online or nearline copy of the file is known".to_string(),
                    ))
                    .await;
            }
        }
    }
    Ok(())
}

/// Handle a `RetryRequests` message. Returns the number of requests reset.
pub async fn handle_retry(state: &AppState, ctx: &TenantContext, msg: RetryRequests) -> EngineResult<u64> {
    let reset = state
        .metadata
        .retry_requests(ctx, &msg.group_id, msg.kind, OffsetDateTime::now_utc())
        .await?;
    crate::metrics::REQUESTS_RETRIED
        .with_label_values(&[msg.kind.as_str()])
        .inc_by(reset);
    tracing::info!(
        tenant = %ctx.tenant(),
        group_id = %msg.group_id,
        kind = %msg.kind,
        reset,
        "errored requests reset to todo"
    );
    Ok(reset)
}
