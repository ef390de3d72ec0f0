//! Owner removal and deletion handlers.

use super::common::{event, merge_request};
use crate::error::EngineResult;
use crate::state::AppState;
use strata_core::{Checksum, DeleteFileReference, FileReferenceEventType, RequestKind, TenantContext};
use strata_metadata::models::NewFileRequest;
use uuid::Uuid;

/// Handle a `DeleteFileReference` message.
///
/// Removing an owner that others still share only publishes
/// DELETED_FOR_OWNER. Removing the last owner also schedules the physical
/// deletion; the reference stays, ownerless, until the deletion job is done.
pub async fn handle_delete(
    state: &AppState,
    ctx: &TenantContext,
    msg: DeleteFileReference,
) -> EngineResult<()> {
    let Some(reference) = state
        .metadata
        .get_reference(ctx, &msg.checksum, &msg.storage)
        .await?
    else {
        tracing::debug!(
            tenant = %ctx.tenant(),
            checksum = %msg.checksum,
            storage = %msg.storage,
            "no reference to delete"
        );
        return Ok(());
    };

    let removal = state
        .metadata
        .remove_reference_owner(ctx, reference.reference_id, &msg.owner)
        .await?;
    if !removal.removed {
        tracing::debug!(
            tenant = %ctx.tenant(),
            checksum = %msg.checksum,
            storage = %msg.storage,
            owner = %msg.owner,
            "owner does not own the reference"
        );
        return Ok(());
    }

    state
        .publish(
            event(
                ctx,
                &msg.checksum,
                FileReferenceEventType::DeletedForOwner,
                format!("file deleted for owner {}", msg.owner),
            )
            .with_storage(&msg.storage)
            .with_owners([msg.owner.as_str()])
            .with_groups([msg.group_id.as_str()]),
        )
        .await;

    if removal.remaining > 0 {
        return Ok(());
    }

    if state.locations.get(&msg.storage).is_none() {
        // No bytes are held on this location: nothing to remove physically.
        state
            .metadata
            .delete_reference(ctx, reference.reference_id)
            .await?;
        tracing::info!(
            tenant = %ctx.tenant(),
            checksum = %msg.checksum,
            storage = %msg.storage,
            "reference without stored bytes deleted"
        );
        state
            .publish(
                event(
                    ctx,
                    &msg.checksum,
                    FileReferenceEventType::FullyDeleted,
                    format!("file reference removed from storage {}", msg.storage),
                )
                .with_storage(&msg.storage)
                .with_owners([msg.owner.as_str()])
                .with_groups([msg.group_id.as_str()]),
            )
            .await;
        return Ok(());
    }

    let mut request = NewFileRequest::new(
        RequestKind::Deletion,
        msg.checksum.clone(),
        &msg.storage,
        &msg.group_id,
    );
    request.origin_url = reference.url.clone();
    request.owners = vec![msg.owner.clone()];
    request.force_delete = msg.force;
    merge_request(state, ctx, &request).await?;
    Ok(())
}

/// Remove `owner` from every reference it owns.
///
/// References are walked with a keyset cursor in pages of the scheduler page
/// size, for at most `max_pages_per_pass` pages. Returns the number of
/// references processed; a caller seeing a full last page may call again.
pub async fn delete_owner_files(
    state: &AppState,
    ctx: &TenantContext,
    owner: &str,
    force: bool,
    group_id: &str,
) -> EngineResult<u64> {
    let page_size = state.config.scheduler.page_size;
    let max_pages = state.config.scheduler.max_pages_per_pass;
    let mut after: Option<Uuid> = None;
    let mut processed = 0u64;

    for _ in 0..max_pages {
        let page = state
            .metadata
            .list_references_by_owner(ctx, owner, after, page_size)
            .await?;
        let Some(last) = page.last() else {
            break;
        };
        after = Some(last.reference_id);

        for reference in &page {
            let msg = DeleteFileReference {
                checksum: Checksum::parse(&reference.checksum)?,
                storage: reference.storage.clone(),
                owner: owner.to_string(),
                force,
                group_id: group_id.to_string(),
            };
            handle_delete(state, ctx, msg).await?;
            processed += 1;
        }

        if page.len() < page_size as usize {
            break;
        }
    }

    tracing::info!(
        tenant = %ctx.tenant(),
        owner,
        references = processed,
        "owner removed from its references"
    );
    Ok(processed)
}
