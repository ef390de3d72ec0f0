//! Add-reference and store handlers.

use super::common::{PendingDeletion, cancel_pending_deletion, event, merge_request};
use crate::error::EngineResult;
use crate::state::AppState;
use strata_core::{
    AddFileReference, FileMeta, FileReferenceEventType, RequestKind, StoreFiles, TenantContext,
};
use strata_metadata::models::{NewFileReference, NewFileRequest};

/// One file to bring onto a destination location.
struct Submission<'a> {
    meta: FileMeta,
    owner: &'a str,
    origin_url: &'a str,
    dest_storage: &'a str,
    group_id: &'a str,
}

/// Handle an `AddFileReference` message.
///
/// A file already at its destination is referenced immediately. Otherwise a
/// storage request is created or merged and STORED is published by the job.
pub async fn handle_add(
    state: &AppState,
    ctx: &TenantContext,
    msg: AddFileReference,
) -> EngineResult<()> {
    if let Err(e) = msg.validate() {
        state
            .publish(
                event(ctx, &msg.checksum, FileReferenceEventType::StoreError, e.to_string())
                    .with_storage(&msg.dest_storage)
                    .with_owners([msg.owner.as_str()])
                    .with_groups([msg.group_id.as_str()]),
            )
            .await;
        return Ok(());
    }

    if msg.is_in_place() {
        let reference = NewFileReference {
            storage: msg.dest_storage.clone(),
            url: Some(msg.in_place_url().to_string()),
            meta: msg.meta(),
        };
        return reference_in_place(state, ctx, &reference, &msg.owner, &msg.group_id).await;
    }

    submit(
        state,
        ctx,
        Submission {
            meta: msg.meta(),
            owner: &msg.owner,
            origin_url: &msg.origin_url,
            dest_storage: &msg.dest_storage,
            group_id: &msg.group_id,
        },
    )
    .await
}

/// Handle a single or batched `StoreFiles` message. Every file is handled on
/// its own; an invalid file does not affect its siblings.
pub async fn handle_store(state: &AppState, ctx: &TenantContext, msg: StoreFiles) -> EngineResult<()> {
    tracing::debug!(
        tenant = %ctx.tenant(),
        group_id = %msg.group_id,
        files = msg.files.len(),
        "store submission received"
    );
    for file in &msg.files {
        if let Err(e) = file.validate() {
            state
                .publish(
                    event(ctx, &file.checksum, FileReferenceEventType::StoreError, e.to_string())
                        .with_storage(&file.dest_storage)
                        .with_owners([file.owner.as_str()])
                        .with_groups([msg.group_id.as_str()]),
                )
                .await;
            continue;
        }
        submit(
            state,
            ctx,
            Submission {
                meta: file.meta(),
                owner: &file.owner,
                origin_url: &file.origin_url,
                dest_storage: &file.dest_storage,
                group_id: &msg.group_id,
            },
        )
        .await?;
    }
    Ok(())
}

/// Reference a file the sender says is already stored at the destination.
async fn reference_in_place(
    state: &AppState,
    ctx: &TenantContext,
    reference: &NewFileReference,
    owner: &str,
    group_id: &str,
) -> EngineResult<()> {
    let checksum = &reference.meta.checksum;

    if cancel_pending_deletion(state, ctx, checksum, &reference.storage).await?
        == PendingDeletion::InFlight
    {
        state
            .publish(
                event(
                    ctx,
                    checksum,
                    FileReferenceEventType::StoreError,
                    format!(
                        "file is being deleted from storage {}, submit again once the deletion is done",
                        reference.storage
                    ),
                )
                .with_storage(&reference.storage)
                .with_owners([owner])
                .with_groups([group_id]),
            )
            .await;
        return Ok(());
    }

    let row = state.metadata.upsert_reference(ctx, reference, owner).await?;
    let owners = state.metadata.get_reference_owners(ctx, row.reference_id).await?;
    tracing::debug!(
        tenant = %ctx.tenant(),
        checksum = %checksum,
        storage = %reference.storage,
        owner,
        "file referenced in place"
    );
    state
        .publish(
            event(
                ctx,
                checksum,
                FileReferenceEventType::Stored,
                format!("file referenced on storage {}", reference.storage),
            )
            .with_storage(&reference.storage)
            .with_owners(owners)
            .with_groups([group_id]),
        )
        .await;
    Ok(())
}

async fn submit(state: &AppState, ctx: &TenantContext, submission: Submission<'_>) -> EngineResult<()> {
    let checksum = submission.meta.checksum.clone();
    let dest = submission.dest_storage;

    if state.locations.get(dest).is_none() {
        let message = if state.locations.contains(dest) {
            format!("storage {dest} does not accept files")
        } else {
            format!("storage {dest} is unknown or disabled")
        };
        tracing::debug!(tenant = %ctx.tenant(), checksum = %checksum, storage = dest, "store rejected");
        state
            .publish(
                event(ctx, &checksum, FileReferenceEventType::StoreError, message)
                    .with_storage(dest)
                    .with_owners([submission.owner])
                    .with_groups([submission.group_id]),
            )
            .await;
        return Ok(());
    }

    if let Some(reference) = state.metadata.get_reference(ctx, &checksum, dest).await? {
        match cancel_pending_deletion(state, ctx, &checksum, dest).await? {
            PendingDeletion::InFlight => {
                // Stored again from the origin once the deletion job is done.
            }
            PendingDeletion::None | PendingDeletion::Cancelled => {
                state
                    .metadata
                    .add_reference_owner(ctx, reference.reference_id, submission.owner)
                    .await?;
                let owners = state
                    .metadata
                    .get_reference_owners(ctx, reference.reference_id)
                    .await?;
                state
                    .publish(
                        event(
                            ctx,
                            &checksum,
                            FileReferenceEventType::Stored,
                            format!("file already stored on storage {dest}"),
                        )
                        .with_storage(dest)
                        .with_owners(owners)
                        .with_groups([submission.group_id]),
                    )
                    .await;
                return Ok(());
            }
        }
    }

    let mut request = NewFileRequest::new(RequestKind::Storage, checksum, dest, submission.group_id);
    request.origin_url = Some(submission.origin_url.to_string());
    request.meta = Some(submission.meta);
    request.owners = vec![submission.owner.to_string()];
    merge_request(state, ctx, &request).await?;
    Ok(())
}
