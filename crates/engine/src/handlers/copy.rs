//! Copy handler.

use super::common::{event, merge_request};
use crate::error::EngineResult;
use crate::state::AppState;
use std::collections::BTreeSet;
use strata_core::{
    CopyFile, CopyFiles, FileReferenceEvent, FileReferenceEventType, RequestKind, TenantContext,
};
use strata_metadata::models::NewFileRequest;

/// Handle a `CopyFiles` message, file by file.
///
/// The copy request carries the owners of every live reference of the file.
/// Its job reads an ONLINE replica or the restoration cache, restoring a
/// NEARLINE replica first when nothing else is readable, and publishes COPIED
/// once the destination holds the file.
pub async fn handle_copy(state: &AppState, ctx: &TenantContext, msg: CopyFiles) -> EngineResult<()> {
    tracing::debug!(
        tenant = %ctx.tenant(),
        group_id = %msg.group_id,
        files = msg.files.len(),
        "copy submission received"
    );
    for file in &msg.files {
        copy_one(state, ctx, file, &msg.group_id).await?;
    }
    Ok(())
}

fn copy_error(ctx: &TenantContext, file: &CopyFile, group_id: &str, message: String) -> FileReferenceEvent {
    event(ctx, &file.checksum, FileReferenceEventType::CopyError, message)
        .with_storage(&file.dest_storage)
        .with_groups([group_id])
}

async fn copy_one(
    state: &AppState,
    ctx: &TenantContext,
    file: &CopyFile,
    group_id: &str,
) -> EngineResult<()> {
    let dest = file.dest_storage.as_str();
    if state.locations.get(dest).is_none() {
        let message = if state.locations.contains(dest) {
            format!("storage {dest} does not accept files")
        } else {
            format!("storage {dest} is unknown or disabled")
        };
        state.publish(copy_error(ctx, file, group_id, message)).await;
        return Ok(());
    }

    let mut owners = BTreeSet::new();
    let mut source = None;
    for reference in state.metadata.list_references(ctx, &file.checksum).await? {
        let reference_owners = state
            .metadata
            .get_reference_owners(ctx, reference.reference_id)
            .await?;
        // pending deletion
        if reference_owners.is_empty() {
            continue;
        }
        if reference.storage == dest {
            state
                .publish(
                    event(
                        ctx,
                        &file.checksum,
                        FileReferenceEventType::Copied,
                        format!("file already stored on storage {dest}"),
                    )
                    .with_storage(dest)
                    .with_owners(reference_owners)
                    .with_groups([group_id]),
                )
                .await;
            return Ok(());
        }
        owners.extend(reference_owners);
        if source.is_none() {
            source = Some(reference);
        }
    }

    let Some(source) = source else {
        tracing::warn!(
            tenant = %ctx.tenant(),
            checksum = %file.checksum,
            storage = dest,
            "copy refused, file is not referenced anywhere"
        );
        let message = "file is not referenced on any storage location".to_string();
        state.publish(copy_error(ctx, file, group_id, message)).await;
        return Ok(());
    };

    let mut request = NewFileRequest::new(RequestKind::Copy, file.checksum.clone(), dest, group_id);
    request.meta = Some(source.meta()?);
    request.owners = owners.into_iter().collect();
    merge_request(state, ctx, &request).await?;
    Ok(())
}
