//! Integration tests for copying referenced files between locations.

mod common;

use common::TestEngine;
use common::engine::{DISK, TAPE, VAULT};
use common::fixtures::*;
use std::sync::atomic::Ordering;
use strata_core::{
    Checksum, FileReferenceEventType, RequestKind, RequestStatus, RetryRequests, StoreFiles,
    TenantContext,
};
use strata_engine::handlers::{handle_copy, handle_delete, handle_retry, handle_store};

async fn stored_on(
    engine: &TestEngine,
    ctx: &TenantContext,
    content: &[u8],
    dest: &str,
    owner: &str,
) -> Checksum {
    let (checksum, url) = engine.origin_file(content).await;
    handle_store(
        &engine.state,
        ctx,
        StoreFiles::single("seed", store_file(&checksum, &url, dest, owner)),
    )
    .await
    .unwrap();
    engine.run_jobs(ctx, RequestKind::Storage).await;
    engine.events.clear();
    checksum
}

#[tokio::test]
async fn test_copy_from_online_replica() {
    let engine = TestEngine::new().await;
    let ctx = tenant("t1");
    let c = stored_on(&engine, &ctx, b"hot copy", DISK, "u1").await;

    handle_copy(&engine.state, &ctx, copy(&[&c], TAPE, "copy-1"))
        .await
        .unwrap();
    let request = engine
        .metadata()
        .find_request(&ctx, RequestKind::Copy, &c, TAPE)
        .await
        .unwrap()
        .expect("copy request");
    assert_eq!(
        engine.metadata().get_request_owners(&ctx, request.request_id).await.unwrap(),
        vec!["u1"]
    );

    let jobs = engine.run_jobs(&ctx, RequestKind::Copy).await;

    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].storage, TAPE);
    assert_eq!(engine.owners(&ctx, &c, TAPE).await, Some(vec!["u1".to_string()]));
    let copied = engine.events.matching(&c, FileReferenceEventType::Copied);
    assert_eq!(copied.len(), 1);
    assert_eq!(copied[0].storage.as_deref(), Some(TAPE));
    assert_eq!(copied[0].group_ids, vec!["copy-1"]);
    assert_eq!(engine.tape.restores.load(Ordering::SeqCst), 0);
    assert_eq!(engine.count(&ctx, RequestKind::Copy, None).await, 0);
}

#[tokio::test]
async fn test_copy_restores_nearline_source_through_cache() {
    let engine = TestEngine::new().await;
    let ctx = tenant("t1");
    let c = stored_on(&engine, &ctx, b"cold copy", TAPE, "u1").await;

    handle_copy(&engine.state, &ctx, copy(&[&c], DISK, "copy-1"))
        .await
        .unwrap();
    engine.run_jobs(&ctx, RequestKind::Copy).await;

    assert_eq!(engine.tape.restores.load(Ordering::SeqCst), 1);
    assert!(engine.state.cache.is_available(&ctx, &c).await.unwrap());
    assert_eq!(engine.owners(&ctx, &c, DISK).await, Some(vec!["u1".to_string()]));
    assert_eq!(engine.events.matching(&c, FileReferenceEventType::Copied).len(), 1);
}

#[tokio::test]
async fn test_copy_rejections_create_no_request() {
    let engine = TestEngine::new().await;
    let ctx = tenant("t1");
    let unknown = checksum("nowhere");
    let c = stored_on(&engine, &ctx, b"kept", DISK, "u1").await;

    handle_copy(&engine.state, &ctx, copy(&[&unknown], TAPE, "copy-1"))
        .await
        .unwrap();
    handle_copy(&engine.state, &ctx, copy(&[&c], VAULT, "copy-1"))
        .await
        .unwrap();
    handle_copy(&engine.state, &ctx, copy(&[&c], "missing", "copy-1"))
        .await
        .unwrap();

    assert_eq!(
        engine.events.matching(&unknown, FileReferenceEventType::CopyError).len(),
        1
    );
    assert_eq!(engine.events.matching(&c, FileReferenceEventType::CopyError).len(), 2);
    assert_eq!(engine.count(&ctx, RequestKind::Copy, None).await, 0);
}

#[tokio::test]
async fn test_copy_to_location_already_holding_file() {
    let engine = TestEngine::new().await;
    let ctx = tenant("t1");
    let c = stored_on(&engine, &ctx, b"already there", DISK, "u1").await;

    handle_copy(&engine.state, &ctx, copy(&[&c], DISK, "copy-1"))
        .await
        .unwrap();

    let copied = engine.events.matching(&c, FileReferenceEventType::Copied);
    assert_eq!(copied.len(), 1);
    assert_eq!(copied[0].owners, vec!["u1"]);
    assert_eq!(engine.count(&ctx, RequestKind::Copy, None).await, 0);
}

#[tokio::test]
async fn test_copy_ignores_replica_pending_deletion() {
    let engine = TestEngine::new().await;
    let ctx = tenant("t1");
    let c = stored_on(&engine, &ctx, b"going away", DISK, "u1").await;
    handle_delete(&engine.state, &ctx, delete(&c, DISK, "u1", false))
        .await
        .unwrap();
    engine.events.clear();

    handle_copy(&engine.state, &ctx, copy(&[&c], TAPE, "copy-1"))
        .await
        .unwrap();

    assert_eq!(engine.events.matching(&c, FileReferenceEventType::CopyError).len(), 1);
    assert_eq!(engine.count(&ctx, RequestKind::Copy, None).await, 0);
}

#[tokio::test]
async fn test_failed_copy_is_kept_for_retry() {
    let engine = TestEngine::new().await;
    let ctx = tenant("t1");
    let c = stored_on(&engine, &ctx, b"retry me", DISK, "u1").await;
    engine.tape.set_fail_store(true);

    handle_copy(&engine.state, &ctx, copy(&[&c], TAPE, "copy-1"))
        .await
        .unwrap();
    engine.run_jobs(&ctx, RequestKind::Copy).await;

    let errors = engine.events.matching(&c, FileReferenceEventType::CopyError);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].owners, vec!["u1"]);
    assert_eq!(
        engine
            .count(&ctx, RequestKind::Copy, Some(RequestStatus::Error))
            .await,
        1
    );
    assert!(engine.owners(&ctx, &c, TAPE).await.is_none());

    engine.tape.set_fail_store(false);
    let reset = handle_retry(
        &engine.state,
        &ctx,
        RetryRequests {
            group_id: "copy-1".to_string(),
            kind: RequestKind::Copy,
        },
    )
    .await
    .unwrap();
    assert_eq!(reset, 1);
    engine.run_jobs(&ctx, RequestKind::Copy).await;

    assert_eq!(engine.events.matching(&c, FileReferenceEventType::Copied).len(), 1);
    assert_eq!(engine.owners(&ctx, &c, TAPE).await, Some(vec!["u1".to_string()]));
    assert_eq!(engine.count(&ctx, RequestKind::Copy, None).await, 0);
}
