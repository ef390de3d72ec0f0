//! Integration tests for job crash detection.
//!
//! A job task that dies mid-flight must not leave its requests owned by a job
//! that never finishes.

mod common;

use common::TestEngine;
use common::engine::DISK;
use common::fixtures::*;
use std::time::Duration;
use strata_core::{
    FileReferenceEventType, JOB_CRASH_CAUSE, JobState, RequestKind, RequestStatus, RetryRequests,
    StoreFiles,
};
use strata_engine::handlers::{handle_retry, handle_store};
use strata_engine::scheduler::schedule_storage_jobs;

#[tokio::test]
async fn test_panicking_job_fails_its_requests() {
    let engine = TestEngine::new().await;
    let ctx = tenant("t1");
    let (c, url) = engine.origin_file(b"panic").await;
    handle_store(
        &engine.state,
        &ctx,
        StoreFiles::single("g1", store_file(&c, &url, DISK, "u1")),
    )
    .await
    .unwrap();
    engine.disk.set_panic_on_store(true);

    let jobs = engine.run_jobs(&ctx, RequestKind::Storage).await;
    assert_eq!(jobs.len(), 1);

    let request = engine
        .metadata()
        .find_request(&ctx, RequestKind::Storage, &c, DISK)
        .await
        .unwrap()
        .expect("request survives the crash");
    assert_eq!(request.status, "error");
    assert!(request.job_id.is_none());
    assert!(request.error_cause.unwrap().contains(JOB_CRASH_CAUSE));

    let job = engine
        .metadata()
        .get_job(&ctx, jobs[0].job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.state, JobState::Failed.as_str());

    let errors = engine.events.matching(&c, FileReferenceEventType::StoreError);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].owners, vec!["u1"]);
    assert_eq!(errors[0].group_ids, vec!["g1"]);
    assert_eq!(engine.state.job_registry.tracked().await, 0);
}

#[tokio::test]
async fn test_watchdog_sweep_reaps_crashed_job() {
    let engine = TestEngine::new().await;
    let ctx = tenant("t1");
    let (c, url) = engine.origin_file(b"swept").await;
    handle_store(
        &engine.state,
        &ctx,
        StoreFiles::single("g1", store_file(&c, &url, DISK, "u1")),
    )
    .await
    .unwrap();
    engine.disk.set_panic_on_store(true);

    schedule_storage_jobs(&engine.state, &ctx, &[], &[])
        .await
        .unwrap();
    assert_eq!(engine.state.job_registry.tracked().await, 1);

    // Sweep until the dead task has been noticed
    for _ in 0..100 {
        engine.state.job_registry.check_tasks().await;
        if engine.state.job_registry.tracked().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(engine.state.job_registry.tracked().await, 0);

    assert_eq!(
        engine
            .count(&ctx, RequestKind::Storage, Some(RequestStatus::Error))
            .await,
        1
    );
    assert_eq!(engine.events.matching(&c, FileReferenceEventType::StoreError).len(), 1);
}

#[tokio::test]
async fn test_crashed_requests_can_be_retried() {
    let engine = TestEngine::new().await;
    let ctx = tenant("t1");
    let (c, url) = engine.origin_file(b"phoenix").await;
    handle_store(
        &engine.state,
        &ctx,
        StoreFiles::single("g1", store_file(&c, &url, DISK, "u1")),
    )
    .await
    .unwrap();
    engine.disk.set_panic_on_store(true);
    engine.run_jobs(&ctx, RequestKind::Storage).await;
    engine.disk.set_panic_on_store(false);

    let reset = handle_retry(
        &engine.state,
        &ctx,
        RetryRequests {
            group_id: "g1".to_string(),
            kind: RequestKind::Storage,
        },
    )
    .await
    .unwrap();
    assert_eq!(reset, 1);

    engine.run_jobs(&ctx, RequestKind::Storage).await;

    assert_eq!(engine.owners(&ctx, &c, DISK).await, Some(vec!["u1".to_string()]));
    assert_eq!(engine.events.matching(&c, FileReferenceEventType::Stored).len(), 1);
    assert_eq!(engine.count(&ctx, RequestKind::Storage, None).await, 0);
}

#[tokio::test]
async fn test_crash_leaves_other_jobs_alone() {
    let engine = TestEngine::with_config(|config| config.scheduler.page_size = 1).await;
    let ctx = tenant("t1");
    let (first, first_url) = engine.origin_file(b"first").await;
    let (second, second_url) = engine.origin_file(b"second").await;
    handle_store(
        &engine.state,
        &ctx,
        store_files(
            "g1",
            vec![
                store_file(&first, &first_url, DISK, "u1"),
                store_file(&second, &second_url, "tape", "u1"),
            ],
        ),
    )
    .await
    .unwrap();
    engine.disk.set_panic_on_store(true);

    engine.run_jobs(&ctx, RequestKind::Storage).await;

    assert_eq!(engine.events.matching(&first, FileReferenceEventType::StoreError).len(), 1);
    assert_eq!(engine.events.matching(&second, FileReferenceEventType::Stored).len(), 1);
    assert!(engine.owners(&ctx, &second, "tape").await.is_some());
}
