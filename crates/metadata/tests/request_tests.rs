//! Request store and job claim tests.

mod common;

use common::{TestMetadata, checksum, storage_request, tenant};
use strata_core::{JobState, RequestKind, RequestStatus};
use strata_metadata::models::{JobClaim, NewFileRequest};
use time::{Duration, OffsetDateTime, UtcOffset};

fn claim(kind: RequestKind, storage: &str, limit: u32) -> JobClaim {
    JobClaim {
        kind,
        storage: storage.to_string(),
        owners: Vec::new(),
        limit,
        now: OffsetDateTime::now_utc(),
    }
}

#[tokio::test]
async fn test_merge_unions_owners_and_groups() {
    let metadata = TestMetadata::new().await.unwrap();
    let store = metadata.store();
    let ctx = tenant("t1");

    let first = store
        .merge_request(&ctx, &storage_request("c1", "disk", "alice", "g1"))
        .await
        .unwrap();
    assert!(first.created());

    let second = store
        .merge_request(&ctx, &storage_request("c1", "disk", "bob", "g2"))
        .await
        .unwrap();
    assert!(!second.created());
    assert_eq!(first.request.request_id, second.request.request_id);

    let id = first.request.request_id;
    assert_eq!(
        store.get_request_owners(&ctx, id).await.unwrap(),
        vec!["alice".to_string(), "bob".to_string()]
    );
    assert_eq!(
        store.get_request_groups(&ctx, id).await.unwrap(),
        vec!["g1".to_string(), "g2".to_string()]
    );
    assert_eq!(
        store.count_requests(&ctx, RequestKind::Storage, None).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_merge_resets_unscheduled_error_to_todo() {
    let metadata = TestMetadata::new().await.unwrap();
    let store = metadata.store();
    let ctx = tenant("t1");

    let merged = store
        .merge_request(&ctx, &storage_request("c1", "disk", "alice", "g1"))
        .await
        .unwrap();
    let failed = store
        .fail_request(&ctx, merged.request.request_id, "disk full")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.status().unwrap(), RequestStatus::Error);
    assert_eq!(failed.error_cause.as_deref(), Some("disk full"));

    let resubmitted = store
        .merge_request(&ctx, &storage_request("c1", "disk", "alice", "g1"))
        .await
        .unwrap();
    assert_eq!(resubmitted.request.status().unwrap(), RequestStatus::Todo);
    // history of causes is kept
    assert_eq!(resubmitted.request.error_cause.as_deref(), Some("disk full"));
}

#[tokio::test]
async fn test_cache_merge_keeps_later_expiration() {
    let metadata = TestMetadata::new().await.unwrap();
    let store = metadata.store();
    let ctx = tenant("t1");
    let later = OffsetDateTime::now_utc() + Duration::days(2);
    let sooner = OffsetDateTime::now_utc() + Duration::days(1);

    let mut request = NewFileRequest::new(RequestKind::Cache, checksum("c1"), "tape", "g1");
    request.expiration_date = Some(later);
    store.merge_request(&ctx, &request).await.unwrap();

    request.expiration_date = Some(sooner);
    request.group_id = "g2".to_string();
    let merged = store.merge_request(&ctx, &request).await.unwrap();

    let stored = merged.request.expiration_date.unwrap();
    assert_eq!(stored.unix_timestamp(), later.unix_timestamp());
}

#[tokio::test]
async fn test_claim_excludes_requests_from_other_jobs() {
    let metadata = TestMetadata::new().await.unwrap();
    let store = metadata.store();
    let ctx = tenant("t1");

    for i in 0..5 {
        store
            .merge_request(&ctx, &storage_request(&format!("c{i}"), "disk", "alice", "g1"))
            .await
            .unwrap();
    }

    let first = store
        .claim_job(&ctx, &claim(RequestKind::Storage, "disk", 3))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.requests.len(), 3);
    assert_eq!(first.job.request_count, 3);
    assert_eq!(first.job.state().unwrap(), JobState::Queued);

    let second = store
        .claim_job(&ctx, &claim(RequestKind::Storage, "disk", 3))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.requests.len(), 2);

    let first_ids: Vec<_> = first.requests.iter().map(|r| r.request_id).collect();
    assert!(second.requests.iter().all(|r| !first_ids.contains(&r.request_id)));

    assert!(store
        .claim_job(&ctx, &claim(RequestKind::Storage, "disk", 3))
        .await
        .unwrap()
        .is_none());
    // an empty claim leaves no job behind
    assert_eq!(store.get_recent_jobs(&ctx, 10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_claim_filters_by_owner() {
    let metadata = TestMetadata::new().await.unwrap();
    let store = metadata.store();
    let ctx = tenant("t1");

    store
        .merge_request(&ctx, &storage_request("c1", "disk", "alice", "g1"))
        .await
        .unwrap();
    store
        .merge_request(&ctx, &storage_request("c2", "disk", "bob", "g1"))
        .await
        .unwrap();

    let mut by_owner = claim(RequestKind::Storage, "disk", 10);
    by_owner.owners = vec!["bob".to_string()];
    let claimed = store.claim_job(&ctx, &by_owner).await.unwrap().unwrap();
    assert_eq!(claimed.requests.len(), 1);
    assert_eq!(claimed.requests[0].checksum, "c2");
}

#[tokio::test]
async fn test_storage_claim_waits_for_running_deletion() {
    let metadata = TestMetadata::new().await.unwrap();
    let store = metadata.store();
    let ctx = tenant("t1");

    let mut deletion = NewFileRequest::new(RequestKind::Deletion, checksum("c1"), "disk", "g0");
    deletion.owners = vec!["alice".to_string()];
    store.merge_request(&ctx, &deletion).await.unwrap();
    let deletion_job = store
        .claim_job(&ctx, &claim(RequestKind::Deletion, "disk", 10))
        .await
        .unwrap()
        .unwrap();

    store
        .merge_request(&ctx, &storage_request("c1", "disk", "bob", "g1"))
        .await
        .unwrap();
    assert!(store
        .claim_job(&ctx, &claim(RequestKind::Storage, "disk", 10))
        .await
        .unwrap()
        .is_none());

    store
        .delete_request(&ctx, deletion_job.requests[0].request_id)
        .await
        .unwrap();
    assert!(store
        .claim_job(&ctx, &claim(RequestKind::Storage, "disk", 10))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_expired_cache_requests_are_invisible() {
    let metadata = TestMetadata::new().await.unwrap();
    let store = metadata.store();
    let ctx = tenant("t1");
    let now = OffsetDateTime::now_utc();

    let mut expired = NewFileRequest::new(RequestKind::Cache, checksum("c1"), "tape", "g1");
    expired.expiration_date = Some(now - Duration::hours(1));
    let expired = store.merge_request(&ctx, &expired).await.unwrap();

    assert!(store
        .list_pending_storages(&ctx, RequestKind::Cache, now)
        .await
        .unwrap()
        .is_empty());
    assert!(store
        .claim_job(&ctx, &claim(RequestKind::Cache, "tape", 10))
        .await
        .unwrap()
        .is_none());

    store
        .fail_request(&ctx, expired.request.request_id, "restore failed")
        .await
        .unwrap();
    assert_eq!(
        store.retry_requests(&ctx, "g1", RequestKind::Cache, now).await.unwrap(),
        0
    );

    assert_eq!(
        store.purge_expired_cache_requests(&ctx, now, 100).await.unwrap(),
        1
    );
    assert_eq!(store.count_requests(&ctx, RequestKind::Cache, None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_cache_expiration_with_foreign_offset() {
    let metadata = TestMetadata::new().await.unwrap();
    let store = metadata.store();
    let ctx = tenant("t1");
    let now = OffsetDateTime::now_utc();

    let mut expired = NewFileRequest::new(RequestKind::Cache, checksum("east"), "tape", "g1");
    expired.expiration_date = Some((now - Duration::hours(1)).to_offset(UtcOffset::from_hms(5, 0, 0).unwrap()));
    store.merge_request(&ctx, &expired).await.unwrap();

    assert!(store
        .list_pending_storages(&ctx, RequestKind::Cache, now)
        .await
        .unwrap()
        .is_empty());
    assert!(store
        .claim_job(&ctx, &claim(RequestKind::Cache, "tape", 10))
        .await
        .unwrap()
        .is_none());

    let mut live = NewFileRequest::new(RequestKind::Cache, checksum("west"), "tape", "g1");
    live.expiration_date = Some((now + Duration::hours(2)).to_offset(UtcOffset::from_hms(-5, 0, 0).unwrap()));
    store.merge_request(&ctx, &live).await.unwrap();

    let claimed = store
        .claim_job(&ctx, &claim(RequestKind::Cache, "tape", 10))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.requests.len(), 1);
    assert_eq!(claimed.requests[0].checksum, "west");
    assert_eq!(claimed.requests[0].expiration_date.unwrap().offset(), UtcOffset::UTC);

    assert_eq!(
        store.purge_expired_cache_requests(&ctx, now, 100).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_concurrent_merges_produce_one_request() {
    let metadata = TestMetadata::new().await.unwrap();
    let store = metadata.store();
    let ctx = tenant("t1");

    let mut tasks = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        let ctx = ctx.clone();
        tasks.push(tokio::spawn(async move {
            store
                .merge_request(&ctx, &storage_request("shared", "disk", &format!("owner{i}"), &format!("g{i}")))
                .await
        }));
    }
    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().unwrap().request.request_id);
    }

    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(store.count_requests(&ctx, RequestKind::Storage, None).await.unwrap(), 1);
    let expected: Vec<String> = (0..8).map(|i| format!("owner{i}")).collect();
    assert_eq!(store.get_request_owners(&ctx, ids[0]).await.unwrap(), expected);
    assert_eq!(store.get_request_groups(&ctx, ids[0]).await.unwrap().len(), 8);
}

#[tokio::test]
async fn test_retry_requests_resets_group_without_duplicates() {
    let metadata = TestMetadata::new().await.unwrap();
    let store = metadata.store();
    let ctx = tenant("t1");

    for i in 0..3 {
        let merged = store
            .merge_request(&ctx, &storage_request(&format!("c{i}"), "disk", "alice", "g1"))
            .await
            .unwrap();
        store
            .fail_request(&ctx, merged.request.request_id, "boom")
            .await
            .unwrap();
    }
    store
        .merge_request(&ctx, &storage_request("other", "disk", "alice", "g2"))
        .await
        .unwrap();

    let before = store.count_requests(&ctx, RequestKind::Storage, None).await.unwrap();
    let reset = store
        .retry_requests(&ctx, "g1", RequestKind::Storage, OffsetDateTime::now_utc())
        .await
        .unwrap();
    let after = store.count_requests(&ctx, RequestKind::Storage, None).await.unwrap();

    assert_eq!(reset, 3);
    assert_eq!(before, after);
    assert_eq!(
        store
            .count_requests(&ctx, RequestKind::Storage, Some(RequestStatus::Error))
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_fail_job_requests_releases_and_errors_rows() {
    let metadata = TestMetadata::new().await.unwrap();
    let store = metadata.store();
    let ctx = tenant("t1");

    store
        .merge_request(&ctx, &storage_request("c1", "disk", "alice", "g1"))
        .await
        .unwrap();
    let claimed = store
        .claim_job(&ctx, &claim(RequestKind::Storage, "disk", 10))
        .await
        .unwrap()
        .unwrap();
    store
        .update_job_state(&ctx, claimed.job.job_id, JobState::Running, 0)
        .await
        .unwrap();
    assert_eq!(store.get_orphaned_jobs().await.unwrap().len(), 1);

    let failed = store
        .fail_job_requests(&ctx, claimed.job.job_id, "executor died")
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].job_id.is_none());
    assert_eq!(failed[0].status().unwrap(), RequestStatus::Error);

    store
        .update_job_state(&ctx, claimed.job.job_id, JobState::Failed, 1)
        .await
        .unwrap();
    let job = store.get_job(&ctx, claimed.job.job_id).await.unwrap().unwrap();
    assert_eq!(job.state().unwrap(), JobState::Failed);
    assert!(job.started_at.is_some());
    assert!(job.finished_at.is_some());
    assert!(store.get_orphaned_jobs().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_pending_tenants_and_storages() {
    let metadata = TestMetadata::new().await.unwrap();
    let store = metadata.store();
    let a = tenant("tenant-a");
    let b = tenant("tenant-b");

    store
        .merge_request(&a, &storage_request("c1", "disk", "alice", "g1"))
        .await
        .unwrap();
    store
        .merge_request(&b, &storage_request("c1", "tape", "bob", "g1"))
        .await
        .unwrap();

    assert_eq!(
        store.list_tenants_with_pending_requests().await.unwrap(),
        vec!["tenant-a".to_string(), "tenant-b".to_string()]
    );
    assert_eq!(
        store
            .list_pending_storages(&a, RequestKind::Storage, OffsetDateTime::now_utc())
            .await
            .unwrap(),
        vec!["disk".to_string()]
    );
    // tenant-b's request is not visible to tenant-a's claims
    assert!(store
        .claim_job(&a, &claim(RequestKind::Storage, "tape", 10))
        .await
        .unwrap()
        .is_none());
}
