//! File reference store tests.

mod common;

use common::{TestMetadata, checksum, new_reference, tenant};

#[tokio::test]
async fn test_upsert_reference_twice_keeps_single_row_and_owner_set() {
    let metadata = TestMetadata::new().await.unwrap();
    let store = metadata.store();
    let ctx = tenant("t1");

    let first = store
        .upsert_reference(&ctx, &new_reference("c1", "disk"), "alice")
        .await
        .unwrap();
    let second = store
        .upsert_reference(&ctx, &new_reference("c1", "disk"), "alice")
        .await
        .unwrap();

    assert_eq!(first.reference_id, second.reference_id);
    assert_eq!(store.list_references(&ctx, &checksum("c1")).await.unwrap().len(), 1);
    assert_eq!(
        store.get_reference_owners(&ctx, first.reference_id).await.unwrap(),
        vec!["alice".to_string()]
    );
}

#[tokio::test]
async fn test_remove_owner_reports_remaining() {
    let metadata = TestMetadata::new().await.unwrap();
    let store = metadata.store();
    let ctx = tenant("t1");

    let reference = store
        .upsert_reference(&ctx, &new_reference("c1", "disk"), "alice")
        .await
        .unwrap();
    assert!(store.add_reference_owner(&ctx, reference.reference_id, "bob").await.unwrap());
    assert!(!store.add_reference_owner(&ctx, reference.reference_id, "bob").await.unwrap());

    let removal = store
        .remove_reference_owner(&ctx, reference.reference_id, "alice")
        .await
        .unwrap();
    assert!(removal.removed);
    assert_eq!(removal.remaining, 1);

    let removal = store
        .remove_reference_owner(&ctx, reference.reference_id, "carol")
        .await
        .unwrap();
    assert!(!removal.removed);
    assert_eq!(removal.remaining, 1);

    assert!(!store.delete_reference_if_unowned(&ctx, reference.reference_id).await.unwrap());
    store.remove_reference_owner(&ctx, reference.reference_id, "bob").await.unwrap();
    assert!(store.delete_reference_if_unowned(&ctx, reference.reference_id).await.unwrap());
    assert!(store.get_reference(&ctx, &checksum("c1"), "disk").await.unwrap().is_none());
}

#[tokio::test]
async fn test_references_are_tenant_scoped() {
    let metadata = TestMetadata::new().await.unwrap();
    let store = metadata.store();
    let a = tenant("tenant-a");
    let b = tenant("tenant-b");

    let reference = store
        .upsert_reference(&a, &new_reference("c1", "disk"), "alice")
        .await
        .unwrap();

    assert!(store.get_reference(&b, &checksum("c1"), "disk").await.unwrap().is_none());
    assert!(store.get_reference_owners(&b, reference.reference_id).await.unwrap().is_empty());
    assert!(!store.add_reference_owner(&b, reference.reference_id, "mallory").await.unwrap());
    assert!(!store.delete_reference(&b, reference.reference_id).await.unwrap());
    assert!(store.get_reference(&a, &checksum("c1"), "disk").await.unwrap().is_some());
}

#[tokio::test]
async fn test_list_references_by_owner_pages_with_cursor() {
    let metadata = TestMetadata::new().await.unwrap();
    let store = metadata.store();
    let ctx = tenant("t1");

    for i in 0..5 {
        store
            .upsert_reference(&ctx, &new_reference(&format!("c{i}"), "disk"), "alice")
            .await
            .unwrap();
    }
    store
        .upsert_reference(&ctx, &new_reference("other", "disk"), "bob")
        .await
        .unwrap();

    let mut seen = Vec::new();
    let mut after = None;
    loop {
        let page = store
            .list_references_by_owner(&ctx, "alice", after, 2)
            .await
            .unwrap();
        if page.is_empty() {
            break;
        }
        after = page.last().map(|r| r.reference_id);
        seen.extend(page.into_iter().map(|r| r.checksum));
    }
    seen.sort();
    assert_eq!(seen, vec!["c0", "c1", "c2", "c3", "c4"]);
}
