//! Reference-safe delete tests.

mod common;

use common::{TestDepot, seeded_bytes};
use depot_service::ErrorKind;
use uuid::Uuid;

#[tokio::test]
async fn test_shared_blob_survives_until_last_record() {
    let depot = TestDepot::new().await;
    let data = seeded_bytes(11, 2048);

    let keep = depot.upload("keep", &data).await.unwrap();
    let dropped = depot.upload("drop", &data).await.unwrap();

    let name = depot.storage().delete(dropped.id).await.unwrap();
    assert_eq!(name, "drop");
    assert_eq!(depot.stored_blobs().await, 1);
    assert_eq!(depot.download_all(keep.id).await, data);

    depot.storage().delete(keep.id).await.unwrap();
    assert_eq!(depot.stored_blobs().await, 0);
    assert!(
        !depot
            .storage()
            .blobs()
            .exists(&keep.content_ref)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_delete_leaves_other_blobs_alone() {
    let depot = TestDepot::new().await;
    let a = depot.upload("a", &seeded_bytes(1, 10)).await.unwrap();
    let b = depot.upload("b", &seeded_bytes(2, 10)).await.unwrap();

    depot.storage().delete(a.id).await.unwrap();
    assert_eq!(depot.stored_blobs().await, 1);
    assert!(depot.storage().blobs().exists(&b.content_ref).await.unwrap());
}

#[tokio::test]
async fn test_reupload_after_delete_stores_again() {
    let depot = TestDepot::new().await;
    let data = seeded_bytes(5, 512);

    let first = depot.upload("v1", &data).await.unwrap();
    depot.storage().delete(first.id).await.unwrap();
    assert_eq!(depot.stored_blobs().await, 0);

    let second = depot.upload("v2", &data).await.unwrap();
    assert_eq!(depot.stored_blobs().await, 1);
    assert_eq!(depot.download_all(second.id).await, data);
}

#[tokio::test]
async fn test_delete_missing_is_not_found() {
    let depot = TestDepot::new().await;
    let err = depot.storage().delete(Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let record = depot.upload("once", b"once").await.unwrap();
    depot.storage().delete(record.id).await.unwrap();
    let err = depot.storage().delete(record.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_untracked_blob_is_released_by_content_ref() {
    let depot = TestDepot::new().await;
    let data = seeded_bytes(21, 256);
    let first = depot.upload("first", &data).await.unwrap();
    let second = depot.upload("second", &data).await.unwrap();
    assert_eq!(first.content_ref, second.content_ref);

    // Lose the counter row; delete must fall back to counting records
    depot
        .storage()
        .metadata()
        .delete_blob_ref(&first.content_ref)
        .await
        .unwrap();

    depot.storage().delete(first.id).await.unwrap();
    assert_eq!(depot.stored_blobs().await, 1);
    assert_eq!(depot.download_all(second.id).await, data);

    depot.storage().delete(second.id).await.unwrap();
    assert_eq!(depot.stored_blobs().await, 0);
}
