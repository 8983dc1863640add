//! Upload and deduplication tests.

mod common;

use common::{TestDepot, seeded_bytes};
use depot_core::{ContentHash, NewFile};
use depot_service::ErrorKind;
use std::sync::Arc;

#[tokio::test]
async fn test_identical_content_is_stored_once() {
    let depot = TestDepot::new().await;
    let data = seeded_bytes(1, 4096);

    let first = depot.upload("first.bin", &data).await.unwrap();
    let second = depot.upload("second.bin", &data).await.unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(first.content_ref, second.content_ref);
    assert_eq!(first.content_hash, second.content_hash);
    assert_eq!(depot.stored_blobs().await, 1);

    let blob = depot
        .storage()
        .metadata()
        .get_blob_ref(&first.content_ref)
        .await
        .unwrap()
        .expect("tracked blob");
    assert_eq!(blob.refcount, 2);
}

#[tokio::test]
async fn test_different_content_gets_different_blobs() {
    let depot = TestDepot::new().await;
    let a = depot.upload("a", &seeded_bytes(1, 100)).await.unwrap();
    let b = depot.upload("b", &seeded_bytes(2, 100)).await.unwrap();

    assert_ne!(a.content_ref, b.content_ref);
    assert_eq!(depot.stored_blobs().await, 2);
}

#[tokio::test]
async fn test_round_trip_bytes() {
    let depot = TestDepot::new().await;
    let data = seeded_bytes(7, 300 * 1024 + 17);

    let record = depot.upload("large.bin", &data).await.unwrap();
    assert_eq!(record.size, data.len() as u64);
    assert_eq!(record.content_hash, ContentHash::compute(&data));
    assert_eq!(record.download_count, 0);

    assert_eq!(depot.download_all(record.id).await, data);
}

#[tokio::test]
async fn test_upload_records_metadata() {
    let depot = TestDepot::new().await;
    let file = NewFile::named("report.pdf")
        .with_description("quarterly numbers")
        .with_added_by("finance")
        .with_tags(["reports", "2024"])
        .with_content_type("application/pdf");

    let record = depot.storage().upload(&b"%PDF-1.7"[..], file).await.unwrap();
    assert_eq!(record.name, "report.pdf");
    assert_eq!(record.description.as_deref(), Some("quarterly numbers"));
    assert_eq!(record.added_by.as_deref(), Some("finance"));
    assert!(record.has_tag("reports"));
    assert_eq!(record.content_type, "application/pdf");
    assert_eq!(record.added_date, record.last_modified);

    let default_type = depot.upload("plain", b"x").await.unwrap();
    assert_eq!(default_type.content_type, "application/octet-stream");
}

#[tokio::test]
async fn test_blank_name_is_invalid_input() {
    let depot = TestDepot::new().await;
    let err = depot.upload("   ", b"content").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert_eq!(depot.stored_blobs().await, 0);
    assert!(depot.storage().list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_upload() {
    let depot = TestDepot::new().await;
    let record = depot.upload("empty", b"").await.unwrap();
    assert_eq!(record.size, 0);
    assert!(depot.download_all(record.id).await.is_empty());
}

#[tokio::test]
async fn test_find_by_hash() {
    let depot = TestDepot::new().await;
    let data = seeded_bytes(3, 64);
    let record = depot.upload("hashed", &data).await.unwrap();

    let found = depot
        .storage()
        .find_by_hash(&ContentHash::compute(&data))
        .await
        .unwrap()
        .expect("record by hash");
    assert_eq!(found.id, record.id);

    assert!(
        depot
            .storage()
            .find_by_hash(&ContentHash::compute(b"never uploaded"))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_concurrent_identical_uploads_share_one_blob() {
    let depot = Arc::new(TestDepot::new().await);
    let data = Arc::new(seeded_bytes(9, 32 * 1024));

    let mut handles = Vec::new();
    for i in 0..8 {
        let depot = depot.clone();
        let data = data.clone();
        handles.push(tokio::spawn(async move {
            depot.upload(&format!("copy-{i}"), &data).await
        }));
    }

    let mut refs = Vec::new();
    for handle in handles {
        refs.push(handle.await.unwrap().unwrap().content_ref);
    }
    refs.dedup();
    assert_eq!(refs.len(), 1);
    assert_eq!(depot.stored_blobs().await, 1);

    let blob = depot
        .storage()
        .metadata()
        .get_blob_ref(&refs[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(blob.refcount, 8);
}

#[tokio::test]
async fn test_failed_record_insert_returns_blob_reference() {
    let depot = TestDepot::new().await;
    let data = seeded_bytes(31, 512);
    let kept = depot.upload("kept", &data).await.unwrap();

    let pool = depot.metadata_pool().await;
    sqlx::query(
        "CREATE TRIGGER reject_files BEFORE INSERT ON files BEGIN SELECT RAISE(ABORT, 'rejected'); END",
    )
    .execute(&pool)
    .await
    .unwrap();

    // Duplicate content: the reference taken on the shared blob is handed back
    let err = depot.upload("duplicate", &data).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackendFailure);
    let blob = depot
        .storage()
        .metadata()
        .get_blob_ref(&kept.content_ref)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(blob.refcount, 1);

    // New content: the freshly written blob is removed again
    let err = depot
        .upload("fresh", &seeded_bytes(32, 512))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackendFailure);
    assert_eq!(depot.stored_blobs().await, 1);
    assert_eq!(depot.storage().metadata().list_blob_refs().await.unwrap().len(), 1);
    assert_eq!(depot.storage().list_all().await.unwrap().len(), 1);
}
