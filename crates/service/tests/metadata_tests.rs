//! Update, listing and tag lookup tests.

mod common;

use common::TestDepot;
use depot_core::FilePatch;
use depot_service::ErrorKind;
use std::collections::BTreeSet;
use uuid::Uuid;

fn tags(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[tokio::test]
async fn test_update_is_partial() {
    let depot = TestDepot::new().await;
    let record = depot
        .storage()
        .upload(
            &b"notes"[..],
            depot_core::NewFile::named("notes.txt")
                .with_description("draft")
                .with_added_by("alice")
                .with_tags(["work"]),
        )
        .await
        .unwrap();
    depot.download_all(record.id).await;

    let updated = depot
        .storage()
        .update(
            record.id,
            FilePatch {
                name: Some("final.txt".to_string()),
                ..FilePatch::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.name, "final.txt");
    assert_eq!(updated.description.as_deref(), Some("draft"));
    assert_eq!(updated.added_by.as_deref(), Some("alice"));
    assert_eq!(updated.tags, tags(&["work"]));
    assert_eq!(updated.download_count, 1);
    assert_eq!(updated.content_ref, record.content_ref);
    assert!(updated.last_modified >= record.last_modified);
}

#[tokio::test]
async fn test_update_replaces_tags() {
    let depot = TestDepot::new().await;
    let record = depot.upload("tagged", b"tagged").await.unwrap();

    let patch = FilePatch {
        tags: Some(tags(&["a", "b"])),
        ..FilePatch::default()
    };
    let updated = depot.storage().update(record.id, patch).await.unwrap();
    assert_eq!(updated.tags, tags(&["a", "b"]));
    assert_eq!(updated.name, "tagged");
}

#[tokio::test]
async fn test_update_rejects_blank_name() {
    let depot = TestDepot::new().await;
    let record = depot.upload("named", b"named").await.unwrap();

    let patch = FilePatch {
        name: Some(" ".to_string()),
        ..FilePatch::default()
    };
    let err = depot.storage().update(record.id, patch).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert_eq!(depot.storage().get(record.id).await.unwrap().name, "named");
}

#[tokio::test]
async fn test_update_missing_is_not_found() {
    let depot = TestDepot::new().await;
    let err = depot
        .storage()
        .update(Uuid::new_v4(), FilePatch::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.public_message().contains("not found"));
}

#[tokio::test]
async fn test_tag_lookup_is_exact() {
    let depot = TestDepot::new().await;
    let exact = depot
        .storage()
        .upload(&b"1"[..], depot_core::NewFile::named("one").with_tags(["x"]))
        .await
        .unwrap();
    depot
        .storage()
        .upload(&b"2"[..], depot_core::NewFile::named("two").with_tags(["xx"]))
        .await
        .unwrap();

    let hits = depot.storage().list_by_tag("x").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, exact.id);
    assert!(depot.storage().list_by_tag("X").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_all_and_get() {
    let depot = TestDepot::new().await;
    let a = depot.upload("a", b"a").await.unwrap();
    let b = depot.upload("b", b"b").await.unwrap();

    let all = depot.storage().list_all().await.unwrap();
    let ids: Vec<Uuid> = all.iter().map(|r| r.id).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&a.id) && ids.contains(&b.id));

    assert_eq!(depot.storage().get(b.id).await.unwrap().name, "b");
    let err = depot.storage().get(Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
