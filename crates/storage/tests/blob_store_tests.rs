// Behaviour every local blob backend must share

mod common;

use common::{chunked_stream, local_backends, seeded_bytes};
use depot_core::ContentRef;
use depot_storage::{StorageError, bytes_stream, read_to_bytes};
use std::collections::HashSet;

#[tokio::test]
async fn test_round_trip_preserves_bytes() {
    for backend in local_backends().await {
        let store = &backend.store;
        let data = seeded_bytes(7, 3 * 1024 * 1024 + 17);
        let content_ref = store
            .put("data.bin", chunked_stream(data.clone(), 100_000))
            .await
            .unwrap();

        let read = read_to_bytes(store.get(&content_ref).await.unwrap())
            .await
            .unwrap();
        assert_eq!(read, data, "backend {}", store.backend_name());
    }
}

#[tokio::test]
async fn test_get_missing_is_not_found() {
    for backend in local_backends().await {
        let store = &backend.store;
        // Produce a well-formed reference for this backend, then remove it
        let content_ref = store.put("gone", bytes_stream("x")).await.unwrap();
        store.delete(&content_ref).await.unwrap();

        let result = store.get(&content_ref).await;
        assert!(
            matches!(result, Err(StorageError::NotFound(_))),
            "backend {}",
            store.backend_name()
        );
    }
}

#[tokio::test]
async fn test_delete_missing_succeeds() {
    for backend in local_backends().await {
        let store = &backend.store;
        let content_ref = store.put("twice", bytes_stream("x")).await.unwrap();
        store.delete(&content_ref).await.unwrap();
        store.delete(&content_ref).await.unwrap();
        assert!(!store.exists(&content_ref).await.unwrap());
    }
}

#[tokio::test]
async fn test_list_returns_every_blob() {
    for backend in local_backends().await {
        let store = &backend.store;
        let mut expected = HashSet::new();
        for i in 0..5u64 {
            let r = store
                .put(&format!("file-{i}"), bytes_stream(seeded_bytes(i, 64)))
                .await
                .unwrap();
            expected.insert(r);
        }

        let listed: HashSet<ContentRef> = store.list().await.unwrap().into_iter().collect();
        assert_eq!(listed, expected, "backend {}", store.backend_name());
    }
}

#[tokio::test]
async fn test_identical_content_gets_distinct_refs() {
    for backend in local_backends().await {
        let store = &backend.store;
        let a = store.put("a", bytes_stream("same")).await.unwrap();
        let b = store.put("b", bytes_stream("same")).await.unwrap();
        assert_ne!(a, b);

        store.delete(&a).await.unwrap();
        let read = read_to_bytes(store.get(&b).await.unwrap()).await.unwrap();
        assert_eq!(read.as_ref(), b"same");
    }
}

#[tokio::test]
async fn test_concurrent_puts() {
    for backend in local_backends().await {
        let mut handles = Vec::new();
        for i in 0..8u64 {
            let store = backend.store.clone();
            handles.push(tokio::spawn(async move {
                let data = seeded_bytes(i, 10_000);
                let r = store.put("c", bytes_stream(data.clone())).await.unwrap();
                (r, data)
            }));
        }

        for handle in handles {
            let (r, data) = handle.await.unwrap();
            let read = read_to_bytes(backend.store.get(&r).await.unwrap())
                .await
                .unwrap();
            assert_eq!(read, data);
        }
    }
}

#[tokio::test]
async fn test_health_check_passes() {
    for backend in local_backends().await {
        backend.store.health_check().await.unwrap();
    }
}
