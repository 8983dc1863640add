use depot_storage::{BlobStore, FilesystemBackend, SqliteBlobBackend};
use std::sync::Arc;
use tempfile::TempDir;

/// A blob store plus whatever keeps it alive.
pub struct TestBackend {
    pub store: Arc<dyn BlobStore>,
    _temp_dir: TempDir,
}

/// Every backend that runs without external services.
pub async fn local_backends() -> Vec<TestBackend> {
    let fs_dir = TempDir::new().expect("Failed to create temp directory");
    let filesystem = FilesystemBackend::new(fs_dir.path().join("blobs"))
        .await
        .expect("Failed to create filesystem backend");

    let db_dir = TempDir::new().expect("Failed to create temp directory");
    let sqlite = SqliteBlobBackend::new(db_dir.path().join("blobs.db"))
        .await
        .expect("Failed to create sqlite backend");

    vec![
        TestBackend {
            store: Arc::new(filesystem),
            _temp_dir: fs_dir,
        },
        TestBackend {
            store: Arc::new(sqlite),
            _temp_dir: db_dir,
        },
    ]
}
