//! A fully wired depot over temporary stores.

use depot_core::config::AppConfig;
use depot_core::{FileRecord, NewFile};
use depot_service::{AnalyticsService, Depot, ServiceResult, StorageService};
use std::sync::Arc;
use tempfile::TempDir;

/// Filesystem blobs plus two SQLite files under a temp dir removed on drop.
#[allow(dead_code)]
pub struct TestDepot {
    pub depot: Depot,
    temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestDepot {
    pub async fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let config = AppConfig::for_testing(temp_dir.path());
        let depot = Depot::from_config(config)
            .await
            .expect("Failed to create depot");
        Self { depot, temp_dir }
    }

    pub fn storage(&self) -> &Arc<StorageService> {
        self.depot.storage()
    }

    pub fn analytics(&self) -> &Arc<AnalyticsService> {
        self.depot.analytics()
    }

    pub fn path(&self) -> &std::path::Path {
        self.temp_dir.path()
    }

    /// A second connection to the metadata database, for tampering with it
    /// behind the service.
    pub async fn metadata_pool(&self) -> sqlx::SqlitePool {
        let opts = sqlx::sqlite::SqliteConnectOptions::new()
            .filename(self.path().join("metadata.db"))
            .busy_timeout(std::time::Duration::from_secs(5));
        sqlx::SqlitePool::connect_with(opts)
            .await
            .expect("Failed to open metadata database")
    }

    /// Upload `data` under `name`.
    pub async fn upload(&self, name: &str, data: &[u8]) -> ServiceResult<FileRecord> {
        self.storage().upload(data, NewFile::named(name)).await
    }

    /// Download `record`, read the whole stream and wait for the handlers.
    pub async fn download_all(&self, id: uuid::Uuid) -> Vec<u8> {
        let (stream, _) = self
            .storage()
            .download(id)
            .await
            .expect("Download failed");
        let bytes = depot_storage::read_to_bytes(stream)
            .await
            .expect("Failed to read download");
        self.depot.drain().await;
        bytes.to_vec()
    }

    /// Number of blobs physically stored.
    pub async fn stored_blobs(&self) -> usize {
        self.storage()
            .blobs()
            .list()
            .await
            .expect("Failed to list blobs")
            .len()
    }
}
