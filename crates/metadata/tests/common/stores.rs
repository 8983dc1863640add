//! Store test utilities.

use depot_metadata::{
    AnalyticsStore, MetadataResult, MetadataStore, SqliteAnalyticsStore, SqliteStore,
};
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use tempfile::TempDir;

/// A file-backed metadata store that cleans up on drop.
#[allow(dead_code)]
pub struct TestMetadata {
    pub store: Arc<dyn MetadataStore>,
    sqlite_store: Arc<SqliteStore>,
    _temp_dir: TempDir,
}

impl TestMetadata {
    pub async fn new() -> MetadataResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let store = Arc::new(SqliteStore::new(temp_dir.path().join("metadata.db"), None).await?);
        Ok(Self {
            store: store.clone(),
            sqlite_store: store,
            _temp_dir: temp_dir,
        })
    }

    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.store.clone()
    }

    /// Raw pool access for assertions on stored rows.
    #[allow(dead_code)]
    pub fn pool(&self) -> &Pool<Sqlite> {
        self.sqlite_store.pool()
    }
}

/// A file-backed analytics store that cleans up on drop.
#[allow(dead_code)]
pub struct TestAnalytics {
    pub store: Arc<dyn AnalyticsStore>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestAnalytics {
    pub async fn new() -> MetadataResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let store = SqliteAnalyticsStore::new(temp_dir.path().join("analytics.db"), None).await?;
        Ok(Self {
            store: Arc::new(store),
            _temp_dir: temp_dir,
        })
    }

    pub fn store(&self) -> Arc<dyn AnalyticsStore> {
        self.store.clone()
    }
}
