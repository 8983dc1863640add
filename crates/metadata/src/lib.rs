//! Metadata persistence for the depot.
//!
//! Two SQLite-backed stores live here:
//! - file records and the blob reference counts that drive deduplication
//! - download analytics, kept in a separate database

pub mod analytics_store;
pub mod error;
pub mod models;
pub mod repos;
mod sqlite;
pub mod store;

pub use analytics_store::{AnalyticsStore, SqliteAnalyticsStore};
pub use error::{MetadataError, MetadataResult};
pub use repos::{AnalyticsRepo, BlobRefRepo, FileRepo, ReleaseOutcome};
pub use store::{MetadataStore, SqliteStore};

use depot_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a file metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            tracing::info!(path = %path.display(), "opening metadata store");
            let store = SqliteStore::new(path, *query_timeout_secs).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}

/// Create an analytics store from configuration.
pub async fn analytics_from_config(
    config: &MetadataConfig,
) -> MetadataResult<Arc<dyn AnalyticsStore>> {
    match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            tracing::info!(path = %path.display(), "opening analytics store");
            let store = SqliteAnalyticsStore::new(path, *query_timeout_secs).await?;
            Ok(Arc::new(store) as Arc<dyn AnalyticsStore>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_from_config_creates_parent_dirs() {
        let temp = TempDir::new().unwrap();
        let config = MetadataConfig::sqlite(temp.path().join("nested/dir/metadata.db"));
        let store = from_config(&config).await.unwrap();
        store.health_check().await.unwrap();
        assert!(temp.path().join("nested/dir/metadata.db").exists());
    }

    #[tokio::test]
    async fn test_analytics_from_config_is_separate_database() {
        let temp = TempDir::new().unwrap();
        let metadata = from_config(&MetadataConfig::sqlite(temp.path().join("metadata.db")))
            .await
            .unwrap();
        let analytics =
            analytics_from_config(&MetadataConfig::sqlite(temp.path().join("analytics.db")))
                .await
                .unwrap();
        metadata.health_check().await.unwrap();
        analytics.health_check().await.unwrap();
        assert_eq!(analytics.total_downloads().await.unwrap(), 0);
        assert!(metadata.list_files().await.unwrap().is_empty());
    }
}
