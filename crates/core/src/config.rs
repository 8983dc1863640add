//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Blob store backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for blobs.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to the ambient credential chain if unset.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to the ambient credential chain if unset.
        secret_access_key: Option<String>,
        /// Force path-style URLs (`endpoint/bucket/key`). Required for MinIO.
        #[serde(default)]
        force_path_style: bool,
    },
    /// Blobs stored as chunked rows in a SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/blobs"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.trim().is_empty() {
                    return Err("s3 config requires a bucket name".to_string());
                }
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    ),
                }
            }
            _ => Ok(()),
        }
    }
}

/// SQLite-backed store configuration (file metadata or analytics).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Query timeout in seconds (advisory only; slow queries are logged).
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(30)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::sqlite("./data/metadata.db")
    }
}

impl MetadataConfig {
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self::Sqlite {
            path: path.into(),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }

    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { path, .. } if path.as_os_str().is_empty() => {
                Err("sqlite config requires a path".to_string())
            }
            MetadataConfig::Sqlite { .. } => Ok(()),
        }
    }
}

/// Download analytics configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Analytics store; kept apart from file metadata.
    #[serde(default = "default_analytics_store")]
    pub store: MetadataConfig,
    /// Records older than this many days are removed by `cleanup`.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Popular files returned when no count is given.
    #[serde(default = "default_popular_limit")]
    pub popular_limit: usize,
    /// Days covered by daily statistics when no window is given.
    #[serde(default = "default_daily_window_days")]
    pub daily_window_days: u32,
    /// Popular files shown on the dashboard.
    #[serde(default = "default_dashboard_popular_limit")]
    pub dashboard_popular_limit: usize,
    /// Days of daily statistics shown on the dashboard.
    #[serde(default = "default_dashboard_window_days")]
    pub dashboard_window_days: u32,
}

fn default_analytics_store() -> MetadataConfig {
    MetadataConfig::sqlite("./data/analytics.db")
}

fn default_retention_days() -> u32 {
    365
}

fn default_popular_limit() -> usize {
    crate::aggregate::DEFAULT_POPULAR_LIMIT
}

fn default_daily_window_days() -> u32 {
    30
}

fn default_dashboard_popular_limit() -> usize {
    5
}

fn default_dashboard_window_days() -> u32 {
    7
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            store: default_analytics_store(),
            retention_days: default_retention_days(),
            popular_limit: default_popular_limit(),
            daily_window_days: default_daily_window_days(),
            dashboard_popular_limit: default_dashboard_popular_limit(),
            dashboard_window_days: default_dashboard_window_days(),
        }
    }
}

impl AnalyticsConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.store.validate()?;
        if self.popular_limit == 0 || self.dashboard_popular_limit == 0 {
            return Err("analytics popular limits must be at least 1".to_string());
        }
        if self.daily_window_days == 0 || self.dashboard_window_days == 0 {
            return Err("analytics windows must be at least 1 day".to_string());
        }
        Ok(())
    }
}

/// Upload staging configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Directory for scratch copies of incoming uploads (system temp dir if unset).
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

/// Event bus configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventsConfig {
    /// How long shutdown waits for in-flight handlers.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl EventsConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Blob store backend.
    #[serde(default)]
    pub storage: StorageConfig,
    /// File metadata store.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Download analytics.
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    /// Upload staging.
    #[serde(default)]
    pub upload: UploadConfig,
    /// Event dispatch.
    #[serde(default)]
    pub events: EventsConfig,
}

impl AppConfig {
    /// Create a configuration rooted under `dir`.
    ///
    /// **For testing only.** Filesystem blobs and two SQLite files.
    pub fn for_testing(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            storage: StorageConfig::Filesystem {
                path: dir.join("blobs"),
            },
            metadata: MetadataConfig::sqlite(dir.join("metadata.db")),
            analytics: AnalyticsConfig {
                store: MetadataConfig::sqlite(dir.join("analytics.db")),
                ..AnalyticsConfig::default()
            },
            upload: UploadConfig {
                scratch_dir: Some(dir.join("scratch")),
            },
            events: EventsConfig::default(),
        }
    }

    /// Validate every section, naming the first failing one.
    pub fn validate(&self) -> crate::Result<()> {
        self.storage
            .validate()
            .map_err(|e| crate::Error::Config(format!("storage: {e}")))?;
        self.metadata
            .validate()
            .map_err(|e| crate::Error::Config(format!("metadata: {e}")))?;
        self.analytics
            .validate()
            .map_err(|e| crate::Error::Config(format!("analytics: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_config_defaults_from_empty_document() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert!(matches!(config.storage, StorageConfig::Filesystem { .. }));
        assert_eq!(config.analytics.retention_days, 365);
        assert_eq!(config.analytics.popular_limit, 10);
        assert_eq!(config.analytics.daily_window_days, 30);
        assert_eq!(config.analytics.dashboard_popular_limit, 5);
        assert_eq!(config.analytics.dashboard_window_days, 7);
        assert_eq!(config.events.shutdown_timeout_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_storage_config_sqlite_variant() {
        let json = r#"{"type":"sqlite","path":"/var/lib/depot/blobs.db"}"#;
        let config: StorageConfig = serde_json::from_str(json).unwrap();
        match config {
            StorageConfig::Sqlite { path } => {
                assert_eq!(path, PathBuf::from("/var/lib/depot/blobs.db"))
            }
            other => panic!("expected sqlite config, got {other:?}"),
        }
    }

    #[test]
    fn test_storage_config_s3_validate_partial_credentials() {
        let invalid = StorageConfig::S3 {
            bucket: "bucket".to_string(),
            endpoint: None,
            region: None,
            prefix: None,
            access_key_id: Some("access-key".to_string()),
            secret_access_key: None,
            force_path_style: false,
        };
        assert!(invalid.validate().is_err());

        let valid = StorageConfig::S3 {
            bucket: "bucket".to_string(),
            endpoint: None,
            region: None,
            prefix: None,
            access_key_id: Some("access-key".to_string()),
            secret_access_key: Some("secret-key".to_string()),
            force_path_style: false,
        };
        assert!(valid.validate().is_ok());
    }

    #[test]
    fn test_storage_config_s3_force_path_style_defaults_to_false() {
        let json = r#"{"type":"s3","bucket":"test","endpoint":"https://s3.amazonaws.com"}"#;
        let config: StorageConfig = serde_json::from_str(json).unwrap();
        match config {
            StorageConfig::S3 {
                force_path_style, ..
            } => assert!(!force_path_style),
            _ => panic!("expected S3 config"),
        }
    }

    #[test]
    fn test_analytics_config_rejects_zero_limits() {
        let config = AnalyticsConfig {
            popular_limit: 0,
            ..AnalyticsConfig::default()
        };
        assert!(config.validate().is_err());

        let mut app = AppConfig::for_testing("/tmp/depot");
        app.analytics.dashboard_window_days = 0;
        let err = app.validate().unwrap_err();
        assert!(err.to_string().contains("analytics"));
    }

    #[test]
    fn test_for_testing_keeps_stores_apart() {
        let config = AppConfig::for_testing("/tmp/depot");
        let MetadataConfig::Sqlite { path: metadata, .. } = &config.metadata;
        let MetadataConfig::Sqlite { path: analytics, .. } = &config.analytics.store;
        assert_ne!(metadata, analytics);
    }
}
