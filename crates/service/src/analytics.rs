//! Download analytics: recording and reporting.

use crate::error::ServiceResult;
use crate::metrics;
use depot_core::config::AnalyticsConfig;
use depot_core::{
    AnalyticsRecord, ClientInfo, DailyStats, DateRange, DownloadMethod, DownloadStatistics,
    FilePopularity, days_before,
};
use depot_metadata::{AnalyticsStore, MetadataError, MetadataStore};
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

/// Headline numbers shown on the dashboard.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DashboardOverview {
    pub total_downloads: u64,
    pub total_files: u64,
    pub total_bytes: u64,
    pub average_downloads_per_day: f64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_download: Option<OffsetDateTime>,
}

/// All-time overview, the most popular files and recent daily activity.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Dashboard {
    pub overview: DashboardOverview,
    pub popular_files: Vec<FilePopularity>,
    pub recent_activity: Vec<DailyStats>,
}

/// Records downloads and answers statistics queries.
pub struct AnalyticsService {
    files: Arc<dyn MetadataStore>,
    store: Arc<dyn AnalyticsStore>,
    config: AnalyticsConfig,
}

impl AnalyticsService {
    pub fn new(
        files: Arc<dyn MetadataStore>,
        store: Arc<dyn AnalyticsStore>,
        config: AnalyticsConfig,
    ) -> Self {
        Self {
            files,
            store,
            config,
        }
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    /// Persist a completed download of `file_id` at `at`.
    ///
    /// The record takes the file's current name and size. Returns `None`
    /// without writing anything if the file no longer exists.
    #[instrument(skip(self, client))]
    pub async fn record_download(
        &self,
        file_id: Uuid,
        client: &ClientInfo,
        method: DownloadMethod,
        at: OffsetDateTime,
    ) -> ServiceResult<Option<AnalyticsRecord>> {
        let file = match self.files.get_file(file_id).await {
            Ok(file) => file,
            Err(MetadataError::NotFound(_)) => {
                tracing::debug!(file_id = %file_id, "file gone before download was recorded");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        let record = AnalyticsRecord::for_download(&file, client, method, at);
        self.store.add_record(&record).await?;
        metrics::ANALYTICS_RECORDS_WRITTEN.inc();
        Ok(Some(record))
    }

    /// Statistics over every stored record.
    pub async fn statistics(&self) -> ServiceResult<DownloadStatistics> {
        Ok(self.store.statistics(None, self.config.popular_limit).await?)
    }

    /// Statistics over the records inside `range`.
    pub async fn statistics_between(&self, range: DateRange) -> ServiceResult<DownloadStatistics> {
        Ok(self
            .store
            .statistics(Some(&range), self.config.popular_limit)
            .await?)
    }

    /// The `count` most downloaded files of all time.
    pub async fn popular_files(&self, count: usize) -> ServiceResult<Vec<FilePopularity>> {
        Ok(self.store.popular_files(count, None).await?)
    }

    /// Per-day activity from midnight UTC `days` days ago until now.
    pub async fn daily_stats(&self, days: u32) -> ServiceResult<Vec<DailyStats>> {
        let range = DateRange::last_days(OffsetDateTime::now_utc(), days);
        Ok(self.store.daily_stats(&range).await?)
    }

    /// Every recorded download of `file_id`, newest first.
    pub async fn history(&self, file_id: Uuid) -> ServiceResult<Vec<AnalyticsRecord>> {
        Ok(self.store.history_for_file(file_id).await?)
    }

    /// Records inside `range`, newest first.
    pub async fn history_between(&self, range: DateRange) -> ServiceResult<Vec<AnalyticsRecord>> {
        Ok(self.store.history_between(&range).await?)
    }

    /// Delete records older than `days_to_keep` days; returns how many went.
    #[instrument(skip(self))]
    pub async fn cleanup(&self, days_to_keep: u32) -> ServiceResult<u64> {
        let cutoff = days_before(OffsetDateTime::now_utc(), days_to_keep);
        Ok(self.store.purge_older_than(cutoff).await?)
    }

    /// Apply the configured retention period.
    pub async fn apply_retention(&self) -> ServiceResult<u64> {
        self.cleanup(self.config.retention_days).await
    }

    pub async fn dashboard(&self) -> ServiceResult<Dashboard> {
        let stats = self.statistics().await?;
        let popular_files = self
            .popular_files(self.config.dashboard_popular_limit)
            .await?;
        let recent_activity = self.daily_stats(self.config.dashboard_window_days).await?;

        Ok(Dashboard {
            overview: DashboardOverview {
                total_downloads: stats.total_downloads,
                total_files: stats.total_files,
                total_bytes: stats.total_bytes,
                average_downloads_per_day: stats.average_downloads_per_day,
                last_download: stats.last_download,
            },
            popular_files,
            recent_activity,
        })
    }
}
