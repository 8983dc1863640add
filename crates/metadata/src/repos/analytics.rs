//! Download analytics repository.

use crate::error::MetadataResult;
use async_trait::async_trait;
use depot_core::{AnalyticsRecord, DailyStats, DateRange, DownloadStatistics, FilePopularity};
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for download records and their aggregates.
#[async_trait]
pub trait AnalyticsRepo: Send + Sync {
    /// Persist one record.
    async fn add_record(&self, record: &AnalyticsRecord) -> MetadataResult<()>;

    /// Records for one file, newest first.
    async fn history_for_file(&self, file_id: Uuid) -> MetadataResult<Vec<AnalyticsRecord>>;

    /// Records inside `range` (inclusive), newest first.
    async fn history_between(&self, range: &DateRange) -> MetadataResult<Vec<AnalyticsRecord>>;

    /// Summary over `range`, or over every record when `None`.
    async fn statistics(
        &self,
        range: Option<&DateRange>,
        popular_limit: usize,
    ) -> MetadataResult<DownloadStatistics>;

    /// Most downloaded files, optionally restricted to `range`.
    async fn popular_files(
        &self,
        limit: usize,
        range: Option<&DateRange>,
    ) -> MetadataResult<Vec<FilePopularity>>;

    /// Per-day buckets inside `range`, oldest day first.
    async fn daily_stats(&self, range: &DateRange) -> MetadataResult<Vec<DailyStats>>;

    /// Count of every stored record.
    async fn total_downloads(&self) -> MetadataResult<u64>;

    /// Sum of `file_size` over every stored record.
    async fn total_bytes(&self) -> MetadataResult<u64>;

    /// Hard-delete records older than `cutoff`; returns how many were removed.
    async fn purge_older_than(&self, cutoff: OffsetDateTime) -> MetadataResult<u64>;
}
