//! Download analytics persistence, kept in its own database.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{DownloadRow, PopularityRow, to_i64, to_unix_nanos, unix_nanos_bound};
use crate::repos::AnalyticsRepo;
use crate::sqlite;
use async_trait::async_trait;
use depot_core::{
    AnalyticsRecord, DailyStats, DateRange, DownloadStatistics, FilePopularity, aggregate,
};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// Analytics store trait.
#[async_trait]
pub trait AnalyticsStore: AnalyticsRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based analytics store.
pub struct SqliteAnalyticsStore {
    pool: Pool<Sqlite>,
    query_timeout: Duration,
}

impl SqliteAnalyticsStore {
    /// Open (or create) the analytics database at `path`.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let pool = sqlite::open_file(path.as_ref()).await?;
        Self::with_pool(pool, query_timeout_secs).await
    }

    /// Private in-memory store, for tests.
    pub async fn in_memory() -> MetadataResult<Self> {
        let pool = sqlite::open_memory().await?;
        Self::with_pool(pool, None).await
    }

    async fn with_pool(pool: Pool<Sqlite>, query_timeout_secs: Option<u64>) -> MetadataResult<Self> {
        let store = Self {
            pool,
            query_timeout: Duration::from_secs(
                query_timeout_secs.unwrap_or(sqlite::DEFAULT_QUERY_TIMEOUT_SECS),
            ),
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Records inside `range`, oldest first, or every record when `None`.
    async fn fetch_records(&self, range: Option<&DateRange>) -> MetadataResult<Vec<AnalyticsRecord>> {
        let rows = match range {
            Some(range) => {
                sqlx::query_as::<_, DownloadRow>(
                    r#"
                    SELECT * FROM download_records
                    WHERE downloaded_at_ns BETWEEN ? AND ?
                    ORDER BY downloaded_at_ns, id
                    "#,
                )
                .bind(unix_nanos_bound(range.from))
                .bind(unix_nanos_bound(range.to))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, DownloadRow>(
                    "SELECT * FROM download_records ORDER BY downloaded_at_ns, id",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(AnalyticsRecord::try_from).collect()
    }
}

fn limit_param(limit: usize) -> MetadataResult<i64> {
    to_i64(limit as u64, "limit")
}

#[async_trait]
impl AnalyticsStore for SqliteAnalyticsStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl AnalyticsRepo for SqliteAnalyticsStore {
    async fn add_record(&self, record: &AnalyticsRecord) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO download_records (id, file_id, file_name, downloaded_at_ns, user_agent,
                                          ip_address, referrer, file_size, method, completed)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id)
        .bind(record.file_id)
        .bind(&record.file_name)
        .bind(to_unix_nanos(record.downloaded_at)?)
        .bind(&record.user_agent)
        .bind(&record.ip_address)
        .bind(&record.referrer)
        .bind(to_i64(record.file_size, "file_size")?)
        .bind(record.method.as_str())
        .bind(record.completed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn history_for_file(&self, file_id: Uuid) -> MetadataResult<Vec<AnalyticsRecord>> {
        let rows = sqlx::query_as::<_, DownloadRow>(
            r#"
            SELECT * FROM download_records
            WHERE file_id = ?
            ORDER BY downloaded_at_ns DESC, id
            "#,
        )
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AnalyticsRecord::try_from).collect()
    }

    async fn history_between(&self, range: &DateRange) -> MetadataResult<Vec<AnalyticsRecord>> {
        let mut records = self.fetch_records(Some(range)).await?;
        records.reverse();
        Ok(records)
    }

    async fn statistics(
        &self,
        range: Option<&DateRange>,
        popular_limit: usize,
    ) -> MetadataResult<DownloadStatistics> {
        sqlite::timed(self.query_timeout, "statistics", async {
            let records = self.fetch_records(range).await?;
            Ok(aggregate::summarize(&records, popular_limit))
        })
        .await
    }

    async fn popular_files(
        &self,
        limit: usize,
        range: Option<&DateRange>,
    ) -> MetadataResult<Vec<FilePopularity>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        // SQLite takes bare columns from the row that supplied MAX(), so the
        // name and size come from each file's latest download.
        let rows = match range {
            Some(range) => {
                sqlx::query_as::<_, PopularityRow>(
                    r#"
                    SELECT file_id, file_name, file_size,
                           COUNT(*) AS download_count,
                           MAX(downloaded_at_ns) AS last_downloaded_ns
                    FROM download_records
                    WHERE downloaded_at_ns BETWEEN ? AND ?
                    GROUP BY file_id
                    ORDER BY download_count DESC, last_downloaded_ns DESC, file_id ASC
                    LIMIT ?
                    "#,
                )
                .bind(unix_nanos_bound(range.from))
                .bind(unix_nanos_bound(range.to))
                .bind(limit_param(limit)?)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, PopularityRow>(
                    r#"
                    SELECT file_id, file_name, file_size,
                           COUNT(*) AS download_count,
                           MAX(downloaded_at_ns) AS last_downloaded_ns
                    FROM download_records
                    GROUP BY file_id
                    ORDER BY download_count DESC, last_downloaded_ns DESC, file_id ASC
                    LIMIT ?
                    "#,
                )
                .bind(limit_param(limit)?)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(FilePopularity::try_from).collect()
    }

    async fn daily_stats(&self, range: &DateRange) -> MetadataResult<Vec<DailyStats>> {
        sqlite::timed(self.query_timeout, "daily_stats", async {
            let records = self.fetch_records(Some(range)).await?;
            Ok(aggregate::daily_stats(&records))
        })
        .await
    }

    async fn total_downloads(&self) -> MetadataResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM download_records")
            .fetch_one(&self.pool)
            .await?;
        u64::try_from(count).map_err(|_| MetadataError::Corrupt(format!("negative count: {count}")))
    }

    async fn total_bytes(&self) -> MetadataResult<u64> {
        let total: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(file_size), 0) FROM download_records")
                .fetch_one(&self.pool)
                .await?;
        u64::try_from(total).map_err(|_| MetadataError::Corrupt(format!("negative total: {total}")))
    }

    async fn purge_older_than(&self, cutoff: OffsetDateTime) -> MetadataResult<u64> {
        let result = sqlx::query("DELETE FROM download_records WHERE downloaded_at_ns < ?")
            .bind(unix_nanos_bound(cutoff))
            .execute(&self.pool)
            .await?;
        let removed = result.rows_affected();
        if removed > 0 {
            tracing::info!(removed, cutoff = %cutoff, "purged old download records");
        }
        Ok(removed)
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS download_records (
    id BLOB PRIMARY KEY,
    file_id BLOB NOT NULL,
    file_name TEXT NOT NULL,
    downloaded_at_ns INTEGER NOT NULL,
    user_agent TEXT NOT NULL,
    ip_address TEXT NOT NULL,
    referrer TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    method TEXT NOT NULL,
    completed INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_download_records_file ON download_records(file_id, downloaded_at_ns);
CREATE INDEX IF NOT EXISTS idx_download_records_time ON download_records(downloaded_at_ns);
"#;
