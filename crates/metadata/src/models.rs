//! Database rows and their conversion into domain types.

use crate::error::{MetadataError, MetadataResult};
use depot_core::{
    AnalyticsRecord, BlobRef, ContentHash, ContentRef, DownloadMethod, FilePopularity, FileRecord,
};
use sqlx::FromRow;
use std::collections::BTreeSet;
use time::OffsetDateTime;
use uuid::Uuid;

fn to_u64(value: i64, column: &str) -> MetadataResult<u64> {
    u64::try_from(value).map_err(|_| MetadataError::Corrupt(format!("negative {column}: {value}")))
}

pub(crate) fn to_i64(value: u64, column: &str) -> MetadataResult<i64> {
    i64::try_from(value).map_err(|_| MetadataError::Corrupt(format!("{column} too large: {value}")))
}

/// Timestamps used in range predicates are stored as UTC unix nanoseconds.
pub(crate) fn to_unix_nanos(at: OffsetDateTime) -> MetadataResult<i64> {
    i64::try_from(at.unix_timestamp_nanos())
        .map_err(|_| MetadataError::Corrupt(format!("timestamp out of range: {at}")))
}

/// Query bound for `at`, clamped to the stored range so a bound outside it
/// still selects everything on its side.
pub(crate) fn unix_nanos_bound(at: OffsetDateTime) -> i64 {
    let nanos = at.unix_timestamp_nanos();
    i64::try_from(nanos).unwrap_or(if nanos < 0 { i64::MIN } else { i64::MAX })
}

pub(crate) fn from_unix_nanos(nanos: i64) -> MetadataResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos))
        .map_err(|e| MetadataError::Corrupt(format!("timestamp {nanos}: {e}")))
}

pub(crate) fn encode_tags(tags: &BTreeSet<String>) -> MetadataResult<String> {
    Ok(serde_json::to_string(tags)?)
}

// =============================================================================
// Files
// =============================================================================

/// File record row. Tags are a JSON array in a text column.
#[derive(Debug, Clone, FromRow)]
pub struct FileRow {
    pub id: Uuid,
    pub content_ref: String,
    pub content_hash: String,
    pub name: String,
    pub description: Option<String>,
    pub added_by: Option<String>,
    pub tags: String,
    pub size: i64,
    pub content_type: String,
    pub added_date: OffsetDateTime,
    pub last_modified: OffsetDateTime,
    pub download_count: i64,
}

impl TryFrom<FileRow> for FileRecord {
    type Error = MetadataError;

    fn try_from(row: FileRow) -> MetadataResult<Self> {
        Ok(FileRecord {
            id: row.id,
            content_ref: ContentRef::new(row.content_ref)?,
            content_hash: ContentHash::from_hex(&row.content_hash)?,
            name: row.name,
            description: row.description,
            added_by: row.added_by,
            tags: serde_json::from_str(&row.tags)?,
            size: to_u64(row.size, "size")?,
            content_type: row.content_type,
            added_date: row.added_date,
            last_modified: row.last_modified,
            download_count: to_u64(row.download_count, "download_count")?,
        })
    }
}

// =============================================================================
// Blob reference counts
// =============================================================================

/// One stored blob and how many file records point at it.
#[derive(Debug, Clone, FromRow)]
pub struct BlobRefRow {
    pub content_hash: String,
    pub content_ref: String,
    pub size: i64,
    pub refcount: i64,
    pub created_at: OffsetDateTime,
}

impl TryFrom<BlobRefRow> for BlobRef {
    type Error = MetadataError;

    fn try_from(row: BlobRefRow) -> MetadataResult<Self> {
        Ok(BlobRef {
            content_hash: ContentHash::from_hex(&row.content_hash)?,
            content_ref: ContentRef::new(row.content_ref)?,
            size: to_u64(row.size, "size")?,
            refcount: to_u64(row.refcount, "refcount")?,
            created_at: row.created_at,
        })
    }
}

// =============================================================================
// Download analytics
// =============================================================================

/// Download record row.
#[derive(Debug, Clone, FromRow)]
pub struct DownloadRow {
    pub id: Uuid,
    pub file_id: Uuid,
    pub file_name: String,
    pub downloaded_at_ns: i64,
    pub user_agent: String,
    pub ip_address: String,
    pub referrer: String,
    pub file_size: i64,
    pub method: String,
    pub completed: bool,
}

impl TryFrom<DownloadRow> for AnalyticsRecord {
    type Error = MetadataError;

    fn try_from(row: DownloadRow) -> MetadataResult<Self> {
        Ok(AnalyticsRecord {
            id: row.id,
            file_id: row.file_id,
            file_name: row.file_name,
            downloaded_at: from_unix_nanos(row.downloaded_at_ns)?,
            user_agent: row.user_agent,
            ip_address: row.ip_address,
            referrer: row.referrer,
            file_size: to_u64(row.file_size, "file_size")?,
            method: row.method.parse::<DownloadMethod>()?,
            completed: row.completed,
        })
    }
}

/// Per-file aggregate computed in SQL.
#[derive(Debug, Clone, FromRow)]
pub struct PopularityRow {
    pub file_id: Uuid,
    pub file_name: String,
    pub file_size: i64,
    pub download_count: i64,
    pub last_downloaded_ns: i64,
}

impl TryFrom<PopularityRow> for FilePopularity {
    type Error = MetadataError;

    fn try_from(row: PopularityRow) -> MetadataResult<Self> {
        Ok(FilePopularity {
            file_id: row.file_id,
            file_name: row.file_name,
            file_size: to_u64(row.file_size, "file_size")?,
            download_count: to_u64(row.download_count, "download_count")?,
            last_downloaded: from_unix_nanos(row.last_downloaded_ns)?,
        })
    }
}
