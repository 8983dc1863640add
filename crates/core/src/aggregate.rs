//! Pure aggregation over a window of analytics records.
//!
//! Callers bound the record set (usually by a [`crate::DateRange`] query);
//! nothing here reads a clock or a store.

use crate::analytics::{AnalyticsRecord, DailyStats, DownloadStatistics, FilePopularity};
use std::collections::{BTreeMap, HashMap, HashSet};
use time::Date;
use uuid::Uuid;

/// Popular files returned when the caller does not choose a limit.
pub const DEFAULT_POPULAR_LIMIT: usize = 10;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Summarize `records`, keeping at most `popular_limit` popular files.
pub fn summarize(records: &[AnalyticsRecord], popular_limit: usize) -> DownloadStatistics {
    if records.is_empty() {
        return DownloadStatistics::default();
    }

    let total_downloads = records.len() as u64;
    let total_bytes = records.iter().map(|r| r.file_size).sum();
    let total_files = records
        .iter()
        .map(|r| r.file_id)
        .collect::<HashSet<_>>()
        .len() as u64;

    let first = records.iter().map(|r| r.downloaded_at).min();
    let last = records.iter().map(|r| r.downloaded_at).max();
    let average_downloads_per_day = match (first, last) {
        (Some(first), Some(last)) => {
            let span_days = (last - first).as_seconds_f64() / SECONDS_PER_DAY;
            total_downloads as f64 / span_days.max(1.0)
        }
        _ => 0.0,
    };

    DownloadStatistics {
        total_downloads,
        total_bytes,
        total_files,
        first_download: first,
        last_download: last,
        average_downloads_per_day,
        popular_files: popular_files(records, popular_limit),
        daily_stats: daily_stats(records),
    }
}

/// Group by file, most downloaded first.
///
/// Ties go to the file downloaded most recently, then to the lower id so
/// the order is total. Name and size come from the latest record of each
/// file.
pub fn popular_files(records: &[AnalyticsRecord], limit: usize) -> Vec<FilePopularity> {
    let mut by_file: HashMap<Uuid, FilePopularity> = HashMap::new();
    for record in records {
        by_file
            .entry(record.file_id)
            .and_modify(|entry| {
                entry.download_count += 1;
                if record.downloaded_at > entry.last_downloaded {
                    entry.last_downloaded = record.downloaded_at;
                    entry.file_name.clone_from(&record.file_name);
                    entry.file_size = record.file_size;
                }
            })
            .or_insert_with(|| FilePopularity {
                file_id: record.file_id,
                file_name: record.file_name.clone(),
                file_size: record.file_size,
                download_count: 1,
                last_downloaded: record.downloaded_at,
            });
    }

    let mut ranked: Vec<FilePopularity> = by_file.into_values().collect();
    ranked.sort_by(|a, b| {
        b.download_count
            .cmp(&a.download_count)
            .then_with(|| b.last_downloaded.cmp(&a.last_downloaded))
            .then_with(|| a.file_id.cmp(&b.file_id))
    });
    ranked.truncate(limit);
    ranked
}

/// Bucket by the UTC calendar date of each download, oldest day first.
pub fn daily_stats(records: &[AnalyticsRecord]) -> Vec<DailyStats> {
    struct Bucket {
        count: u64,
        bytes: u64,
        files: HashSet<Uuid>,
    }

    let mut days: BTreeMap<Date, Bucket> = BTreeMap::new();
    for record in records {
        let date = record.downloaded_at.to_offset(time::UtcOffset::UTC).date();
        let bucket = days.entry(date).or_insert_with(|| Bucket {
            count: 0,
            bytes: 0,
            files: HashSet::new(),
        });
        bucket.count += 1;
        bucket.bytes += record.file_size;
        bucket.files.insert(record.file_id);
    }

    days.into_iter()
        .map(|(date, bucket)| DailyStats {
            date,
            download_count: bucket.count,
            total_bytes: bucket.bytes,
            unique_files: bucket.files.len() as u64,
        })
        .collect()
}
