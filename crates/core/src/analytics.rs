//! Download analytics records and the statistics derived from them.

use crate::file::FileRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};
use uuid::Uuid;

/// Recorded when the client did not send a user agent or address.
pub const UNKNOWN_CLIENT: &str = "Unknown";

/// Recorded when the request carried no referrer.
pub const DIRECT_REFERRER: &str = "Direct";

/// How the content was served.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadMethod {
    #[default]
    Download,
    View,
}

impl DownloadMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::View => "view",
        }
    }
}

impl fmt::Display for DownloadMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownloadMethod {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "download" => Ok(Self::Download),
            "view" => Ok(Self::View),
            other => Err(crate::Error::UnknownDownloadMethod(other.to_string())),
        }
    }
}

/// Request-side details captured with a download.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub referrer: Option<String>,
}

/// One download or view of a file. Immutable once written.
///
/// `file_id` is not a foreign key: records outlive deleted files.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsRecord {
    pub id: Uuid,
    pub file_id: Uuid,
    pub file_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub downloaded_at: OffsetDateTime,
    pub user_agent: String,
    pub ip_address: String,
    pub referrer: String,
    pub file_size: u64,
    pub method: DownloadMethod,
    pub completed: bool,
}

impl AnalyticsRecord {
    /// Build a completed record for `file`, filling absent client fields with
    /// the `Unknown`/`Direct` placeholders.
    pub fn for_download(
        file: &FileRecord,
        client: &ClientInfo,
        method: DownloadMethod,
        at: OffsetDateTime,
    ) -> Self {
        let or_default = |value: &Option<String>, default: &str| {
            value
                .as_deref()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(default)
                .to_string()
        };
        Self {
            id: Uuid::new_v4(),
            file_id: file.id,
            file_name: file.name.clone(),
            downloaded_at: at.to_offset(UtcOffset::UTC),
            user_agent: or_default(&client.user_agent, UNKNOWN_CLIENT),
            ip_address: or_default(&client.ip_address, UNKNOWN_CLIENT),
            referrer: or_default(&client.referrer, DIRECT_REFERRER),
            file_size: file.size,
            method,
            completed: true,
        }
    }
}

/// Inclusive time window for analytics queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(with = "time::serde::rfc3339")]
    pub from: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub to: OffsetDateTime,
}

impl DateRange {
    pub fn new(from: OffsetDateTime, to: OffsetDateTime) -> crate::Result<Self> {
        if from > to {
            return Err(crate::Error::InvalidRange {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        Ok(Self { from, to })
    }

    /// From midnight UTC `days` days before `now` up to `now`.
    pub fn last_days(now: OffsetDateTime, days: u32) -> Self {
        let now = now.to_offset(UtcOffset::UTC);
        let start = days_before(now, days)
            .date()
            .with_time(Time::MIDNIGHT)
            .assume_utc();
        Self {
            from: start,
            to: now,
        }
    }
}

/// The instant `days` days before `now`, saturating at the earliest
/// representable time.
pub fn days_before(now: OffsetDateTime, days: u32) -> OffsetDateTime {
    now.checked_sub(Duration::days(i64::from(days)))
        .unwrap_or_else(|| PrimitiveDateTime::MIN.assume_offset(now.offset()))
}

/// Download counts for one file inside a window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePopularity {
    pub file_id: Uuid,
    pub file_name: String,
    pub file_size: u64,
    pub download_count: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub last_downloaded: OffsetDateTime,
}

/// Per-calendar-day bucket (UTC).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyStats {
    pub date: Date,
    pub download_count: u64,
    pub total_bytes: u64,
    pub unique_files: u64,
}

/// Summary over a set of analytics records.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadStatistics {
    pub total_downloads: u64,
    pub total_bytes: u64,
    pub total_files: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub first_download: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_download: Option<OffsetDateTime>,
    pub average_downloads_per_day: f64,
    pub popular_files: Vec<FilePopularity>,
    pub daily_stats: Vec<DailyStats>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::ContentRef;
    use crate::file::{NewFile, NewFileRecord};
    use crate::hash::ContentHash;
    use time::macros::{date, datetime};

    fn file() -> FileRecord {
        NewFileRecord::from_upload(
            NewFile::named("a.bin"),
            ContentRef::new("r1").unwrap(),
            ContentHash::compute(b"a"),
            42,
            datetime!(2024-05-01 0:00 UTC),
        )
        .into_record(Uuid::new_v4())
    }

    #[test]
    fn test_for_download_applies_placeholders() {
        let file = file();
        let record = AnalyticsRecord::for_download(
            &file,
            &ClientInfo::default(),
            DownloadMethod::View,
            datetime!(2024-05-02 10:00 UTC),
        );
        assert_eq!(record.user_agent, UNKNOWN_CLIENT);
        assert_eq!(record.ip_address, UNKNOWN_CLIENT);
        assert_eq!(record.referrer, DIRECT_REFERRER);
        assert_eq!(record.file_size, 42);
        assert_eq!(record.file_name, "a.bin");
        assert_eq!(record.method, DownloadMethod::View);
        assert!(record.completed);
    }

    #[test]
    fn test_for_download_keeps_supplied_client_fields() {
        let client = ClientInfo {
            user_agent: Some("curl/8".to_string()),
            ip_address: Some("10.0.0.1".to_string()),
            referrer: Some("https://example.org".to_string()),
        };
        let record = AnalyticsRecord::for_download(
            &file(),
            &client,
            DownloadMethod::Download,
            datetime!(2024-05-02 10:00 UTC),
        );
        assert_eq!(record.user_agent, "curl/8");
        assert_eq!(record.ip_address, "10.0.0.1");
        assert_eq!(record.referrer, "https://example.org");
    }

    #[test]
    fn test_last_days_starts_at_midnight() {
        let range = DateRange::last_days(datetime!(2024-05-10 15:30 UTC), 7);
        assert_eq!(range.from, datetime!(2024-05-03 0:00 UTC));
        assert_eq!(range.to, datetime!(2024-05-10 15:30 UTC));
        assert_eq!(range.from.date(), date!(2024 - 05 - 03));
    }

    #[test]
    fn test_last_days_saturates_at_earliest_date() {
        let now = datetime!(2024-05-10 15:30 UTC);
        let range = DateRange::last_days(now, u32::MAX);
        assert_eq!(range.from, PrimitiveDateTime::MIN.assume_utc());
        assert_eq!(range.to, now);
    }

    #[test]
    fn test_days_before() {
        let now = datetime!(2024-05-10 15:30 UTC);
        assert_eq!(days_before(now, 0), now);
        assert_eq!(days_before(now, 10), datetime!(2024-04-30 15:30 UTC));
        assert_eq!(
            days_before(now, u32::MAX),
            PrimitiveDateTime::MIN.assume_utc()
        );
    }

    #[test]
    fn test_range_rejects_inverted_bounds() {
        assert!(
            DateRange::new(datetime!(2024-05-10 0:00 UTC), datetime!(2024-05-01 0:00 UTC))
                .is_err()
        );
    }

    #[test]
    fn test_download_method_parse() {
        assert_eq!("view".parse::<DownloadMethod>().unwrap(), DownloadMethod::View);
        assert!("stream".parse::<DownloadMethod>().is_err());
    }
}
