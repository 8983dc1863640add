//! Connection setup shared by the SQLite-backed stores.

use crate::error::MetadataResult;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Default slow-query threshold when the config leaves it unset.
pub(crate) const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

/// Open a pool on the database file at `path`, creating it if needed.
pub(crate) async fn open_file(path: &Path) -> MetadataResult<Pool<Sqlite>> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .foreign_keys(true)
        // Prevent transient "database is locked" errors under concurrent access.
        .busy_timeout(Duration::from_secs(5));

    open(opts).await
}

/// Open a private in-memory database.
pub(crate) async fn open_memory() -> MetadataResult<Pool<Sqlite>> {
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    open(opts).await
}

async fn open(opts: SqliteConnectOptions) -> MetadataResult<Pool<Sqlite>> {
    // A single connection serializes writers and keeps an in-memory
    // database alive for the life of the pool.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(opts)
        .await?;
    Ok(pool)
}

/// Run `fut` and warn when it takes longer than `threshold`.
///
/// SQLite cannot cancel a running statement, so the threshold is advisory.
pub(crate) async fn timed<T, F>(threshold: Duration, op: &'static str, fut: F) -> MetadataResult<T>
where
    F: Future<Output = MetadataResult<T>>,
{
    let started = Instant::now();
    let result = fut.await;
    let elapsed = started.elapsed();
    if elapsed > threshold {
        tracing::warn!(
            op,
            elapsed_ms = elapsed.as_millis() as u64,
            threshold_ms = threshold.as_millis() as u64,
            "slow metadata query"
        );
    }
    result
}
