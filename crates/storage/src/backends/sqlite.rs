//! Relational blob backend: blobs as fixed-size chunk rows in SQLite.

use crate::error::{StorageError, StorageResult};
use crate::traits::{BlobStore, ByteStream};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use depot_core::ContentRef;
use futures::StreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

/// Size of each stored chunk row (1 MiB).
const CHUNK_SIZE: usize = 1024 * 1024;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS blobs (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    size INTEGER NOT NULL,
    chunk_count INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS blob_chunks (
    blob_id TEXT NOT NULL REFERENCES blobs(id) ON DELETE CASCADE,
    seq INTEGER NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (blob_id, seq)
);
"#;

/// SQLite blob store.
///
/// A blob is one `blobs` row plus `chunk_count` rows in `blob_chunks`,
/// written in a single transaction so readers never see a partial blob.
pub struct SqliteBlobBackend {
    pool: Pool<Sqlite>,
}

impl SqliteBlobBackend {
    /// Open (or create) the blob database at `path`.
    pub async fn new(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        Self::connect(opts).await
    }

    /// In-memory database, for tests.
    pub async fn in_memory() -> StorageResult<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        Self::connect(opts).await
    }

    async fn connect(opts: SqliteConnectOptions) -> StorageResult<Self> {
        // One connection: SQLite serializes writers anyway, and an in-memory
        // database only exists per connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        sqlx::query(SCHEMA_SQL).execute(&pool).await?;
        Ok(Self { pool })
    }

    fn blob_id(content_ref: &ContentRef) -> StorageResult<String> {
        Uuid::parse_str(content_ref.as_str())
            .map(|id| id.simple().to_string())
            .map_err(|_| {
                StorageError::InvalidRef(format!("not a sqlite blob reference: {content_ref}"))
            })
    }

    async fn chunk_count(&self, blob_id: &str) -> StorageResult<Option<i64>> {
        let count: Option<i64> = sqlx::query_scalar("SELECT chunk_count FROM blobs WHERE id = ?")
            .bind(blob_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl BlobStore for SqliteBlobBackend {
    #[instrument(skip(self, data), fields(backend = "sqlite"))]
    async fn put(&self, name: &str, mut data: ByteStream) -> StorageResult<ContentRef> {
        let blob_id = Uuid::new_v4().simple().to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO blobs (id, name, size, chunk_count, created_at) VALUES (?, ?, 0, 0, ?)",
        )
        .bind(&blob_id)
        .bind(name)
        .bind(OffsetDateTime::now_utc())
        .execute(&mut *tx)
        .await?;

        let mut buffer = BytesMut::with_capacity(CHUNK_SIZE);
        let mut seq: i64 = 0;
        let mut size: i64 = 0;
        loop {
            let next = data.next().await;
            let finished = next.is_none();
            if let Some(chunk) = next {
                // Dropping `tx` on error rolls the blob back
                let chunk = chunk?;
                size += chunk.len() as i64;
                buffer.extend_from_slice(&chunk);
            }

            while buffer.len() >= CHUNK_SIZE || (finished && !buffer.is_empty()) {
                let take = buffer.len().min(CHUNK_SIZE);
                let part = buffer.split_to(take);
                sqlx::query("INSERT INTO blob_chunks (blob_id, seq, data) VALUES (?, ?, ?)")
                    .bind(&blob_id)
                    .bind(seq)
                    .bind(part.as_ref())
                    .execute(&mut *tx)
                    .await?;
                seq += 1;
            }

            if finished {
                break;
            }
        }

        sqlx::query("UPDATE blobs SET size = ?, chunk_count = ? WHERE id = ?")
            .bind(size)
            .bind(seq)
            .bind(&blob_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!(blob_id = %blob_id, size, chunks = seq, "blob written");
        Ok(ContentRef::new(blob_id)?)
    }

    #[instrument(skip(self), fields(backend = "sqlite"))]
    async fn get(&self, content_ref: &ContentRef) -> StorageResult<ByteStream> {
        let blob_id = Self::blob_id(content_ref)?;
        let chunk_count = self
            .chunk_count(&blob_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(content_ref.to_string()))?;

        // Fetch one chunk per poll so a long read never pins the connection
        let pool = self.pool.clone();
        let missing = content_ref.to_string();
        let stream = async_stream::try_stream! {
            for seq in 0..chunk_count {
                let data: Option<Vec<u8>> = sqlx::query_scalar(
                    "SELECT data FROM blob_chunks WHERE blob_id = ? AND seq = ?",
                )
                .bind(&blob_id)
                .bind(seq)
                .fetch_optional(&pool)
                .await?;
                let data = data.ok_or_else(|| StorageError::NotFound(missing.clone()))?;
                yield Bytes::from(data);
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self), fields(backend = "sqlite"))]
    async fn delete(&self, content_ref: &ContentRef) -> StorageResult<()> {
        let blob_id = Self::blob_id(content_ref)?;
        sqlx::query("DELETE FROM blobs WHERE id = ?")
            .bind(&blob_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "sqlite"))]
    async fn exists(&self, content_ref: &ContentRef) -> StorageResult<bool> {
        let blob_id = Self::blob_id(content_ref)?;
        Ok(self.chunk_count(&blob_id).await?.is_some())
    }

    #[instrument(skip(self), fields(backend = "sqlite"))]
    async fn list(&self) -> StorageResult<Vec<ContentRef>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM blobs ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        ids.into_iter()
            .map(|id| ContentRef::new(id).map_err(StorageError::from))
            .collect()
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    #[instrument(skip(self), fields(backend = "sqlite"))]
    async fn health_check(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{bytes_stream, read_to_bytes};

    #[tokio::test]
    async fn test_blob_spans_multiple_chunk_rows() {
        let backend = SqliteBlobBackend::in_memory().await.unwrap();
        let data: Vec<u8> = (0..CHUNK_SIZE * 2 + 100).map(|i| (i % 251) as u8).collect();
        let r = backend.put("big.bin", bytes_stream(data.clone())).await.unwrap();

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blob_chunks")
            .fetch_one(&backend.pool)
            .await
            .unwrap();
        assert_eq!(rows, 3);

        let read = read_to_bytes(backend.get(&r).await.unwrap()).await.unwrap();
        assert_eq!(read.as_ref(), data.as_slice());
    }

    #[tokio::test]
    async fn test_empty_blob_has_no_chunks() {
        let backend = SqliteBlobBackend::in_memory().await.unwrap();
        let r = backend.put("empty", bytes_stream(Bytes::new())).await.unwrap();
        assert!(backend.exists(&r).await.unwrap());
        let read = read_to_bytes(backend.get(&r).await.unwrap()).await.unwrap();
        assert!(read.is_empty());
    }

    #[tokio::test]
    async fn test_failed_stream_rolls_back() {
        let backend = SqliteBlobBackend::in_memory().await.unwrap();
        let failing: ByteStream = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(StorageError::Io(std::io::Error::other("client went away"))),
        ]));
        assert!(backend.put("broken", failing).await.is_err());
        assert!(backend.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_cascades_chunks() {
        let backend = SqliteBlobBackend::in_memory().await.unwrap();
        let r = backend.put("x", bytes_stream("payload")).await.unwrap();
        backend.delete(&r).await.unwrap();
        backend.delete(&r).await.unwrap();

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blob_chunks")
            .fetch_one(&backend.pool)
            .await
            .unwrap();
        assert_eq!(rows, 0);
        assert!(matches!(
            backend.get(&r).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_non_uuid_refs() {
        let backend = SqliteBlobBackend::in_memory().await.unwrap();
        let r = ContentRef::new("blobs/ab/cd").unwrap();
        assert!(matches!(
            backend.exists(&r).await,
            Err(StorageError::InvalidRef(_))
        ));
    }
}
