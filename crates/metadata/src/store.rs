//! Metadata store trait and the SQLite implementation.

use crate::error::MetadataResult;
use crate::repos::{BlobRefRepo, FileRepo};
use crate::sqlite;
use async_trait::async_trait;
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: FileRepo + BlobRefRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    query_timeout: Duration,
}

impl SqliteStore {
    /// Create a new SQLite store and apply the schema.
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

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::error::MetadataError;
    use crate::models::{BlobRefRow, FileRow, encode_tags, to_i64};
    use crate::repos::ReleaseOutcome;
    use depot_core::{BlobRef, ContentHash, ContentRef, FilePatch, FileRecord, NewFileRecord};
    use std::collections::HashMap;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn file_not_found(id: Uuid) -> MetadataError {
        MetadataError::NotFound(format!("file {id}"))
    }

    fn into_records(rows: Vec<FileRow>) -> MetadataResult<Vec<FileRecord>> {
        rows.into_iter().map(FileRecord::try_from).collect()
    }

    #[async_trait]
    impl FileRepo for SqliteStore {
        async fn add_file(&self, file: &NewFileRecord) -> MetadataResult<FileRecord> {
            let record = file.clone().into_record(Uuid::new_v4());
            sqlx::query(
                r#"
                INSERT INTO files (id, content_ref, content_hash, name, description, added_by,
                                   tags, size, content_type, added_date, last_modified, download_count)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
                "#,
            )
            .bind(record.id)
            .bind(record.content_ref.as_str())
            .bind(record.content_hash.to_hex())
            .bind(&record.name)
            .bind(&record.description)
            .bind(&record.added_by)
            .bind(encode_tags(&record.tags)?)
            .bind(to_i64(record.size, "size")?)
            .bind(&record.content_type)
            .bind(record.added_date)
            .bind(record.last_modified)
            .execute(&self.pool)
            .await?;
            Ok(record)
        }

        async fn get_file(&self, id: Uuid) -> MetadataResult<FileRecord> {
            let row = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| file_not_found(id))?;
            row.try_into()
        }

        async fn get_file_by_hash(
            &self,
            hash: &ContentHash,
        ) -> MetadataResult<Option<FileRecord>> {
            let row = sqlx::query_as::<_, FileRow>(
                "SELECT * FROM files WHERE content_hash = ? ORDER BY added_date, id LIMIT 1",
            )
            .bind(hash.to_hex())
            .fetch_optional(&self.pool)
            .await?;
            row.map(FileRecord::try_from).transpose()
        }

        async fn list_files(&self) -> MetadataResult<Vec<FileRecord>> {
            sqlite::timed(self.query_timeout, "list_files", async {
                let rows =
                    sqlx::query_as::<_, FileRow>("SELECT * FROM files ORDER BY added_date, id")
                        .fetch_all(&self.pool)
                        .await?;
                into_records(rows)
            })
            .await
        }

        async fn list_files_by_tag(&self, tag: &str) -> MetadataResult<Vec<FileRecord>> {
            sqlite::timed(self.query_timeout, "list_files_by_tag", async {
                let rows = sqlx::query_as::<_, FileRow>(
                    r#"
                    SELECT * FROM files
                    WHERE EXISTS (SELECT 1 FROM json_each(files.tags) WHERE json_each.value = ?)
                    ORDER BY added_date, id
                    "#,
                )
                .bind(tag)
                .fetch_all(&self.pool)
                .await?;
                into_records(rows)
            })
            .await
        }

        async fn update_file(
            &self,
            id: Uuid,
            patch: &FilePatch,
            now: OffsetDateTime,
        ) -> MetadataResult<FileRecord> {
            let mut tx = self.pool.begin().await?;

            let row = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| file_not_found(id))?;
            let mut record = FileRecord::try_from(row)?;
            patch.apply(&mut record, now);

            sqlx::query(
                r#"
                UPDATE files
                SET name = ?, description = ?, added_by = ?, tags = ?, last_modified = ?
                WHERE id = ?
                "#,
            )
            .bind(&record.name)
            .bind(&record.description)
            .bind(&record.added_by)
            .bind(encode_tags(&record.tags)?)
            .bind(record.last_modified)
            .bind(id)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(record)
        }

        async fn delete_file(&self, id: Uuid) -> MetadataResult<FileRecord> {
            let row = sqlx::query_as::<_, FileRow>("DELETE FROM files WHERE id = ? RETURNING *")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| file_not_found(id))?;
            row.try_into()
        }

        async fn increment_download_count(
            &self,
            id: Uuid,
            now: OffsetDateTime,
        ) -> MetadataResult<u64> {
            let count: i64 = sqlx::query_scalar(
                r#"
                UPDATE files
                SET download_count = download_count + 1, last_modified = ?
                WHERE id = ?
                RETURNING download_count
                "#,
            )
            .bind(now)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| file_not_found(id))?;
            u64::try_from(count)
                .map_err(|_| MetadataError::Corrupt(format!("negative download_count: {count}")))
        }

        async fn count_files_by_ref(&self, content_ref: &ContentRef) -> MetadataResult<u64> {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE content_ref = ?")
                    .bind(content_ref.as_str())
                    .fetch_one(&self.pool)
                    .await?;
            Ok(count.max(0) as u64)
        }

        async fn reference_counts(&self) -> MetadataResult<HashMap<ContentRef, u64>> {
            let rows: Vec<(String, i64)> =
                sqlx::query_as("SELECT content_ref, COUNT(*) FROM files GROUP BY content_ref")
                    .fetch_all(&self.pool)
                    .await?;
            rows.into_iter()
                .map(|(content_ref, count)| -> MetadataResult<_> {
                    Ok((ContentRef::new(content_ref)?, count.max(0) as u64))
                })
                .collect()
        }
    }

    #[async_trait]
    impl BlobRefRepo for SqliteStore {
        async fn acquire_blob(&self, hash: &ContentHash) -> MetadataResult<Option<BlobRef>> {
            let row = sqlx::query_as::<_, BlobRefRow>(
                "UPDATE blob_refs SET refcount = refcount + 1 WHERE content_hash = ? RETURNING *",
            )
            .bind(hash.to_hex())
            .fetch_optional(&self.pool)
            .await?;
            row.map(BlobRef::try_from).transpose()
        }

        async fn register_blob(
            &self,
            hash: &ContentHash,
            content_ref: &ContentRef,
            size: u64,
            now: OffsetDateTime,
        ) -> MetadataResult<BlobRef> {
            let row = sqlx::query_as::<_, BlobRefRow>(
                r#"
                INSERT INTO blob_refs (content_hash, content_ref, size, refcount, created_at)
                VALUES (?, ?, ?, 1, ?)
                ON CONFLICT(content_hash) DO UPDATE SET refcount = blob_refs.refcount + 1
                RETURNING *
                "#,
            )
            .bind(hash.to_hex())
            .bind(content_ref.as_str())
            .bind(to_i64(size, "size")?)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
            row.try_into()
        }

        async fn release_blob(&self, content_ref: &ContentRef) -> MetadataResult<ReleaseOutcome> {
            let mut tx = self.pool.begin().await?;

            let remaining: Option<i64> = sqlx::query_scalar(
                r#"
                UPDATE blob_refs SET refcount = MAX(0, refcount - 1)
                WHERE content_ref = ?
                RETURNING refcount
                "#,
            )
            .bind(content_ref.as_str())
            .fetch_optional(&mut *tx)
            .await?;

            let outcome = match remaining {
                None => ReleaseOutcome::Untracked,
                Some(n) if n > 0 => ReleaseOutcome::Retained(n as u64),
                Some(_) => {
                    sqlx::query("DELETE FROM blob_refs WHERE content_ref = ? AND refcount = 0")
                        .bind(content_ref.as_str())
                        .execute(&mut *tx)
                        .await?;
                    ReleaseOutcome::Unreferenced
                }
            };

            tx.commit().await?;
            Ok(outcome)
        }

        async fn get_blob_ref(&self, content_ref: &ContentRef) -> MetadataResult<Option<BlobRef>> {
            let row =
                sqlx::query_as::<_, BlobRefRow>("SELECT * FROM blob_refs WHERE content_ref = ?")
                    .bind(content_ref.as_str())
                    .fetch_optional(&self.pool)
                    .await?;
            row.map(BlobRef::try_from).transpose()
        }

        async fn list_blob_refs(&self) -> MetadataResult<Vec<BlobRef>> {
            let rows = sqlx::query_as::<_, BlobRefRow>(
                "SELECT * FROM blob_refs ORDER BY created_at, content_hash",
            )
            .fetch_all(&self.pool)
            .await?;
            rows.into_iter().map(BlobRef::try_from).collect()
        }

        async fn set_blob_refcount(
            &self,
            content_ref: &ContentRef,
            refcount: u64,
        ) -> MetadataResult<bool> {
            let result = sqlx::query("UPDATE blob_refs SET refcount = ? WHERE content_ref = ?")
                .bind(to_i64(refcount, "refcount")?)
                .bind(content_ref.as_str())
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn delete_blob_ref(&self, content_ref: &ContentRef) -> MetadataResult<bool> {
            let result = sqlx::query("DELETE FROM blob_refs WHERE content_ref = ?")
                .bind(content_ref.as_str())
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        }
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS blob_refs (
    content_hash TEXT PRIMARY KEY,
    content_ref TEXT NOT NULL UNIQUE,
    size INTEGER NOT NULL,
    refcount INTEGER NOT NULL CHECK (refcount >= 0),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS files (
    id BLOB PRIMARY KEY,
    content_ref TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    added_by TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    size INTEGER NOT NULL,
    content_type TEXT NOT NULL,
    added_date TEXT NOT NULL,
    last_modified TEXT NOT NULL,
    download_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_files_content_hash ON files(content_hash);
CREATE INDEX IF NOT EXISTS idx_files_content_ref ON files(content_ref);
"#;
