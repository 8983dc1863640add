//! File record repository.

use crate::error::MetadataResult;
use async_trait::async_trait;
use depot_core::{ContentHash, ContentRef, FilePatch, FileRecord, NewFileRecord};
use std::collections::HashMap;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for file metadata records.
#[async_trait]
pub trait FileRepo: Send + Sync {
    /// Insert a record under a freshly generated id and return it.
    async fn add_file(&self, file: &NewFileRecord) -> MetadataResult<FileRecord>;

    /// Get a record by id. Fails with `NotFound` if absent.
    async fn get_file(&self, id: Uuid) -> MetadataResult<FileRecord>;

    /// Get the oldest record carrying `hash`, if any.
    async fn get_file_by_hash(&self, hash: &ContentHash) -> MetadataResult<Option<FileRecord>>;

    /// List every record, oldest first.
    async fn list_files(&self) -> MetadataResult<Vec<FileRecord>>;

    /// List records carrying exactly `tag`.
    async fn list_files_by_tag(&self, tag: &str) -> MetadataResult<Vec<FileRecord>>;

    /// Apply a partial update atomically. Fails with `NotFound` if absent.
    async fn update_file(
        &self,
        id: Uuid,
        patch: &FilePatch,
        now: OffsetDateTime,
    ) -> MetadataResult<FileRecord>;

    /// Delete a record and return what was removed. Fails with `NotFound` if absent.
    async fn delete_file(&self, id: Uuid) -> MetadataResult<FileRecord>;

    /// Atomically add one download and stamp `last_modified`; returns the new count.
    async fn increment_download_count(&self, id: Uuid, now: OffsetDateTime) -> MetadataResult<u64>;

    /// Count records pointing at `content_ref`.
    async fn count_files_by_ref(&self, content_ref: &ContentRef) -> MetadataResult<u64>;

    /// Number of records per referenced blob.
    async fn reference_counts(&self) -> MetadataResult<HashMap<ContentRef, u64>>;
}
