//! Deduplicating storage orchestration over a blob store and a metadata store.

use crate::error::{ServiceError, ServiceResult};
use crate::events::FileDownloaded;
use crate::metrics;
use crate::scratch::ScratchFile;
use depot_core::{
    ClientInfo, ContentHash, ContentRef, DownloadMethod, FilePatch, FileRecord, NewFile,
    NewFileRecord,
};
use depot_events::{EventBus, EventError};
use depot_metadata::{MetadataStore, ReleaseOutcome};
use depot_storage::{BlobStore, ByteStream};
use std::path::PathBuf;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

/// Who is downloading, and how.
#[derive(Clone, Debug, Default)]
pub struct DownloadContext {
    pub client: ClientInfo,
    pub method: DownloadMethod,
    /// Checked once before the download event is dispatched.
    pub cancel: Option<CancellationToken>,
}

impl DownloadContext {
    pub fn view() -> Self {
        Self {
            method: DownloadMethod::View,
            ..Self::default()
        }
    }

    pub fn with_client(mut self, client: ClientInfo) -> Self {
        self.client = client;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Owns deduplication and the lifetime of stored blobs.
///
/// Each blob is written once per content hash and shared by every record
/// carrying that hash. The metadata store keeps a reference count per blob;
/// a blob is removed only when its last record goes.
pub struct StorageService {
    blobs: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
    events: Arc<EventBus>,
    scratch_dir: Option<PathBuf>,
}

impl StorageService {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
        events: Arc<EventBus>,
        scratch_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            blobs,
            metadata,
            events,
            scratch_dir,
        }
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Store `reader` under a new record described by `file`.
    ///
    /// Content already stored under the same hash is reused without a blob
    /// write; either way exactly one record is inserted.
    #[instrument(skip(self, reader, file), fields(name = %file.name))]
    pub async fn upload<R>(&self, reader: R, file: NewFile) -> ServiceResult<FileRecord>
    where
        R: AsyncRead + Unpin + Send,
    {
        if let Some(reason) = file.validation_error() {
            return Err(ServiceError::InvalidInput(reason.to_string()));
        }

        let scratch = ScratchFile::persist(reader, self.scratch_dir.as_deref()).await?;
        let hash = scratch.hash();
        let size = scratch.size();
        let now = OffsetDateTime::now_utc();

        let content_ref = match self.metadata.acquire_blob(&hash).await? {
            Some(existing) => {
                metrics::DEDUP_HITS.inc();
                metrics::BYTES_DEDUPLICATED.inc_by(size);
                tracing::debug!(hash = %hash, content_ref = %existing.content_ref, "reusing stored blob");
                existing.content_ref
            }
            None => self.store_new_blob(&file.name, &scratch, now).await?,
        };

        let draft = NewFileRecord::from_upload(file, content_ref.clone(), hash, size, now);
        match self.metadata.add_file(&draft).await {
            Ok(record) => {
                metrics::UPLOADS.inc();
                tracing::info!(id = %record.id, size, hash = %hash, "file uploaded");
                Ok(record)
            }
            Err(err) => {
                // Hand back the reference taken above so the count stays exact
                self.release_reference(&content_ref).await;
                Err(err.into())
            }
        }
    }

    /// Write new content and register it, settling a lost race with a
    /// concurrent upload of the same hash in favour of the winner's blob.
    async fn store_new_blob(
        &self,
        name: &str,
        scratch: &ScratchFile,
        now: OffsetDateTime,
    ) -> ServiceResult<ContentRef> {
        let written = self.blobs.put(name, scratch.stream().await?).await?;
        metrics::BLOB_WRITES.inc();

        let registered = match self
            .metadata
            .register_blob(&scratch.hash(), &written, scratch.size(), now)
            .await
        {
            Ok(registered) => registered,
            Err(err) => {
                self.delete_blob(&written).await;
                return Err(err.into());
            }
        };

        if registered.content_ref != written {
            tracing::debug!(
                hash = %scratch.hash(),
                canonical = %registered.content_ref,
                surplus = %written,
                "concurrent upload stored the same content first"
            );
            metrics::DEDUP_HITS.inc();
            self.delete_blob(&written).await;
        }
        Ok(registered.content_ref)
    }

    /// Open a record's content and publish a download event.
    pub async fn download(&self, id: Uuid) -> ServiceResult<(ByteStream, FileRecord)> {
        self.download_with(id, DownloadContext::default()).await
    }

    /// Open a record's content and publish a [`FileDownloaded`] event.
    ///
    /// The download count and analytics are updated by event handlers after
    /// this returns. A cancelled context fails with `Cancelled` before the
    /// event is dispatched.
    #[instrument(skip(self, context), fields(method = %context.method))]
    pub async fn download_with(
        &self,
        id: Uuid,
        context: DownloadContext,
    ) -> ServiceResult<(ByteStream, FileRecord)> {
        let record = self.metadata.get_file(id).await?;
        let stream = self.blobs.get(&record.content_ref).await?;

        let event = FileDownloaded {
            file: record.clone(),
            client: context.client,
            method: context.method,
            at: OffsetDateTime::now_utc(),
        };
        let published = match &context.cancel {
            Some(cancel) => self.events.publish_with_cancel(event, cancel),
            None => self.events.publish(event),
        };
        match published {
            Ok(_) => metrics::EVENTS_PUBLISHED.inc(),
            Err(EventError::Cancelled) => return Err(ServiceError::Cancelled),
            Err(EventError::Closed) => {
                tracing::warn!(id = %id, "event bus closed; download not counted");
            }
        }

        metrics::DOWNLOADS.inc();
        Ok((stream, record))
    }

    pub async fn get(&self, id: Uuid) -> ServiceResult<FileRecord> {
        Ok(self.metadata.get_file(id).await?)
    }

    pub async fn find_by_hash(&self, hash: &ContentHash) -> ServiceResult<Option<FileRecord>> {
        Ok(self.metadata.get_file_by_hash(hash).await?)
    }

    pub async fn list_all(&self) -> ServiceResult<Vec<FileRecord>> {
        Ok(self.metadata.list_files().await?)
    }

    /// Records carrying exactly `tag`.
    pub async fn list_by_tag(&self, tag: &str) -> ServiceResult<Vec<FileRecord>> {
        Ok(self.metadata.list_files_by_tag(tag).await?)
    }

    /// Apply the fields present in `patch`; the download count is untouched.
    #[instrument(skip(self, patch))]
    pub async fn update(&self, id: Uuid, patch: FilePatch) -> ServiceResult<FileRecord> {
        if let Some(name) = &patch.name
            && name.trim().is_empty()
        {
            return Err(ServiceError::InvalidInput(
                "file name cannot be blank".to_string(),
            ));
        }
        let record = self
            .metadata
            .update_file(id, &patch, OffsetDateTime::now_utc())
            .await?;
        tracing::info!(id = %id, "file metadata updated");
        Ok(record)
    }

    /// Delete a record and drop its reference on the stored blob.
    ///
    /// Returns the deleted record's name. The blob goes only when no other
    /// record refers to it; a failure there is logged and left to the sweep.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> ServiceResult<String> {
        let record = self.metadata.delete_file(id).await?;
        self.release_reference(&record.content_ref).await;
        tracing::info!(id = %id, name = %record.name, "file deleted");
        Ok(record.name)
    }

    /// Add one download to `file` and refresh its modification time.
    pub async fn increment_download_count(&self, file: &FileRecord) -> ServiceResult<u64> {
        let count = self
            .metadata
            .increment_download_count(file.id, OffsetDateTime::now_utc())
            .await?;
        tracing::debug!(id = %file.id, count, "download counted");
        Ok(count)
    }

    async fn release_reference(&self, content_ref: &ContentRef) {
        let outcome = match self.metadata.release_blob(content_ref).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(content_ref = %content_ref, error = %err, "failed to release blob reference");
                return;
            }
        };

        let unreferenced = match outcome {
            ReleaseOutcome::Retained(remaining) => {
                tracing::debug!(content_ref = %content_ref, remaining, "blob still referenced");
                false
            }
            ReleaseOutcome::Unreferenced => true,
            // Not tracked by the counter: fall back to counting records
            ReleaseOutcome::Untracked => {
                match self.metadata.count_files_by_ref(content_ref).await {
                    Ok(count) => count == 0,
                    Err(err) => {
                        tracing::warn!(content_ref = %content_ref, error = %err, "failed to count blob references");
                        false
                    }
                }
            }
        };

        if unreferenced {
            self.delete_blob(content_ref).await;
        }
    }

    async fn delete_blob(&self, content_ref: &ContentRef) {
        match self.blobs.delete(content_ref).await {
            Ok(()) => {
                metrics::BLOB_DELETES.inc();
                tracing::debug!(content_ref = %content_ref, "blob deleted");
            }
            Err(err) => {
                tracing::warn!(content_ref = %content_ref, error = %err, "failed to delete blob");
            }
        }
    }
}

impl std::fmt::Debug for StorageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageService")
            .field("backend", &self.blobs.backend_name())
            .field("scratch_dir", &self.scratch_dir)
            .finish()
    }
}
