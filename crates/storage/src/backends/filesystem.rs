//! Local filesystem blob backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::{BlobStore, ByteStream};
use async_trait::async_trait;
use bytes::Bytes;
use depot_core::ContentRef;
use futures::StreamExt;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Default chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Directory under the root holding every blob.
const BLOB_DIR: &str = "blobs";

/// Marker in the names of in-progress writes; never listed.
const TEMP_MARKER: &str = ".tmp.";

/// Local filesystem blob store.
///
/// Blobs live at `blobs/<2 hex>/<uuid>` under the root. Writes go to a
/// sibling temp file that is fsynced and renamed into place.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend, creating the root if needed.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(BLOB_DIR)).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn new_ref() -> StorageResult<ContentRef> {
        let id = Uuid::new_v4().simple().to_string();
        Ok(ContentRef::new(format!("{BLOB_DIR}/{}/{id}", &id[..2]))?)
    }

    /// Resolve a reference to a path, rejecting anything that could escape
    /// the root.
    fn ref_path(&self, content_ref: &ContentRef) -> StorageResult<PathBuf> {
        let key = content_ref.as_str();
        if key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
            return Err(StorageError::InvalidRef(format!(
                "path traversal not allowed: {key}"
            )));
        }
        if !key.starts_with(BLOB_DIR) || key.contains(TEMP_MARKER) {
            return Err(StorageError::InvalidRef(format!(
                "not a filesystem blob reference: {key}"
            )));
        }
        for component in Path::new(key).components() {
            if !matches!(component, Component::Normal(_)) {
                return Err(StorageError::InvalidRef(format!(
                    "contains unsafe path component: {key}"
                )));
            }
        }
        Ok(self.root.join(key))
    }

    fn map_not_found(err: std::io::Error, content_ref: &ContentRef) -> StorageError {
        if err.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(content_ref.to_string())
        } else {
            StorageError::Io(err)
        }
    }

    async fn write_stream(temp_path: &Path, mut data: ByteStream) -> StorageResult<u64> {
        let mut file = fs::File::create(temp_path).await?;
        let mut written = 0u64;
        while let Some(chunk) = data.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        // Flush to disk before the rename publishes the blob
        file.sync_all().await?;
        Ok(written)
    }
}

#[async_trait]
impl BlobStore for FilesystemBackend {
    #[instrument(skip(self, data), fields(backend = "filesystem"))]
    async fn put(&self, name: &str, data: ByteStream) -> StorageResult<ContentRef> {
        let content_ref = Self::new_ref()?;
        let path = self.ref_path(&content_ref)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = path.with_file_name(format!(
            "{}{TEMP_MARKER}{}",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Uuid::new_v4()
        ));

        match Self::write_stream(&temp_path, data).await {
            Ok(size) => {
                fs::rename(&temp_path, &path).await?;
                tracing::debug!(content_ref = %content_ref, size, "blob written");
                Ok(content_ref)
            }
            Err(err) => {
                if let Err(cleanup) = fs::remove_file(&temp_path).await
                    && cleanup.kind() != std::io::ErrorKind::NotFound
                {
                    tracing::warn!(
                        path = %temp_path.display(),
                        error = %cleanup,
                        "failed to remove partial blob"
                    );
                }
                Err(err)
            }
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, content_ref: &ContentRef) -> StorageResult<ByteStream> {
        use tokio::io::AsyncReadExt;

        let path = self.ref_path(content_ref)?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| Self::map_not_found(e, content_ref))?;

        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, content_ref: &ContentRef) -> StorageResult<()> {
        let path = self.ref_path(content_ref)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, content_ref: &ContentRef) -> StorageResult<bool> {
        let path = self.ref_path(content_ref)?;
        fs::try_exists(&path).await.map_err(StorageError::Io)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn list(&self) -> StorageResult<Vec<ContentRef>> {
        let base = self.root.join(BLOB_DIR);
        let mut results = Vec::new();
        if !fs::try_exists(&base).await? {
            return Ok(results);
        }

        let mut stack = vec![base];
        while let Some(dir) = stack.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                // file_type() does not follow symlinks; symlinks are skipped
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push(path);
                } else if file_type.is_file()
                    && let Ok(rel) = path.strip_prefix(&self.root)
                {
                    let key = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    if key.contains(TEMP_MARKER) {
                        continue;
                    }
                    results.push(ContentRef::new(key)?);
                }
            }
        }

        results.sort();
        Ok(results)
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await?;
        if !metadata.is_dir() {
            return Err(StorageError::Config(format!(
                "storage root is not a directory: {}",
                self.root.display()
            )));
        }

        let marker = self
            .root
            .join(format!(".health-check{TEMP_MARKER}{}", Uuid::new_v4()));
        fs::write(&marker, b"ok").await?;
        fs::remove_file(&marker).await?;
        Ok(())
    }
}
