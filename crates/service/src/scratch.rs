//! Scratch copies of incoming uploads.
//!
//! An upload is written to a local temp file in full before anything touches
//! the stores. The content hash is then computed from that persisted copy,
//! and the blob store reads from it again when the content is new.

use crate::error::ServiceResult;
use depot_core::{ContentHash, ContentHasher};
use depot_storage::{ByteStream, StorageError};
use futures::TryStreamExt;
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// A fully persisted upload. The file is removed on drop.
pub struct ScratchFile {
    file: NamedTempFile,
    hash: ContentHash,
    size: u64,
}

impl ScratchFile {
    /// Copy `reader` to a new temp file under `dir` (system temp dir when
    /// `None`), then hash the written file.
    pub async fn persist<R>(mut reader: R, dir: Option<&Path>) -> ServiceResult<Self>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut builder = tempfile::Builder::new();
        builder.prefix("depot-upload-");
        let file = match dir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await?;
                builder.tempfile_in(dir)?
            }
            None => builder.tempfile()?,
        };

        let mut out = tokio::fs::File::from_std(file.reopen()?);
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut size = 0u64;
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n]).await?;
            size += n as u64;
        }
        out.flush().await?;
        out.sync_all().await?;
        drop(out);

        let hash = hash_file(file.path()).await?;
        tracing::debug!(path = %file.path().display(), size, hash = %hash, "upload persisted");
        Ok(Self { file, hash, size })
    }

    pub fn hash(&self) -> ContentHash {
        self.hash
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Stream the persisted bytes for a blob store write.
    pub async fn stream(&self) -> ServiceResult<ByteStream> {
        let file = tokio::fs::File::open(self.file.path()).await?;
        let stream = ReaderStream::with_capacity(file, COPY_BUFFER_SIZE).map_err(StorageError::Io);
        Ok(Box::pin(stream))
    }
}

async fn hash_file(path: &Path) -> ServiceResult<ContentHash> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = ContentHasher::default();
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}
