//! Blob store trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use depot_core::ContentRef;
use futures::{Stream, StreamExt};
use std::pin::Pin;

/// A boxed stream of bytes for streaming reads and writes.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Binary object store addressed by store-issued references.
///
/// A store knows nothing about file metadata or deduplication: every `put`
/// creates a new blob and returns a fresh reference.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Store the stream as a new blob and return its reference.
    ///
    /// `name` is advisory (kept as object metadata where the backend can);
    /// it never determines the reference.
    async fn put(&self, name: &str, data: ByteStream) -> StorageResult<ContentRef>;

    /// Open a stream over a stored blob. Fails with `NotFound` if absent.
    async fn get(&self, content_ref: &ContentRef) -> StorageResult<ByteStream>;

    /// Remove a blob. Removing an absent blob succeeds.
    async fn delete(&self, content_ref: &ContentRef) -> StorageResult<()>;

    /// Check whether a blob exists.
    async fn exists(&self, content_ref: &ContentRef) -> StorageResult<bool>;

    /// Enumerate every stored blob.
    async fn list(&self) -> StorageResult<Vec<ContentRef>>;

    /// Get the backend name for logging and metrics.
    fn backend_name(&self) -> &'static str;

    /// Verify the backend is reachable and writable.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Wrap an in-memory buffer as a single-item stream.
pub fn bytes_stream(data: impl Into<Bytes>) -> ByteStream {
    let data = data.into();
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

/// Drain a stream into one contiguous buffer.
pub async fn read_to_bytes(mut stream: ByteStream) -> StorageResult<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}
