//! Blob reference-count repository.
//!
//! Each stored blob has one row keyed by content hash. Every transition
//! (acquire, register, release) is a single atomic statement or transaction,
//! so concurrent uploads and deletes of identical content never act on a
//! stale count.

use crate::error::MetadataResult;
use async_trait::async_trait;
use depot_core::{BlobRef, ContentHash, ContentRef};
use time::OffsetDateTime;

/// Result of dropping one reference to a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Other records still reference the blob.
    Retained(u64),
    /// The last reference was dropped and the row removed; the blob may be deleted.
    Unreferenced,
    /// No row tracks this reference.
    Untracked,
}

/// Repository for blob reference counts.
#[async_trait]
pub trait BlobRefRepo: Send + Sync {
    /// Take a reference on the blob holding `hash`, if one is tracked.
    async fn acquire_blob(&self, hash: &ContentHash) -> MetadataResult<Option<BlobRef>>;

    /// Track a newly written blob with one reference.
    ///
    /// If another writer registered the same hash first, that row gains the
    /// reference instead and is returned; its `content_ref` differs from the
    /// one passed in and the caller's blob is surplus.
    async fn register_blob(
        &self,
        hash: &ContentHash,
        content_ref: &ContentRef,
        size: u64,
        now: OffsetDateTime,
    ) -> MetadataResult<BlobRef>;

    /// Drop one reference; removes the row when the count reaches zero.
    async fn release_blob(&self, content_ref: &ContentRef) -> MetadataResult<ReleaseOutcome>;

    /// Get the row tracking `content_ref`.
    async fn get_blob_ref(&self, content_ref: &ContentRef) -> MetadataResult<Option<BlobRef>>;

    /// List every tracked blob.
    async fn list_blob_refs(&self) -> MetadataResult<Vec<BlobRef>>;

    /// Overwrite a stored count. Returns false if no row matched.
    async fn set_blob_refcount(
        &self,
        content_ref: &ContentRef,
        refcount: u64,
    ) -> MetadataResult<bool>;

    /// Remove a row regardless of its count. Returns false if no row matched.
    async fn delete_blob_ref(&self, content_ref: &ContentRef) -> MetadataResult<bool>;
}
