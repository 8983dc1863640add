//! File records: user-facing metadata attached to stored content.

use crate::blob::ContentRef;
use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use time::OffsetDateTime;
use uuid::Uuid;

/// A metadata record describing one logical file.
///
/// Many records may point at the same `content_ref`; each keeps its own
/// name, tags and download counter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,
    pub content_ref: ContentRef,
    pub content_hash: ContentHash,
    pub name: String,
    pub description: Option<String>,
    pub added_by: Option<String>,
    pub tags: BTreeSet<String>,
    pub size: u64,
    pub content_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub added_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_modified: OffsetDateTime,
    pub download_count: u64,
}

impl FileRecord {
    /// Whether this record carries `tag` exactly (no substring matching).
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// Caller-supplied metadata for an upload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFile {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub added_by: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl NewFile {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_added_by(mut self, added_by: impl Into<String>) -> Self {
        self.added_by = Some(added_by.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Returns the reason this metadata cannot be stored, if any.
    pub fn validation_error(&self) -> Option<&'static str> {
        if self.name.trim().is_empty() {
            return Some("file name is required");
        }
        None
    }
}

/// A fully resolved record ready for insertion; the repository assigns the id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewFileRecord {
    pub content_ref: ContentRef,
    pub content_hash: ContentHash,
    pub name: String,
    pub description: Option<String>,
    pub added_by: Option<String>,
    pub tags: BTreeSet<String>,
    pub size: u64,
    pub content_type: String,
    pub added_date: OffsetDateTime,
}

impl NewFileRecord {
    /// Resolve upload metadata against the stored blob it will point at.
    pub fn from_upload(
        file: NewFile,
        content_ref: ContentRef,
        content_hash: ContentHash,
        size: u64,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            content_ref,
            content_hash,
            name: file.name,
            description: file.description,
            added_by: file.added_by,
            tags: file.tags,
            size,
            content_type: file
                .content_type
                .unwrap_or_else(|| crate::DEFAULT_CONTENT_TYPE.to_string()),
            added_date: now,
        }
    }

    /// Materialize the record under an id chosen by the repository.
    pub fn into_record(self, id: Uuid) -> FileRecord {
        FileRecord {
            id,
            content_ref: self.content_ref,
            content_hash: self.content_hash,
            name: self.name,
            description: self.description,
            added_by: self.added_by,
            tags: self.tags,
            size: self.size,
            content_type: self.content_type,
            added_date: self.added_date,
            last_modified: self.added_date,
            download_count: 0,
        }
    }
}

/// Partial update: only `Some` fields overwrite the stored value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub added_by: Option<String>,
    #[serde(default)]
    pub tags: Option<BTreeSet<String>>,
}

impl FilePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.added_by.is_none()
            && self.tags.is_none()
    }

    /// Apply the present fields to `record` and stamp `last_modified`.
    ///
    /// `download_count`, content identity and `added_date` are never touched.
    pub fn apply(&self, record: &mut FileRecord, now: OffsetDateTime) {
        if let Some(name) = &self.name {
            record.name = name.clone();
        }
        if let Some(description) = &self.description {
            record.description = Some(description.clone());
        }
        if let Some(added_by) = &self.added_by {
            record.added_by = Some(added_by.clone());
        }
        if let Some(tags) = &self.tags {
            record.tags = tags.clone();
        }
        record.last_modified = now;
    }
}
