//! Blob references shared between the blob store and the metadata store.

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Opaque pointer to a stored blob.
///
/// Produced by a blob store on `put` and meaningful only to that store.
/// Several file records share one reference when their content is identical.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentRef(String);

impl ContentRef {
    /// Wrap a store-issued reference, rejecting empty or control-character input.
    pub fn new(value: impl Into<String>) -> crate::Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(crate::Error::InvalidContentRef("empty reference".to_string()));
        }
        if value.chars().any(char::is_control) {
            return Err(crate::Error::InvalidContentRef(format!(
                "control characters in {value:?}"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentRef({})", self.0)
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentRef {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Store-level reference count for one stored blob.
///
/// `refcount` equals the number of file records pointing at `content_ref`
/// whenever the stores are consistent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    pub content_hash: ContentHash,
    pub content_ref: ContentRef,
    pub size: u64,
    pub refcount: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_ref_rejects_empty_and_control_chars() {
        assert!(ContentRef::new("").is_err());
        assert!(ContentRef::new("blobs/ab\n").is_err());
        let r = ContentRef::new("blobs/ab/1234").unwrap();
        assert_eq!(r.as_str(), "blobs/ab/1234");
        assert_eq!(r.to_string(), "blobs/ab/1234");
    }
}
