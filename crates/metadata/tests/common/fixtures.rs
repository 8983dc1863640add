//! Test fixtures.

#![allow(dead_code)]

use depot_core::{
    AnalyticsRecord, ClientInfo, ContentHash, ContentRef, DownloadMethod, FileRecord, NewFile,
    NewFileRecord,
};
use std::collections::BTreeSet;
use time::OffsetDateTime;
use time::macros::datetime;
use uuid::Uuid;

/// Fixed reference instant so ordering assertions are deterministic.
pub const BASE_TIME: OffsetDateTime = datetime!(2024-03-01 12:00 UTC);

pub fn hash_of(content: &str) -> ContentHash {
    ContentHash::compute(content.as_bytes())
}

pub fn content_ref(name: &str) -> ContentRef {
    ContentRef::new(format!("blobs/{name}")).expect("valid ref")
}

pub fn tag_set(tags: &[&str]) -> BTreeSet<String> {
    tags.iter().map(|t| t.to_string()).collect()
}

/// A draft record for `name` whose blob holds `content`.
pub fn new_file_record(name: &str, content: &str, added: OffsetDateTime) -> NewFileRecord {
    NewFileRecord::from_upload(
        NewFile::named(name).with_tags(tag_set(&["docs"])),
        content_ref(content),
        hash_of(content),
        content.len() as u64,
        added,
    )
}

/// A download of `file_id` at `at`, with a fixed size.
pub fn download(file_id: Uuid, name: &str, size: u64, at: OffsetDateTime) -> AnalyticsRecord {
    let file = FileRecord {
        id: file_id,
        content_ref: content_ref(name),
        content_hash: hash_of(name),
        name: name.to_string(),
        description: None,
        added_by: None,
        tags: BTreeSet::new(),
        size,
        content_type: depot_core::DEFAULT_CONTENT_TYPE.to_string(),
        added_date: BASE_TIME,
        last_modified: BASE_TIME,
        download_count: 0,
    };
    AnalyticsRecord::for_download(&file, &ClientInfo::default(), DownloadMethod::Download, at)
}
