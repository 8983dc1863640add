//! Domain events published by the storage service.

use depot_core::{ClientInfo, DownloadMethod, FileRecord};
use depot_events::Event;
use time::OffsetDateTime;

/// A file was downloaded or viewed. Carries the record as it was served.
#[derive(Clone, Debug)]
pub struct FileDownloaded {
    pub file: FileRecord,
    pub client: ClientInfo,
    pub method: DownloadMethod,
    pub at: OffsetDateTime,
}

impl Event for FileDownloaded {
    fn name(&self) -> &'static str {
        "file_downloaded"
    }
}
