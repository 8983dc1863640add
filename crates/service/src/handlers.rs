//! Handlers reacting to download events.

use crate::analytics::AnalyticsService;
use crate::error::ServiceError;
use crate::events::FileDownloaded;
use crate::storage_service::StorageService;
use async_trait::async_trait;
use depot_events::{BoxError, EventHandler};
use std::sync::{Arc, Weak};

/// Adds one to the downloaded file's counter.
///
/// Holds the service weakly: the service owns the bus that owns this handler.
pub struct DownloadCountHandler {
    service: Weak<StorageService>,
}

impl DownloadCountHandler {
    pub fn new(service: Weak<StorageService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl EventHandler<FileDownloaded> for DownloadCountHandler {
    async fn run(&self, event: Arc<FileDownloaded>) -> Result<(), BoxError> {
        let Some(service) = self.service.upgrade() else {
            tracing::debug!(id = %event.file.id, "storage service dropped; download not counted");
            return Ok(());
        };
        match service.increment_download_count(&event.file).await {
            Ok(_) => Ok(()),
            Err(ServiceError::NotFound(_)) => {
                tracing::debug!(id = %event.file.id, "file deleted before download was counted");
                Ok(())
            }
            Err(err) => Err(Box::new(err)),
        }
    }
}

/// Persists an analytics record for the download.
///
/// Registered through a factory, so each dispatch gets its own instance.
pub struct RecordDownloadHandler {
    analytics: Arc<AnalyticsService>,
}

impl RecordDownloadHandler {
    pub fn new(analytics: Arc<AnalyticsService>) -> Self {
        Self { analytics }
    }
}

#[async_trait]
impl EventHandler<FileDownloaded> for RecordDownloadHandler {
    async fn run(&self, event: Arc<FileDownloaded>) -> Result<(), BoxError> {
        self.analytics
            .record_download(event.file.id, &event.client, event.method, event.at)
            .await?;
        Ok(())
    }
}
