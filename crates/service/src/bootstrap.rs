//! Wiring: stores, the event registry, and the services built on them.

use crate::analytics::AnalyticsService;
use crate::error::{ServiceError, ServiceResult};
use crate::events::FileDownloaded;
use crate::handlers::{DownloadCountHandler, RecordDownloadHandler};
use crate::metrics;
use crate::storage_service::StorageService;
use crate::sweep::Sweeper;
use depot_core::config::AppConfig;
use depot_events::{EventBus, EventRegistry};
use depot_metadata::{AnalyticsStore, MetadataStore};
use depot_storage::BlobStore;
use std::sync::{Arc, Weak};

/// The assembled application.
pub struct Depot {
    config: AppConfig,
    storage: Arc<StorageService>,
    analytics: Arc<AnalyticsService>,
    events: Arc<EventBus>,
}

impl Depot {
    /// Open every store named by `config` and wire the services.
    pub async fn from_config(config: AppConfig) -> ServiceResult<Self> {
        config.validate()?;
        metrics::register_metrics();

        let blobs = depot_storage::from_config(&config.storage).await?;
        blobs.health_check().await?;
        tracing::info!(backend = blobs.backend_name(), "blob store ready");

        let metadata = depot_metadata::from_config(&config.metadata).await?;
        metadata.health_check().await?;
        tracing::info!("metadata store ready");

        let analytics = depot_metadata::analytics_from_config(&config.analytics.store).await?;
        analytics.health_check().await?;
        tracing::info!("analytics store ready");

        Ok(Self::from_parts(config, blobs, metadata, analytics))
    }

    /// Wire already opened stores.
    pub fn from_parts(
        config: AppConfig,
        blobs: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
        analytics_store: Arc<dyn AnalyticsStore>,
    ) -> Self {
        let analytics = Arc::new(AnalyticsService::new(
            metadata.clone(),
            analytics_store,
            config.analytics.clone(),
        ));

        // The count handler needs the service, and the service needs the bus
        // holding that handler.
        let scratch_dir = config.upload.scratch_dir.clone();
        let storage = Arc::new_cyclic(|service: &Weak<StorageService>| {
            let recorder = analytics.clone();
            let registry = EventRegistry::builder()
                .subscribe::<FileDownloaded, _>(DownloadCountHandler::new(service.clone()))
                .subscribe_scoped::<FileDownloaded, _, _>(move || {
                    RecordDownloadHandler::new(recorder.clone())
                })
                .build();
            let bus = EventBus::new(registry)
                .with_failure_hook(Arc::new(|handler: &'static str| {
                    metrics::record_handler_failure(handler)
                }));
            StorageService::new(blobs, metadata, Arc::new(bus), scratch_dir)
        });
        let events = storage.events().clone();

        Self {
            config,
            storage,
            analytics,
            events,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<StorageService> {
        &self.storage
    }

    pub fn analytics(&self) -> &Arc<AnalyticsService> {
        &self.analytics
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(
            self.storage.blobs().clone(),
            self.storage.metadata().clone(),
        )
    }

    /// Wait for every event handler dispatched so far.
    pub async fn drain(&self) {
        self.events.drain().await;
    }

    /// Stop accepting events and wait for in-flight handlers, bounded by
    /// the configured timeout.
    pub async fn shutdown(&self) -> ServiceResult<()> {
        let timeout = self.config.events.shutdown_timeout();
        if self.events.shutdown(timeout).await {
            Ok(())
        } else {
            Err(ServiceError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!(
                    "event handlers still running after {}s",
                    timeout.as_secs()
                ),
            )))
        }
    }
}
