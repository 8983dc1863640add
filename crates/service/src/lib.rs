//! Deduplicating file storage with download analytics.
//!
//! This crate ties the stores together:
//! - upload, download, update and delete with content deduplication
//! - download events feeding the download counter and analytics
//! - analytics reporting
//! - an operator sweep reconciling the stores

pub mod analytics;
pub mod bootstrap;
pub mod error;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod scratch;
pub mod storage_service;
pub mod sweep;

pub use analytics::{AnalyticsService, Dashboard, DashboardOverview};
pub use bootstrap::Depot;
pub use error::{ErrorKind, ServiceError, ServiceResult};
pub use events::FileDownloaded;
pub use storage_service::{DownloadContext, StorageService};
pub use sweep::{SweepMode, SweepReport, Sweeper};
