//! Core domain types and shared logic for depot.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Content hashes and opaque blob references
//! - File records, creation drafts and partial updates
//! - Download analytics records and derived statistics
//! - The pure analytics aggregator
//! - Application configuration

pub mod aggregate;
pub mod analytics;
pub mod blob;
pub mod config;
pub mod error;
pub mod file;
pub mod hash;

pub use analytics::{
    AnalyticsRecord, ClientInfo, DailyStats, DateRange, DownloadMethod, DownloadStatistics,
    FilePopularity, days_before,
};
pub use blob::{BlobRef, ContentRef};
pub use error::{Error, Result};
pub use file::{FilePatch, FileRecord, NewFile, NewFileRecord};
pub use hash::{ContentHash, ContentHasher};

/// Content type recorded when the uploader does not supply one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
