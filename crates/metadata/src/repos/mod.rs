//! Repository traits for metadata operations.

pub mod analytics;
pub mod blobs;
pub mod files;

pub use analytics::AnalyticsRepo;
pub use blobs::{BlobRefRepo, ReleaseOutcome};
pub use files::FileRepo;
