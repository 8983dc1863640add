//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid content reference: {0}")]
    InvalidContentRef(String),

    #[error("invalid date range: {from} is after {to}")]
    InvalidRange { from: String, to: String },

    #[error("unknown download method: {0}")]
    UnknownDownloadMethod(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
