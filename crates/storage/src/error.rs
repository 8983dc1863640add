//! Storage error types.

use thiserror::Error;

/// Blob store operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid content reference: {0}")]
    InvalidRef(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<depot_core::Error> for StorageError {
    fn from(err: depot_core::Error) -> Self {
        StorageError::InvalidRef(err.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
