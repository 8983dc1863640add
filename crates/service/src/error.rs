//! Service error types.

use depot_events::EventError;
use depot_metadata::MetadataError;
use depot_storage::StorageError;
use serde::Serialize;

/// Coarse classification callers branch on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    Cancelled,
    BackendFailure,
}

/// Service error type.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("metadata error: {0}")]
    Metadata(MetadataError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidInput(_) | Self::Config(_) => ErrorKind::InvalidInput,
            Self::Cancelled => ErrorKind::Cancelled,
            // A missing blob behind an existing record is an inconsistency,
            // not a missing file.
            Self::Storage(_) | Self::Metadata(_) | Self::Io(_) => ErrorKind::BackendFailure,
        }
    }

    /// Message safe to show to callers; backend details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::NotFound(what) => format!("{what} not found"),
            Self::InvalidInput(reason) => reason.clone(),
            Self::Config(reason) => format!("invalid configuration: {reason}"),
            Self::Cancelled => "operation cancelled".to_string(),
            Self::Storage(_) | Self::Metadata(_) | Self::Io(_) => {
                "storage backend failure".to_string()
            }
        }
    }
}

impl From<MetadataError> for ServiceError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::NotFound(what) => Self::NotFound(what),
            other => Self::Metadata(other),
        }
    }
}

impl From<depot_core::Error> for ServiceError {
    fn from(err: depot_core::Error) -> Self {
        match err {
            depot_core::Error::Config(reason) => Self::Config(reason),
            other => Self::InvalidInput(other.to_string()),
        }
    }
}

impl From<EventError> for ServiceError {
    fn from(err: EventError) -> Self {
        match err {
            EventError::Cancelled => Self::Cancelled,
            EventError::Closed => Self::Config("event bus is shut down".to_string()),
        }
    }
}

/// Result type for service operations.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
