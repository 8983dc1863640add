//! Event bus error types.

use thiserror::Error;

/// Error a handler may return; the bus logs it and moves on.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Publish errors. Handler failures never surface here.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("publish cancelled before dispatch")]
    Cancelled,

    #[error("event bus is shut down")]
    Closed,
}

/// Result type for publish operations.
pub type EventResult<T> = std::result::Result<T, EventError>;
