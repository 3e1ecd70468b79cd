//! Error types for the sync module.

use thiserror::Error;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Payload could not be decoded or violates message limits.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Transport-level error: join, send, or receive failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] lanlog_store::StoreError),

    /// Record or request failed structural validation.
    #[error("validation error: {0}")]
    Validation(#[from] lanlog_core::ValidationError),

    /// Outbound message could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The engine was stopped while the operation was pending.
    #[error("sync cancelled")]
    Cancelled,
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
