//! Error types for the node.

use lanlog_core::CoreError;
use lanlog_store::StoreError;
use lanlog_sync::SyncError;
use thiserror::Error;

/// Errors that can occur while configuring or running a node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Configuration value is missing or invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Config file is not valid TOML for [`crate::NodeConfig`].
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// Identifier error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
