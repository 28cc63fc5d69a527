//! Store errors

use thiserror::Error;

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// The connected flag was false when a find was requested; nothing was enqueued
    #[error("db not connected")]
    NotConnected,

    /// The store was closed and accepts no further commands
    #[error("store closed")]
    Closed,

    #[error("Connect error: {0}")]
    Connect(String),

    #[error("Operation error: {0}")]
    Operation(String),

    #[error("Channel error")]
    ChannelError,
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        StoreError::Operation(err.to_string())
    }
}

/// Result of store operations
pub type StoreResult<T> = Result<T, StoreError>;
