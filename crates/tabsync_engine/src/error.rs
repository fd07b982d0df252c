//! Error types for the sync engine.

use tabsync_core::CoreError;
use tabsync_gateway::GatewayError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Remote gateway failure.
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Local catalog failure.
    #[error("catalog error: {0}")]
    Catalog(#[from] CoreError),

    /// Outbox file I/O failure.
    #[error("outbox error: {0}")]
    Outbox(String),

    /// Sync is not configured or its dependencies are unavailable.
    #[error("sync disabled: {0}")]
    Disabled(String),

    /// The in-flight cycle was cancelled cooperatively.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Returns true if the failed operation can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Gateway(inner) => inner.is_retryable(),
            _ => false,
        }
    }
}
