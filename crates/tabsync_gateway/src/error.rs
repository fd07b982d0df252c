//! Error types for the gateway crate.

use thiserror::Error;

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors that can occur talking to the remote tabular store.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Network or service error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried (rate limit, 5xx-equivalent).
        retryable: bool,
    },

    /// The worksheet does not exist and could not be created.
    #[error("worksheet missing: {0}")]
    WorksheetMissing(String),

    /// The remote header row cannot carry the configured schema.
    #[error("schema error: {0}")]
    Schema(String),
}

impl GatewayError {
    /// Creates a retryable transport error (timeout, rate limit, 5xx).
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error (4xx-equivalent).
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Transport { retryable, .. } => *retryable,
            _ => false,
        }
    }
}
