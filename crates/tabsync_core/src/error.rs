//! Error types for the core crate.

use thiserror::Error;

/// Result type for catalog operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the catalog layer.
#[derive(Error, Debug)]
pub enum CoreError {
    /// The requested row does not exist.
    #[error("row not found: {0}")]
    RowNotFound(String),

    /// A row was submitted without a usable identifier.
    #[error("row has no identifier")]
    MissingIdentifier,

    /// A write to a single row failed; the row is left unmodified.
    #[error("storage error for row {row_id}: {message}")]
    Storage {
        /// Identifier of the affected row.
        row_id: String,
        /// Underlying cause.
        message: String,
    },

    /// The catalog itself cannot be read. Fatal for the current cycle.
    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(String),
}

impl CoreError {
    /// Creates a per-row storage error.
    pub fn storage(row_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            row_id: row_id.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error aborts the whole sync cycle rather than a
    /// single row.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::CatalogUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatality_classification() {
        assert!(CoreError::CatalogUnavailable("disk gone".into()).is_fatal());
        assert!(!CoreError::storage("r1", "write failed").is_fatal());
        assert!(!CoreError::RowNotFound("r1".into()).is_fatal());
    }

    #[test]
    fn error_display() {
        let err = CoreError::storage("r1", "disk full");
        assert_eq!(err.to_string(), "storage error for row r1: disk full");
    }
}
