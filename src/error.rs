//! Error types for mnemo

use thiserror::Error;

/// Result type alias for mnemo operations
pub type Result<T> = std::result::Result<T, MnemoError>;

/// Main error type for mnemo
#[derive(Error, Debug)]
pub enum MnemoError {
    #[error("storage not initialized; call initialize() first")]
    NotInitialized,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("store error: {0}")]
    Store(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index full: capacity {capacity} reached")]
    IndexFull { capacity: usize },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("no active session")]
    NoActiveSession,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MnemoError {
    /// Whether the operation may be retried without caller-side changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MnemoError::Database(_) | MnemoError::Store(_))
    }

    /// Machine-readable kind, stable across messages.
    pub fn kind(&self) -> &'static str {
        match self {
            MnemoError::NotInitialized => "NotInitialized",
            MnemoError::Database(_) | MnemoError::Store(_) => "StoreError",
            MnemoError::NotFound(_) => "NotFound",
            MnemoError::Conflict(_) => "Conflict",
            MnemoError::Validation(_) => "ValidationError",
            MnemoError::DimensionMismatch { .. } => "DimensionMismatch",
            MnemoError::IndexFull { .. } => "IndexFull",
            MnemoError::Parse(_) | MnemoError::Serialization(_) => "ParseError",
            MnemoError::NoActiveSession => "NoActiveSession",
            MnemoError::Io(_) => "IoError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_stable() {
        assert_eq!(MnemoError::NotInitialized.kind(), "NotInitialized");
        assert_eq!(
            MnemoError::DimensionMismatch {
                expected: 8,
                actual: 4
            }
            .kind(),
            "DimensionMismatch"
        );
        assert_eq!(MnemoError::Conflict("k".into()).kind(), "Conflict");
    }
}
