//! Error types shared across the memory engine.

/// Core error type
///
/// Every fallible operation in the engine returns one of these kinds. The
/// protocol layer maps them onto JSON-RPC error envelopes; `NotFound` and
/// `Conflict` are usually surfaced as ordinary results instead.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Schema or field constraint failure. Never retried.
    #[error("validation failed for '{field}': {message}")]
    Validation { field: String, message: String },

    /// Target id absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate detected at the conflict threshold.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Vector length differs from the collection dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Collection was never initialized.
    #[error("collection missing: {0}")]
    CollectionMissing(String),

    /// Transient storage failure. Callers must treat as retryable.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Remote embedding failed and the fallback path is disabled.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Bad credentials. Not retried.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Normalization snapshot would exceed the configured bound.
    #[error("snapshot limit exceeded: more than {max_entries} live entries")]
    SnapshotLimitExceeded { max_entries: usize },

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Convenience constructor for validation failures.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether the caller may retry the operation as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::StorageUnavailable(_))
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::StorageUnavailable(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Internal(format!("serialization error: {}", e))
    }
}

/// Engine result type
pub type Result<T> = std::result::Result<T, CoreError>;
