use std::path::PathBuf;

/// Errors from document store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The key is malformed (must start with `/`).
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    /// The key addresses the reserved index location.
    #[error("key {0:?} addresses the reserved index location")]
    ReservedKey(String),

    /// A document could not be serialized or parsed as JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error from the underlying filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A file or directory inside a tree delete could not be removed.
    #[error("failed to delete {path}: {source}")]
    TreeDelete {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
