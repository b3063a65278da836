use std::path::PathBuf;

/// Errors from index registry and engine operations.
///
/// Index integrity failures are always propagated; silent corruption of
/// the index is worse than a loud failure.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The persisted registry snapshot is malformed.
    #[error("corrupt index registry at {path}: {reason}")]
    CorruptRegistry { path: PathBuf, reason: String },

    /// A persisted definition names a transform with no registered handler.
    #[error("no handler registered for transform {0:?}")]
    UnknownTransform(String),

    /// A write cycled back into a key already being indexed.
    #[error("reentrant index write detected for key {0:?}")]
    ReentrantWrite(String),

    /// The named definition does not exist.
    #[error("index definition not found: {0:?}")]
    DefinitionNotFound(String),

    /// A definition argument failed validation.
    #[error("invalid index definition: {0}")]
    InvalidDefinition(String),

    /// Snapshot serialization failed.
    #[error("registry serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error persisting or loading the registry snapshot.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for index operations.
pub type IndexResult<T> = Result<T, IndexError>;
