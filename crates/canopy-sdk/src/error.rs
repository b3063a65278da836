use canopy_index::IndexError;
use canopy_store::StoreError;

/// Errors surfaced by the database facade.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Document store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Index registry or engine failure.
    #[error("index error: {0}")]
    Index(#[from] IndexError),
}

/// Result alias for database operations.
pub type DbResult<T> = Result<T, DatabaseError>;
