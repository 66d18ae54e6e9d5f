//! Progress errors.

use sprintpoker_storage::StorageError;

/// Result type for progress operations.
pub type Result<T> = std::result::Result<T, ProgressError>;

/// Errors raised while computing or recording sprint progress.
#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    /// Sprint does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request outside what the sprint allows
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Storage failure
    #[error(transparent)]
    Storage(#[from] StorageError),
}
