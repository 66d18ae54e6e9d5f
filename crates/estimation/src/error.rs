//! Estimation errors.

use sprintpoker_core::{SessionId, ValidationError};
use sprintpoker_progress::ProgressError;
use sprintpoker_storage::StorageError;

/// Result type for estimation operations.
pub type Result<T> = std::result::Result<T, EstimationError>;

/// Errors surfaced by the session coordinator.
#[derive(Debug, thiserror::Error)]
pub enum EstimationError {
    /// Work item, session or sprint does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not allowed in the current state; refetch before retrying
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Card outside the point domain or malformed input
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] ValidationError),

    /// Another caller finalized the session first
    #[error("Session {0} is already finalized")]
    AlreadyFinalized(SessionId),

    /// Storage failure
    #[error(transparent)]
    Storage(StorageError),

    /// Progress computation failure
    #[error(transparent)]
    Progress(ProgressError),
}

impl EstimationError {
    /// Outcomes a caller should treat as success.
    pub fn is_benign(&self) -> bool {
        matches!(self, EstimationError::AlreadyFinalized(_))
    }

    /// Transient failures that are safe to retry as-is.
    pub fn is_retryable(&self) -> bool {
        match self {
            EstimationError::Storage(e) | EstimationError::Progress(ProgressError::Storage(e)) => {
                !matches!(e, StorageError::NotFound(_))
            }
            _ => false,
        }
    }
}

impl From<StorageError> for EstimationError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(what) => EstimationError::NotFound(what),
            other => EstimationError::Storage(other),
        }
    }
}

impl From<ProgressError> for EstimationError {
    fn from(e: ProgressError) -> Self {
        match e {
            ProgressError::NotFound(what) => EstimationError::NotFound(what),
            other => EstimationError::Progress(other),
        }
    }
}
