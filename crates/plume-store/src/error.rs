//! Error types for storage adapter operations.

use plume_types::ItemKey;

/// Errors that can occur while talking to the relational backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached or refused the connection.
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    /// A batched statement execution failed as a whole.
    ///
    /// Callers fall back to executing the statements individually.
    #[error("batched statement execution failed: {0}")]
    BatchFailed(String),

    /// A statement violated a backend constraint (duplicate key, missing
    /// referenced row).
    #[error("constraint violation for {0}")]
    Constraint(ItemKey),

    /// The transaction could not be committed.
    #[error("transaction commit failed: {0}")]
    CommitFailed(String),
}
