//! Error types for the engine.

/// Errors that can occur during engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The storage backend failed.
    #[error("storage error: {0}")]
    Store(#[from] plume_store::StoreError),
}
