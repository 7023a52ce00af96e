//! Write-behind persistence and caching engine for pubsub nodes and
//! published items.
//!
//! High-rate publish and mutate requests are acknowledged against in-memory
//! state (the [`OperationLog`] and [`ItemWriteCache`]) and persisted
//! asynchronously by the flush machinery, preserving read-your-writes
//! through the cluster-shared item read cache.
//!
//! The pubsub service layer depends on the [`PersistenceProvider`] trait
//! rather than the concrete [`PlumeEngine`] struct.

pub mod config;
pub mod engine;
pub mod error;
mod flush;
pub mod oplog;
pub mod provider;
mod purge;
pub mod write_cache;

pub use config::{ConfigError, EngineConfig};
pub use engine::{DefaultConfKey, PlumeEngine};
pub use error::EngineError;
pub use oplog::{NodeOp, NodeOpKind, OperationLog};
pub use provider::PersistenceProvider;
pub use write_cache::{ItemWriteCache, RetryRecord};

#[cfg(test)]
mod tests;
