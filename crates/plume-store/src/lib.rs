//! Storage adapter boundary for Plume.
//!
//! The engine persists through the [`StorageAdapter`] trait; concrete
//! relational backends (and their dialect-specific statements) live behind
//! it. This crate ships two reference implementations: [`MemoryStorage`],
//! a volatile in-memory backend, and [`FaultyStorage`], a failure-injecting
//! wrapper used by tests.

pub mod error;
pub mod faulty;
pub mod memory;
pub mod traits;

pub use error::StoreError;
pub use faulty::FaultyStorage;
pub use memory::MemoryStorage;
pub use traits::{ReadOrder, StorageAdapter, StorageTx};
