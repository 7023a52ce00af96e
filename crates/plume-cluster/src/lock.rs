//! Named mutual-exclusion locks.
//!
//! [`LockRegistry`] hands out async locks keyed by name; the engine uses
//! node-scoped names to serialize read-cache miss-fills and the
//! default-configuration fill. This is the standalone implementation of the
//! cluster lock service: in a clustered deployment the same names map onto
//! the substrate's distributed locks, letting one member's fill be reused
//! by its peers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

/// Registry of named async locks. Locks are created on first use and live
/// for the registry's lifetime.
#[derive(Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LockRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock with the given name, waiting if a holder exists.
    ///
    /// The lock is held until the returned guard is dropped. May be held
    /// across storage I/O; names must never be acquired nested to keep the
    /// registry deadlock-free.
    pub async fn acquire(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().expect("registry lock poisoned");
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
