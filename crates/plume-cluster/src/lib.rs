//! Cluster substrate boundary for Plume.
//!
//! The engine talks to its clustering environment through three seams: the
//! [`ClusterBroadcast`] flush-forwarding primitive, the [`ReplicatedCache`]
//! key-value cache, and the [`LockRegistry`] named locks. Standalone
//! implementations live here; a real cluster substrate supplies its own
//! broadcast and cache implementations behind the same traits.

pub mod broadcast;
pub mod cache;
pub mod lock;

pub use broadcast::{ClusterBroadcast, ClusterError, FlushScope, LoopbackCluster, NoCluster};
pub use cache::{LocalCache, ReplicatedCache};
pub use lock::LockRegistry;
