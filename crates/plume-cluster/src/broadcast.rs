//! Cluster flush forwarding.
//!
//! [`ClusterBroadcast`] is the engine's view of the cluster substrate: a
//! synchronous "ask every member to flush its own local state" primitive.
//! Each member only ever writes its own queued state; there is no
//! cross-member transaction. A peer that is unreachable or fails is its own
//! concern; broadcast errors never fail the caller's local flush.

use std::sync::Mutex;

use plume_types::NodeUid;

/// Scope of a flush request, local or forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushScope {
    /// Flush the entire write cache.
    All,
    /// Flush only the given node's slice.
    Node(NodeUid),
}

/// Errors raised by the cluster substrate.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// One or more peers could not be reached.
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    /// Peers did not answer within the substrate's deadline.
    #[error("broadcast timed out after {0} ms")]
    Timeout(u64),
}

/// Synchronous execute-on-every-member primitive.
#[async_trait::async_trait]
pub trait ClusterBroadcast: Send + Sync {
    /// Whether clustering is active for this deployment.
    fn is_enabled(&self) -> bool;

    /// Request a flush of the given scope on every other member and await
    /// their responses.
    async fn flush_on_all_members(&self, scope: FlushScope) -> Result<(), ClusterError>;
}

/// Standalone deployment: clustering disabled, broadcasts are no-ops.
#[derive(Debug, Default)]
pub struct NoCluster;

#[async_trait::async_trait]
impl ClusterBroadcast for NoCluster {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn flush_on_all_members(&self, _scope: FlushScope) -> Result<(), ClusterError> {
        Ok(())
    }
}

/// Test substrate: reports clustering as enabled and records every forwarded
/// request; can be scripted to fail.
#[derive(Default)]
pub struct LoopbackCluster {
    requests: Mutex<Vec<FlushScope>>,
    failing: Mutex<bool>,
}

impl LoopbackCluster {
    /// Create a recording substrate.
    pub fn new() -> Self {
        Self::default()
    }

    /// All flush scopes forwarded so far.
    pub fn forwarded(&self) -> Vec<FlushScope> {
        self.requests.lock().expect("requests lock poisoned").clone()
    }

    /// Make subsequent broadcasts fail (peers unreachable).
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().expect("failing lock poisoned") = failing;
    }
}

#[async_trait::async_trait]
impl ClusterBroadcast for LoopbackCluster {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn flush_on_all_members(&self, scope: FlushScope) -> Result<(), ClusterError> {
        if *self.failing.lock().expect("failing lock poisoned") {
            return Err(ClusterError::Unreachable("loopback peer".into()));
        }
        self.requests
            .lock()
            .expect("requests lock poisoned")
            .push(scope);
        Ok(())
    }
}
