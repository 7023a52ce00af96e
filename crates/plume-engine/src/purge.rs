//! Over-capacity purge job.
//!
//! Every persistent leaf node with a positive retention bound gets one
//! "retain newest N" statement per pass, batched into a single transaction.
//! The pass is idempotent: nodes already within bounds are untouched. Runs
//! on its own timer, independently of flushing.

use std::sync::Arc;

use plume_store::StorageAdapter;
use tracing::{debug, error};

/// Bulk enforcement of per-node item-count retention.
#[derive(Clone)]
pub(crate) struct PurgeJob {
    pub(crate) storage: Arc<dyn StorageAdapter>,
}

impl PurgeJob {
    /// Run one purge pass over all bounded persistent nodes.
    pub(crate) async fn run_once(&self) {
        let nodes = match self.storage.persistent_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!(error = %e, "failed to load persistent node bounds; skipping purge pass");
                return;
            }
        };
        if nodes.is_empty() {
            return;
        }

        let mut tx = match self.storage.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                error!(error = %e, "failed to open purge transaction; skipping purge pass");
                return;
            }
        };
        for (uid, max_items) in &nodes {
            if let Err(e) = tx.retain_newest(uid, *max_items).await {
                error!(%uid, error = %e, "failed to purge node; continuing");
            }
        }
        match tx.commit().await {
            Ok(()) => debug!(nodes = nodes.len(), "purge pass complete"),
            Err(e) => error!(error = %e, "failed to commit purge pass"),
        }
    }
}
