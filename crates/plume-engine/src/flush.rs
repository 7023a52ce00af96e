//! Flush coordinator: drains the operation log and the item write cache
//! into the storage adapter.
//!
//! Two scopes exist: whole-cache and single-node. Either can optionally be
//! forwarded to the cluster first; each member only ever flushes its own
//! local queued state. Within one flush, deletes always precede adds so a
//! superseded or re-published key never leaves a duplicate row behind.
//!
//! Write strategy for items: one batched insert, falling back to individual
//! inserts when the batch fails. An individually failed item is retried in
//! a later cycle until its attempt count reaches the configured bound, then
//! dropped and reported as data loss. A transactional failure during a
//! whole-cache flush returns every add to the write cache; deletes already
//! issued are not restored (see DESIGN.md).

use std::sync::Arc;

use plume_cluster::{ClusterBroadcast, FlushScope, ReplicatedCache};
use plume_store::{StorageAdapter, StoreError};
use plume_types::{ItemKey, PublishedItem};
use tracing::{debug, error, trace, warn};

use crate::oplog::{NodeOp, NodeOpKind, OperationLog};
use crate::write_cache::{ItemWriteCache, RetryRecord, TakenSlices};

/// Drains pending node operations and queued items into storage.
///
/// Cheap to clone; every field is shared. Clones are handed to spawned
/// flush tasks (threshold trigger, timers).
#[derive(Clone)]
pub(crate) struct FlushCoordinator {
    pub(crate) storage: Arc<dyn StorageAdapter>,
    pub(crate) cluster: Arc<dyn ClusterBroadcast>,
    pub(crate) oplog: Arc<OperationLog>,
    pub(crate) cache: Arc<ItemWriteCache>,
    pub(crate) items: Arc<dyn ReplicatedCache<ItemKey, PublishedItem>>,
    /// Pending-item count above which a publish triggers an async flush;
    /// 0 disables the trigger.
    pub(crate) max_pending: usize,
    /// Individual write attempts per item before it is dropped.
    pub(crate) max_retry: u32,
}

impl FlushCoordinator {
    /// Make an item visible to readers and queue it for persistence.
    ///
    /// Used for fresh publishes, retry resubmission, and rollback requeueing
    /// alike; only a first-attempt record can trip the threshold trigger.
    pub(crate) fn submit(&self, record: RetryRecord) {
        let first = record.is_first_attempt();
        self.items.insert(record.item.key(), record.item.clone());
        let pending = self.cache.push(record);

        if first && self.max_pending > 0 && pending > self.max_pending {
            debug!(pending, "pending items over threshold; scheduling flush");
            let flusher = self.clone();
            tokio::spawn(async move {
                flusher.flush(FlushScope::All, false).await;
            });
        }
    }

    /// Flush the given scope, optionally forwarding to the cluster first.
    pub(crate) async fn flush(&self, scope: FlushScope, send_to_cluster: bool) {
        if send_to_cluster {
            if let Err(e) = self.cluster.flush_on_all_members(scope.clone()).await {
                warn!(error = %e, "cluster flush broadcast failed; continuing with local flush");
            }
        }

        // Node metadata first: an item row may reference a node row that is
        // itself still queued.
        let ops = match &scope {
            FlushScope::All => self.oplog.drain_all(),
            FlushScope::Node(uid) => self.oplog.drain_for_node(uid),
        };
        self.process_ops(ops).await;

        let taken = match &scope {
            FlushScope::All => self.cache.take_all(),
            FlushScope::Node(uid) => self.cache.take_for_node(uid),
        };
        if taken.is_empty() {
            return;
        }

        // Every in-scope add must be readable while its write is in flight.
        let mut primed = 0;
        for record in &taken.adds {
            let key = record.item.key();
            if !self.items.contains(&key) {
                self.items.insert(key, record.item.clone());
                primed += 1;
            }
        }
        if primed > 0 {
            debug!(primed, "added pending items to the item read cache");
        }

        self.write_slices(taken, matches!(scope, FlushScope::All)).await;
    }

    /// Dispatch drained node operations to storage, one attempt each.
    ///
    /// A failed operation is logged and skipped; the remainder of the queue
    /// is still applied.
    pub(crate) async fn process_ops(&self, ops: Vec<NodeOp>) {
        for op in ops {
            let uid = op.record.uid.clone();
            trace!(%uid, kind = ?op.kind, "writing node operation");
            let result = match op.kind {
                NodeOpKind::Create => self.storage.insert_node(&op.record).await,
                NodeOpKind::Update => self.storage.update_node(&op.record).await,
                NodeOpKind::Remove => self.storage.delete_node(&uid).await,
                NodeOpKind::CreateAffiliation(a) => {
                    self.storage.insert_affiliation(&uid, &a).await
                }
                NodeOpKind::UpdateAffiliation(a) => {
                    self.storage.update_affiliation(&uid, &a).await
                }
                NodeOpKind::RemoveAffiliation(a) => {
                    self.storage.delete_affiliation(&uid, &a.jid).await
                }
                NodeOpKind::CreateSubscription(s) => {
                    self.storage.insert_subscription(&uid, &s).await
                }
                NodeOpKind::UpdateSubscription(s) => {
                    self.storage.update_subscription(&uid, &s).await
                }
                NodeOpKind::RemoveSubscription(s) => {
                    self.storage.delete_subscription(&uid, &s.id).await
                }
            };
            if let Err(e) = result {
                error!(%uid, error = %e, "failed to write node operation; skipping");
            }
        }
    }

    /// Drain and apply pending node operations for one service.
    pub(crate) async fn process_service_ops(&self, service_id: &str) {
        let ops = self.oplog.drain_for_service(service_id);
        trace!(service_id, count = ops.len(), "flushing pending node operations");
        self.process_ops(ops).await;
    }

    /// Drain and apply pending node operations for one node.
    pub(crate) async fn process_node_ops(&self, uid: &plume_types::NodeUid) {
        let ops = self.oplog.drain_for_node(uid);
        self.process_ops(ops).await;
    }

    /// Write the taken slices inside one transaction; on transactional
    /// failure during a whole-cache flush, return every add to the write
    /// cache (deletes already issued are not restored).
    async fn write_slices(&self, taken: TakenSlices, whole_cache: bool) {
        let mut records = taken.adds;
        match self.write_pending_items(&mut records, &taken.deletes).await {
            Ok(()) => {
                debug!(
                    adds = records.len(),
                    deletes = taken.deletes.len(),
                    "flushed pending items to storage"
                );
            }
            Err(e) => {
                error!(error = %e, "failed to flush pending items; transaction rolled back");
                if whole_cache {
                    for record in records {
                        self.submit(record);
                    }
                }
            }
        }
    }

    /// Delete-then-insert inside a transaction.
    ///
    /// Returns `Err` only for transactional failures (begin/commit); a
    /// failed delete batch and individually failed inserts are handled in
    /// place. `records` is updated with incremented attempt counts so a
    /// caller rolling back requeues the records as they now stand.
    async fn write_pending_items(
        &self,
        records: &mut Vec<RetryRecord>,
        deletes: &[PublishedItem],
    ) -> Result<(), StoreError> {
        let mut tx = self.storage.begin().await?;

        // Deletes first, including the keys of every add: removes flagged
        // rows and any stale row a re-published key left behind.
        let mut del_keys: Vec<ItemKey> = deletes.iter().map(PublishedItem::key).collect();
        del_keys.extend(records.iter().map(|r| r.item.key()));
        if !del_keys.is_empty() {
            if let Err(e) = tx.delete_items(&del_keys).await {
                error!(error = %e, "failed to delete published items; continuing with inserts");
            }
        }

        if !records.is_empty() {
            let items: Vec<PublishedItem> = records.iter().map(|r| r.item.clone()).collect();
            if let Err(e) = tx.insert_items(&items).await {
                warn!(error = %e, "batched insert failed; retrying items individually");
                for record in records.iter_mut() {
                    if let Err(e) = tx.insert_item(&record.item).await {
                        *record = record.clone().next_attempt();
                        let key = record.item.key();
                        if record.attempt < self.max_retry {
                            warn!(%key, attempt = record.attempt, "failed to persist published item; will retry");
                            self.submit(record.clone());
                        } else {
                            error!(%key, error = %e, "published item could not be written to storage; dropping");
                        }
                    }
                }
            }
        }

        tx.commit().await
    }
}
