//! Pending node-operation log.
//!
//! Node, affiliation, and subscription mutations are not written to storage
//! on the request path; they are queued here per node and drained by the
//! flush coordinator (or by a load that needs read-your-writes). Enqueueing
//! coalesces redundant trailing operations so a burst of updates costs one
//! statement.
//!
//! The buffer is shared between request threads and the flush task; all
//! access goes through one mutex since every operation is pure in-memory
//! work.

use std::collections::HashMap;
use std::sync::Mutex;

use plume_types::{Affiliate, NodeRecord, NodeUid, Subscription};
use tracing::trace;

/// A queued node mutation awaiting storage.
///
/// Affiliation and subscription variants carry their payloads, so an
/// operation that requires one cannot be constructed without it.
#[derive(Debug, Clone)]
pub enum NodeOpKind {
    /// Create the node row.
    Create,
    /// Rewrite the node row.
    Update,
    /// Delete the node row and its relations.
    Remove,
    /// Insert an affiliation row.
    CreateAffiliation(Affiliate),
    /// Rewrite an affiliation row.
    UpdateAffiliation(Affiliate),
    /// Delete an affiliation row.
    RemoveAffiliation(Affiliate),
    /// Insert a subscription row.
    CreateSubscription(Subscription),
    /// Rewrite a subscription row.
    UpdateSubscription(Subscription),
    /// Delete a subscription row.
    RemoveSubscription(Subscription),
}

/// A node mutation bound to the node-record snapshot it applies to.
#[derive(Debug, Clone)]
pub struct NodeOp {
    /// Snapshot of the node the operation applies to.
    pub record: NodeRecord,
    /// What to do.
    pub kind: NodeOpKind,
}

/// Per-node coalesced queues of pending mutations.
#[derive(Default)]
pub struct OperationLog {
    queues: Mutex<HashMap<NodeUid, Vec<NodeOp>>>,
}

/// Remove coalescible operations from the trailing run of a queue.
///
/// Walks backwards while `in_run` holds, removing the entries `replaced`
/// matches; the walk stops at the first operation outside the run, so
/// anything queued before it is never touched.
fn prune_trailing_run(
    ops: &mut Vec<NodeOp>,
    in_run: impl Fn(&NodeOpKind) -> bool,
    replaced: impl Fn(&NodeOpKind) -> bool,
) {
    let run_start = ops
        .iter()
        .rposition(|op| !in_run(&op.kind))
        .map_or(0, |i| i + 1);
    let mut i = ops.len();
    while i > run_start {
        i -= 1;
        if replaced(&ops[i].kind) {
            ops.remove(i);
        }
    }
}

impl OperationLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_queue(&self, uid: &NodeUid, f: impl FnOnce(&mut Vec<NodeOp>)) {
        let mut queues = self.queues.lock().expect("oplog lock poisoned");
        f(queues.entry(uid.clone()).or_default());
    }

    /// Queue a node creation.
    ///
    /// Pending operations are not purged here: a node being re-created after
    /// a queued removal must keep the removal ahead of the creation.
    pub fn enqueue_create(&self, record: NodeRecord) {
        trace!(uid = %record.uid, "queueing node create");
        self.with_queue(&record.uid.clone(), |ops| {
            ops.push(NodeOp {
                record,
                kind: NodeOpKind::Create,
            });
        });
    }

    /// Queue a node update, replacing any trailing run of pending updates.
    pub fn enqueue_update(&self, record: NodeRecord) {
        trace!(uid = %record.uid, "queueing node update");
        self.with_queue(&record.uid.clone(), |ops| {
            prune_trailing_run(
                ops,
                |kind| matches!(kind, NodeOpKind::Update),
                |kind| matches!(kind, NodeOpKind::Update),
            );
            ops.push(NodeOp {
                record,
                kind: NodeOpKind::Update,
            });
        });
    }

    /// Queue a node removal. All previously queued operations for the node
    /// are dropped: none of them can matter once the node is gone.
    pub fn enqueue_remove(&self, record: NodeRecord) {
        trace!(uid = %record.uid, "queueing node remove");
        self.with_queue(&record.uid.clone(), |ops| {
            ops.clear();
            ops.push(NodeOp {
                record,
                kind: NodeOpKind::Remove,
            });
        });
    }

    /// Queue an affiliation creation.
    pub fn enqueue_create_affiliation(&self, record: NodeRecord, affiliate: Affiliate) {
        self.with_queue(&record.uid.clone(), |ops| {
            ops.push(NodeOp {
                record,
                kind: NodeOpKind::CreateAffiliation(affiliate),
            });
        });
    }

    /// Queue an affiliation update, replacing trailing pending updates for
    /// the same subject.
    pub fn enqueue_update_affiliation(&self, record: NodeRecord, affiliate: Affiliate) {
        self.with_queue(&record.uid.clone(), |ops| {
            prune_trailing_run(
                ops,
                |kind| matches!(kind, NodeOpKind::UpdateAffiliation(_)),
                |kind| matches!(kind, NodeOpKind::UpdateAffiliation(a) if a.jid == affiliate.jid),
            );
            ops.push(NodeOp {
                record,
                kind: NodeOpKind::UpdateAffiliation(affiliate),
            });
        });
    }

    /// Queue an affiliation removal, replacing any trailing pending
    /// affiliation change for the same subject.
    pub fn enqueue_remove_affiliation(&self, record: NodeRecord, affiliate: Affiliate) {
        self.with_queue(&record.uid.clone(), |ops| {
            prune_trailing_run(
                ops,
                |kind| {
                    matches!(
                        kind,
                        NodeOpKind::CreateAffiliation(_)
                            | NodeOpKind::UpdateAffiliation(_)
                            | NodeOpKind::RemoveAffiliation(_)
                    )
                },
                |kind| match kind {
                    NodeOpKind::CreateAffiliation(a)
                    | NodeOpKind::UpdateAffiliation(a)
                    | NodeOpKind::RemoveAffiliation(a) => a.jid == affiliate.jid,
                    _ => false,
                },
            );
            ops.push(NodeOp {
                record,
                kind: NodeOpKind::RemoveAffiliation(affiliate),
            });
        });
    }

    /// Queue a subscription creation.
    pub fn enqueue_create_subscription(&self, record: NodeRecord, subscription: Subscription) {
        self.with_queue(&record.uid.clone(), |ops| {
            ops.push(NodeOp {
                record,
                kind: NodeOpKind::CreateSubscription(subscription),
            });
        });
    }

    /// Queue a subscription update, replacing trailing pending updates for
    /// the same subscription id.
    pub fn enqueue_update_subscription(&self, record: NodeRecord, subscription: Subscription) {
        self.with_queue(&record.uid.clone(), |ops| {
            prune_trailing_run(
                ops,
                |kind| matches!(kind, NodeOpKind::UpdateSubscription(_)),
                |kind| {
                    matches!(kind, NodeOpKind::UpdateSubscription(s) if s.id == subscription.id)
                },
            );
            ops.push(NodeOp {
                record,
                kind: NodeOpKind::UpdateSubscription(subscription),
            });
        });
    }

    /// Queue a subscription removal, replacing any trailing pending
    /// subscription change for the same subscription id.
    pub fn enqueue_remove_subscription(&self, record: NodeRecord, subscription: Subscription) {
        self.with_queue(&record.uid.clone(), |ops| {
            prune_trailing_run(
                ops,
                |kind| {
                    matches!(
                        kind,
                        NodeOpKind::CreateSubscription(_)
                            | NodeOpKind::UpdateSubscription(_)
                            | NodeOpKind::RemoveSubscription(_)
                    )
                },
                |kind| match kind {
                    NodeOpKind::CreateSubscription(s)
                    | NodeOpKind::UpdateSubscription(s)
                    | NodeOpKind::RemoveSubscription(s) => s.id == subscription.id,
                    _ => false,
                },
            );
            ops.push(NodeOp {
                record,
                kind: NodeOpKind::RemoveSubscription(subscription),
            });
        });
    }

    /// Atomically remove and return every pending operation, per-node order
    /// preserved.
    pub fn drain_all(&self) -> Vec<NodeOp> {
        let mut queues = self.queues.lock().expect("oplog lock poisoned");
        queues.drain().flat_map(|(_, ops)| ops).collect()
    }

    /// Atomically remove and return the pending operations of one service.
    pub fn drain_for_service(&self, service_id: &str) -> Vec<NodeOp> {
        let mut queues = self.queues.lock().expect("oplog lock poisoned");
        let uids: Vec<NodeUid> = queues
            .keys()
            .filter(|uid| uid.service_id == service_id)
            .cloned()
            .collect();
        uids.into_iter()
            .flat_map(|uid| queues.remove(&uid).unwrap_or_default())
            .collect()
    }

    /// Atomically remove and return the pending operations of one node.
    pub fn drain_for_node(&self, uid: &NodeUid) -> Vec<NodeOp> {
        let mut queues = self.queues.lock().expect("oplog lock poisoned");
        queues.remove(uid).unwrap_or_default()
    }

    /// Number of nodes with pending operations.
    pub fn pending_nodes(&self) -> usize {
        self.queues.lock().expect("oplog lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use plume_types::{AffiliationRole, NodeKind, SubscriptionState};

    use super::*;

    fn uid(node: &str) -> NodeUid {
        NodeUid::new("svc", node)
    }

    fn record(node: &str) -> NodeRecord {
        NodeRecord {
            uid: uid(node),
            kind: NodeKind::Leaf {
                persist_items: true,
                max_items: -1,
                max_payload_size: 5120,
            },
            parent: None,
            created_at: 1,
            modified_at: 1,
            creator: "admin@example.org".to_string(),
            name: None,
            description: None,
            language: None,
            deliver_payloads: true,
            subscription_enabled: true,
        }
    }

    fn affiliate(jid: &str) -> Affiliate {
        Affiliate {
            jid: jid.to_string(),
            affiliation: AffiliationRole::Publisher,
        }
    }

    fn subscription(id: &str) -> Subscription {
        Subscription {
            id: id.to_string(),
            jid: "alice@example.org".to_string(),
            owner: "alice@example.org".to_string(),
            state: SubscriptionState::Subscribed,
            deliver_notifications: true,
            digest: false,
            expire: None,
            keyword: None,
        }
    }

    fn kinds(ops: &[NodeOp]) -> Vec<&'static str> {
        ops.iter()
            .map(|op| match &op.kind {
                NodeOpKind::Create => "create",
                NodeOpKind::Update => "update",
                NodeOpKind::Remove => "remove",
                NodeOpKind::CreateAffiliation(_) => "create_aff",
                NodeOpKind::UpdateAffiliation(_) => "update_aff",
                NodeOpKind::RemoveAffiliation(_) => "remove_aff",
                NodeOpKind::CreateSubscription(_) => "create_sub",
                NodeOpKind::UpdateSubscription(_) => "update_sub",
                NodeOpKind::RemoveSubscription(_) => "remove_sub",
            })
            .collect()
    }

    #[test]
    fn test_trailing_updates_collapse_to_latest() {
        let log = OperationLog::new();
        log.enqueue_update(record("news"));
        log.enqueue_update(record("news"));
        log.enqueue_update(record("news"));

        let ops = log.drain_for_node(&uid("news"));
        assert_eq!(kinds(&ops), vec!["update"]);
    }

    #[test]
    fn test_update_run_stops_at_other_op() {
        let log = OperationLog::new();
        log.enqueue_create(record("news"));
        log.enqueue_update(record("news"));
        log.enqueue_create_affiliation(record("news"), affiliate("alice@example.org"));
        log.enqueue_update(record("news"));
        log.enqueue_update(record("news"));

        // The update before the affiliation change must survive.
        let ops = log.drain_for_node(&uid("news"));
        assert_eq!(kinds(&ops), vec!["create", "update", "create_aff", "update"]);
    }

    #[test]
    fn test_remove_clears_all_pending_ops() {
        let log = OperationLog::new();
        log.enqueue_create(record("news"));
        log.enqueue_update(record("news"));
        log.enqueue_create_affiliation(record("news"), affiliate("alice@example.org"));
        log.enqueue_remove(record("news"));

        let ops = log.drain_for_node(&uid("news"));
        assert_eq!(kinds(&ops), vec!["remove"]);
    }

    #[test]
    fn test_create_after_remove_keeps_both() {
        let log = OperationLog::new();
        log.enqueue_remove(record("news"));
        log.enqueue_create(record("news"));

        let ops = log.drain_for_node(&uid("news"));
        assert_eq!(kinds(&ops), vec!["remove", "create"]);
    }

    #[test]
    fn test_affiliation_updates_coalesce_per_subject() {
        let log = OperationLog::new();
        log.enqueue_update_affiliation(record("news"), affiliate("alice@example.org"));
        log.enqueue_update_affiliation(record("news"), affiliate("bob@example.org"));
        log.enqueue_update_affiliation(record("news"), affiliate("alice@example.org"));

        // Alice's first update is replaced; Bob's survives in place.
        let ops = log.drain_for_node(&uid("news"));
        assert_eq!(kinds(&ops), vec!["update_aff", "update_aff"]);
        match (&ops[0].kind, &ops[1].kind) {
            (NodeOpKind::UpdateAffiliation(a), NodeOpKind::UpdateAffiliation(b)) => {
                assert_eq!(a.jid, "bob@example.org");
                assert_eq!(b.jid, "alice@example.org");
            }
            other => panic!("unexpected ops: {other:?}"),
        }
    }

    #[test]
    fn test_affiliation_removal_swallows_trailing_changes() {
        let log = OperationLog::new();
        log.enqueue_create_affiliation(record("news"), affiliate("alice@example.org"));
        log.enqueue_update_affiliation(record("news"), affiliate("alice@example.org"));
        log.enqueue_remove_affiliation(record("news"), affiliate("alice@example.org"));

        let ops = log.drain_for_node(&uid("news"));
        assert_eq!(kinds(&ops), vec!["remove_aff"]);
    }

    #[test]
    fn test_subscription_updates_coalesce_per_id() {
        let log = OperationLog::new();
        log.enqueue_create_subscription(record("news"), subscription("s1"));
        log.enqueue_update_subscription(record("news"), subscription("s1"));
        log.enqueue_update_subscription(record("news"), subscription("s1"));

        let ops = log.drain_for_node(&uid("news"));
        assert_eq!(kinds(&ops), vec!["create_sub", "update_sub"]);
    }

    #[test]
    fn test_subscription_removal_swallows_trailing_changes() {
        let log = OperationLog::new();
        log.enqueue_create_subscription(record("news"), subscription("s1"));
        log.enqueue_update_subscription(record("news"), subscription("s1"));
        log.enqueue_remove_subscription(record("news"), subscription("s1"));

        let ops = log.drain_for_node(&uid("news"));
        assert_eq!(kinds(&ops), vec!["remove_sub"]);
    }

    #[test]
    fn test_drain_for_service_leaves_other_services() {
        let log = OperationLog::new();
        log.enqueue_create(record("a"));
        let mut other = record("b");
        other.uid = NodeUid::new("other-svc", "b");
        log.enqueue_create(other);

        let drained = log.drain_for_service("svc");
        assert_eq!(drained.len(), 1);
        assert_eq!(log.pending_nodes(), 1);
        assert_eq!(log.drain_all().len(), 1);
    }

    #[test]
    fn test_drain_is_destructive() {
        let log = OperationLog::new();
        log.enqueue_create(record("news"));
        assert_eq!(log.drain_for_node(&uid("news")).len(), 1);
        assert!(log.drain_for_node(&uid("news")).is_empty());
    }
}
