//! [`PersistenceProvider`] — the persistence seam for the pubsub service
//! layer.
//!
//! The service layer depends on this trait instead of the concrete
//! [`PlumeEngine`](crate::PlumeEngine) struct, keeping protocol code
//! decoupled from the write-behind machinery.
//!
//! Mutations are non-blocking enqueues; reads may block on a synchronous
//! flush of their scope. Item reads are best-effort: on storage failure
//! they fall back to cached state rather than propagating a fault.

use plume_types::{
    Affiliate, DefaultNodeConfiguration, NodeRecord, NodeUid, PublishedItem, Subscription,
};

use crate::error::EngineError;

/// The persistence interface consumed by the pubsub service layer.
#[async_trait::async_trait]
pub trait PersistenceProvider: Send + Sync {
    /// Queue creation of a node.
    fn create_node(&self, record: NodeRecord);

    /// Queue an update of a node, coalescing with pending updates.
    fn update_node(&self, record: NodeRecord);

    /// Remove a node: purges its published items everywhere, drops its
    /// pending operations, and queues the removal.
    async fn remove_node(&self, record: NodeRecord);

    /// Queue creation of an affiliation.
    fn create_affiliation(&self, record: NodeRecord, affiliate: Affiliate);

    /// Queue an affiliation update, coalescing per subject.
    fn update_affiliation(&self, record: NodeRecord, affiliate: Affiliate);

    /// Queue an affiliation removal, coalescing per subject.
    fn remove_affiliation(&self, record: NodeRecord, affiliate: Affiliate);

    /// Queue creation of a subscription.
    fn create_subscription(&self, record: NodeRecord, subscription: Subscription);

    /// Queue a subscription update, coalescing per subscription id.
    fn update_subscription(&self, record: NodeRecord, subscription: Subscription);

    /// Queue a subscription removal, coalescing per subscription id.
    fn remove_subscription(&self, record: NodeRecord, subscription: Subscription);

    /// Load all nodes of a service, applying the service's pending
    /// operations first (read-your-writes).
    async fn load_nodes(&self, service_id: &str) -> Result<Vec<NodeRecord>, EngineError>;

    /// Load one node, applying its pending operations first.
    async fn load_node(&self, uid: &NodeUid) -> Result<Option<NodeRecord>, EngineError>;

    /// Load a node's affiliations, applying its pending operations first.
    async fn load_affiliations(&self, uid: &NodeUid) -> Result<Vec<Affiliate>, EngineError>;

    /// Load a node's subscriptions, applying its pending operations first.
    async fn load_subscriptions(&self, uid: &NodeUid) -> Result<Vec<Subscription>, EngineError>;

    /// Load one subscription, applying the node's pending operations first.
    async fn load_subscription(
        &self,
        uid: &NodeUid,
        sub_id: &str,
    ) -> Result<Option<Subscription>, EngineError>;

    /// Accept a published item: immediately readable, persisted later.
    fn save_published_item(&self, item: PublishedItem);

    /// Remove a published item from the caches and queue its deletion.
    fn remove_published_item(&self, item: PublishedItem);

    /// Fetch one published item; cache first, then storage behind a
    /// node-scoped lock and synchronous flush. Never fails: a storage
    /// error yields the cached value or `None`.
    async fn get_published_item(&self, uid: &NodeUid, item_id: &str) -> Option<PublishedItem>;

    /// Fetch a node's newest published items, bounded by the request, the
    /// node's retention bound, and the global fetch cap. Best-effort.
    async fn get_published_items(
        &self,
        record: &NodeRecord,
        max_rows: Option<usize>,
    ) -> Vec<PublishedItem>;

    /// Fetch a node's most recent published item. Best-effort.
    async fn get_last_published_item(&self, record: &NodeRecord) -> Option<PublishedItem>;

    /// Load the default node configuration for `(service, leaf)`, filling
    /// the shared cache behind its lock on a miss.
    async fn load_default_configuration(
        &self,
        service_id: &str,
        leaf: bool,
    ) -> Result<Option<DefaultNodeConfiguration>, EngineError>;

    /// Create and cache a default node configuration.
    async fn create_default_configuration(
        &self,
        config: DefaultNodeConfiguration,
    ) -> Result<(), EngineError>;

    /// Update and re-cache a default node configuration.
    async fn update_default_configuration(
        &self,
        config: DefaultNodeConfiguration,
    ) -> Result<(), EngineError>;

    /// Flush the whole write cache, optionally forwarding to the cluster.
    async fn flush_pending_items(&self, send_to_cluster: bool);

    /// Flush one node's pending state, optionally forwarding to the cluster.
    async fn flush_pending_items_for_node(&self, uid: &NodeUid, send_to_cluster: bool);

    /// Stop background tasks, flush local state, and (when not clustered)
    /// run a final purge pass.
    async fn shutdown(&self);
}
