//! Core traits for the relational storage boundary.
//!
//! [`StorageAdapter`] is the only surface through which the engine touches
//! the relational store. Dialect-specific statement text lives entirely
//! inside adapter implementations; in particular, per-node retention
//! enforcement is a single [`StorageTx::retain_newest`] operation rather
//! than backend-specific SQL in the engine.

use plume_types::{
    Affiliate, DefaultNodeConfiguration, ItemKey, NodeRecord, NodeUid, PublishedItem, Subscription,
};

use crate::error::StoreError;

/// Row ordering for published-item queries, by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOrder {
    /// Oldest first.
    Ascending,
    /// Newest first.
    Descending,
}

/// Transactional CRUD and batch execution against the relational store.
///
/// All implementations must be `Send + Sync` for use across async tasks.
/// Non-transactional methods auto-commit per statement; item writes and the
/// purge pass go through [`StorageAdapter::begin`].
#[async_trait::async_trait]
pub trait StorageAdapter: Send + Sync {
    // ----- nodes -----

    /// Insert a node row (with its associated metadata).
    async fn insert_node(&self, record: &NodeRecord) -> Result<(), StoreError>;

    /// Update an existing node row.
    async fn update_node(&self, record: &NodeRecord) -> Result<(), StoreError>;

    /// Delete a node row plus its affiliation and subscription rows.
    ///
    /// Deleting an absent node is a no-op. Item rows are removed separately
    /// via [`StorageAdapter::delete_items_for_node`].
    async fn delete_node(&self, uid: &NodeUid) -> Result<(), StoreError>;

    /// Load all node rows of a service.
    async fn load_nodes(&self, service_id: &str) -> Result<Vec<NodeRecord>, StoreError>;

    /// Load a single node row.
    async fn load_node(&self, uid: &NodeUid) -> Result<Option<NodeRecord>, StoreError>;

    // ----- affiliations -----

    /// Insert an affiliation row.
    async fn insert_affiliation(
        &self,
        uid: &NodeUid,
        affiliate: &Affiliate,
    ) -> Result<(), StoreError>;

    /// Update an affiliation row, matched by node and subject address.
    async fn update_affiliation(
        &self,
        uid: &NodeUid,
        affiliate: &Affiliate,
    ) -> Result<(), StoreError>;

    /// Delete an affiliation row.
    async fn delete_affiliation(&self, uid: &NodeUid, jid: &str) -> Result<(), StoreError>;

    /// Load all affiliation rows of a node.
    async fn load_affiliations(&self, uid: &NodeUid) -> Result<Vec<Affiliate>, StoreError>;

    // ----- subscriptions -----

    /// Insert a subscription row.
    async fn insert_subscription(
        &self,
        uid: &NodeUid,
        subscription: &Subscription,
    ) -> Result<(), StoreError>;

    /// Update a subscription row, matched by node and subscription id.
    async fn update_subscription(
        &self,
        uid: &NodeUid,
        subscription: &Subscription,
    ) -> Result<(), StoreError>;

    /// Delete a subscription row.
    async fn delete_subscription(&self, uid: &NodeUid, sub_id: &str) -> Result<(), StoreError>;

    /// Load all subscription rows of a node.
    async fn load_subscriptions(&self, uid: &NodeUid) -> Result<Vec<Subscription>, StoreError>;

    /// Load a single subscription row.
    async fn load_subscription(
        &self,
        uid: &NodeUid,
        sub_id: &str,
    ) -> Result<Option<Subscription>, StoreError>;

    // ----- published items (reads) -----

    /// Load a single published item row.
    async fn load_item(&self, key: &ItemKey) -> Result<Option<PublishedItem>, StoreError>;

    /// Load the newest `max_rows` item rows of a node, presented in the
    /// given creation-time order.
    async fn load_items(
        &self,
        uid: &NodeUid,
        max_rows: usize,
        order: ReadOrder,
    ) -> Result<Vec<PublishedItem>, StoreError>;

    /// Load the newest item row of a node.
    async fn load_last_item(&self, uid: &NodeUid) -> Result<Option<PublishedItem>, StoreError>;

    /// Delete every item row of a node. Idempotent.
    async fn delete_items_for_node(&self, uid: &NodeUid) -> Result<(), StoreError>;

    /// All persistent leaf nodes with a positive retention bound, as
    /// `(node, max_items)` pairs. Input to the purge pass.
    async fn persistent_nodes(&self) -> Result<Vec<(NodeUid, u32)>, StoreError>;

    // ----- default node configuration -----

    /// Insert a default-configuration row for `(service, leaf)`.
    async fn insert_default_configuration(
        &self,
        config: &DefaultNodeConfiguration,
    ) -> Result<(), StoreError>;

    /// Update the default-configuration row for `(service, leaf)`.
    async fn update_default_configuration(
        &self,
        config: &DefaultNodeConfiguration,
    ) -> Result<(), StoreError>;

    /// Load the default-configuration row for `(service, leaf)`.
    async fn load_default_configuration(
        &self,
        service_id: &str,
        leaf: bool,
    ) -> Result<Option<DefaultNodeConfiguration>, StoreError>;

    // ----- transactions -----

    /// Open a transactional unit of work for item writes and purging.
    async fn begin(&self) -> Result<Box<dyn StorageTx>, StoreError>;
}

/// A transactional unit of work. Nothing is visible to readers until
/// [`StorageTx::commit`]; dropping the transaction without committing
/// discards it.
#[async_trait::async_trait]
pub trait StorageTx: Send {
    /// Delete the given item rows in one batch. Absent rows are skipped.
    async fn delete_items(&mut self, keys: &[ItemKey]) -> Result<(), StoreError>;

    /// Insert the given item rows in one batch, all or nothing.
    ///
    /// On failure no row of the batch is staged; callers fall back to
    /// [`StorageTx::insert_item`].
    async fn insert_items(&mut self, items: &[PublishedItem]) -> Result<(), StoreError>;

    /// Insert a single item row.
    async fn insert_item(&mut self, item: &PublishedItem) -> Result<(), StoreError>;

    /// Keep the newest `max_items` item rows of a node and delete the rest.
    /// Idempotent: a node already within bounds is untouched.
    async fn retain_newest(&mut self, uid: &NodeUid, max_items: u32) -> Result<(), StoreError>;

    /// Commit the unit of work.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Roll the unit of work back, discarding all staged statements.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
