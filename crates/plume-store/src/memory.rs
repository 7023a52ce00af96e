//! In-memory storage backend.
//!
//! Implements the full [`StorageAdapter`] contract over plain maps. Useful
//! for testing and for deployments that accept volatile persistence. Every
//! adapter and transaction call increments a shared statement counter so
//! tests can assert how much backend traffic an engine operation produced.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use plume_types::{
    Affiliate, DefaultNodeConfiguration, ItemKey, NodeRecord, NodeUid, PublishedItem, Subscription,
};
use tracing::debug;

use crate::error::StoreError;
use crate::traits::{ReadOrder, StorageAdapter, StorageTx};

#[derive(Default)]
struct Tables {
    nodes: HashMap<NodeUid, NodeRecord>,
    affiliations: HashMap<NodeUid, Vec<Affiliate>>,
    subscriptions: HashMap<NodeUid, Vec<Subscription>>,
    items: HashMap<ItemKey, PublishedItem>,
    defaults: HashMap<(String, bool), DefaultNodeConfiguration>,
}

/// In-memory relational store backed by `RwLock`-guarded maps.
#[derive(Default)]
pub struct MemoryStorage {
    tables: Arc<RwLock<Tables>>,
    statements: Arc<AtomicU64>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of statements executed since creation, including those staged
    /// through transactions.
    pub fn statement_count(&self) -> u64 {
        self.statements.load(Ordering::Relaxed)
    }

    /// Number of item rows currently stored for a node.
    pub fn item_count(&self, uid: &NodeUid) -> usize {
        let tables = self.tables.read().expect("tables lock poisoned");
        tables.items.keys().filter(|k| &k.node == uid).count()
    }

    fn record(&self) {
        self.statements.fetch_add(1, Ordering::Relaxed);
    }
}

/// Newest-first ordering by creation time, item id as tie-break.
fn newest_first(a: &PublishedItem, b: &PublishedItem) -> std::cmp::Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.item_id.cmp(&a.item_id))
}

fn retained_keys(tables: &Tables, uid: &NodeUid, max_items: u32) -> Vec<ItemKey> {
    let mut rows: Vec<&PublishedItem> =
        tables.items.values().filter(|i| &i.node == uid).collect();
    rows.sort_by(|a, b| newest_first(a, b));
    rows.iter()
        .skip(max_items as usize)
        .map(|i| i.key())
        .collect()
}

#[async_trait::async_trait]
impl StorageAdapter for MemoryStorage {
    async fn insert_node(&self, record: &NodeRecord) -> Result<(), StoreError> {
        self.record();
        let mut tables = self.tables.write().expect("tables lock poisoned");
        debug!(uid = %record.uid, "inserting node row");
        tables.nodes.insert(record.uid.clone(), record.clone());
        Ok(())
    }

    async fn update_node(&self, record: &NodeRecord) -> Result<(), StoreError> {
        self.record();
        let mut tables = self.tables.write().expect("tables lock poisoned");
        tables.nodes.insert(record.uid.clone(), record.clone());
        Ok(())
    }

    async fn delete_node(&self, uid: &NodeUid) -> Result<(), StoreError> {
        self.record();
        let mut tables = self.tables.write().expect("tables lock poisoned");
        debug!(%uid, "deleting node row and relations");
        tables.nodes.remove(uid);
        tables.affiliations.remove(uid);
        tables.subscriptions.remove(uid);
        Ok(())
    }

    async fn load_nodes(&self, service_id: &str) -> Result<Vec<NodeRecord>, StoreError> {
        self.record();
        let tables = self.tables.read().expect("tables lock poisoned");
        let mut rows: Vec<NodeRecord> = tables
            .nodes
            .values()
            .filter(|n| n.uid.service_id == service_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.uid.cmp(&b.uid));
        Ok(rows)
    }

    async fn load_node(&self, uid: &NodeUid) -> Result<Option<NodeRecord>, StoreError> {
        self.record();
        let tables = self.tables.read().expect("tables lock poisoned");
        Ok(tables.nodes.get(uid).cloned())
    }

    async fn insert_affiliation(
        &self,
        uid: &NodeUid,
        affiliate: &Affiliate,
    ) -> Result<(), StoreError> {
        self.record();
        let mut tables = self.tables.write().expect("tables lock poisoned");
        tables
            .affiliations
            .entry(uid.clone())
            .or_default()
            .push(affiliate.clone());
        Ok(())
    }

    async fn update_affiliation(
        &self,
        uid: &NodeUid,
        affiliate: &Affiliate,
    ) -> Result<(), StoreError> {
        self.record();
        let mut tables = self.tables.write().expect("tables lock poisoned");
        if let Some(rows) = tables.affiliations.get_mut(uid) {
            if let Some(row) = rows.iter_mut().find(|a| a.jid == affiliate.jid) {
                *row = affiliate.clone();
            }
        }
        Ok(())
    }

    async fn delete_affiliation(&self, uid: &NodeUid, jid: &str) -> Result<(), StoreError> {
        self.record();
        let mut tables = self.tables.write().expect("tables lock poisoned");
        if let Some(rows) = tables.affiliations.get_mut(uid) {
            rows.retain(|a| a.jid != jid);
        }
        Ok(())
    }

    async fn load_affiliations(&self, uid: &NodeUid) -> Result<Vec<Affiliate>, StoreError> {
        self.record();
        let tables = self.tables.read().expect("tables lock poisoned");
        Ok(tables.affiliations.get(uid).cloned().unwrap_or_default())
    }

    async fn insert_subscription(
        &self,
        uid: &NodeUid,
        subscription: &Subscription,
    ) -> Result<(), StoreError> {
        self.record();
        let mut tables = self.tables.write().expect("tables lock poisoned");
        tables
            .subscriptions
            .entry(uid.clone())
            .or_default()
            .push(subscription.clone());
        Ok(())
    }

    async fn update_subscription(
        &self,
        uid: &NodeUid,
        subscription: &Subscription,
    ) -> Result<(), StoreError> {
        self.record();
        let mut tables = self.tables.write().expect("tables lock poisoned");
        if let Some(rows) = tables.subscriptions.get_mut(uid) {
            if let Some(row) = rows.iter_mut().find(|s| s.id == subscription.id) {
                *row = subscription.clone();
            }
        }
        Ok(())
    }

    async fn delete_subscription(&self, uid: &NodeUid, sub_id: &str) -> Result<(), StoreError> {
        self.record();
        let mut tables = self.tables.write().expect("tables lock poisoned");
        if let Some(rows) = tables.subscriptions.get_mut(uid) {
            rows.retain(|s| s.id != sub_id);
        }
        Ok(())
    }

    async fn load_subscriptions(&self, uid: &NodeUid) -> Result<Vec<Subscription>, StoreError> {
        self.record();
        let tables = self.tables.read().expect("tables lock poisoned");
        Ok(tables.subscriptions.get(uid).cloned().unwrap_or_default())
    }

    async fn load_subscription(
        &self,
        uid: &NodeUid,
        sub_id: &str,
    ) -> Result<Option<Subscription>, StoreError> {
        self.record();
        let tables = self.tables.read().expect("tables lock poisoned");
        Ok(tables
            .subscriptions
            .get(uid)
            .and_then(|rows| rows.iter().find(|s| s.id == sub_id).cloned()))
    }

    async fn load_item(&self, key: &ItemKey) -> Result<Option<PublishedItem>, StoreError> {
        self.record();
        let tables = self.tables.read().expect("tables lock poisoned");
        Ok(tables.items.get(key).cloned())
    }

    async fn load_items(
        &self,
        uid: &NodeUid,
        max_rows: usize,
        order: ReadOrder,
    ) -> Result<Vec<PublishedItem>, StoreError> {
        self.record();
        let tables = self.tables.read().expect("tables lock poisoned");
        let mut rows: Vec<PublishedItem> = tables
            .items
            .values()
            .filter(|i| &i.node == uid)
            .cloned()
            .collect();
        // Newest `max_rows` rows are selected in both presentation orders.
        rows.sort_by(newest_first);
        rows.truncate(max_rows);
        if order == ReadOrder::Ascending {
            rows.reverse();
        }
        Ok(rows)
    }

    async fn load_last_item(&self, uid: &NodeUid) -> Result<Option<PublishedItem>, StoreError> {
        self.record();
        let tables = self.tables.read().expect("tables lock poisoned");
        Ok(tables
            .items
            .values()
            .filter(|i| &i.node == uid)
            .min_by(|a, b| newest_first(a, b))
            .cloned())
    }

    async fn delete_items_for_node(&self, uid: &NodeUid) -> Result<(), StoreError> {
        self.record();
        let mut tables = self.tables.write().expect("tables lock poisoned");
        tables.items.retain(|k, _| &k.node != uid);
        Ok(())
    }

    async fn persistent_nodes(&self) -> Result<Vec<(NodeUid, u32)>, StoreError> {
        self.record();
        let tables = self.tables.read().expect("tables lock poisoned");
        let mut rows: Vec<(NodeUid, u32)> = tables
            .nodes
            .values()
            .filter_map(|n| n.kind.retention_bound().map(|max| (n.uid.clone(), max)))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(rows)
    }

    async fn insert_default_configuration(
        &self,
        config: &DefaultNodeConfiguration,
    ) -> Result<(), StoreError> {
        self.record();
        let mut tables = self.tables.write().expect("tables lock poisoned");
        tables
            .defaults
            .insert((config.service_id.clone(), config.leaf), config.clone());
        Ok(())
    }

    async fn update_default_configuration(
        &self,
        config: &DefaultNodeConfiguration,
    ) -> Result<(), StoreError> {
        self.record();
        let mut tables = self.tables.write().expect("tables lock poisoned");
        tables
            .defaults
            .insert((config.service_id.clone(), config.leaf), config.clone());
        Ok(())
    }

    async fn load_default_configuration(
        &self,
        service_id: &str,
        leaf: bool,
    ) -> Result<Option<DefaultNodeConfiguration>, StoreError> {
        self.record();
        let tables = self.tables.read().expect("tables lock poisoned");
        Ok(tables.defaults.get(&(service_id.to_string(), leaf)).cloned())
    }

    async fn begin(&self) -> Result<Box<dyn StorageTx>, StoreError> {
        self.record();
        Ok(Box::new(MemoryTx {
            tables: Arc::clone(&self.tables),
            statements: Arc::clone(&self.statements),
            staged: Vec::new(),
            deleted: HashSet::new(),
            inserted: HashSet::new(),
        }))
    }
}

enum StagedOp {
    DeleteItem(ItemKey),
    InsertItem(PublishedItem),
    RetainNewest(NodeUid, u32),
}

/// Transaction over [`MemoryStorage`]: statements are staged and applied in
/// order on commit, under one write lock.
struct MemoryTx {
    tables: Arc<RwLock<Tables>>,
    statements: Arc<AtomicU64>,
    staged: Vec<StagedOp>,
    /// Keys deleted earlier in this transaction (visible to later inserts).
    deleted: HashSet<ItemKey>,
    /// Keys inserted earlier in this transaction.
    inserted: HashSet<ItemKey>,
}

impl MemoryTx {
    fn record(&self) {
        self.statements.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether a row for `key` would exist at this point in the transaction.
    fn row_exists(&self, key: &ItemKey) -> bool {
        if self.inserted.contains(key) {
            return true;
        }
        if self.deleted.contains(key) {
            return false;
        }
        let tables = self.tables.read().expect("tables lock poisoned");
        tables.items.contains_key(key)
    }

    fn stage_insert(&mut self, item: &PublishedItem) -> Result<(), StoreError> {
        let key = item.key();
        if self.row_exists(&key) {
            return Err(StoreError::Constraint(key));
        }
        self.inserted.insert(key);
        self.staged.push(StagedOp::InsertItem(item.clone()));
        Ok(())
    }
}

#[async_trait::async_trait]
impl StorageTx for MemoryTx {
    async fn delete_items(&mut self, keys: &[ItemKey]) -> Result<(), StoreError> {
        self.record();
        for key in keys {
            self.inserted.remove(key);
            self.deleted.insert(key.clone());
            self.staged.push(StagedOp::DeleteItem(key.clone()));
        }
        Ok(())
    }

    async fn insert_items(&mut self, items: &[PublishedItem]) -> Result<(), StoreError> {
        self.record();
        // All-or-nothing: validate the whole batch before staging any of it.
        for item in items {
            let key = item.key();
            if self.row_exists(&key) || items.iter().filter(|i| i.key() == key).count() > 1 {
                return Err(StoreError::BatchFailed(format!(
                    "duplicate item row {key}"
                )));
            }
        }
        for item in items {
            self.stage_insert(item)?;
        }
        Ok(())
    }

    async fn insert_item(&mut self, item: &PublishedItem) -> Result<(), StoreError> {
        self.record();
        self.stage_insert(item)
    }

    async fn retain_newest(&mut self, uid: &NodeUid, max_items: u32) -> Result<(), StoreError> {
        self.record();
        self.staged.push(StagedOp::RetainNewest(uid.clone(), max_items));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx { tables, staged, .. } = *self;
        let mut tables = tables.write().expect("tables lock poisoned");
        for op in staged {
            match op {
                StagedOp::DeleteItem(key) => {
                    tables.items.remove(&key);
                }
                StagedOp::InsertItem(item) => {
                    tables.items.insert(item.key(), item);
                }
                StagedOp::RetainNewest(uid, max_items) => {
                    for key in retained_keys(&tables, &uid, max_items) {
                        tables.items.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        debug!(staged = self.staged.len(), "rolling back transaction");
        Ok(())
    }
}
