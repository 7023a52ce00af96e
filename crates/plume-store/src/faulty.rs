//! A [`StorageAdapter`] wrapper that injects scripted failures.
//!
//! `FaultyStorage` wraps any `Arc<dyn StorageAdapter>` and fails selected
//! operations on demand: the next N transaction begins or commits, the next
//! N batched inserts, individual inserts for specific item keys, or a seeded
//! random fraction of individual inserts. Used to exercise the engine's
//! retry, fallback, and rollback paths against an otherwise well-behaved
//! backend.
//!
//! # Example
//!
//! ```ignore
//! let faulty = FaultyStorage::new(inner);
//! faulty.fail_next_batch_inserts(1);
//! faulty.fail_item(key.clone());
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use plume_types::{
    Affiliate, DefaultNodeConfiguration, ItemKey, NodeRecord, NodeUid, PublishedItem, Subscription,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::StoreError;
use crate::traits::{ReadOrder, StorageAdapter, StorageTx};

#[derive(Default)]
struct FaultState {
    fail_begins: u32,
    fail_commits: u32,
    fail_batch_inserts: u32,
    fail_item_inserts: u32,
    fail_loads: u32,
    failing_keys: HashSet<ItemKey>,
    random_insert_failures: Option<(f64, StdRng)>,
}

impl FaultState {
    fn take(counter: &mut u32) -> bool {
        if *counter > 0 {
            *counter -= 1;
            true
        } else {
            false
        }
    }

    fn should_fail_insert(&mut self, key: &ItemKey) -> bool {
        if self.failing_keys.contains(key) {
            return true;
        }
        if Self::take(&mut self.fail_item_inserts) {
            return true;
        }
        if let Some((rate, rng)) = self.random_insert_failures.as_mut() {
            return rng.random_bool(*rate);
        }
        false
    }

    /// A batch fails when scripted to, or when it contains a poisoned key.
    fn should_fail_batch(&mut self, items: &[PublishedItem]) -> bool {
        if Self::take(&mut self.fail_batch_inserts) {
            return true;
        }
        items.iter().any(|i| self.failing_keys.contains(&i.key()))
    }
}

/// A [`StorageAdapter`] wrapper with scripted failure injection.
pub struct FaultyStorage {
    inner: Arc<dyn StorageAdapter>,
    state: Arc<Mutex<FaultState>>,
}

impl FaultyStorage {
    /// Wrap an existing adapter; passes everything through until a failure
    /// is scripted.
    pub fn new(inner: Arc<dyn StorageAdapter>) -> Self {
        Self {
            inner,
            state: Arc::new(Mutex::new(FaultState::default())),
        }
    }

    /// Fail the next `n` calls to [`StorageAdapter::begin`].
    pub fn fail_next_begins(&self, n: u32) {
        self.state.lock().expect("fault lock poisoned").fail_begins = n;
    }

    /// Fail the next `n` transaction commits.
    pub fn fail_next_commits(&self, n: u32) {
        self.state.lock().expect("fault lock poisoned").fail_commits = n;
    }

    /// Fail the next `n` batched item inserts.
    pub fn fail_next_batch_inserts(&self, n: u32) {
        self.state
            .lock()
            .expect("fault lock poisoned")
            .fail_batch_inserts = n;
    }

    /// Fail the next `n` individual item inserts.
    pub fn fail_next_item_inserts(&self, n: u32) {
        self.state
            .lock()
            .expect("fault lock poisoned")
            .fail_item_inserts = n;
    }

    /// Fail every individual insert of `key` until cleared.
    pub fn fail_item(&self, key: ItemKey) {
        self.state
            .lock()
            .expect("fault lock poisoned")
            .failing_keys
            .insert(key);
    }

    /// Stop failing inserts scripted via [`FaultyStorage::fail_item`].
    pub fn clear_failing_items(&self) {
        self.state
            .lock()
            .expect("fault lock poisoned")
            .failing_keys
            .clear();
    }

    /// Fail a random fraction of individual inserts, deterministically seeded.
    pub fn random_item_failures(&self, rate: f64, seed: u64) {
        self.state
            .lock()
            .expect("fault lock poisoned")
            .random_insert_failures = Some((rate, StdRng::seed_from_u64(seed)));
    }

    /// Fail the next `n` item reads (`load_item`, `load_items`,
    /// `load_last_item`).
    pub fn fail_next_loads(&self, n: u32) {
        self.state.lock().expect("fault lock poisoned").fail_loads = n;
    }

    fn take_load_failure(&self) -> bool {
        FaultState::take(&mut self.state.lock().expect("fault lock poisoned").fail_loads)
    }
}

#[async_trait::async_trait]
impl StorageAdapter for FaultyStorage {
    async fn insert_node(&self, record: &NodeRecord) -> Result<(), StoreError> {
        self.inner.insert_node(record).await
    }

    async fn update_node(&self, record: &NodeRecord) -> Result<(), StoreError> {
        self.inner.update_node(record).await
    }

    async fn delete_node(&self, uid: &NodeUid) -> Result<(), StoreError> {
        self.inner.delete_node(uid).await
    }

    async fn load_nodes(&self, service_id: &str) -> Result<Vec<NodeRecord>, StoreError> {
        self.inner.load_nodes(service_id).await
    }

    async fn load_node(&self, uid: &NodeUid) -> Result<Option<NodeRecord>, StoreError> {
        self.inner.load_node(uid).await
    }

    async fn insert_affiliation(
        &self,
        uid: &NodeUid,
        affiliate: &Affiliate,
    ) -> Result<(), StoreError> {
        self.inner.insert_affiliation(uid, affiliate).await
    }

    async fn update_affiliation(
        &self,
        uid: &NodeUid,
        affiliate: &Affiliate,
    ) -> Result<(), StoreError> {
        self.inner.update_affiliation(uid, affiliate).await
    }

    async fn delete_affiliation(&self, uid: &NodeUid, jid: &str) -> Result<(), StoreError> {
        self.inner.delete_affiliation(uid, jid).await
    }

    async fn load_affiliations(&self, uid: &NodeUid) -> Result<Vec<Affiliate>, StoreError> {
        self.inner.load_affiliations(uid).await
    }

    async fn insert_subscription(
        &self,
        uid: &NodeUid,
        subscription: &Subscription,
    ) -> Result<(), StoreError> {
        self.inner.insert_subscription(uid, subscription).await
    }

    async fn update_subscription(
        &self,
        uid: &NodeUid,
        subscription: &Subscription,
    ) -> Result<(), StoreError> {
        self.inner.update_subscription(uid, subscription).await
    }

    async fn delete_subscription(&self, uid: &NodeUid, sub_id: &str) -> Result<(), StoreError> {
        self.inner.delete_subscription(uid, sub_id).await
    }

    async fn load_subscriptions(&self, uid: &NodeUid) -> Result<Vec<Subscription>, StoreError> {
        self.inner.load_subscriptions(uid).await
    }

    async fn load_subscription(
        &self,
        uid: &NodeUid,
        sub_id: &str,
    ) -> Result<Option<Subscription>, StoreError> {
        self.inner.load_subscription(uid, sub_id).await
    }

    async fn load_item(&self, key: &ItemKey) -> Result<Option<PublishedItem>, StoreError> {
        if self.take_load_failure() {
            return Err(StoreError::Unavailable("injected read failure".into()));
        }
        self.inner.load_item(key).await
    }

    async fn load_items(
        &self,
        uid: &NodeUid,
        max_rows: usize,
        order: ReadOrder,
    ) -> Result<Vec<PublishedItem>, StoreError> {
        if self.take_load_failure() {
            return Err(StoreError::Unavailable("injected read failure".into()));
        }
        self.inner.load_items(uid, max_rows, order).await
    }

    async fn load_last_item(&self, uid: &NodeUid) -> Result<Option<PublishedItem>, StoreError> {
        if self.take_load_failure() {
            return Err(StoreError::Unavailable("injected read failure".into()));
        }
        self.inner.load_last_item(uid).await
    }

    async fn delete_items_for_node(&self, uid: &NodeUid) -> Result<(), StoreError> {
        self.inner.delete_items_for_node(uid).await
    }

    async fn persistent_nodes(&self) -> Result<Vec<(NodeUid, u32)>, StoreError> {
        self.inner.persistent_nodes().await
    }

    async fn insert_default_configuration(
        &self,
        config: &DefaultNodeConfiguration,
    ) -> Result<(), StoreError> {
        self.inner.insert_default_configuration(config).await
    }

    async fn update_default_configuration(
        &self,
        config: &DefaultNodeConfiguration,
    ) -> Result<(), StoreError> {
        self.inner.update_default_configuration(config).await
    }

    async fn load_default_configuration(
        &self,
        service_id: &str,
        leaf: bool,
    ) -> Result<Option<DefaultNodeConfiguration>, StoreError> {
        self.inner.load_default_configuration(service_id, leaf).await
    }

    async fn begin(&self) -> Result<Box<dyn StorageTx>, StoreError> {
        if FaultState::take(&mut self.state.lock().expect("fault lock poisoned").fail_begins) {
            return Err(StoreError::Unavailable("injected begin failure".into()));
        }
        let inner = self.inner.begin().await?;
        Ok(Box::new(FaultyTx {
            inner,
            state: Arc::clone(&self.state),
        }))
    }
}

struct FaultyTx {
    inner: Box<dyn StorageTx>,
    state: Arc<Mutex<FaultState>>,
}

#[async_trait::async_trait]
impl StorageTx for FaultyTx {
    async fn delete_items(&mut self, keys: &[ItemKey]) -> Result<(), StoreError> {
        self.inner.delete_items(keys).await
    }

    async fn insert_items(&mut self, items: &[PublishedItem]) -> Result<(), StoreError> {
        if self
            .state
            .lock()
            .expect("fault lock poisoned")
            .should_fail_batch(items)
        {
            return Err(StoreError::BatchFailed("injected batch failure".into()));
        }
        self.inner.insert_items(items).await
    }

    async fn insert_item(&mut self, item: &PublishedItem) -> Result<(), StoreError> {
        let key = item.key();
        if self
            .state
            .lock()
            .expect("fault lock poisoned")
            .should_fail_insert(&key)
        {
            return Err(StoreError::Constraint(key));
        }
        self.inner.insert_item(item).await
    }

    async fn retain_newest(&mut self, uid: &NodeUid, max_items: u32) -> Result<(), StoreError> {
        self.inner.retain_newest(uid, max_items).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        if FaultState::take(&mut self.state.lock().expect("fault lock poisoned").fail_commits) {
            self.inner.rollback().await?;
            return Err(StoreError::CommitFailed("injected commit failure".into()));
        }
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStorage;
    use bytes::Bytes;

    fn item(id: &str) -> PublishedItem {
        PublishedItem {
            node: NodeUid::new("svc", "news"),
            item_id: id.to_string(),
            publisher: "alice@example.org".to_string(),
            created_at: 1,
            payload: Some(Bytes::from_static(b"<x/>")),
        }
    }

    #[tokio::test]
    async fn test_passthrough_without_faults() {
        let faulty = FaultyStorage::new(Arc::new(MemoryStorage::new()));
        let mut tx = faulty.begin().await.unwrap();
        tx.insert_item(&item("a")).await.unwrap();
        tx.commit().await.unwrap();
        assert!(faulty.load_item(&item("a").key()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_fail_next_batch_then_recover() {
        let faulty = FaultyStorage::new(Arc::new(MemoryStorage::new()));
        faulty.fail_next_batch_inserts(1);

        let mut tx = faulty.begin().await.unwrap();
        let err = tx.insert_items(&[item("a")]).await.unwrap_err();
        assert!(matches!(err, StoreError::BatchFailed(_)));
        // Second attempt passes through.
        tx.insert_items(&[item("a")]).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_fail_item_is_sticky_until_cleared() {
        let faulty = FaultyStorage::new(Arc::new(MemoryStorage::new()));
        faulty.fail_item(item("a").key());

        let mut tx = faulty.begin().await.unwrap();
        assert!(tx.insert_item(&item("a")).await.is_err());
        assert!(tx.insert_item(&item("a")).await.is_err());
        assert!(tx.insert_item(&item("b")).await.is_ok());
        tx.commit().await.unwrap();

        faulty.clear_failing_items();
        let mut tx = faulty.begin().await.unwrap();
        assert!(tx.insert_item(&item("a")).await.is_ok());
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_fail_commit_discards_writes() {
        let faulty = FaultyStorage::new(Arc::new(MemoryStorage::new()));
        faulty.fail_next_commits(1);

        let mut tx = faulty.begin().await.unwrap();
        tx.insert_item(&item("a")).await.unwrap();
        let err = tx.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::CommitFailed(_)));
        assert!(faulty.load_item(&item("a").key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fail_begin() {
        let faulty = FaultyStorage::new(Arc::new(MemoryStorage::new()));
        faulty.fail_next_begins(1);
        assert!(faulty.begin().await.is_err());
        assert!(faulty.begin().await.is_ok());
    }
}
