//! [`PlumeEngine`] — the orchestrator tying all engine components together.
//!
//! A `PlumeEngine` owns the storage adapter, the cluster substrate handles,
//! the pending operation log, the item write cache, and the lock registry,
//! and implements [`PersistenceProvider`] for the pubsub service layer.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use plume_cluster::{
    ClusterBroadcast, FlushScope, LocalCache, LockRegistry, NoCluster, ReplicatedCache,
};
use plume_store::StorageAdapter;
use plume_types::{
    Affiliate, DefaultNodeConfiguration, ItemKey, NodeRecord, NodeUid, PublishedItem, Subscription,
};
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::flush::FlushCoordinator;
use crate::oplog::OperationLog;
use crate::provider::PersistenceProvider;
use crate::purge::PurgeJob;
use crate::write_cache::{ItemWriteCache, RetryRecord};

/// Cache key of a default node configuration: `(service_id, leaf)`.
pub type DefaultConfKey = (String, bool);

/// The write-behind persistence engine for pubsub nodes and published items.
pub struct PlumeEngine {
    storage: Arc<dyn StorageAdapter>,
    cluster: Arc<dyn ClusterBroadcast>,
    /// Cluster-shared cache of default node configurations.
    defaults: Arc<dyn ReplicatedCache<DefaultConfKey, DefaultNodeConfiguration>>,
    /// Node-scoped locks for read-path miss-fills.
    locks: LockRegistry,
    flusher: FlushCoordinator,
    purger: PurgeJob,
    config: EngineConfig,
    /// Handles of spawned maintenance tasks, aborted on shutdown.
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PlumeEngine {
    /// Create an engine over the given storage and cluster substrate.
    ///
    /// `items` and `defaults` are the cluster-visible caches; pass
    /// [`LocalCache`] instances for a standalone deployment.
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        cluster: Arc<dyn ClusterBroadcast>,
        items: Arc<dyn ReplicatedCache<ItemKey, PublishedItem>>,
        defaults: Arc<dyn ReplicatedCache<DefaultConfKey, DefaultNodeConfiguration>>,
        config: EngineConfig,
    ) -> Self {
        let flusher = FlushCoordinator {
            storage: Arc::clone(&storage),
            cluster: Arc::clone(&cluster),
            oplog: Arc::new(OperationLog::new()),
            cache: Arc::new(ItemWriteCache::new()),
            items,
            max_pending: config.max_pending_items(),
            max_retry: config.max_item_retry(),
        };
        let purger = PurgeJob {
            storage: Arc::clone(&storage),
        };
        Self {
            storage,
            cluster,
            defaults,
            locks: LockRegistry::new(),
            flusher,
            purger,
            config,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Create a standalone engine: no clustering, process-local caches.
    pub fn standalone(storage: Arc<dyn StorageAdapter>, config: EngineConfig) -> Self {
        Self::new(
            storage,
            Arc::new(NoCluster),
            Arc::new(LocalCache::new()),
            Arc::new(LocalCache::new()),
            config,
        )
    }

    /// Schedule the background flush and purge timers on the current
    /// runtime. Each timer starts at a randomized phase offset so cluster
    /// members do not hit the backend in lockstep.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock().expect("tasks lock poisoned");

        if self.config.max_pending_items() > 0 {
            let flusher = self.flusher.clone();
            let period = self.config.flush_interval();
            tasks.push(tokio::spawn(async move {
                tokio::time::sleep(random_phase(period)).await;
                let mut tick = tokio::time::interval(period);
                loop {
                    tick.tick().await;
                    flusher.flush(FlushScope::All, false).await;
                }
            }));
        }

        let purger = self.purger.clone();
        let period = self.config.purge_interval(self.cluster.is_enabled());
        tasks.push(tokio::spawn(async move {
            tokio::time::sleep(random_phase(period)).await;
            let mut tick = tokio::time::interval(period);
            loop {
                tick.tick().await;
                purger.run_once().await;
            }
        }));

        info!(
            flush_period = ?self.config.flush_interval(),
            purge_period = ?period,
            "maintenance tasks scheduled"
        );
    }

    /// Number of distinct items awaiting persistence.
    pub fn pending_items(&self) -> usize {
        self.flusher.cache.pending_len()
    }

    /// Run one purge pass immediately, enforcing every bounded node's
    /// retention limit. Normally driven by the purge timer.
    pub async fn purge_expired_items(&self) {
        self.purger.run_once().await;
    }

    /// Purge a leaf node's items from every structure: queued writes, the
    /// shared read cache, and storage rows.
    async fn purge_leaf(&self, uid: &NodeUid) {
        self.flusher.cache.purge_node(uid);
        self.flusher
            .items
            .retain(&mut |key: &ItemKey, _: &PublishedItem| &key.node != uid);
        if let Err(e) = self.storage.delete_items_for_node(uid).await {
            error!(%uid, error = %e, "failed to delete item rows for removed node");
        }
    }

    fn item_lock_name(uid: &NodeUid) -> String {
        format!("item:{uid}")
    }

    fn default_conf_lock_name(service_id: &str, leaf: bool) -> String {
        format!("defaultconf:{service_id}:{leaf}")
    }
}

/// Uniform random offset within one timer period.
fn random_phase(period: Duration) -> Duration {
    let millis = period.as_millis().max(1) as u64;
    Duration::from_millis(rand::rng().random_range(0..millis))
}

#[async_trait::async_trait]
impl PersistenceProvider for PlumeEngine {
    fn create_node(&self, record: NodeRecord) {
        debug!(uid = %record.uid, "creating node");
        self.flusher.oplog.enqueue_create(record);
    }

    fn update_node(&self, record: NodeRecord) {
        debug!(uid = %record.uid, "updating node");
        self.flusher.oplog.enqueue_update(record);
    }

    async fn remove_node(&self, record: NodeRecord) {
        debug!(uid = %record.uid, "removing node");
        if record.kind.is_leaf() {
            self.purge_leaf(&record.uid).await;
        }
        self.flusher.oplog.enqueue_remove(record);
    }

    fn create_affiliation(&self, record: NodeRecord, affiliate: Affiliate) {
        self.flusher.oplog.enqueue_create_affiliation(record, affiliate);
    }

    fn update_affiliation(&self, record: NodeRecord, affiliate: Affiliate) {
        self.flusher.oplog.enqueue_update_affiliation(record, affiliate);
    }

    fn remove_affiliation(&self, record: NodeRecord, affiliate: Affiliate) {
        self.flusher.oplog.enqueue_remove_affiliation(record, affiliate);
    }

    fn create_subscription(&self, record: NodeRecord, subscription: Subscription) {
        debug!(uid = %record.uid, id = %subscription.id, "creating subscription");
        self.flusher.oplog.enqueue_create_subscription(record, subscription);
    }

    fn update_subscription(&self, record: NodeRecord, subscription: Subscription) {
        self.flusher.oplog.enqueue_update_subscription(record, subscription);
    }

    fn remove_subscription(&self, record: NodeRecord, subscription: Subscription) {
        self.flusher.oplog.enqueue_remove_subscription(record, subscription);
    }

    async fn load_nodes(&self, service_id: &str) -> Result<Vec<NodeRecord>, EngineError> {
        // Pending mutations must hit storage before the read.
        self.flusher.process_service_ops(service_id).await;
        Ok(self.storage.load_nodes(service_id).await?)
    }

    async fn load_node(&self, uid: &NodeUid) -> Result<Option<NodeRecord>, EngineError> {
        self.flusher.process_node_ops(uid).await;
        Ok(self.storage.load_node(uid).await?)
    }

    async fn load_affiliations(&self, uid: &NodeUid) -> Result<Vec<Affiliate>, EngineError> {
        self.flusher.process_node_ops(uid).await;
        Ok(self.storage.load_affiliations(uid).await?)
    }

    async fn load_subscriptions(&self, uid: &NodeUid) -> Result<Vec<Subscription>, EngineError> {
        self.flusher.process_node_ops(uid).await;
        Ok(self.storage.load_subscriptions(uid).await?)
    }

    async fn load_subscription(
        &self,
        uid: &NodeUid,
        sub_id: &str,
    ) -> Result<Option<Subscription>, EngineError> {
        self.flusher.process_node_ops(uid).await;
        Ok(self.storage.load_subscription(uid, sub_id).await?)
    }

    fn save_published_item(&self, item: PublishedItem) {
        debug!(key = %item.key(), "saving published item");
        self.flusher.submit(RetryRecord::new(item));
    }

    fn remove_published_item(&self, item: PublishedItem) {
        let key = item.key();
        debug!(%key, "removing published item");
        self.flusher.items.remove(&key);
        self.flusher.cache.push_delete(item);
    }

    async fn get_published_item(&self, uid: &NodeUid, item_id: &str) -> Option<PublishedItem> {
        let key = uid.item_key(item_id);
        if let Some(item) = self.flusher.items.get(&key) {
            return Some(item);
        }

        // Acquire the node lock, then re-check: the first request through
        // here primes the shared cache for everyone queued behind it.
        let _guard = self.locks.acquire(&Self::item_lock_name(uid)).await;
        if let Some(item) = self.flusher.items.get(&key) {
            debug!(%key, "item cached while waiting for the node lock");
            return Some(item);
        }

        self.flusher
            .flush(FlushScope::Node(uid.clone()), self.cluster.is_enabled())
            .await;

        match self.storage.load_item(&key).await {
            Ok(Some(item)) => {
                self.flusher.items.insert(key, item.clone());
                Some(item)
            }
            Ok(None) => None,
            Err(e) => {
                // Freshness is sacrificed for availability: fall back to
                // whatever the flush left in the cache.
                error!(%key, error = %e, "storage read failed; serving cached state");
                self.flusher.items.get(&key)
            }
        }
    }

    async fn get_published_items(
        &self,
        record: &NodeRecord,
        max_rows: Option<usize>,
    ) -> Vec<PublishedItem> {
        let uid = &record.uid;
        {
            // Force concurrent readers of this node to wait for the flush.
            let _guard = self.locks.acquire(&Self::item_lock_name(uid)).await;
            self.flusher
                .flush(FlushScope::Node(uid.clone()), self.cluster.is_enabled())
                .await;
        }

        let mut max = self.config.max_rows_fetch();
        if let Some(bound) = record.kind.retention_bound() {
            max = max.min(bound as usize);
        }
        if let Some(requested) = max_rows {
            max = max.min(requested);
        }

        match self
            .storage
            .load_items(uid, max, self.config.read_order())
            .await
        {
            Ok(items) => items,
            Err(e) => {
                error!(%uid, error = %e, "failed to load published items; returning empty set");
                Vec::new()
            }
        }
    }

    async fn get_last_published_item(&self, record: &NodeRecord) -> Option<PublishedItem> {
        let uid = &record.uid;
        {
            let _guard = self.locks.acquire(&Self::item_lock_name(uid)).await;
            self.flusher
                .flush(FlushScope::Node(uid.clone()), self.cluster.is_enabled())
                .await;
        }

        match self.storage.load_last_item(uid).await {
            Ok(item) => item,
            Err(e) => {
                error!(%uid, error = %e, "failed to load last published item");
                None
            }
        }
    }

    async fn load_default_configuration(
        &self,
        service_id: &str,
        leaf: bool,
    ) -> Result<Option<DefaultNodeConfiguration>, EngineError> {
        let key = (service_id.to_string(), leaf);
        if let Some(config) = self.defaults.get(&key) {
            return Ok(Some(config));
        }

        let _guard = self
            .locks
            .acquire(&Self::default_conf_lock_name(service_id, leaf))
            .await;
        if let Some(config) = self.defaults.get(&key) {
            return Ok(Some(config));
        }

        let loaded = self.storage.load_default_configuration(service_id, leaf).await?;
        if let Some(config) = &loaded {
            self.defaults.insert(key, config.clone());
        }
        Ok(loaded)
    }

    async fn create_default_configuration(
        &self,
        config: DefaultNodeConfiguration,
    ) -> Result<(), EngineError> {
        self.storage.insert_default_configuration(&config).await?;
        self.defaults
            .insert((config.service_id.clone(), config.leaf), config);
        Ok(())
    }

    async fn update_default_configuration(
        &self,
        config: DefaultNodeConfiguration,
    ) -> Result<(), EngineError> {
        self.storage.update_default_configuration(&config).await?;
        self.defaults
            .insert((config.service_id.clone(), config.leaf), config);
        Ok(())
    }

    async fn flush_pending_items(&self, send_to_cluster: bool) {
        self.flusher.flush(FlushScope::All, send_to_cluster).await;
    }

    async fn flush_pending_items_for_node(&self, uid: &NodeUid, send_to_cluster: bool) {
        self.flusher
            .flush(FlushScope::Node(uid.clone()), send_to_cluster)
            .await;
    }

    async fn shutdown(&self) {
        info!("flushing write cache to storage");
        for task in self.tasks.lock().expect("tasks lock poisoned").drain(..) {
            task.abort();
        }
        self.flusher.flush(FlushScope::All, false).await;

        // When clustered, surviving members keep purging on their timers.
        if !self.cluster.is_enabled() {
            self.purger.run_once().await;
        }
    }
}
