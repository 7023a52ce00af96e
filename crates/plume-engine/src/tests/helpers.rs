//! Shared test utilities for plume-engine tests.

use std::sync::Arc;

use bytes::Bytes;
use plume_cluster::{LocalCache, LoopbackCluster, NoCluster};
use plume_store::{FaultyStorage, MemoryStorage, StorageAdapter};
use plume_types::{NodeKind, NodeRecord, NodeUid, PublishedItem};

use crate::config::EngineConfig;
use crate::engine::PlumeEngine;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn uid(node: &str) -> NodeUid {
    NodeUid::new("pubsub.example.org", node)
}

pub fn leaf(node: &str, max_items: i32) -> NodeRecord {
    NodeRecord {
        uid: uid(node),
        kind: NodeKind::Leaf {
            persist_items: true,
            max_items,
            max_payload_size: 5120,
        },
        parent: None,
        created_at: 1_700_000_000_000,
        modified_at: 1_700_000_000_000,
        creator: "admin@example.org".to_string(),
        name: Some(node.to_string()),
        description: None,
        language: None,
        deliver_payloads: true,
        subscription_enabled: true,
    }
}

pub fn item(node: &str, id: &str, created_at: u64) -> PublishedItem {
    PublishedItem {
        node: uid(node),
        item_id: id.to_string(),
        publisher: "alice@example.org".to_string(),
        created_at,
        payload: Some(Bytes::from(format!("<entry id='{id}'/>"))),
    }
}

/// Engine over an existing storage handle, standalone substrate.
pub fn engine_over(storage: Arc<dyn StorageAdapter>, config: EngineConfig) -> PlumeEngine {
    init_tracing();
    PlumeEngine::new(
        storage,
        Arc::new(NoCluster),
        Arc::new(LocalCache::new()),
        Arc::new(LocalCache::new()),
        config,
    )
}

/// Standalone engine over a fresh in-memory store.
pub fn standalone() -> (PlumeEngine, Arc<MemoryStorage>) {
    standalone_with(EngineConfig::default())
}

/// Standalone engine with a custom configuration.
pub fn standalone_with(config: EngineConfig) -> (PlumeEngine, Arc<MemoryStorage>) {
    let memory = Arc::new(MemoryStorage::new());
    (engine_over(memory.clone(), config), memory)
}

/// Engine whose storage can be scripted to fail.
pub fn faulty_with(
    config: EngineConfig,
) -> (PlumeEngine, Arc<FaultyStorage>, Arc<MemoryStorage>) {
    let memory = Arc::new(MemoryStorage::new());
    let faulty = Arc::new(FaultyStorage::new(memory.clone()));
    (engine_over(faulty.clone(), config), faulty, memory)
}

/// Engine with a recording cluster substrate (clustering enabled).
pub fn clustered() -> (PlumeEngine, Arc<LoopbackCluster>, Arc<MemoryStorage>) {
    init_tracing();
    let memory = Arc::new(MemoryStorage::new());
    let cluster = Arc::new(LoopbackCluster::new());
    let engine = PlumeEngine::new(
        memory.clone(),
        cluster.clone(),
        Arc::new(LocalCache::new()),
        Arc::new(LocalCache::new()),
        EngineConfig::default(),
    );
    (engine, cluster, memory)
}
