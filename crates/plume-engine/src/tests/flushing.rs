//! Flush coordinator behavior: scopes, triggers, cluster forwarding, and
//! the rollback path.

use std::sync::Arc;
use std::time::Duration;

use plume_cluster::FlushScope;
use plume_store::StorageAdapter;

use crate::config::EngineConfig;
use crate::provider::PersistenceProvider;
use crate::tests::helpers::{clustered, faulty_with, item, leaf, standalone, standalone_with, uid};

#[tokio::test]
async fn test_flushing_empty_queue_issues_zero_storage_calls() {
    let (engine, memory) = standalone();
    let before = memory.statement_count();
    engine.flush_pending_items(false).await;
    assert_eq!(memory.statement_count(), before);
}

#[tokio::test]
async fn test_node_scoped_flush_leaves_other_nodes_queued() {
    let (engine, memory) = standalone();
    engine.save_published_item(item("news", "a", 10));
    engine.save_published_item(item("sports", "b", 20));

    engine
        .flush_pending_items_for_node(&uid("news"), false)
        .await;

    assert_eq!(memory.item_count(&uid("news")), 1);
    assert_eq!(memory.item_count(&uid("sports")), 0);
    assert_eq!(engine.pending_items(), 1);

    engine.flush_pending_items(false).await;
    assert_eq!(memory.item_count(&uid("sports")), 1);
}

#[tokio::test]
async fn test_explicit_flush_forwards_to_cluster() {
    let (engine, cluster, _memory) = clustered();
    engine.save_published_item(item("news", "a", 10));

    engine.flush_pending_items(true).await;
    assert_eq!(cluster.forwarded(), vec![FlushScope::All]);

    engine
        .flush_pending_items_for_node(&uid("news"), true)
        .await;
    assert_eq!(
        cluster.forwarded(),
        vec![FlushScope::All, FlushScope::Node(uid("news"))]
    );
}

#[tokio::test]
async fn test_read_miss_forwards_node_scope_when_clustered() {
    let (engine, cluster, _memory) = clustered();
    let _ = engine.get_published_item(&uid("news"), "absent").await;
    assert_eq!(cluster.forwarded(), vec![FlushScope::Node(uid("news"))]);
}

#[tokio::test]
async fn test_broadcast_failure_does_not_abort_local_flush() {
    let (engine, cluster, memory) = clustered();
    cluster.set_failing(true);
    engine.save_published_item(item("news", "a", 10));

    engine.flush_pending_items(true).await;
    assert_eq!(memory.item_count(&uid("news")), 1);
}

#[tokio::test]
async fn test_threshold_crossing_triggers_async_flush() {
    let (engine, memory) = standalone_with(EngineConfig {
        max_pending_items: Some(2),
        ..Default::default()
    });

    engine.save_published_item(item("news", "a", 10));
    engine.save_published_item(item("news", "b", 20));
    assert_eq!(memory.item_count(&uid("news")), 0);

    // The third publish crosses the threshold and schedules a flush.
    engine.save_published_item(item("news", "c", 30));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(memory.item_count(&uid("news")), 3);
    assert_eq!(engine.pending_items(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_flush_timer_drains_cache() {
    let (engine, memory) = standalone();
    engine.start();
    engine.save_published_item(item("news", "a", 10));

    // The timer fires within one period plus its random phase offset.
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(memory.item_count(&uid("news")), 1);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_transactional_failure_requeues_adds_but_not_deletes() {
    let (engine, faulty, memory) = faulty_with(EngineConfig::default());

    // Seed a persisted row, then queue its deletion alongside a new add.
    let victim = item("news", "old", 5);
    engine.save_published_item(victim.clone());
    engine.flush_pending_items(false).await;
    assert_eq!(memory.item_count(&uid("news")), 1);

    engine.remove_published_item(victim);
    engine.save_published_item(item("news", "fresh", 10));

    faulty.fail_next_commits(1);
    engine.flush_pending_items(false).await;

    // The transaction rolled back: the deletion did not stick, and it is
    // not requeued; the add went back to the pending cache.
    assert_eq!(memory.item_count(&uid("news")), 1);
    assert_eq!(engine.pending_items(), 1);

    engine.flush_pending_items(false).await;
    assert_eq!(memory.item_count(&uid("news")), 2);
    assert!(memory
        .load_item(&uid("news").item_key("old"))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_get_published_items_bounded_and_ordered() {
    let (engine, _memory) = standalone();
    engine.create_node(leaf("news", 3));
    for (id, ts) in [("a", 10), ("b", 20), ("c", 30), ("d", 40), ("e", 50)] {
        engine.save_published_item(item("news", id, ts));
    }

    // Bounded by min(requested, retention bound, fetch cap) = 3, presented
    // oldest-first by default.
    let rows = engine.get_published_items(&leaf("news", 3), Some(10)).await;
    assert_eq!(
        rows.iter().map(|i| i.item_id.as_str()).collect::<Vec<_>>(),
        vec!["c", "d", "e"]
    );

    let rows = engine.get_published_items(&leaf("news", 3), Some(2)).await;
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn test_descending_read_order() {
    let (engine, _memory) = standalone_with(EngineConfig {
        descending_order: true,
        ..Default::default()
    });
    for (id, ts) in [("a", 10), ("b", 20), ("c", 30)] {
        engine.save_published_item(item("news", id, ts));
    }

    let rows = engine.get_published_items(&leaf("news", -1), None).await;
    assert_eq!(
        rows.iter().map(|i| i.item_id.as_str()).collect::<Vec<_>>(),
        vec!["c", "b", "a"]
    );
}

#[tokio::test]
async fn test_get_last_published_item_flushes_first() {
    let (engine, _memory) = standalone();
    engine.save_published_item(item("news", "a", 10));
    engine.save_published_item(item("news", "b", 20));

    let last = engine.get_last_published_item(&leaf("news", -1)).await;
    assert_eq!(last.unwrap().item_id, "b");
}

#[tokio::test]
async fn test_concurrent_read_misses_share_one_storage_load() {
    let (engine, memory) = standalone();
    engine.save_published_item(item("news", "a", 10));
    engine.flush_pending_items(false).await;

    // A second engine over the same storage starts with a cold cache.
    let cold = Arc::new(crate::tests::helpers::engine_over(
        memory.clone(),
        EngineConfig::default(),
    ));
    let before = memory.statement_count();

    let mut handles = Vec::new();
    for _ in 0..5 {
        let engine = cold.clone();
        handles.push(tokio::spawn(async move {
            engine.get_published_item(&uid("news"), "a").await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_some());
    }

    // One task filled the cache behind the node lock; the rest re-checked
    // and hit it.
    assert_eq!(memory.statement_count() - before, 1);
}

#[tokio::test]
async fn test_read_failure_returns_best_effort_result() {
    let (engine, faulty, _memory) = faulty_with(EngineConfig::default());
    engine.save_published_item(item("news", "a", 10));
    engine.flush_pending_items(false).await;

    let cold = crate::tests::helpers::engine_over(faulty.clone(), EngineConfig::default());
    faulty.fail_next_loads(1);

    // The storage read fails; the miss is served as absence, not an error.
    assert!(cold.get_published_item(&uid("news"), "a").await.is_none());

    // With storage healthy again the row comes through and is cached.
    assert!(cold.get_published_item(&uid("news"), "a").await.is_some());
}
