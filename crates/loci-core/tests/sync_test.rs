//! Sync layer: pending/failed transitions, drainer convergence, and the
//! consistency audit.

mod common;

use common::{requirement_numbered, stack_with, FlakyGraphStore};
use std::sync::Arc;

use loci_core::{
    Filter, GraphStore, MemoryKind, SqliteGraphStore, SqliteVectorStore, SyncStatus, VectorStore,
};

async fn pending_count(vector: &Arc<dyn VectorStore>) -> u64 {
    let filter = Filter::new().eq("sync_status", SyncStatus::Pending.as_str());
    vector
        .count(MemoryKind::Requirements.collection(), &filter)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_graph_outage_marks_pending_and_drainer_converges() {
    let flaky = Arc::new(FlakyGraphStore::new(Arc::new(
        SqliteGraphStore::open(None).unwrap(),
    )));
    let stack = stack_with(
        Arc::new(SqliteVectorStore::open(None).unwrap()),
        flaky.clone(),
    )
    .await;

    flaky.set_healthy(false);

    // Adds succeed despite the graph being down.
    let mut ids = Vec::new();
    for i in 0..3 {
        let (id, _) = stack
            .manager
            .add(
                requirement_numbered(&format!("Pending rule {}", i), i + 1),
                false,
                true,
            )
            .await
            .unwrap();
        ids.push(id);
    }

    assert_eq!(pending_count(&stack.vector).await, 3);
    assert_eq!(stack.graph.count_nodes(None, None).await.unwrap_or(0), 0);

    // Heal the graph; one drainer pass converges everything.
    flaky.set_healthy(true);
    let (successes, failures) = stack.sync.process_pending(50, None).await.unwrap();
    assert_eq!(successes, 3);
    assert_eq!(failures, 0);
    assert_eq!(pending_count(&stack.vector).await, 0);
    assert_eq!(stack.graph.count_nodes(Some("Requirement"), None).await.unwrap(), 3);

    for id in ids {
        let memory = stack
            .manager
            .get(id, MemoryKind::Requirements, false, false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(memory.sync_status, SyncStatus::Synced);
    }
}

#[tokio::test]
async fn test_pending_is_monotonically_non_increasing_during_drain() {
    let flaky = Arc::new(FlakyGraphStore::new(Arc::new(
        SqliteGraphStore::open(None).unwrap(),
    )));
    let stack = stack_with(
        Arc::new(SqliteVectorStore::open(None).unwrap()),
        flaky.clone(),
    )
    .await;

    flaky.set_healthy(false);
    for i in 0..5 {
        stack
            .manager
            .add(
                requirement_numbered(&format!("Monotonic rule {}", i), i + 1),
                false,
                true,
            )
            .await
            .unwrap();
    }
    flaky.set_healthy(true);

    // Drain in small batches; pending never grows.
    let mut previous = pending_count(&stack.vector).await;
    while previous > 0 {
        stack.sync.process_pending(2, None).await.unwrap();
        let current = pending_count(&stack.vector).await;
        assert!(current <= previous);
        assert!(current < previous, "drain made no progress");
        previous = current;
    }
}

#[tokio::test]
async fn test_retry_budget_exhaustion_then_explicit_recovery() {
    let flaky = Arc::new(FlakyGraphStore::new(Arc::new(
        SqliteGraphStore::open(None).unwrap(),
    )));
    let stack = stack_with(
        Arc::new(SqliteVectorStore::open(None).unwrap()),
        flaky.clone(),
    )
    .await;

    flaky.set_healthy(false);
    let (id, _) = stack
        .manager
        .add(requirement_numbered("Will fail twice", 1), false, true)
        .await
        .unwrap();

    // The harness budget is 2 attempts: two failing passes demote to failed.
    stack.sync.process_pending(10, None).await.unwrap();
    stack.sync.process_pending(10, None).await.unwrap();

    let memory = stack
        .manager
        .get(id, MemoryKind::Requirements, false, false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(memory.sync_status, SyncStatus::Failed);

    // Failed rows are not picked up by the pending pass.
    let (successes, _) = stack.sync.process_pending(10, None).await.unwrap();
    assert_eq!(successes, 0);

    // Recovery is explicit.
    flaky.set_healthy(true);
    let (recovered, failures) = stack.sync.retry_failed(10, None).await.unwrap();
    assert_eq!(recovered, 1);
    assert_eq!(failures, 0);

    let memory = stack
        .manager
        .get(id, MemoryKind::Requirements, false, false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(memory.sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn test_consistency_audit_classifies() {
    let flaky = Arc::new(FlakyGraphStore::new(Arc::new(
        SqliteGraphStore::open(None).unwrap(),
    )));
    let stack = stack_with(
        Arc::new(SqliteVectorStore::open(None).unwrap()),
        flaky.clone(),
    )
    .await;

    // One fully synced memory.
    stack
        .manager
        .add(requirement_numbered("Consistent", 1), false, true)
        .await
        .unwrap();

    // One vector-only memory.
    flaky.set_healthy(false);
    stack
        .manager
        .add(requirement_numbered("Vector only", 2), false, true)
        .await
        .unwrap();
    flaky.set_healthy(true);

    let report = stack.sync.audit(50).await.unwrap();
    assert_eq!(report.consistent, 1);
    assert_eq!(report.vector_only, 1);
    assert_eq!(report.mismatched, 0);

    // Repeated drains converge the audit.
    stack.sync.process_pending(50, None).await.unwrap();
    let report = stack.sync.audit(50).await.unwrap();
    assert_eq!(report.consistent, 2);
    assert_eq!(report.vector_only, 0);
}

#[tokio::test]
async fn test_status_counts() {
    let flaky = Arc::new(FlakyGraphStore::new(Arc::new(
        SqliteGraphStore::open(None).unwrap(),
    )));
    let stack = stack_with(
        Arc::new(SqliteVectorStore::open(None).unwrap()),
        flaky.clone(),
    )
    .await;

    stack
        .manager
        .add(requirement_numbered("Synced", 1), false, true)
        .await
        .unwrap();
    flaky.set_healthy(false);
    stack
        .manager
        .add(requirement_numbered("Pending", 2), false, true)
        .await
        .unwrap();

    let counts = stack.sync.status_counts().await.unwrap();
    assert_eq!(counts.synced, 1);
    assert_eq!(counts.pending, 1);
    assert_eq!(counts.failed, 0);
}
