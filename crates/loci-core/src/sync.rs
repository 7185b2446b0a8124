//! Dual-store coherence layer.
//!
//! The vector store is authoritative for content, the graph store for
//! relationships. Writes that miss the graph leave the memory with
//! `sync_status = pending`; a single-flight drainer periodically replays
//! those onto the graph, demoting entries to `failed` once their retry
//! budget runs out. A consistency auditor samples live memories and reports
//! one-sided or mismatched rows.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::memory::{MemoryKind, Payload, SyncStatus};
use crate::store::{Filter, GraphStore, StoredPoint, VectorStore};

/// Payload keys maintained by the sync layer.
const RETRY_COUNT_KEY: &str = "sync_retry_count";
const SYNC_ERROR_KEY: &str = "sync_error";

/// Counts from one consistency audit pass.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ConsistencyReport {
    /// Row in the vector store with no graph node.
    pub vector_only: u64,
    /// Graph nodes exceeding live vector rows, per-kind aggregate.
    pub graph_only: u64,
    /// Both present but content or deletion flag disagree.
    pub mismatched: u64,
    pub consistent: u64,
}

/// Per-status totals across every collection.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SyncStatusCounts {
    pub synced: u64,
    pub pending: u64,
    pub failed: u64,
}

pub struct SyncLayer {
    vector: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    max_retries: u32,
}

impl SyncLayer {
    pub fn new(vector: Arc<dyn VectorStore>, graph: Arc<dyn GraphStore>, max_retries: u32) -> Self {
        Self {
            vector,
            graph,
            max_retries,
        }
    }

    /// Queue a memory for the drainer.
    pub async fn mark_pending(&self, kind: MemoryKind, id: Uuid) -> Result<()> {
        let mut patch = Payload::new();
        patch.insert("sync_status".into(), Value::from(SyncStatus::Pending.as_str()));
        self.vector
            .update_payload(kind.collection(), id, patch)
            .await?;
        Ok(())
    }

    /// Replay one memory onto the graph: create the node if absent,
    /// otherwise bring its properties up to date.
    async fn drain_item(&self, kind: MemoryKind, point: &StoredPoint) -> Result<()> {
        let label = kind.node_label();
        match self.graph.get_node(point.id, None).await? {
            Some(_) => {
                self.graph
                    .update_node(point.id, point.payload.clone(), None)
                    .await?;
            }
            None => {
                self.graph.create_node(label, point.payload.clone()).await?;
            }
        }
        Ok(())
    }

    async fn mark_outcome(
        &self,
        kind: MemoryKind,
        point: &StoredPoint,
        outcome: std::result::Result<(), String>,
    ) -> Result<bool> {
        let mut patch = Payload::new();
        let synced = match outcome {
            Ok(()) => {
                patch.insert("sync_status".into(), Value::from(SyncStatus::Synced.as_str()));
                patch.insert(RETRY_COUNT_KEY.into(), Value::from(0));
                patch.insert(SYNC_ERROR_KEY.into(), Value::Null);
                true
            }
            Err(message) => {
                let retries = point
                    .payload
                    .get(RETRY_COUNT_KEY)
                    .and_then(Value::as_u64)
                    .unwrap_or(0)
                    + 1;
                let status = if retries >= self.max_retries as u64 {
                    SyncStatus::Failed
                } else {
                    SyncStatus::Pending
                };
                patch.insert("sync_status".into(), Value::from(status.as_str()));
                patch.insert(RETRY_COUNT_KEY.into(), Value::from(retries));
                patch.insert(SYNC_ERROR_KEY.into(), Value::from(message));
                false
            }
        };
        self.vector
            .update_payload(kind.collection(), point.id, patch)
            .await?;
        Ok(synced)
    }

    /// Drain up to `batch_size` entries with the given status across all
    /// kinds. Returns (successes, failures).
    async fn drain_status(
        &self,
        status: SyncStatus,
        batch_size: usize,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<(u64, u64)> {
        let mut successes = 0;
        let mut failures = 0;
        let mut budget = batch_size;

        for kind in MemoryKind::ALL {
            if budget == 0 {
                break;
            }
            let filter = Filter::new().eq("sync_status", status.as_str());
            let page = self
                .vector
                .scroll(kind.collection(), &filter, budget, None, false)
                .await?;

            for point in &page.points {
                if shutdown.map(|rx| *rx.borrow()).unwrap_or(false) {
                    info!("sync drain interrupted by shutdown");
                    return Ok((successes, failures));
                }
                let outcome = self
                    .drain_item(kind, point)
                    .await
                    .map_err(|e| e.to_string());
                match self.mark_outcome(kind, point, outcome).await? {
                    true => successes += 1,
                    false => failures += 1,
                }
                budget = budget.saturating_sub(1);
            }
        }

        Ok((successes, failures))
    }

    /// One pending pass. Returns (successes, failures).
    pub async fn process_pending(
        &self,
        batch_size: usize,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<(u64, u64)> {
        self.drain_status(SyncStatus::Pending, batch_size, shutdown)
            .await
    }

    /// Recovery pass over failed entries.
    pub async fn retry_failed(
        &self,
        batch_size: usize,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<(u64, u64)> {
        self.drain_status(SyncStatus::Failed, batch_size, shutdown)
            .await
    }

    async fn count_status(&self, kind: MemoryKind, status: SyncStatus) -> Result<u64> {
        let filter = Filter::new().eq("sync_status", status.as_str());
        self.vector.count(kind.collection(), &filter).await
    }

    /// Per-status totals across every collection.
    pub async fn status_counts(&self) -> Result<SyncStatusCounts> {
        let mut counts = SyncStatusCounts::default();
        for kind in MemoryKind::ALL {
            counts.synced += self.count_status(kind, SyncStatus::Synced).await?;
            counts.pending += self.count_status(kind, SyncStatus::Pending).await?;
            counts.failed += self.count_status(kind, SyncStatus::Failed).await?;
        }
        Ok(counts)
    }

    /// Sample live memories per kind and compare against the graph.
    pub async fn audit(&self, sample_per_kind: usize) -> Result<ConsistencyReport> {
        let mut report = ConsistencyReport::default();
        let live = Filter::new().eq("deleted", false);

        for kind in MemoryKind::ALL {
            let page = self
                .vector
                .scroll(kind.collection(), &live, sample_per_kind, None, false)
                .await?;

            for point in &page.points {
                match self.graph.get_node(point.id, None).await? {
                    None => report.vector_only += 1,
                    Some(node) => {
                        let content_matches =
                            node.properties.get("content") == point.payload.get("content");
                        let deleted_matches =
                            node.properties.get("deleted") == point.payload.get("deleted");
                        if content_matches && deleted_matches {
                            report.consistent += 1;
                        } else {
                            report.mismatched += 1;
                        }
                    }
                }
            }

            let mut deleted_false = Payload::new();
            deleted_false.insert("deleted".into(), Value::Bool(false));
            let graph_count = self
                .graph
                .count_nodes(Some(kind.node_label()), Some(&deleted_false))
                .await?;
            let vector_count = self.vector.count(kind.collection(), &live).await?;
            report.graph_only += graph_count.saturating_sub(vector_count);
        }

        Ok(report)
    }
}

// ============================================================================
// DRAINER WORKER
// ============================================================================

/// Periodic drainer. At most one pass runs at a time; the loop polls the
/// shutdown signal between passes and the layer polls it between items.
pub struct SyncWorker {
    layer: Arc<SyncLayer>,
    interval: Duration,
    batch_size: usize,
}

impl SyncWorker {
    pub fn new(layer: Arc<SyncLayer>, interval: Duration, batch_size: usize) -> Self {
        Self {
            layer,
            interval,
            batch_size,
        }
    }

    /// Run until the shutdown signal turns true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            batch_size = self.batch_size,
            "sync worker started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.interval) => {
                    self.pass(&shutdown).await;
                }
            }
            if *shutdown.borrow() {
                break;
            }
        }

        info!("sync worker stopped");
    }

    /// A single drain pass: pending first, then a smaller failed batch.
    pub async fn pass(&self, shutdown: &watch::Receiver<bool>) {
        match self
            .layer
            .process_pending(self.batch_size, Some(shutdown))
            .await
        {
            Ok((successes, failures)) if successes > 0 || failures > 0 => {
                info!(successes, failures, "sync worker processed pending");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "sync worker pending pass failed"),
        }

        if *shutdown.borrow() {
            return;
        }

        match self
            .layer
            .retry_failed((self.batch_size / 2).max(1), Some(shutdown))
            .await
        {
            Ok((successes, failures)) if successes > 0 || failures > 0 => {
                warn!(successes, failures, "sync worker retried failed entries");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "sync worker retry pass failed"),
        }

        debug!("sync pass complete");
    }
}
