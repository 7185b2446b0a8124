//! Memory normalization pipeline.
//!
//! Fixed phase order: snapshot, deduplication, orphan_detection,
//! embedding_refresh, cleanup, validation, swap. Every non-snapshot phase
//! failure triggers a rollback from the snapshot. Normalization is
//! single-flight for the whole process; a second invocation fails fast
//! while one is running.

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::NormalizerSettings;
use crate::embedding::EmbeddingService;
use crate::error::{CoreError, Result};
use crate::jobs::{JobRegistry, JobStatus, JobUpdate};
use crate::memory::{MemoryKind, Payload};
use crate::store::{Direction, Filter, GraphStore, VectorStore};

/// Canonical phase order. Caller-supplied sublists are re-ordered to match.
pub const PHASES: [&str; 7] = [
    "snapshot",
    "deduplication",
    "orphan_detection",
    "embedding_refresh",
    "cleanup",
    "validation",
    "swap",
];

/// Scroll page size for full-collection passes.
const SCAN_PAGE: usize = 500;

/// Sample size per kind in the validation phase.
const VALIDATION_SAMPLE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizeStatus {
    Success,
    Failed,
}

/// Result of one normalization run.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizeOutcome {
    pub status: NormalizeStatus,
    pub phases_completed: Vec<String>,
    pub phases_skipped: Vec<String>,
    pub statistics: Payload,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<Value>,
}

/// Normalizer state exposed through the status tool.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizerState {
    pub running: bool,
    pub has_snapshot: bool,
    pub snapshot_size: usize,
    pub phases: Vec<String>,
}

struct SnapshotRow {
    id: Uuid,
    vector: Vec<f32>,
    payload: Payload,
}

/// Resets the single-flight flag even on early returns.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Normalizer {
    vector: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    embeddings: Arc<EmbeddingService>,
    jobs: Arc<JobRegistry>,
    settings: NormalizerSettings,
    snapshot: tokio::sync::Mutex<HashMap<&'static str, Vec<SnapshotRow>>>,
    running: AtomicBool,
}

impl Normalizer {
    pub fn new(
        vector: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
        embeddings: Arc<EmbeddingService>,
        jobs: Arc<JobRegistry>,
        settings: NormalizerSettings,
    ) -> Self {
        info!(
            conflict_threshold = settings.conflict_threshold,
            retention_days = settings.soft_delete_retention_days,
            "normalizer initialized"
        );
        Self {
            vector,
            graph,
            embeddings,
            jobs,
            settings,
            snapshot: tokio::sync::Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
        }
    }

    pub async fn state(&self) -> NormalizerState {
        let snapshot = self.snapshot.lock().await;
        NormalizerState {
            running: self.running.load(Ordering::SeqCst),
            has_snapshot: !snapshot.is_empty(),
            snapshot_size: snapshot.values().map(Vec::len).sum(),
            phases: PHASES.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Run normalization. `phases` restricts to a subset, evaluated in
    /// canonical order; unknown names are reported as skipped.
    pub async fn normalize(
        &self,
        job_id: Option<&str>,
        phases: Option<&[String]>,
        dry_run: bool,
    ) -> NormalizeOutcome {
        let mut outcome = NormalizeOutcome {
            status: NormalizeStatus::Success,
            phases_completed: Vec::new(),
            phases_skipped: Vec::new(),
            statistics: Payload::new(),
            dry_run,
            error: None,
            failed_phase: None,
            rollback: None,
        };

        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            outcome.status = NormalizeStatus::Failed;
            outcome.error = Some("normalization already running".to_string());
            if let Some(job_id) = job_id {
                self.jobs.update(
                    job_id,
                    JobUpdate {
                        status: Some(JobStatus::Failed),
                        error: outcome.error.clone(),
                        ..Default::default()
                    },
                );
            }
            return outcome;
        }
        let _guard = RunGuard(&self.running);

        let selected: Vec<&'static str> = match phases {
            None => PHASES.to_vec(),
            Some(requested) => {
                let requested_set: HashSet<&str> =
                    requested.iter().map(String::as_str).collect();
                for name in requested {
                    if !PHASES.contains(&name.as_str()) {
                        outcome.phases_skipped.push(name.clone());
                    }
                }
                PHASES
                    .iter()
                    .copied()
                    .filter(|p| requested_set.contains(p))
                    .collect()
            }
        };

        if let Some(job_id) = job_id {
            self.jobs.update(job_id, JobUpdate::status(JobStatus::Running));
            self.jobs.update(job_id, JobUpdate::phase("starting", 0));
        }

        let total = selected.len().max(1);
        for (i, phase) in selected.iter().enumerate() {
            if let Some(job_id) = job_id {
                let progress = (i * 100 / total) as u8;
                self.jobs.update(job_id, JobUpdate::phase(*phase, progress));
            }
            info!(phase, "normalization phase starting");

            match self.run_phase(phase, dry_run).await {
                Ok(stats) => {
                    info!(phase, "normalization phase complete");
                    outcome.statistics.insert(phase.to_string(), stats);
                    outcome.phases_completed.push(phase.to_string());
                }
                Err(e) => {
                    error!(phase, error = %e, "normalization phase failed");
                    outcome.status = NormalizeStatus::Failed;
                    outcome.error = Some(format!("phase {} failed: {}", phase, e));
                    outcome.failed_phase = Some(phase.to_string());

                    if *phase != "snapshot" {
                        outcome.rollback = Some(self.rollback().await);
                    }
                    break;
                }
            }
        }

        if let Some(job_id) = job_id {
            let status = match outcome.status {
                NormalizeStatus::Success => JobStatus::Completed,
                NormalizeStatus::Failed => JobStatus::Failed,
            };
            self.jobs.update(
                job_id,
                JobUpdate {
                    status: Some(status),
                    phase: Some("complete".into()),
                    progress: Some(100),
                    result: serde_json::to_value(&outcome).ok(),
                    error: outcome.error.clone(),
                },
            );
        }

        outcome
    }

    async fn run_phase(&self, phase: &str, dry_run: bool) -> Result<Value> {
        match phase {
            "snapshot" => self.phase_snapshot().await,
            "deduplication" => self.phase_deduplication(dry_run).await,
            "orphan_detection" => self.phase_orphan_detection(dry_run).await,
            "embedding_refresh" => self.phase_embedding_refresh(dry_run).await,
            "cleanup" => self.phase_cleanup(dry_run).await,
            "validation" => self.phase_validation().await,
            "swap" => self.phase_swap(dry_run).await,
            other => Err(CoreError::Internal(format!("unknown phase: {}", other))),
        }
    }

    /// Scroll one kind's live rows completely.
    async fn scan_live(
        &self,
        kind: MemoryKind,
        with_vectors: bool,
        extra: Option<Filter>,
    ) -> Result<Vec<crate::store::StoredPoint>> {
        let mut filter = Filter::new().eq("deleted", false);
        if let Some(extra) = extra {
            filter = filter.merge(extra);
        }
        let mut rows = Vec::new();
        let mut offset = None;
        loop {
            let page = self
                .vector
                .scroll(kind.collection(), &filter, SCAN_PAGE, offset, with_vectors)
                .await?;
            rows.extend(page.points);
            match page.next_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        Ok(rows)
    }

    /// Copy all live rows, with vectors, into the in-memory snapshot.
    async fn phase_snapshot(&self) -> Result<Value> {
        let mut snapshot = self.snapshot.lock().await;
        snapshot.clear();

        let mut counts = Payload::new();
        let mut total = 0_usize;

        for kind in MemoryKind::ALL {
            let rows = self.scan_live(kind, true, None).await?;
            total += rows.len();
            if total > self.settings.max_snapshot_entries {
                snapshot.clear();
                return Err(CoreError::SnapshotLimitExceeded {
                    max_entries: self.settings.max_snapshot_entries,
                });
            }
            counts.insert(kind.as_str().to_string(), Value::from(rows.len()));
            snapshot.insert(
                kind.as_str(),
                rows.into_iter()
                    .map(|point| SnapshotRow {
                        id: point.id,
                        vector: point.vector.unwrap_or_default(),
                        payload: point.payload,
                    })
                    .collect(),
            );
        }

        info!(total, "snapshot created");
        Ok(json!({"snapshot_counts": counts, "total": total}))
    }

    /// Mark near-identical rows as deleted, keeping the first-encountered
    /// row of each cluster as the survivor. Deterministic given scan order.
    async fn phase_deduplication(&self, dry_run: bool) -> Result<Value> {
        let threshold = self.settings.conflict_threshold;
        let mut duplicates_found = 0_u64;
        let mut duplicates_merged = 0_u64;
        let mut by_type = Payload::new();

        for kind in MemoryKind::ALL {
            let rows = self.scan_live(kind, true, None).await?;
            let mut processed: HashSet<Uuid> = HashSet::new();
            let mut kind_duplicates = 0_u64;

            for row in &rows {
                if processed.contains(&row.id) {
                    continue;
                }
                let Some(vector) = row.vector.as_ref().filter(|v| !v.is_empty()) else {
                    continue;
                };

                let similar = self
                    .vector
                    .search(
                        kind.collection(),
                        vector,
                        10,
                        &Filter::new().eq("deleted", false),
                        Some(threshold),
                    )
                    .await?;

                let duplicates: Vec<Uuid> = similar
                    .iter()
                    .map(|hit| hit.id)
                    .filter(|id| *id != row.id && !processed.contains(id))
                    .collect();

                if !duplicates.is_empty() {
                    duplicates_found += duplicates.len() as u64;
                    kind_duplicates += duplicates.len() as u64;

                    for duplicate in duplicates {
                        if !dry_run {
                            let mut patch = Payload::new();
                            patch.insert("deleted".into(), Value::Bool(true));
                            patch.insert(
                                "deleted_at".into(),
                                serde_json::to_value(Utc::now())?,
                            );
                            patch.insert(
                                "deleted_reason".into(),
                                Value::from("deduplication"),
                            );
                            patch
                                .insert("merged_into".into(), Value::from(row.id.to_string()));
                            self.vector
                                .update_payload(kind.collection(), duplicate, patch)
                                .await?;
                            duplicates_merged += 1;
                        }
                        processed.insert(duplicate);
                    }
                }
                processed.insert(row.id);
            }

            if kind_duplicates > 0 {
                by_type.insert(kind.as_str().to_string(), Value::from(kind_duplicates));
            }
        }

        Ok(json!({
            "duplicates_found": duplicates_found,
            "duplicates_merged": duplicates_merged,
            "by_type": by_type,
        }))
    }

    /// Clear dangling `containing_class` pointers and drop graph edges
    /// whose target is soft-deleted.
    async fn phase_orphan_detection(&self, dry_run: bool) -> Result<Value> {
        let mut orphans_found = 0_u64;
        let mut orphans_removed = 0_u64;

        let functions = self.scan_live(MemoryKind::Function, false, None).await?;
        for function in &functions {
            let Some(class_id) = function
                .payload
                .get("containing_class")
                .and_then(Value::as_str)
                .and_then(|s| Uuid::parse_str(s).ok())
            else {
                continue;
            };

            let component = self
                .vector
                .get(MemoryKind::Component.collection(), class_id, false)
                .await?;
            let gone = match component {
                None => true,
                Some(point) => point
                    .payload
                    .get("deleted")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            };

            if gone {
                orphans_found += 1;
                if !dry_run {
                    let mut patch = Payload::new();
                    patch.insert("containing_class".into(), Value::Null);
                    self.vector
                        .update_payload(MemoryKind::Function.collection(), function.id, patch)
                        .await?;
                    orphans_removed += 1;
                }
            }
        }

        // Edges pointing at soft-deleted nodes, best-effort.
        for kind in MemoryKind::ALL {
            let deleted_filter = Filter::new().eq("deleted", true);
            let page = self
                .vector
                .scroll(kind.collection(), &deleted_filter, SCAN_PAGE, None, false)
                .await?;

            for point in &page.points {
                let incoming = match self
                    .graph
                    .get_related(point.id, None, Direction::Incoming, 1, SCAN_PAGE)
                    .await
                {
                    Ok(incoming) => incoming,
                    Err(e) => {
                        warn!(error = %e, "orphan edge scan failed");
                        continue;
                    }
                };
                for edge_source in incoming {
                    orphans_found += 1;
                    if !dry_run {
                        match self
                            .graph
                            .delete_relationship(edge_source.id, point.id, None)
                            .await
                        {
                            Ok(n) => orphans_removed += n,
                            Err(e) => warn!(error = %e, "orphan edge removal failed"),
                        }
                    }
                }
            }
        }

        Ok(json!({
            "orphans_found": orphans_found,
            "orphans_removed": if dry_run { 0 } else { orphans_removed },
        }))
    }

    /// Re-embed rows that carry fallback vectors; clear the marker when the
    /// fresh embedding is not itself a fallback.
    async fn phase_embedding_refresh(&self, dry_run: bool) -> Result<Value> {
        let mut needs_refresh = 0_u64;
        let mut refreshed = 0_u64;

        for kind in MemoryKind::ALL {
            let fallback_filter = Filter::new().eq("metadata.embedding_is_fallback", true);
            let rows = self.scan_live(kind, false, Some(fallback_filter)).await?;

            for row in &rows {
                let Some(content) = row
                    .payload
                    .get("content")
                    .and_then(Value::as_str)
                    .filter(|c| !c.is_empty())
                else {
                    continue;
                };
                needs_refresh += 1;
                if dry_run {
                    continue;
                }

                match self.embeddings.embed(content).await {
                    Ok(embedded) if !embedded.is_fallback => {
                        let mut payload = row.payload.clone();
                        let metadata = payload
                            .entry("metadata".to_string())
                            .or_insert_with(|| Value::Object(Payload::new()));
                        if let Some(metadata) = metadata.as_object_mut() {
                            metadata
                                .insert("embedding_is_fallback".into(), Value::Bool(false));
                        }
                        self.vector
                            .upsert(kind.collection(), row.id, &embedded.vector, payload)
                            .await?;
                        refreshed += 1;
                    }
                    Ok(_) => {
                        // Still on the fallback path; leave the marker.
                    }
                    Err(e) => {
                        warn!(memory_id = %row.id, error = %e, "embedding refresh failed");
                    }
                }
            }
        }

        Ok(json!({"needs_refresh": needs_refresh, "refreshed": refreshed}))
    }

    /// Hard-delete soft-deleted rows past the retention window, from both
    /// stores.
    async fn phase_cleanup(&self, dry_run: bool) -> Result<Value> {
        let retention_days = self.settings.soft_delete_retention_days;
        let cutoff = Utc::now() - Duration::days(retention_days);
        let cutoff_str = cutoff.to_rfc3339();

        let mut eligible = 0_u64;
        let mut deleted = 0_u64;

        for kind in MemoryKind::ALL {
            // Collect the expired set before touching anything; deleting
            // while paginating would shift the cursor past rows.
            let deleted_filter = Filter::new().eq("deleted", true);
            let mut expired_ids = Vec::new();
            let mut offset = None;
            loop {
                let page = self
                    .vector
                    .scroll(kind.collection(), &deleted_filter, SCAN_PAGE, offset, false)
                    .await?;

                for point in &page.points {
                    let expired = point
                        .payload
                        .get("deleted_at")
                        .and_then(Value::as_str)
                        .map(|at| at < cutoff_str.as_str())
                        .unwrap_or(false);
                    if expired {
                        expired_ids.push(point.id);
                    }
                }

                match page.next_offset {
                    Some(next) => offset = Some(next),
                    None => break,
                }
            }

            eligible += expired_ids.len() as u64;
            if dry_run {
                continue;
            }
            for id in expired_ids {
                self.vector.delete(kind.collection(), id).await?;
                if let Err(e) = self.graph.delete_node(id, None, true).await {
                    warn!(memory_id = %id, error = %e, "graph cleanup failed");
                }
                deleted += 1;
            }
        }

        Ok(json!({
            "items_eligible": eligible,
            "items_deleted": if dry_run { 0 } else { deleted },
            "retention_days": retention_days,
        }))
    }

    /// Sample rows per kind and verify vectors and content; probe graph
    /// health. Empty issue list means valid.
    async fn phase_validation(&self) -> Result<Value> {
        let mut issues: Vec<String> = Vec::new();
        let mut counts = Payload::new();
        let live = Filter::new().eq("deleted", false);

        for kind in MemoryKind::ALL {
            match self.vector.count(kind.collection(), &live).await {
                Ok(count) => {
                    counts.insert(kind.as_str().to_string(), Value::from(count));
                }
                Err(e) => {
                    issues.push(format!("count failed for {}: {}", kind, e));
                    continue;
                }
            }

            let page = self
                .vector
                .scroll(kind.collection(), &live, VALIDATION_SAMPLE, None, true)
                .await?;
            for point in &page.points {
                if point.vector.as_ref().map(Vec::is_empty).unwrap_or(true) {
                    issues.push(format!("missing vector for {}:{}", kind, point.id));
                }
                let has_content = point
                    .payload
                    .get("content")
                    .and_then(Value::as_str)
                    .map(|c| !c.is_empty())
                    .unwrap_or(false);
                if !has_content {
                    issues.push(format!("missing content for {}:{}", kind, point.id));
                }
            }
        }

        if !self.graph.health_check().await {
            issues.push("graph store health check failed".to_string());
        }

        let total: u64 = counts.values().filter_map(Value::as_u64).sum();
        Ok(json!({
            "valid": issues.is_empty(),
            "counts": counts,
            "total_memories": total,
            "issues": if issues.is_empty() { Value::Null } else { json!(issues) },
        }))
    }

    /// Normalization happens in place, so the swap just retires the
    /// snapshot.
    async fn phase_swap(&self, dry_run: bool) -> Result<Value> {
        if dry_run {
            return Ok(json!({"swapped": false, "reason": "dry_run"}));
        }
        let mut snapshot = self.snapshot.lock().await;
        let snapshot_size: usize = snapshot.values().map(Vec::len).sum();
        snapshot.clear();
        Ok(json!({
            "swapped": true,
            "snapshot_cleared": true,
            "snapshot_size": snapshot_size,
        }))
    }

    /// Restore every snapshotted row into the vector store; the graph side
    /// is best-effort. Always clears the snapshot.
    async fn rollback(&self) -> Value {
        let mut snapshot = self.snapshot.lock().await;
        if snapshot.is_empty() {
            return json!({"rolled_back": false, "reason": "no_snapshot"});
        }

        let mut restored = 0_u64;
        let mut errors = 0_u64;

        for (kind_name, rows) in snapshot.iter() {
            let Some(kind) = MemoryKind::ALL.iter().find(|k| k.as_str() == *kind_name) else {
                continue;
            };
            for row in rows {
                if row.vector.is_empty() {
                    continue;
                }
                match self
                    .vector
                    .upsert(kind.collection(), row.id, &row.vector, row.payload.clone())
                    .await
                {
                    Ok(()) => {
                        restored += 1;
                        if let Err(e) = self
                            .graph
                            .update_node(row.id, row.payload.clone(), None)
                            .await
                        {
                            warn!(memory_id = %row.id, error = %e, "graph rollback failed");
                        }
                    }
                    Err(e) => {
                        errors += 1;
                        error!(memory_id = %row.id, error = %e, "rollback item failed");
                    }
                }
            }
        }

        snapshot.clear();
        info!(restored, errors, "rollback complete");
        json!({"rolled_back": true, "restored": restored, "errors": errors})
    }
}
