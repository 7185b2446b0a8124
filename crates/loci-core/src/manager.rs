//! Memory lifecycle management.
//!
//! Create, read, update, soft/hard delete, and bulk ingest over the dual
//! stores, with conflict detection and importance scoring. The vector write
//! always lands first; a failed graph write routes the memory into the sync
//! layer instead of failing the operation.
//!
//! There is deliberately no lock here: concurrent writers to the same id
//! race at the store layer and last-writer-wins is the documented outcome.
//! Access tracking may over-count slightly under concurrency.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::embedding::EmbeddingService;
use crate::error::{CoreError, Result};
use crate::memory::{Memory, MemoryKind, Payload, SyncStatus};
use crate::store::{Filter, GraphStore, VectorStore};
use crate::sync::SyncLayer;

/// How many conflicts a single probe reports at most.
const CONFLICT_LIMIT: usize = 5;

/// Characters of conflicting content echoed back to the caller.
const CONFLICT_PREVIEW_CHARS: usize = 200;

/// A memory similar enough to count as a duplicate of the one being added.
#[derive(Debug, Clone, Serialize)]
pub struct ConflictInfo {
    pub id: Uuid,
    pub score: f32,
    pub content: String,
}

/// Per-memory failure from a bulk ingest.
#[derive(Debug, Clone, Serialize)]
pub struct BulkError {
    pub memory_id: Uuid,
    pub error: String,
}

pub struct MemoryManager {
    vector: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    embeddings: Arc<EmbeddingService>,
    sync: Arc<SyncLayer>,
    conflict_threshold: f32,
}

impl MemoryManager {
    pub fn new(
        vector: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
        embeddings: Arc<EmbeddingService>,
        sync: Arc<SyncLayer>,
        conflict_threshold: f32,
    ) -> Self {
        info!(conflict_threshold, "memory manager initialized");
        Self {
            vector,
            graph,
            embeddings,
            sync,
            conflict_threshold,
        }
    }

    /// Importance score: base by kind, adjusted by requirement priority,
    /// clamped to [0, 1].
    pub fn importance(memory: &Memory) -> f32 {
        let mut score = memory.kind().base_importance();
        if let Some(priority) = memory.fields.priority() {
            score += priority.importance_boost();
        }
        score.clamp(0.0, 1.0)
    }

    /// Add a memory. Returns its id and any detected conflicts; conflicts do
    /// not block the write.
    pub async fn add(
        &self,
        mut memory: Memory,
        check_conflicts: bool,
        sync_to_graph: bool,
    ) -> Result<(Uuid, Vec<ConflictInfo>)> {
        let start = Instant::now();
        let kind = memory.kind();

        if memory.embedding.is_empty() {
            let embedded = self.embeddings.embed(&memory.content).await?;
            memory.embedding = embedded.vector;
            if embedded.is_fallback {
                memory
                    .metadata
                    .insert("embedding_is_fallback".into(), Value::Bool(true));
            }
        }

        memory.validate()?;

        let conflicts = if check_conflicts {
            let found = self.find_conflicts(&memory).await?;
            if !found.is_empty() {
                warn!(
                    memory_id = %memory.id,
                    conflict_count = found.len(),
                    "memory conflicts found"
                );
            }
            found
        } else {
            Vec::new()
        };

        memory.importance_score = Self::importance(&memory);
        memory.sync_status = SyncStatus::Pending;

        // Vector write strictly precedes the graph attempt.
        self.vector
            .upsert(
                kind.collection(),
                memory.id,
                &memory.embedding,
                memory.to_payload()?,
            )
            .await?;

        if sync_to_graph {
            match self
                .graph
                .create_node(kind.node_label(), memory.to_payload()?)
                .await
            {
                Ok(_) => {
                    memory.sync_status = SyncStatus::Synced;
                    let mut patch = Payload::new();
                    patch.insert(
                        "sync_status".into(),
                        Value::from(SyncStatus::Synced.as_str()),
                    );
                    self.vector
                        .update_payload(kind.collection(), memory.id, patch)
                        .await?;
                }
                Err(e) => {
                    error!(memory_id = %memory.id, error = %e, "graph sync failed");
                    self.sync.mark_pending(kind, memory.id).await?;
                }
            }
        }

        debug!(
            operation = "add",
            kind = %kind,
            status = "success",
            duration_ms = start.elapsed().as_millis() as u64,
            "memory operation"
        );
        info!(
            memory_id = %memory.id,
            kind = %kind,
            has_conflicts = !conflicts.is_empty(),
            "memory added"
        );

        Ok((memory.id, conflicts))
    }

    /// Fetch a memory. `track_access` bumps the access counters in place.
    pub async fn get(
        &self,
        id: Uuid,
        kind: MemoryKind,
        include_vector: bool,
        track_access: bool,
    ) -> Result<Option<Memory>> {
        let start = Instant::now();
        let Some(point) = self
            .vector
            .get(kind.collection(), id, include_vector)
            .await?
        else {
            return Ok(None);
        };

        let mut memory = Memory::from_payload(&point.payload)?;
        if let Some(vector) = point.vector {
            memory.embedding = vector;
        }

        if track_access {
            memory.access_count += 1;
            memory.last_accessed_at = Some(Utc::now());
            let mut patch = Payload::new();
            patch.insert("access_count".into(), Value::from(memory.access_count));
            patch.insert(
                "last_accessed_at".into(),
                serde_json::to_value(memory.last_accessed_at)?,
            );
            self.vector
                .update_payload(kind.collection(), id, patch)
                .await?;
        }

        debug!(
            operation = "get",
            kind = %kind,
            status = "success",
            duration_ms = start.elapsed().as_millis() as u64,
            "memory operation"
        );
        Ok(Some(memory))
    }

    /// Apply a payload patch. Regenerates the embedding only when `content`
    /// actually changed and regeneration is requested; `updated_at` always
    /// advances.
    pub async fn update(
        &self,
        id: Uuid,
        kind: MemoryKind,
        mut patch: Payload,
        regenerate_embedding: bool,
    ) -> Result<Option<Memory>> {
        let start = Instant::now();
        let Some(existing) = self.get(id, kind, true, false).await? else {
            return Ok(None);
        };

        // id and kind are immutable.
        patch.remove("id");
        patch.remove("kind");

        let content_changed = patch
            .get("content")
            .and_then(Value::as_str)
            .map(|new_content| new_content != existing.content)
            .unwrap_or(false);

        // Restoring a soft-deleted memory clears its deletion timestamp.
        if patch.get("deleted") == Some(&Value::Bool(false)) {
            patch.entry("deleted_at".to_string()).or_insert(Value::Null);
        }

        let mut payload = existing.to_payload()?;
        for (key, value) in patch {
            payload.insert(key, value);
        }
        payload.insert("updated_at".into(), serde_json::to_value(Utc::now())?);

        let mut updated = Memory::from_payload(&payload)?;
        updated.embedding = existing.embedding;

        if content_changed && regenerate_embedding {
            let embedded = self.embeddings.embed(&updated.content).await?;
            updated.embedding = embedded.vector;
            updated.metadata.insert(
                "embedding_is_fallback".into(),
                Value::Bool(embedded.is_fallback),
            );
        }

        updated.validate()?;

        self.vector
            .upsert(
                kind.collection(),
                id,
                &updated.embedding,
                updated.to_payload()?,
            )
            .await?;

        match self
            .graph
            .update_node(id, updated.to_payload()?, Some(kind.node_label()))
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                // Node never made it to the graph; queue it.
                self.sync.mark_pending(kind, id).await?;
            }
            Err(e) => {
                error!(memory_id = %id, error = %e, "graph update failed");
                self.sync.mark_pending(kind, id).await?;
            }
        }

        debug!(
            operation = "update",
            kind = %kind,
            status = "success",
            duration_ms = start.elapsed().as_millis() as u64,
            "memory operation"
        );
        info!(memory_id = %id, kind = %kind, "memory updated");
        Ok(Some(updated))
    }

    /// Soft delete marks both stores; hard delete removes the vector row and
    /// detach-deletes the graph node. Returns false for unknown ids.
    pub async fn delete(&self, id: Uuid, kind: MemoryKind, soft: bool) -> Result<bool> {
        let start = Instant::now();
        if self.vector.get(kind.collection(), id, false).await?.is_none() {
            return Ok(false);
        }

        if soft {
            let mut patch = Payload::new();
            patch.insert("deleted".into(), Value::Bool(true));
            patch.insert("deleted_at".into(), serde_json::to_value(Utc::now())?);
            self.vector
                .update_payload(kind.collection(), id, patch.clone())
                .await?;

            if let Err(e) = self.graph.update_node(id, patch, None).await {
                warn!(memory_id = %id, error = %e, "graph soft delete failed");
            }
        } else {
            self.vector.delete(kind.collection(), id).await?;
            if let Err(e) = self
                .graph
                .delete_node(id, Some(kind.node_label()), true)
                .await
            {
                warn!(memory_id = %id, error = %e, "graph hard delete failed");
            }
        }

        debug!(
            operation = "delete",
            kind = %kind,
            status = "success",
            duration_ms = start.elapsed().as_millis() as u64,
            "memory operation"
        );
        info!(memory_id = %id, kind = %kind, soft, "memory deleted");
        Ok(true)
    }

    /// Bulk ingest with per-kind batching. Errors only cover pre-upsert
    /// validation and whole-batch storage failures; graph misses go to the
    /// pending queue instead.
    pub async fn bulk_add(
        &self,
        memories: Vec<Memory>,
        check_conflicts: bool,
        sync_to_graph: bool,
    ) -> Result<(Vec<Uuid>, Vec<BulkError>)> {
        let start = Instant::now();
        let mut added: Vec<Uuid> = Vec::new();
        let mut errors: Vec<BulkError> = Vec::new();

        // Group by kind, dropping invalid memories up front.
        let mut by_kind: BTreeMap<&'static str, Vec<Memory>> = BTreeMap::new();
        for mut memory in memories {
            memory.importance_score = Self::importance(&memory);
            memory.sync_status = SyncStatus::Pending;
            if let Err(e) = memory.fields.validate() {
                errors.push(BulkError {
                    memory_id: memory.id,
                    error: e.to_string(),
                });
                continue;
            }
            by_kind.entry(memory.kind().as_str()).or_default().push(memory);
        }

        for (_, batch) in by_kind.iter_mut() {
            // Embed everything in this batch that still lacks a vector.
            let contents: Vec<String> = batch
                .iter()
                .filter(|m| m.embedding.is_empty())
                .map(|m| m.content.clone())
                .collect();
            if !contents.is_empty() {
                let embedded = self.embeddings.embed_batch(&contents).await?;
                let mut cursor = embedded.into_iter();
                for memory in batch.iter_mut().filter(|m| m.embedding.is_empty()) {
                    let embedding = cursor.next().expect("one embedding per missing vector");
                    memory.embedding = embedding.vector;
                    if embedding.is_fallback {
                        memory
                            .metadata
                            .insert("embedding_is_fallback".into(), Value::Bool(true));
                    }
                }
            }
        }

        for (_, batch) in by_kind {
            let kind = batch[0].kind();

            if check_conflicts {
                for memory in &batch {
                    let conflicts = self.find_conflicts(memory).await?;
                    if !conflicts.is_empty() {
                        warn!(
                            memory_id = %memory.id,
                            conflict_count = conflicts.len(),
                            "bulk add found conflicts"
                        );
                    }
                }
            }

            let mut points = Vec::with_capacity(batch.len());
            for memory in &batch {
                points.push((memory.id, memory.embedding.clone(), memory.to_payload()?));
            }

            if let Err(e) = self.vector.upsert_batch(kind.collection(), points).await {
                error!(kind = %kind, error = %e, "bulk upsert failed");
                for memory in &batch {
                    errors.push(BulkError {
                        memory_id: memory.id,
                        error: e.to_string(),
                    });
                }
                continue;
            }

            for memory in &batch {
                added.push(memory.id);
            }

            if sync_to_graph {
                for memory in &batch {
                    match self
                        .graph
                        .create_node(kind.node_label(), memory.to_payload()?)
                        .await
                    {
                        Ok(_) => {
                            let mut patch = Payload::new();
                            patch.insert(
                                "sync_status".into(),
                                Value::from(SyncStatus::Synced.as_str()),
                            );
                            self.vector
                                .update_payload(kind.collection(), memory.id, patch)
                                .await?;
                        }
                        Err(e) => {
                            // Not an error from the caller's vantage; the
                            // drainer will retry.
                            error!(memory_id = %memory.id, error = %e, "bulk graph sync failed");
                            self.sync.mark_pending(kind, memory.id).await?;
                        }
                    }
                }
            }
        }

        info!(
            added_count = added.len(),
            error_count = errors.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "bulk add complete"
        );
        Ok((added, errors))
    }

    /// Live (non-deleted) memory counts per kind.
    pub async fn counts(&self) -> Result<BTreeMap<String, u64>> {
        let mut counts = BTreeMap::new();
        let live = Filter::new().eq("deleted", false);
        for kind in MemoryKind::ALL {
            let count = self.vector.count(kind.collection(), &live).await?;
            counts.insert(kind.as_str().to_string(), count);
        }
        Ok(counts)
    }

    /// KNN probe of the memory's own collection at the conflict threshold,
    /// excluding itself.
    async fn find_conflicts(&self, memory: &Memory) -> Result<Vec<ConflictInfo>> {
        if memory.embedding.is_empty() {
            return Err(CoreError::Internal(
                "conflict probe requires an embedding".into(),
            ));
        }

        let results = self
            .vector
            .search(
                memory.kind().collection(),
                &memory.embedding,
                CONFLICT_LIMIT + 1,
                &Filter::new().eq("deleted", false),
                Some(self.conflict_threshold),
            )
            .await?;

        Ok(results
            .into_iter()
            .filter(|hit| hit.id != memory.id)
            .take(CONFLICT_LIMIT)
            .map(|hit| {
                let content = hit
                    .payload
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                ConflictInfo {
                    id: hit.id,
                    score: hit.score,
                    content: content.chars().take(CONFLICT_PREVIEW_CHARS).collect(),
                }
            })
            .collect())
    }
}
