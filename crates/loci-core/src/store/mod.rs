//! Storage capabilities - the vector index and the property graph.
//!
//! Both stores are defined as async traits so every consumer (manager, query
//! engine, indexer, normalizer, sync layer) depends on the capability, not
//! the backend. The production backends are embedded SQLite engines; tests
//! use the same engines in-memory, plus wrappers that inject failures.

mod filter;
mod graph_sqlite;
mod query;
mod vector_sqlite;

pub use filter::{Filter, Predicate};
pub use graph_sqlite::SqliteGraphStore;
pub use vector_sqlite::SqliteVectorStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::memory::Payload;

// ============================================================================
// VECTOR STORE
// ============================================================================

/// A stored point, optionally with its vector attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPoint {
    pub id: Uuid,
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

/// A KNN hit with its cosine similarity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub id: Uuid,
    pub score: f32,
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

/// One page of a scroll pass.
#[derive(Debug, Clone)]
pub struct ScrollPage {
    pub points: Vec<StoredPoint>,
    /// Cursor for the next page; `None` when exhausted.
    pub next_offset: Option<u64>,
}

/// Per-kind collections of (id, 1024-dim vector, payload) with cosine KNN.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create every per-kind collection and its payload indexes. Idempotent.
    async fn initialize_collections(&self) -> Result<()>;

    /// Cheap connectivity probe.
    async fn health_check(&self) -> bool;

    /// Insert or replace a point. Idempotent by id; durable on return.
    async fn upsert(
        &self,
        collection: &str,
        id: Uuid,
        vector: &[f32],
        payload: Payload,
    ) -> Result<()>;

    /// Batch upsert. Partial failure is reported as a whole-batch error.
    async fn upsert_batch(
        &self,
        collection: &str,
        points: Vec<(Uuid, Vec<f32>, Payload)>,
    ) -> Result<()>;

    async fn get(&self, collection: &str, id: Uuid, with_vector: bool)
        -> Result<Option<StoredPoint>>;

    /// Shallow-merge `patch` into the stored payload. Returns false when the
    /// point does not exist.
    async fn update_payload(&self, collection: &str, id: Uuid, patch: Payload) -> Result<bool>;

    /// Hard remove. Returns false when the point does not exist.
    async fn delete(&self, collection: &str, id: Uuid) -> Result<bool>;

    /// Remove all points matching the filter; returns the removed count.
    async fn delete_by_filter(&self, collection: &str, filter: &Filter) -> Result<u64>;

    /// Filter-first cosine KNN, descending score.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: &Filter,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>>;

    /// Stable pagination over a filtered collection.
    async fn scroll(
        &self,
        collection: &str,
        filter: &Filter,
        limit: usize,
        offset: Option<u64>,
        with_vectors: bool,
    ) -> Result<ScrollPage>;

    /// Exact count of points matching the filter.
    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64>;
}

// ============================================================================
// GRAPH STORE
// ============================================================================

/// A node as returned by lookups and the query evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: Uuid,
    pub labels: Vec<String>,
    pub properties: Payload,
}

/// A traversal hit: the node plus the type of the edge it was reached over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedNode {
    pub id: Uuid,
    pub labels: Vec<String>,
    pub properties: Payload,
    pub relationship_type: String,
}

/// Traversal direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
    #[default]
    Both,
}

impl Direction {
    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "outgoing" => Some(Direction::Outgoing),
            "incoming" => Some(Direction::Incoming),
            "both" => Some(Direction::Both),
            _ => None,
        }
    }
}

/// Labeled property graph keyed by memory id, with typed directed edges.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Ensure per-label uniqueness of ids and the secondary indexes exist.
    async fn initialize_schema(&self) -> Result<()>;

    /// Cheap connectivity probe.
    async fn health_check(&self) -> bool;

    /// Create a node. `properties` must carry the `id`; the node gets the
    /// given label plus the common `Memory` label.
    async fn create_node(&self, label: &str, properties: Payload) -> Result<Uuid>;

    async fn get_node(&self, id: Uuid, label: Option<&str>) -> Result<Option<GraphNode>>;

    /// Merge `patch` into node properties. Returns false when absent.
    async fn update_node(&self, id: Uuid, patch: Payload, label: Option<&str>) -> Result<bool>;

    /// Delete a node. `detach` removes its edges; without it, deleting a node
    /// that still has edges is an error.
    async fn delete_node(&self, id: Uuid, label: Option<&str>, detach: bool) -> Result<bool>;

    /// Create a typed directed edge. Both endpoints must exist.
    async fn create_relationship(
        &self,
        source: Uuid,
        target: Uuid,
        relationship_type: &str,
        properties: Payload,
    ) -> Result<()>;

    /// Delete edges between two nodes, optionally restricted by type.
    /// Returns the number removed.
    async fn delete_relationship(
        &self,
        source: Uuid,
        target: Uuid,
        relationship_type: Option<&str>,
    ) -> Result<u64>;

    /// Breadth-bounded traversal, excluding the start node.
    async fn get_related(
        &self,
        id: Uuid,
        relationship_types: Option<&[String]>,
        direction: Direction,
        depth: usize,
        limit: usize,
    ) -> Result<Vec<RelatedNode>>;

    /// Shortest undirected path between two nodes, or `None`.
    async fn find_path(
        &self,
        start: Uuid,
        end: Uuid,
        relationship_types: Option<&[String]>,
        max_depth: usize,
    ) -> Result<Option<Vec<GraphNode>>>;

    /// Evaluate a read-only query (validated upstream) and return one row
    /// per match. See the `query` module for the supported grammar.
    async fn execute_query(&self, query: &str, parameters: &Payload) -> Result<Vec<Payload>>;

    /// Count nodes, optionally restricted by label and property equality.
    async fn count_nodes(&self, label: Option<&str>, filter: Option<&Payload>) -> Result<u64>;
}

// ============================================================================
// VECTOR MATH
// ============================================================================

/// Cosine similarity between two vectors. Zero when lengths differ or either
/// norm vanishes.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = (norm_a * norm_b).sqrt();
    if denominator > 0.0 {
        dot / denominator
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-5);
    }

    #[test]
    fn test_cosine_length_mismatch_is_zero() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!(Direction::parse_name("outgoing"), Some(Direction::Outgoing));
        assert_eq!(Direction::parse_name("sideways"), None);
    }
}
