//! Hybrid query engine.
//!
//! Semantic vector search, graph traversal, validated read-only graph
//! queries, and a small planner that picks a hybrid strategy from the shape
//! of the request.

mod validator;

pub use validator::validate_read_only;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::embedding::EmbeddingService;
use crate::error::{CoreError, Result};
use crate::memory::{MemoryKind, Payload};
use crate::store::{cosine_similarity, Direction, Filter, GraphStore, Predicate, RelatedNode, VectorStore};

/// Phrases hinting that the caller is asking about graph structure.
const ENTITY_REFERENCE_CUES: &[&str] = &[
    "related to",
    "depends on",
    "calls",
    "imports",
    "import ",
    "implements",
    "extends",
];

/// Score multiplier for results pulled in by graph expansion.
const EXPANSION_SCORE_FACTOR: f32 = 0.8;

/// Score assigned to graph hits that have no stored vector.
const VECTORLESS_SCORE: f32 = 0.5;

/// Execution strategy chosen by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStrategy {
    VectorOnly,
    /// Only meaningful without an embedding budget; the planner never picks
    /// it on its own.
    GraphOnly,
    VectorFirst,
    GraphFirst,
}

/// A single search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: Uuid,
    pub memory_type: MemoryKind,
    pub content: String,
    pub score: f32,
    pub payload: Payload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship_path: Option<Vec<Uuid>>,
}

/// Ranking score: similarity dominates, then importance, recency, access.
///
/// Recency decays linearly over a year; access contributes on a log scale
/// saturating at one hundred accesses.
pub fn ranking_score(
    similarity: f32,
    importance: f32,
    recency_days: u32,
    access_count: u64,
) -> f32 {
    let recency = (1.0 - recency_days as f32 / 365.0).max(0.0);
    let access = (((access_count + 1) as f32).ln() / 101.0_f32.ln()).min(1.0);
    0.50 * similarity + 0.25 * importance + 0.15 * recency + 0.10 * access
}

pub struct QueryEngine {
    vector: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    embeddings: Arc<EmbeddingService>,
    default_limit: usize,
    max_limit: usize,
}

impl QueryEngine {
    pub fn new(
        vector: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
        embeddings: Arc<EmbeddingService>,
        default_limit: usize,
        max_limit: usize,
    ) -> Self {
        info!(default_limit, max_limit, "query engine initialized");
        Self {
            vector,
            graph,
            embeddings,
            default_limit,
            max_limit,
        }
    }

    fn clamp_limit(&self, limit: Option<usize>) -> usize {
        limit.unwrap_or(self.default_limit).min(self.max_limit)
    }

    /// Semantic KNN across the requested kinds (all kinds when none given).
    pub async fn semantic_search(
        &self,
        query: &str,
        kinds: Option<&[MemoryKind]>,
        filters: Option<&Filter>,
        time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<SearchHit>> {
        let start = Instant::now();
        let limit = self.clamp_limit(limit);

        let query_vector = self.embeddings.embed_for_query(query).await?;
        let filter = build_search_filter(filters, time_range);

        let kinds: Vec<MemoryKind> = kinds
            .map(|k| k.to_vec())
            .unwrap_or_else(|| MemoryKind::ALL.to_vec());

        let mut all_hits: Vec<SearchHit> = Vec::new();
        for kind in kinds {
            let results = self
                .vector
                .search(
                    kind.collection(),
                    &query_vector,
                    limit + offset,
                    &filter,
                    None,
                )
                .await?;
            for hit in results {
                let content = hit
                    .payload
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                all_hits.push(SearchHit {
                    id: hit.id,
                    memory_type: kind,
                    content,
                    score: hit.score,
                    payload: hit.payload,
                    relationship_path: None,
                });
            }
        }

        all_hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        let page: Vec<SearchHit> = all_hits.into_iter().skip(offset).take(limit).collect();

        debug!(
            query_len = query.len(),
            result_count = page.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "semantic search complete"
        );
        Ok(page)
    }

    /// Validate and run an externally supplied read-only graph query.
    pub async fn graph_query(
        &self,
        cypher: &str,
        parameters: &Payload,
    ) -> Result<Vec<Payload>> {
        validate_read_only(cypher)?;
        self.graph.execute_query(cypher, parameters).await
    }

    /// Thin wrapper over the graph traversal.
    pub async fn get_related(
        &self,
        entity_id: Uuid,
        relationship_types: Option<&[String]>,
        direction: Direction,
        depth: usize,
        limit: Option<usize>,
    ) -> Result<Vec<RelatedNode>> {
        let limit = self.clamp_limit(limit);
        self.graph
            .get_related(entity_id, relationship_types, direction, depth, limit)
            .await
    }

    /// Choose a strategy from the request shape.
    pub fn plan(&self, query: &str, relationship_types: Option<&[String]>) -> QueryStrategy {
        let has_relationship_filter =
            relationship_types.map(|t| !t.is_empty()).unwrap_or(false);
        let has_entity_cue = has_entity_reference(query);

        if !has_relationship_filter && !has_entity_cue {
            QueryStrategy::VectorOnly
        } else if query.split_whitespace().count() < 3 {
            QueryStrategy::GraphFirst
        } else {
            QueryStrategy::VectorFirst
        }
    }

    /// Hybrid search: plan, execute, merge, rank.
    pub async fn hybrid_search(
        &self,
        query: &str,
        kinds: Option<&[MemoryKind]>,
        relationship_types: Option<&[String]>,
        filters: Option<&Filter>,
        limit: Option<usize>,
    ) -> Result<Vec<SearchHit>> {
        let start = Instant::now();
        let limit = self.clamp_limit(limit);
        let strategy = self.plan(query, relationship_types);

        let results = match strategy {
            QueryStrategy::VectorOnly => {
                self.semantic_search(query, kinds, filters, None, Some(limit), 0)
                    .await?
            }
            QueryStrategy::VectorFirst => {
                let seeds = self
                    .semantic_search(query, kinds, filters, None, Some(limit * 2), 0)
                    .await?;
                self.expand_via_graph(seeds, relationship_types, limit).await?
            }
            QueryStrategy::GraphFirst => {
                let graph_hits = self.content_match(query, limit * 2).await?;
                let mut enriched = self.enrich_with_vector_scores(graph_hits, query).await?;
                enriched.sort_by(|a, b| {
                    b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal)
                });
                enriched.truncate(limit);
                enriched
            }
            QueryStrategy::GraphOnly => {
                let graph_hits = self.content_match(query, limit).await?;
                self.enrich_with_vector_scores(graph_hits, query).await?
            }
        };

        debug!(
            ?strategy,
            result_count = results.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "hybrid search complete"
        );
        Ok(results)
    }

    /// Content-contains MATCH over the indexed text properties.
    async fn content_match(&self, query: &str, limit: usize) -> Result<Vec<Payload>> {
        let mut parameters = Payload::new();
        parameters.insert("query".into(), Value::from(query));
        parameters.insert("limit".into(), Value::from(limit as u64));

        self.graph
            .execute_query(
                "MATCH (n:Memory) WHERE n.deleted = false \
                 AND (n.content CONTAINS $query OR n.title CONTAINS $query) \
                 RETURN n.id AS id, labels(n) AS labels, properties(n) AS properties \
                 LIMIT $limit",
                &parameters,
            )
            .await
    }

    /// Single 1-hop expansion from the top half of the seed results.
    async fn expand_via_graph(
        &self,
        seeds: Vec<SearchHit>,
        relationship_types: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let mut seen: std::collections::HashSet<Uuid> = seeds.iter().map(|hit| hit.id).collect();
        let mut expanded = seeds.clone();

        for seed in seeds.iter().take(limit / 2) {
            let related = self
                .graph
                .get_related(seed.id, relationship_types, Direction::Both, 1, 3)
                .await?;

            for node in related {
                if !seen.insert(node.id) {
                    continue;
                }
                let memory_type = label_to_kind(&node.labels);
                let content = node
                    .properties
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                expanded.push(SearchHit {
                    id: node.id,
                    memory_type,
                    content,
                    score: seed.score * EXPANSION_SCORE_FACTOR,
                    payload: node.properties,
                    relationship_path: Some(vec![seed.id, node.id]),
                });
            }
        }

        expanded.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        expanded.truncate(limit);
        Ok(expanded)
    }

    /// Attach cosine similarity to graph hits; hits without a stored vector
    /// get a neutral default score.
    async fn enrich_with_vector_scores(
        &self,
        graph_hits: Vec<Payload>,
        query: &str,
    ) -> Result<Vec<SearchHit>> {
        if graph_hits.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self.embeddings.embed_for_query(query).await?;
        let mut results = Vec::with_capacity(graph_hits.len());

        for hit in graph_hits {
            let id = hit
                .get("id")
                .and_then(Value::as_str)
                .and_then(|s| Uuid::parse_str(s).ok())
                .ok_or_else(|| CoreError::Internal("graph hit without id".into()))?;
            let labels: Vec<String> = hit
                .get("labels")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            let properties = hit
                .get("properties")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();

            let memory_type = label_to_kind(&labels);
            let score = match self
                .vector
                .get(memory_type.collection(), id, true)
                .await?
                .and_then(|point| point.vector)
            {
                Some(vector) if !vector.is_empty() => cosine_similarity(&query_vector, &vector),
                _ => VECTORLESS_SCORE,
            };

            let content = properties
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            results.push(SearchHit {
                id,
                memory_type,
                content,
                score,
                payload: properties,
                relationship_path: None,
            });
        }

        Ok(results)
    }
}

/// `deleted = false` plus caller filters plus the optional time range.
fn build_search_filter(
    filters: Option<&Filter>,
    time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
) -> Filter {
    let mut filter = Filter::new().eq("deleted", false);
    if let Some(user) = filters {
        filter = filter.merge(user.clone());
    }
    if let Some((start, end)) = time_range {
        filter = filter.with(
            "created_at",
            Predicate::Range {
                gte: Some(Value::from(start.to_rfc3339())),
                lte: Some(Value::from(end.to_rfc3339())),
                gt: None,
                lt: None,
            },
        );
    }
    filter
}

fn has_entity_reference(query: &str) -> bool {
    let lowered = query.to_lowercase();
    ENTITY_REFERENCE_CUES.iter().any(|cue| lowered.contains(cue))
}

/// First recognized label wins; unknown labels default to Component.
fn label_to_kind(labels: &[String]) -> MemoryKind {
    labels
        .iter()
        .find_map(|label| MemoryKind::from_node_label(label))
        .unwrap_or(MemoryKind::Component)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranking_weights_and_determinism() {
        let a = ranking_score(1.0, 0.0, 365, 0);
        let b = ranking_score(0.0, 1.0, 365, 0);
        // Similarity carries the largest marginal weight.
        assert!(a > b);
        assert_eq!(
            ranking_score(0.7, 0.5, 10, 4),
            ranking_score(0.7, 0.5, 10, 4)
        );
    }

    #[test]
    fn test_ranking_bounds() {
        let best = ranking_score(1.0, 1.0, 0, 1_000_000);
        assert!(best <= 1.0 + 1e-6);
        let worst = ranking_score(0.0, 0.0, 10_000, 0);
        assert!(worst >= 0.0);
    }

    #[test]
    fn test_recency_decays_over_a_year() {
        assert!(ranking_score(0.5, 0.5, 0, 0) > ranking_score(0.5, 0.5, 200, 0));
        // Beyond a year recency bottoms out.
        assert_eq!(
            ranking_score(0.5, 0.5, 365, 0),
            ranking_score(0.5, 0.5, 4000, 0)
        );
    }

    #[test]
    fn test_access_is_log_scaled_and_capped() {
        let none = ranking_score(0.0, 0.0, 365, 0);
        let few = ranking_score(0.0, 0.0, 365, 10);
        let hundred = ranking_score(0.0, 0.0, 365, 100);
        let million = ranking_score(0.0, 0.0, 365, 1_000_000);
        assert!(few > none);
        assert!(hundred > few);
        assert!((million - 0.10).abs() < 1e-5);
    }

    #[test]
    fn test_entity_reference_cues() {
        assert!(has_entity_reference("what depends on the parser"));
        assert!(has_entity_reference("components related to auth"));
        assert!(has_entity_reference("who calls validate_token"));
        assert!(!has_entity_reference("how does caching work"));
    }

    #[test]
    fn test_label_to_kind_defaults_to_component() {
        assert_eq!(
            label_to_kind(&["Requirement".into(), "Memory".into()]),
            MemoryKind::Requirements
        );
        assert_eq!(label_to_kind(&["Mystery".into()]), MemoryKind::Component);
    }

    #[test]
    fn test_build_search_filter_includes_live_constraint() {
        let filter = build_search_filter(None, None);
        let mut live = Payload::new();
        live.insert("deleted".into(), Value::Bool(false));
        assert!(filter.matches(&live));
        let mut dead = Payload::new();
        dead.insert("deleted".into(), Value::Bool(true));
        assert!(!filter.matches(&dead));
    }
}
