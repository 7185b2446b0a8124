//! Shared test harness: a full engine stack over in-memory stores with the
//! deterministic fallback encoder as the embedding model, plus store
//! wrappers that inject failures.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use loci_core::{
    CoreError, Direction, EmbeddingCache, EmbeddingService, FallbackEncoder, Filter, GraphNode,
    GraphStore, Indexer, JobRegistry, Memory, MemoryFields, MemoryManager, Normalizer,
    NormalizerSettings, ParserOrchestrator, Payload, Priority, QueryEngine, RelatedNode,
    RequirementStatus, RequirementsFields, Result, ScoredPoint, ScrollPage, SqliteGraphStore,
    SqliteVectorStore, StoredPoint, SyncLayer, VectorStore,
};

pub struct TestStack {
    pub vector: Arc<dyn VectorStore>,
    pub graph: Arc<dyn GraphStore>,
    pub embeddings: Arc<EmbeddingService>,
    pub sync: Arc<SyncLayer>,
    pub manager: Arc<MemoryManager>,
    pub query: Arc<QueryEngine>,
    pub jobs: Arc<JobRegistry>,
    pub indexer: Arc<Indexer>,
    pub normalizer: Arc<Normalizer>,
}

/// Build a stack over the given stores.
pub async fn stack_with(
    vector: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
) -> TestStack {
    vector.initialize_collections().await.unwrap();
    graph.initialize_schema().await.unwrap();

    let embeddings = Arc::new(EmbeddingService::new(
        None,
        EmbeddingCache::new(10_000, 30),
        Some(FallbackEncoder::new("loci-hash-v1")),
        3,
    ));
    let sync = Arc::new(SyncLayer::new(vector.clone(), graph.clone(), 2));
    let manager = Arc::new(MemoryManager::new(
        vector.clone(),
        graph.clone(),
        embeddings.clone(),
        sync.clone(),
        0.95,
    ));
    let query = Arc::new(QueryEngine::new(
        vector.clone(),
        graph.clone(),
        embeddings.clone(),
        10,
        100,
    ));
    let jobs = Arc::new(JobRegistry::new());
    let indexer = Arc::new(Indexer::new(
        manager.clone(),
        vector.clone(),
        graph.clone(),
        jobs.clone(),
        ParserOrchestrator::new(),
    ));
    let normalizer = Arc::new(Normalizer::new(
        vector.clone(),
        graph.clone(),
        embeddings.clone(),
        jobs.clone(),
        NormalizerSettings::default(),
    ));

    TestStack {
        vector,
        graph,
        embeddings,
        sync,
        manager,
        query,
        jobs,
        indexer,
        normalizer,
    }
}

pub async fn stack() -> TestStack {
    stack_with(
        Arc::new(SqliteVectorStore::open(None).unwrap()),
        Arc::new(SqliteGraphStore::open(None).unwrap()),
    )
    .await
}

/// A requirement memory with a fresh id.
pub fn requirement(content: &str) -> Memory {
    requirement_numbered(content, 1)
}

pub fn requirement_numbered(content: &str, number: u32) -> Memory {
    Memory::new(
        content,
        MemoryFields::Requirements(RequirementsFields {
            requirement_id: format!("REQ-MEM-{:03}", number),
            title: format!("Requirement {}", number),
            description: content.to_string(),
            source_document: "requirements.md".to_string(),
            priority: Priority::Medium,
            status: RequirementStatus::Approved,
        }),
    )
}

pub fn function_memory(name: &str, signature: &str, docstring: &str) -> Memory {
    let content = format!("{}\n{}", signature, docstring);
    Memory::new(
        content,
        MemoryFields::Function(loci_core::FunctionFields {
            name: name.to_string(),
            signature: signature.to_string(),
            file_path: "src/users.py".to_string(),
            start_line: 1,
            end_line: 10,
            language: "python".to_string(),
            docstring: Some(docstring.to_string()),
            containing_class: None,
            source: None,
        }),
    )
}

// ============================================================================
// FAILURE-INJECTING GRAPH STORE
// ============================================================================

/// Graph store wrapper whose write path can be switched off.
pub struct FlakyGraphStore {
    inner: Arc<dyn GraphStore>,
    healthy: AtomicBool,
}

impl FlakyGraphStore {
    pub fn new(inner: Arc<dyn GraphStore>) -> Self {
        Self {
            inner,
            healthy: AtomicBool::new(true),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CoreError::StorageUnavailable("graph store offline".into()))
        }
    }
}

#[async_trait]
impl GraphStore for FlakyGraphStore {
    async fn initialize_schema(&self) -> Result<()> {
        self.inner.initialize_schema().await
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst) && self.inner.health_check().await
    }

    async fn create_node(&self, label: &str, properties: Payload) -> Result<Uuid> {
        self.check()?;
        self.inner.create_node(label, properties).await
    }

    async fn get_node(&self, id: Uuid, label: Option<&str>) -> Result<Option<GraphNode>> {
        self.check()?;
        self.inner.get_node(id, label).await
    }

    async fn update_node(&self, id: Uuid, patch: Payload, label: Option<&str>) -> Result<bool> {
        self.check()?;
        self.inner.update_node(id, patch, label).await
    }

    async fn delete_node(&self, id: Uuid, label: Option<&str>, detach: bool) -> Result<bool> {
        self.check()?;
        self.inner.delete_node(id, label, detach).await
    }

    async fn create_relationship(
        &self,
        source: Uuid,
        target: Uuid,
        relationship_type: &str,
        properties: Payload,
    ) -> Result<()> {
        self.check()?;
        self.inner
            .create_relationship(source, target, relationship_type, properties)
            .await
    }

    async fn delete_relationship(
        &self,
        source: Uuid,
        target: Uuid,
        relationship_type: Option<&str>,
    ) -> Result<u64> {
        self.check()?;
        self.inner
            .delete_relationship(source, target, relationship_type)
            .await
    }

    async fn get_related(
        &self,
        id: Uuid,
        relationship_types: Option<&[String]>,
        direction: Direction,
        depth: usize,
        limit: usize,
    ) -> Result<Vec<RelatedNode>> {
        self.check()?;
        self.inner
            .get_related(id, relationship_types, direction, depth, limit)
            .await
    }

    async fn find_path(
        &self,
        start: Uuid,
        end: Uuid,
        relationship_types: Option<&[String]>,
        max_depth: usize,
    ) -> Result<Option<Vec<GraphNode>>> {
        self.check()?;
        self.inner
            .find_path(start, end, relationship_types, max_depth)
            .await
    }

    async fn execute_query(&self, query: &str, parameters: &Payload) -> Result<Vec<Payload>> {
        self.check()?;
        self.inner.execute_query(query, parameters).await
    }

    async fn count_nodes(&self, label: Option<&str>, filter: Option<&Payload>) -> Result<u64> {
        self.check()?;
        self.inner.count_nodes(label, filter).await
    }
}

// ============================================================================
// FAILURE-INJECTING VECTOR STORE
// ============================================================================

/// Vector store wrapper whose `search` can be switched off; everything else
/// passes through. Used to force a mid-pipeline normalization failure.
pub struct FlakySearchVectorStore {
    inner: Arc<dyn VectorStore>,
    search_healthy: AtomicBool,
}

impl FlakySearchVectorStore {
    pub fn new(inner: Arc<dyn VectorStore>) -> Self {
        Self {
            inner,
            search_healthy: AtomicBool::new(true),
        }
    }

    pub fn set_search_healthy(&self, healthy: bool) {
        self.search_healthy.store(healthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl VectorStore for FlakySearchVectorStore {
    async fn initialize_collections(&self) -> Result<()> {
        self.inner.initialize_collections().await
    }

    async fn health_check(&self) -> bool {
        self.inner.health_check().await
    }

    async fn upsert(
        &self,
        collection: &str,
        id: Uuid,
        vector: &[f32],
        payload: Payload,
    ) -> Result<()> {
        self.inner.upsert(collection, id, vector, payload).await
    }

    async fn upsert_batch(
        &self,
        collection: &str,
        points: Vec<(Uuid, Vec<f32>, Payload)>,
    ) -> Result<()> {
        self.inner.upsert_batch(collection, points).await
    }

    async fn get(
        &self,
        collection: &str,
        id: Uuid,
        with_vector: bool,
    ) -> Result<Option<StoredPoint>> {
        self.inner.get(collection, id, with_vector).await
    }

    async fn update_payload(&self, collection: &str, id: Uuid, patch: Payload) -> Result<bool> {
        self.inner.update_payload(collection, id, patch).await
    }

    async fn delete(&self, collection: &str, id: Uuid) -> Result<bool> {
        self.inner.delete(collection, id).await
    }

    async fn delete_by_filter(&self, collection: &str, filter: &Filter) -> Result<u64> {
        self.inner.delete_by_filter(collection, filter).await
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: &Filter,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>> {
        if !self.search_healthy.load(Ordering::SeqCst) {
            return Err(CoreError::StorageUnavailable("search offline".into()));
        }
        self.inner
            .search(collection, vector, limit, filter, score_threshold)
            .await
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: &Filter,
        limit: usize,
        offset: Option<u64>,
        with_vectors: bool,
    ) -> Result<ScrollPage> {
        self.inner
            .scroll(collection, filter, limit, offset, with_vectors)
            .await
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64> {
        self.inner.count(collection, filter).await
    }
}
