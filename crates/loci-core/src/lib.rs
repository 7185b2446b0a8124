//! # Loci Core
//!
//! Project-scoped memory engine backing the Loci MCP server:
//!
//! - **Dual-store model**: per-kind vector collections for semantic
//!   similarity plus a labeled property graph for typed relationships,
//!   kept eventually consistent by a sync drainer.
//! - **Typed memories**: requirements, designs, code patterns, components,
//!   functions, test history, sessions, and user preferences share one
//!   envelope and validate per kind.
//! - **Hybrid retrieval**: semantic KNN, bounded graph traversal, and a
//!   planner that mixes both, with a security validator in front of every
//!   externally supplied graph query.
//! - **Code indexing**: parsed source files become Function and Component
//!   memories, incrementally by content hash, with IMPORTS/CALLS edges.
//! - **Normalization**: snapshot, dedup, orphan pruning, embedding refresh,
//!   retention cleanup, validation, and swap, with rollback on failure.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use loci_core::{Settings, SqliteVectorStore, SqliteGraphStore};
//!
//! let settings = Settings::from_env();
//! let vector = SqliteVectorStore::open(None)?;
//! let graph = SqliteGraphStore::open(None)?;
//! vector.initialize_collections().await?;
//! graph.initialize_schema().await?;
//! ```

pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod jobs;
pub mod manager;
pub mod memory;
pub mod normalize;
pub mod parsing;
pub mod query;
pub mod store;
pub mod sync;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use config::{
    CacheSettings, EmbeddingSettings, NormalizerSettings, QuerySettings, Settings, SyncSettings,
};
pub use error::{CoreError, Result};
pub use memory::{
    CodePatternFields, ComponentFields, ComponentType, DesignFields, DesignStatus, DesignType,
    FunctionFields, Memory, MemoryFields, MemoryKind, PatternType, Payload, PreferenceCategory,
    PreferenceScope, Priority, RelationshipType, RequirementStatus, RequirementsFields,
    SessionFields, SyncStatus, TestHistoryFields, TestStatus, UserPreferenceFields,
    EMBEDDING_DIMENSIONS,
};
pub use store::{
    cosine_similarity, Direction, Filter, GraphNode, GraphStore, Predicate, RelatedNode,
    ScoredPoint, ScrollPage, SqliteGraphStore, SqliteVectorStore, StoredPoint, VectorStore,
};
pub use embedding::{
    cache_key, CacheStats, Embedding, EmbeddingCache, EmbeddingProvider, EmbeddingService,
    FallbackEncoder, HttpEmbeddingProvider, ProviderError, MAX_BATCH_SIZE,
};
pub use index::{
    file_content_hash, DirectoryIndexOutcome, FileIndexOutcome, IndexOutcomeStatus, Indexer,
};
pub use jobs::{Job, JobRegistry, JobStatus, JobUpdate};
pub use manager::{BulkError, ConflictInfo, MemoryManager};
pub use normalize::{NormalizeOutcome, NormalizeStatus, Normalizer, NormalizerState, PHASES};
pub use parsing::{
    ClassInfo, FunctionInfo, ImportInfo, ParseResult, ParserOrchestrator, PythonParser,
    SourceParser,
};
pub use query::{ranking_score, validate_read_only, QueryEngine, QueryStrategy, SearchHit};
pub use sync::{ConsistencyReport, SyncLayer, SyncStatusCounts, SyncWorker};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default remote embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "voyage-code-3";
