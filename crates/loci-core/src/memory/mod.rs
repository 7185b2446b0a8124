//! Memory model - the typed unit of project knowledge.
//!
//! A [`Memory`] is a shared envelope plus a per-kind variant payload
//! ([`MemoryFields`]). The same value round-trips through the vector store
//! payload (a flat JSON object, embedding excluded) and the graph node
//! properties.

mod variants;

pub use variants::{
    CodePatternFields, ComponentFields, ComponentType, DesignFields, DesignStatus, DesignType,
    FunctionFields, MemoryFields, PatternType, PreferenceCategory, PreferenceScope, Priority,
    RequirementStatus, RequirementsFields, SessionFields, TestHistoryFields, TestStatus,
    UserPreferenceFields,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// Vector dimension shared by every collection.
pub const EMBEDDING_DIMENSIONS: usize = 1024;

/// JSON object used for store payloads and graph properties.
pub type Payload = Map<String, Value>;

// ============================================================================
// MEMORY KIND
// ============================================================================

/// Discriminator selecting a memory variant, its vector collection, and its
/// graph label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Requirements,
    Design,
    CodePattern,
    Component,
    Function,
    TestHistory,
    Session,
    UserPreference,
}

impl MemoryKind {
    /// Every kind, in canonical order.
    pub const ALL: [MemoryKind; 8] = [
        MemoryKind::Requirements,
        MemoryKind::Design,
        MemoryKind::CodePattern,
        MemoryKind::Component,
        MemoryKind::Function,
        MemoryKind::TestHistory,
        MemoryKind::Session,
        MemoryKind::UserPreference,
    ];

    /// Wire name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Requirements => "requirements",
            MemoryKind::Design => "design",
            MemoryKind::CodePattern => "code_pattern",
            MemoryKind::Component => "component",
            MemoryKind::Function => "function",
            MemoryKind::TestHistory => "test_history",
            MemoryKind::Session => "session",
            MemoryKind::UserPreference => "user_preference",
        }
    }

    /// Vector store collection for this kind.
    pub fn collection(&self) -> &'static str {
        match self {
            MemoryKind::Requirements => "requirements",
            MemoryKind::Design => "designs",
            MemoryKind::CodePattern => "code_patterns",
            MemoryKind::Component => "components",
            MemoryKind::Function => "functions",
            MemoryKind::TestHistory => "test_history",
            MemoryKind::Session => "sessions",
            MemoryKind::UserPreference => "user_preferences",
        }
    }

    /// Graph node label for this kind. Every node additionally carries the
    /// common `Memory` label.
    pub fn node_label(&self) -> &'static str {
        match self {
            MemoryKind::Requirements => "Requirement",
            MemoryKind::Design => "Design",
            MemoryKind::CodePattern => "CodePattern",
            MemoryKind::Component => "Component",
            MemoryKind::Function => "Function",
            MemoryKind::TestHistory => "TestHistory",
            MemoryKind::Session => "Session",
            MemoryKind::UserPreference => "UserPreference",
        }
    }

    /// Base importance score per kind.
    pub fn base_importance(&self) -> f32 {
        match self {
            MemoryKind::Requirements => 0.8,
            MemoryKind::Design => 0.7,
            MemoryKind::CodePattern => 0.6,
            MemoryKind::Component => 0.5,
            MemoryKind::UserPreference => 0.5,
            MemoryKind::Function => 0.4,
            MemoryKind::Session => 0.4,
            MemoryKind::TestHistory => 0.3,
        }
    }

    /// Map a graph label back to a kind.
    pub fn from_node_label(label: &str) -> Option<Self> {
        MemoryKind::ALL.into_iter().find(|k| k.node_label() == label)
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MemoryKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        MemoryKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| CoreError::validation("memory_type", format!("unknown kind: {}", s)))
    }
}

// ============================================================================
// SYNC STATUS
// ============================================================================

/// Cross-store coherence state of a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Both stores agree.
    Synced,
    /// Vector store has the row; the graph write is queued or failed once.
    #[default]
    Pending,
    /// Retry budget exhausted; recovery is explicit via the sync layer.
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Pending => "pending",
            SyncStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// RELATIONSHIP TYPES
// ============================================================================

/// Typed directed edge between two memories.
///
/// The canonical set below is what the engine itself creates; validators
/// treat anything else as an opaque label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RelationshipType {
    Implements,
    Imports,
    Calls,
    DependsOn,
    Extends,
    Supersedes,
    Tests,
    References,
    DerivedFrom,
    /// Caller-defined edge type, kept verbatim.
    Other(String),
}

impl RelationshipType {
    pub fn as_str(&self) -> &str {
        match self {
            RelationshipType::Implements => "IMPLEMENTS",
            RelationshipType::Imports => "IMPORTS",
            RelationshipType::Calls => "CALLS",
            RelationshipType::DependsOn => "DEPENDS_ON",
            RelationshipType::Extends => "EXTENDS",
            RelationshipType::Supersedes => "SUPERSEDES",
            RelationshipType::Tests => "TESTS",
            RelationshipType::References => "REFERENCES",
            RelationshipType::DerivedFrom => "DERIVED_FROM",
            RelationshipType::Other(s) => s,
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "IMPLEMENTS" => RelationshipType::Implements,
            "IMPORTS" => RelationshipType::Imports,
            "CALLS" => RelationshipType::Calls,
            "DEPENDS_ON" => RelationshipType::DependsOn,
            "EXTENDS" => RelationshipType::Extends,
            "SUPERSEDES" => RelationshipType::Supersedes,
            "TESTS" => RelationshipType::Tests,
            "REFERENCES" => RelationshipType::References,
            "DERIVED_FROM" => RelationshipType::DerivedFrom,
            other => RelationshipType::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// MEMORY ENVELOPE
// ============================================================================

/// A typed, persistent unit of project knowledge.
///
/// Serialization note: `embedding` is never part of the serialized form.
/// Payloads carry everything else; the vector itself lives in the store's
/// vector column and is reattached on reads that request it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Stable identifier across both stores and all updates.
    pub id: Uuid,
    /// Primary embedding input. Non-empty for valid memories.
    pub content: String,
    /// 1024-dim vector; empty only before assignment.
    #[serde(default, skip_serializing)]
    pub embedding: Vec<f32>,
    /// Free-form metadata. Reserved key: `embedding_is_fallback`.
    #[serde(default)]
    pub metadata: Payload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub access_count: u64,
    #[serde(default)]
    pub last_accessed_at: Option<DateTime<Utc>>,
    /// Derived ranking input in [0, 1].
    #[serde(default)]
    pub importance_score: f32,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sync_status: SyncStatus,
    /// Per-kind fields; the `kind` tag lives inside this flattened enum.
    #[serde(flatten)]
    pub fields: MemoryFields,
}

impl Memory {
    /// Create a new memory with a fresh id and now-timestamps.
    pub fn new(content: impl Into<String>, fields: MemoryFields) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            embedding: Vec::new(),
            metadata: Payload::new(),
            created_at: now,
            updated_at: now,
            access_count: 0,
            last_accessed_at: None,
            importance_score: 0.0,
            deleted: false,
            deleted_at: None,
            sync_status: SyncStatus::Pending,
            fields,
        }
    }

    /// The discriminator for this memory's variant.
    pub fn kind(&self) -> MemoryKind {
        self.fields.kind()
    }

    /// Validate envelope and per-kind field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.content.trim().is_empty() {
            return Err(CoreError::validation("content", "must not be empty"));
        }
        if !self.embedding.is_empty() && self.embedding.len() != EMBEDDING_DIMENSIONS {
            return Err(CoreError::DimensionMismatch {
                expected: EMBEDDING_DIMENSIONS,
                actual: self.embedding.len(),
            });
        }
        if !(0.0..=1.0).contains(&self.importance_score) {
            return Err(CoreError::validation(
                "importance_score",
                "must be within [0, 1]",
            ));
        }
        self.fields.validate()
    }

    /// Serialize to the store payload (all schema fields except `embedding`).
    pub fn to_payload(&self) -> Result<Payload> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(CoreError::Internal(format!(
                "memory serialized to non-object: {}",
                other
            ))),
        }
    }

    /// Rebuild a memory from a store payload.
    pub fn from_payload(payload: &Payload) -> Result<Self> {
        serde_json::from_value(Value::Object(payload.clone()))
            .map_err(|e| CoreError::Internal(format!("malformed payload: {}", e)))
    }
}
