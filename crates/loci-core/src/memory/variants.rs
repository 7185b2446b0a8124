//! Per-kind memory variants and their validation rules.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;
use uuid::Uuid;

use super::MemoryKind;
use crate::error::{CoreError, Result};

fn requirement_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^REQ-[A-Z]+(-[A-Z]+)*-\d+$").expect("valid pattern"))
}

fn semver_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("valid pattern"))
}

fn commit_hash_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9a-fA-F]{7,40}$").expect("valid pattern"))
}

fn require_non_empty(field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(CoreError::validation(field, "must not be empty"))
    } else {
        Ok(())
    }
}

// ============================================================================
// FIELD ENUMS
// ============================================================================

/// Requirement priority, adjusting the importance score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    /// Importance adjustment applied on top of the kind base score.
    pub fn importance_boost(&self) -> f32 {
        match self {
            Priority::Critical => 0.2,
            Priority::High => 0.1,
            Priority::Medium => 0.0,
            Priority::Low => -0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequirementStatus {
    Draft,
    Approved,
    Implemented,
    Deprecated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DesignType {
    #[serde(rename = "ADR")]
    Adr,
    HighLevel,
    LowLevel,
    Interface,
    DataModel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DesignStatus {
    Proposed,
    Accepted,
    Superseded,
    Deprecated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternType {
    Template,
    Idiom,
    AntiPattern,
    BestPractice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentType {
    Service,
    Library,
    Agent,
    #[serde(rename = "CLI")]
    Cli,
    Adapter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreferenceCategory {
    CodingStyle,
    Workflow,
    Tooling,
    Formatting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreferenceScope {
    Global,
    Project,
    Session,
}

// ============================================================================
// VARIANT FIELDS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequirementsFields {
    /// Matches `REQ-[A-Z]+(-[A-Z]+)*-\d+`.
    pub requirement_id: String,
    pub title: String,
    pub description: String,
    pub source_document: String,
    pub priority: Priority,
    pub status: RequirementStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignFields {
    pub design_type: DesignType,
    pub title: String,
    pub status: DesignStatus,
    #[serde(default)]
    pub decision: Option<String>,
    #[serde(default)]
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodePatternFields {
    pub pattern_name: String,
    pub pattern_type: PatternType,
    pub language: String,
    pub code_template: String,
    pub usage_context: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentFields {
    pub component_id: String,
    pub component_type: ComponentType,
    pub name: String,
    pub file_path: String,
    /// Structured summary of methods and class variables.
    #[serde(default)]
    pub public_interface: Value,
    /// Optional `MAJOR.MINOR.PATCH`.
    #[serde(default)]
    pub version: Option<String>,
    /// Producer tag; the indexer stamps `"indexer"` here.
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionFields {
    pub name: String,
    pub signature: String,
    pub file_path: String,
    /// 1-based, inclusive.
    pub start_line: u32,
    pub end_line: u32,
    pub language: String,
    #[serde(default)]
    pub docstring: Option<String>,
    /// Component memory id of the owning class, when this is a method.
    #[serde(default)]
    pub containing_class: Option<Uuid>,
    /// Producer tag; the indexer stamps `"indexer"` here.
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestHistoryFields {
    pub test_name: String,
    pub test_file: String,
    /// Seconds.
    pub execution_time: f64,
    pub status: TestStatus,
    #[serde(default)]
    pub design_alignment_score: Option<f32>,
    /// Hex commit hash, 7-40 chars.
    #[serde(default)]
    pub fix_commit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionFields {
    pub summary: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreferenceFields {
    pub category: PreferenceCategory,
    pub scope: PreferenceScope,
    pub key: String,
    pub value: Value,
}

// ============================================================================
// TAGGED UNION
// ============================================================================

/// Per-kind fields, tagged by `kind` in the serialized form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MemoryFields {
    Requirements(RequirementsFields),
    Design(DesignFields),
    CodePattern(CodePatternFields),
    Component(ComponentFields),
    Function(FunctionFields),
    TestHistory(TestHistoryFields),
    Session(SessionFields),
    UserPreference(UserPreferenceFields),
}

impl MemoryFields {
    pub fn kind(&self) -> MemoryKind {
        match self {
            MemoryFields::Requirements(_) => MemoryKind::Requirements,
            MemoryFields::Design(_) => MemoryKind::Design,
            MemoryFields::CodePattern(_) => MemoryKind::CodePattern,
            MemoryFields::Component(_) => MemoryKind::Component,
            MemoryFields::Function(_) => MemoryKind::Function,
            MemoryFields::TestHistory(_) => MemoryKind::TestHistory,
            MemoryFields::Session(_) => MemoryKind::Session,
            MemoryFields::UserPreference(_) => MemoryKind::UserPreference,
        }
    }

    /// Requirement priority, when this variant carries one.
    pub fn priority(&self) -> Option<Priority> {
        match self {
            MemoryFields::Requirements(f) => Some(f.priority),
            _ => None,
        }
    }

    /// Per-kind field constraints.
    pub fn validate(&self) -> Result<()> {
        match self {
            MemoryFields::Requirements(f) => {
                if !requirement_id_pattern().is_match(&f.requirement_id) {
                    return Err(CoreError::validation(
                        "requirement_id",
                        format!("'{}' does not match REQ-<AREA>-<N>", f.requirement_id),
                    ));
                }
                require_non_empty("title", &f.title)?;
                require_non_empty("description", &f.description)?;
                require_non_empty("source_document", &f.source_document)
            }
            MemoryFields::Design(f) => require_non_empty("title", &f.title),
            MemoryFields::CodePattern(f) => {
                require_non_empty("pattern_name", &f.pattern_name)?;
                require_non_empty("language", &f.language)?;
                require_non_empty("code_template", &f.code_template)?;
                require_non_empty("usage_context", &f.usage_context)
            }
            MemoryFields::Component(f) => {
                require_non_empty("component_id", &f.component_id)?;
                require_non_empty("name", &f.name)?;
                require_non_empty("file_path", &f.file_path)?;
                if let Some(version) = &f.version {
                    if !semver_pattern().is_match(version) {
                        return Err(CoreError::validation(
                            "version",
                            format!("'{}' is not MAJOR.MINOR.PATCH", version),
                        ));
                    }
                }
                Ok(())
            }
            MemoryFields::Function(f) => {
                require_non_empty("name", &f.name)?;
                require_non_empty("signature", &f.signature)?;
                require_non_empty("file_path", &f.file_path)?;
                require_non_empty("language", &f.language)?;
                if f.start_line < 1 {
                    return Err(CoreError::validation("start_line", "must be >= 1"));
                }
                if f.end_line < f.start_line {
                    return Err(CoreError::validation(
                        "end_line",
                        "must be >= start_line",
                    ));
                }
                Ok(())
            }
            MemoryFields::TestHistory(f) => {
                require_non_empty("test_name", &f.test_name)?;
                require_non_empty("test_file", &f.test_file)?;
                if let Some(score) = f.design_alignment_score {
                    if !(0.0..=1.0).contains(&score) {
                        return Err(CoreError::validation(
                            "design_alignment_score",
                            "must be within [0, 1]",
                        ));
                    }
                }
                if let Some(commit) = &f.fix_commit {
                    if !commit_hash_pattern().is_match(commit) {
                        return Err(CoreError::validation(
                            "fix_commit",
                            "must be a 7-40 char hex hash",
                        ));
                    }
                }
                Ok(())
            }
            MemoryFields::Session(f) => require_non_empty("summary", &f.summary),
            MemoryFields::UserPreference(f) => require_non_empty("key", &f.key),
        }
    }
}
