//! MCP tool implementations.
//!
//! One module per tool family. Every tool exposes an input schema and an
//! `execute` handler taking the shared [`ToolContext`]; the server validates
//! arguments against the schema before dispatching here.

pub mod analysis;
pub mod indexing;
pub mod maintenance;
pub mod memory_crud;
pub mod search;

use serde_json::Value;
use uuid::Uuid;

use crate::context::{ToolContext, ToolError, ToolResult};
use crate::protocol::messages::ToolDescription;
use loci_core::MemoryKind;

// ============================================================================
// ARGUMENT HELPERS
// ============================================================================

pub(crate) fn arg_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::invalid(format!("missing required field: {}", key)))
}

pub(crate) fn opt_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

pub(crate) fn opt_bool(args: &Value, key: &str, default: bool) -> bool {
    args.get(key).and_then(Value::as_bool).unwrap_or(default)
}

pub(crate) fn opt_usize(args: &Value, key: &str) -> Option<usize> {
    args.get(key).and_then(Value::as_u64).map(|v| v as usize)
}

pub(crate) fn opt_string_list(args: &Value, key: &str) -> Option<Vec<String>> {
    args.get(key).and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}

pub(crate) fn arg_uuid(args: &Value, key: &str) -> Result<Uuid, ToolError> {
    let raw = arg_str(args, key)?;
    Uuid::parse_str(raw)
        .map_err(|_| ToolError::invalid(format!("field {} is not a valid uuid: {}", key, raw)))
}

pub(crate) fn arg_kind(args: &Value, key: &str) -> Result<MemoryKind, ToolError> {
    let raw = arg_str(args, key)?;
    raw.parse::<MemoryKind>()
        .map_err(|_| ToolError::invalid(format!("unknown memory_type: {}", raw)))
}

pub(crate) fn parse_kinds(args: &Value, key: &str) -> Result<Option<Vec<MemoryKind>>, ToolError> {
    match opt_string_list(args, key) {
        None => Ok(None),
        Some(names) => {
            let mut kinds = Vec::with_capacity(names.len());
            for name in names {
                kinds.push(name.parse::<MemoryKind>().map_err(|_| {
                    ToolError::invalid(format!("unknown memory type: {}", name))
                })?);
            }
            Ok(Some(kinds))
        }
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Every tool: (name, description, input schema).
pub fn registry() -> Vec<ToolDescription> {
    let entries: Vec<(&str, &str, Value)> = vec![
        // Memory CRUD
        (
            "memory_add",
            "Add a new memory to the system",
            memory_crud::memory_add_schema(),
        ),
        (
            "memory_update",
            "Update an existing memory",
            memory_crud::memory_update_schema(),
        ),
        (
            "memory_delete",
            "Delete a memory (soft delete by default)",
            memory_crud::memory_delete_schema(),
        ),
        (
            "memory_get",
            "Retrieve a memory by ID",
            memory_crud::memory_get_schema(),
        ),
        (
            "memory_bulk_add",
            "Add multiple memories in batch",
            memory_crud::memory_bulk_add_schema(),
        ),
        // Search
        (
            "memory_search",
            "Search memories using semantic similarity",
            search::memory_search_schema(),
        ),
        (
            "code_search",
            "Search for similar code patterns",
            search::code_search_schema(),
        ),
        (
            "graph_query",
            "Execute a read-only Cypher graph query",
            search::graph_query_schema(),
        ),
        (
            "find_duplicates",
            "Find duplicate functions/code",
            search::find_duplicates_schema(),
        ),
        (
            "get_related",
            "Get entities related by graph relationships",
            search::get_related_schema(),
        ),
        // Indexing
        (
            "index_file",
            "Index a single source file",
            indexing::index_file_schema(),
        ),
        (
            "index_directory",
            "Index all source files in a directory",
            indexing::index_directory_schema(),
        ),
        (
            "index_status",
            "Get indexing job status or statistics",
            indexing::index_status_schema(),
        ),
        (
            "reindex",
            "Trigger reindexing of the codebase",
            indexing::reindex_schema(),
        ),
        // Maintenance
        (
            "normalize_memory",
            "Run memory normalization (deduplication, cleanup, etc.)",
            maintenance::normalize_memory_schema(),
        ),
        (
            "normalize_status",
            "Get normalization job status",
            maintenance::normalize_status_schema(),
        ),
        (
            "memory_statistics",
            "Get comprehensive memory system statistics",
            maintenance::memory_statistics_schema(),
        ),
        (
            "export_memory",
            "Export memories to JSONL format",
            maintenance::export_memory_schema(),
        ),
        (
            "import_memory",
            "Import memories from JSONL format",
            maintenance::import_memory_schema(),
        ),
        (
            "check_consistency",
            "Check if code is consistent with design",
            analysis::check_consistency_schema(),
        ),
        (
            "validate_fix",
            "Validate a proposed fix against design patterns",
            analysis::validate_fix_schema(),
        ),
        (
            "get_design_context",
            "Get design context for a component",
            analysis::get_design_context_schema(),
        ),
        (
            "trace_requirements",
            "Trace requirement to implementations",
            analysis::trace_requirements_schema(),
        ),
    ];

    entries
        .into_iter()
        .map(|(name, description, input_schema)| ToolDescription {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        })
        .collect()
}

/// Input schema for one tool, if it exists.
pub fn schema_for(name: &str) -> Option<Value> {
    registry()
        .into_iter()
        .find(|tool| tool.name == name)
        .map(|tool| tool.input_schema)
}

/// Dispatch a validated call. `None` means the tool does not exist.
pub async fn dispatch(ctx: &ToolContext, name: &str, args: &Value) -> Option<ToolResult> {
    let result = match name {
        "memory_add" => memory_crud::memory_add(ctx, args).await,
        "memory_update" => memory_crud::memory_update(ctx, args).await,
        "memory_delete" => memory_crud::memory_delete(ctx, args).await,
        "memory_get" => memory_crud::memory_get(ctx, args).await,
        "memory_bulk_add" => memory_crud::memory_bulk_add(ctx, args).await,
        "memory_search" => search::memory_search(ctx, args).await,
        "code_search" => search::code_search(ctx, args).await,
        "graph_query" => search::graph_query(ctx, args).await,
        "find_duplicates" => search::find_duplicates(ctx, args).await,
        "get_related" => search::get_related(ctx, args).await,
        "index_file" => indexing::index_file(ctx, args).await,
        "index_directory" => indexing::index_directory(ctx, args).await,
        "index_status" => indexing::index_status(ctx, args).await,
        "reindex" => indexing::reindex(ctx, args).await,
        "normalize_memory" => maintenance::normalize_memory(ctx, args).await,
        "normalize_status" => maintenance::normalize_status(ctx, args).await,
        "memory_statistics" => maintenance::memory_statistics(ctx, args).await,
        "export_memory" => maintenance::export_memory(ctx, args).await,
        "import_memory" => maintenance::import_memory(ctx, args).await,
        "check_consistency" => analysis::check_consistency(ctx, args).await,
        "validate_fix" => analysis::validate_fix(ctx, args).await,
        "get_design_context" => analysis::get_design_context(ctx, args).await,
        "trace_requirements" => analysis::trace_requirements(ctx, args).await,
        _ => return None,
    };
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_covers_required_tool_set() {
        let names: Vec<String> = registry().into_iter().map(|t| t.name).collect();
        for required in [
            "memory_add",
            "memory_update",
            "memory_delete",
            "memory_get",
            "memory_bulk_add",
            "memory_search",
            "code_search",
            "graph_query",
            "find_duplicates",
            "get_related",
            "index_file",
            "index_directory",
            "index_status",
            "reindex",
            "normalize_memory",
            "normalize_status",
            "memory_statistics",
            "export_memory",
            "import_memory",
            "check_consistency",
            "validate_fix",
            "get_design_context",
            "trace_requirements",
        ] {
            assert!(names.contains(&required.to_string()), "missing {}", required);
        }
        assert_eq!(names.len(), 23);
    }

    #[test]
    fn test_schemas_are_objects_with_properties() {
        for tool in registry() {
            assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
            assert!(tool.input_schema["properties"].is_object(), "{}", tool.name);
        }
    }
}
