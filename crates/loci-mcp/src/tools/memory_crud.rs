//! Memory CRUD tools: add, update, delete, get, bulk add.

use serde_json::{json, Map, Value};
use tracing::warn;

use super::{arg_kind, arg_str, arg_uuid, opt_bool};
use crate::context::{ToolContext, ToolError, ToolResult};
use loci_core::{Direction, GraphStore, Memory, MemoryFields, MemoryKind, RelationshipType};

const MEMORY_TYPE_NAMES: [&str; 8] = [
    "requirements",
    "design",
    "code_pattern",
    "component",
    "function",
    "test_history",
    "session",
    "user_preference",
];

pub fn memory_add_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "memory_type": {"type": "string", "enum": MEMORY_TYPE_NAMES},
            "content": {"type": "string", "description": "Primary content for embedding"},
            "metadata": {"type": "object", "description": "Type-specific fields"},
            "relationships": {
                "type": "array",
                "items": {"type": "object"},
                "description": "Relationships to create from the new memory"
            },
        },
        "required": ["memory_type", "content"],
    })
}

pub fn memory_update_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "memory_id": {"type": "string", "format": "uuid"},
            "memory_type": {"type": "string", "enum": MEMORY_TYPE_NAMES},
            "content": {"type": "string"},
            "metadata": {"type": "object"},
        },
        "required": ["memory_id", "memory_type"],
    })
}

pub fn memory_delete_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "memory_id": {"type": "string", "format": "uuid"},
            "memory_type": {"type": "string", "enum": MEMORY_TYPE_NAMES},
            "hard_delete": {"type": "boolean", "default": false},
        },
        "required": ["memory_id", "memory_type"],
    })
}

pub fn memory_get_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "memory_id": {"type": "string", "format": "uuid"},
            "memory_type": {"type": "string", "enum": MEMORY_TYPE_NAMES},
            "include_relationships": {"type": "boolean", "default": false},
        },
        "required": ["memory_id", "memory_type"],
    })
}

pub fn memory_bulk_add_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "memories": {"type": "array", "items": {"type": "object"}},
        },
        "required": ["memories"],
    })
}

/// Build a typed memory from the wire form: kind, content, and a metadata
/// object carrying the per-kind fields (plus an optional nested free-form
/// `metadata`).
pub(crate) fn build_memory(
    kind: MemoryKind,
    content: &str,
    metadata: Option<&Map<String, Value>>,
) -> Result<Memory, ToolError> {
    let mut fields_source = metadata.cloned().unwrap_or_default();
    let free_form = fields_source
        .remove("metadata")
        .and_then(|v| v.as_object().cloned());
    fields_source.insert("kind".to_string(), Value::from(kind.as_str()));

    let fields: MemoryFields = serde_json::from_value(Value::Object(fields_source))
        .map_err(|e| ToolError::invalid(format!("invalid {} fields: {}", kind, e)))?;

    let mut memory = Memory::new(content, fields);
    if let Some(free_form) = free_form {
        memory.metadata = free_form;
    }
    Ok(memory)
}

pub async fn memory_add(ctx: &ToolContext, args: &Value) -> ToolResult {
    let kind = arg_kind(args, "memory_type")?;
    let content = arg_str(args, "content")?;
    let metadata = args.get("metadata").and_then(Value::as_object);

    let memory = build_memory(kind, content, metadata)?;
    memory.validate().map_err(ToolError::from)?;

    let (memory_id, conflicts) = ctx.manager.add(memory, true, true).await?;

    // Caller-requested relationships, best-effort after the node exists.
    if let Some(relationships) = args.get("relationships").and_then(Value::as_array) {
        for relationship in relationships {
            let Some(target) = relationship
                .get("target_id")
                .and_then(Value::as_str)
                .and_then(|s| uuid::Uuid::parse_str(s).ok())
            else {
                continue;
            };
            let rel_type = relationship
                .get("relationship_type")
                .or_else(|| relationship.get("type"))
                .and_then(Value::as_str)
                .map(RelationshipType::parse_name)
                .unwrap_or(RelationshipType::References);
            let properties = relationship
                .get("properties")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();

            if let Err(e) = ctx
                .graph
                .create_relationship(memory_id, target, rel_type.as_str(), properties)
                .await
            {
                warn!(%memory_id, %target, error = %e, "relationship creation failed");
            }
        }
    }

    let mut result = json!({
        "memory_id": memory_id.to_string(),
        "memory_type": kind.as_str(),
        "status": "created",
    });
    if !conflicts.is_empty() {
        result["conflicts"] = serde_json::to_value(&conflicts)
            .map_err(|e| ToolError::new(e.to_string()))?;
    }
    Ok(result)
}

pub async fn memory_update(ctx: &ToolContext, args: &Value) -> ToolResult {
    let memory_id = arg_uuid(args, "memory_id")?;
    let kind = arg_kind(args, "memory_type")?;

    let mut patch = args
        .get("metadata")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    if let Some(content) = args.get("content").and_then(Value::as_str) {
        patch.insert("content".to_string(), Value::from(content));
    }

    match ctx.manager.update(memory_id, kind, patch, true).await? {
        Some(_) => Ok(json!({
            "status": "updated",
            "memory_id": memory_id.to_string(),
        })),
        None => Ok(json!({
            "status": "not_found",
            "memory_id": memory_id.to_string(),
        })),
    }
}

pub async fn memory_delete(ctx: &ToolContext, args: &Value) -> ToolResult {
    let memory_id = arg_uuid(args, "memory_id")?;
    let kind = arg_kind(args, "memory_type")?;
    let hard_delete = opt_bool(args, "hard_delete", false);

    let deleted = ctx.manager.delete(memory_id, kind, !hard_delete).await?;
    Ok(json!({
        "status": if deleted { "deleted" } else { "not_found" },
        "memory_id": memory_id.to_string(),
        "hard_delete": hard_delete,
    }))
}

pub async fn memory_get(ctx: &ToolContext, args: &Value) -> ToolResult {
    let memory_id = arg_uuid(args, "memory_id")?;
    let kind = arg_kind(args, "memory_type")?;
    let include_relationships = opt_bool(args, "include_relationships", false);

    let Some(memory) = ctx.manager.get(memory_id, kind, false, true).await? else {
        return Ok(json!({
            "status": "not_found",
            "memory_id": memory_id.to_string(),
        }));
    };

    let mut result = serde_json::to_value(&memory).map_err(|e| ToolError::new(e.to_string()))?;
    if include_relationships {
        let related = ctx
            .query
            .get_related(memory_id, None, Direction::Both, 1, Some(50))
            .await?;
        result["relationships"] =
            serde_json::to_value(&related).map_err(|e| ToolError::new(e.to_string()))?;
    }
    Ok(result)
}

pub async fn memory_bulk_add(ctx: &ToolContext, args: &Value) -> ToolResult {
    let entries = args
        .get("memories")
        .and_then(Value::as_array)
        .ok_or_else(|| ToolError::invalid("missing required field: memories"))?;

    let mut memories = Vec::with_capacity(entries.len());
    let mut errors: Vec<Value> = Vec::new();

    for (index, entry) in entries.iter().enumerate() {
        let built = arg_kind(entry, "memory_type").and_then(|kind| {
            let content = arg_str(entry, "content")?;
            build_memory(kind, content, entry.get("metadata").and_then(Value::as_object))
        });
        match built {
            Ok(memory) => memories.push(memory),
            Err(e) => errors.push(json!({"index": index, "error": e.message})),
        }
    }

    let (added_ids, bulk_errors) = ctx.manager.bulk_add(memories, false, true).await?;
    for error in &bulk_errors {
        errors.push(json!({
            "memory_id": error.memory_id.to_string(),
            "error": error.error.clone(),
        }));
    }

    Ok(json!({
        "added_count": added_ids.len(),
        "added_ids": added_ids.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
        "errors": errors,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_memory_from_wire_fields() {
        let metadata = json!({
            "requirement_id": "REQ-MEM-001",
            "title": "Validate ids",
            "description": "Check ids before insert",
            "source_document": "reqs.md",
            "priority": "High",
            "status": "Approved",
            "metadata": {"origin": "spec-review"}
        });
        let memory = build_memory(
            MemoryKind::Requirements,
            "Record ids must be validated",
            metadata.as_object(),
        )
        .unwrap();
        assert_eq!(memory.kind(), MemoryKind::Requirements);
        assert_eq!(memory.metadata["origin"], json!("spec-review"));
        assert!(memory.validate().is_ok());
    }

    #[test]
    fn test_build_memory_rejects_missing_fields() {
        let metadata = json!({"title": "No requirement id"});
        let error = build_memory(
            MemoryKind::Requirements,
            "content",
            metadata.as_object(),
        )
        .unwrap_err();
        assert!(error.invalid);
    }
}
