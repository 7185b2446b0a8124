//! Search tools: semantic search, code search, graph queries, duplicate
//! detection, and relationship traversal.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::{arg_str, arg_uuid, opt_str, opt_string_list, opt_usize, parse_kinds};
use crate::context::{ToolContext, ToolError, ToolResult};
use loci_core::{Direction, Filter, MemoryKind, SearchHit, VectorStore};

pub fn memory_search_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": {"type": "string", "description": "Search query text"},
            "memory_types": {"type": "array", "items": {"type": "string"}},
            "time_range": {
                "type": "object",
                "properties": {"start": {"type": "string"}, "end": {"type": "string"}}
            },
            "filters": {"type": "object"},
            "limit": {"type": "integer", "default": 10, "description": "Clamped to 100"},
            "offset": {"type": "integer", "default": 0},
        },
        "required": ["query"],
    })
}

pub fn code_search_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": {"type": "string", "description": "Code snippet or description"},
            "language": {"type": "string"},
            "limit": {"type": "integer", "default": 10},
        },
        "required": ["query"],
    })
}

pub fn graph_query_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "cypher": {"type": "string", "description": "Cypher query (read-only)"},
            "parameters": {"type": "object"},
        },
        "required": ["cypher"],
    })
}

pub fn find_duplicates_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "code": {"type": "string", "description": "Code to check for duplicates"},
            "language": {"type": "string"},
            "threshold": {"type": "number", "default": 0.85, "minimum": 0.7, "maximum": 0.95},
        },
        "required": ["code"],
    })
}

pub fn get_related_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "entity_id": {"type": "string", "format": "uuid"},
            "relationship_types": {"type": "array", "items": {"type": "string"}},
            "direction": {
                "type": "string",
                "enum": ["outgoing", "incoming", "both"],
                "default": "both"
            },
            "depth": {"type": "integer", "default": 1, "minimum": 1, "maximum": 5},
        },
        "required": ["entity_id"],
    })
}

fn parse_time_range(
    args: &Value,
) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, ToolError> {
    let Some(range) = args.get("time_range").and_then(Value::as_object) else {
        return Ok(None);
    };
    let parse = |key: &str| -> Result<DateTime<Utc>, ToolError> {
        let raw = range
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::invalid(format!("time_range.{} is required", key)))?;
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| ToolError::invalid(format!("time_range.{}: {}", key, e)))
    };
    Ok(Some((parse("start")?, parse("end")?)))
}

fn hits_to_json(hits: &[SearchHit]) -> Result<Value, ToolError> {
    serde_json::to_value(hits).map_err(|e| ToolError::new(e.to_string()))
}

pub async fn memory_search(ctx: &ToolContext, args: &Value) -> ToolResult {
    let query = arg_str(args, "query")?;
    let kinds = parse_kinds(args, "memory_types")?;
    let time_range = parse_time_range(args)?;
    let filters = match args.get("filters") {
        Some(spec) => Some(Filter::from_json(spec).map_err(ToolError::from)?),
        None => None,
    };

    let hits = ctx
        .query
        .semantic_search(
            query,
            kinds.as_deref(),
            filters.as_ref(),
            time_range,
            opt_usize(args, "limit"),
            opt_usize(args, "offset").unwrap_or(0),
        )
        .await?;

    Ok(json!({
        "results": hits_to_json(&hits)?,
        "count": hits.len(),
    }))
}

/// Semantic search restricted to Function and Component memories, with an
/// optional language filter. Functions carry `language` at top level while
/// components keep it in metadata, so the two collections filter
/// differently.
pub async fn code_search(ctx: &ToolContext, args: &Value) -> ToolResult {
    let query = arg_str(args, "query")?;
    let language = opt_str(args, "language");
    let limit = opt_usize(args, "limit");

    let function_filter = language.map(|lang| Filter::new().eq("language", lang));
    let component_filter = language.map(|lang| Filter::new().eq("metadata.language", lang));

    let mut hits = ctx
        .query
        .semantic_search(
            query,
            Some(&[MemoryKind::Function]),
            function_filter.as_ref(),
            None,
            limit,
            0,
        )
        .await?;
    hits.extend(
        ctx.query
            .semantic_search(
                query,
                Some(&[MemoryKind::Component]),
                component_filter.as_ref(),
                None,
                limit,
                0,
            )
            .await?,
    );

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(limit.unwrap_or(10).min(100));

    Ok(json!({
        "results": hits_to_json(&hits)?,
        "count": hits.len(),
    }))
}

pub async fn graph_query(ctx: &ToolContext, args: &Value) -> ToolResult {
    let cypher = arg_str(args, "cypher")?;
    let parameters = args
        .get("parameters")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let records = ctx.query.graph_query(cypher, &parameters).await?;
    let count = records.len();
    Ok(json!({
        "records": records,
        "count": count,
    }))
}

pub async fn find_duplicates(ctx: &ToolContext, args: &Value) -> ToolResult {
    let code = arg_str(args, "code")?;
    let threshold = args
        .get("threshold")
        .and_then(Value::as_f64)
        .unwrap_or(0.85)
        .clamp(0.7, 0.95) as f32;
    let language = opt_str(args, "language");

    let query_vector = ctx.embeddings.embed_for_query(code).await?;

    let mut filter = Filter::new().eq("deleted", false);
    if let Some(lang) = language {
        filter = filter.eq("language", lang);
    }

    let hits = ctx
        .vector
        .search(
            MemoryKind::Function.collection(),
            &query_vector,
            20,
            &filter,
            Some(threshold),
        )
        .await?;

    let duplicates: Vec<Value> = hits
        .iter()
        .map(|hit| {
            json!({
                "id": hit.id.to_string(),
                "score": hit.score,
                "name": hit.payload.get("name"),
                "file_path": hit.payload.get("file_path"),
                "signature": hit.payload.get("signature"),
                "start_line": hit.payload.get("start_line"),
                "end_line": hit.payload.get("end_line"),
            })
        })
        .collect();

    let count = duplicates.len();
    Ok(json!({
        "duplicates": duplicates,
        "threshold": threshold,
        "count": count,
    }))
}

pub async fn get_related(ctx: &ToolContext, args: &Value) -> ToolResult {
    let entity_id = arg_uuid(args, "entity_id")?;
    let relationship_types = opt_string_list(args, "relationship_types");
    let direction = opt_str(args, "direction")
        .map(|raw| {
            Direction::parse_name(raw)
                .ok_or_else(|| ToolError::invalid(format!("unknown direction: {}", raw)))
        })
        .transpose()?
        .unwrap_or(Direction::Both);
    let depth = opt_usize(args, "depth").unwrap_or(1);

    let related = ctx
        .query
        .get_related(
            entity_id,
            relationship_types.as_deref(),
            direction,
            depth,
            opt_usize(args, "limit"),
        )
        .await?;

    Ok(json!({
        "related": serde_json::to_value(&related).map_err(|e| ToolError::new(e.to_string()))?,
        "count": related.len(),
    }))
}
