//! Indexing tools: single files, directories, job status, reindexing.

use serde_json::{json, Value};

use super::{arg_str, opt_bool, opt_str, opt_string_list};
use crate::context::{ToolContext, ToolError, ToolResult};
use loci_core::{Filter, MemoryKind, VectorStore};

pub fn index_file_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "file_path": {"type": "string", "description": "Path to file to index"},
            "force": {
                "type": "boolean",
                "default": false,
                "description": "Force re-index even if unchanged"
            },
        },
        "required": ["file_path"],
    })
}

pub fn index_directory_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "directory_path": {"type": "string", "description": "Path to directory to index"},
            "extensions": {
                "type": "array",
                "items": {"type": "string"},
                "description": "File extensions to include"
            },
            "exclude": {
                "type": "array",
                "items": {"type": "string"},
                "description": "Patterns to exclude"
            },
            "force": {"type": "boolean", "default": false},
        },
        "required": ["directory_path"],
    })
}

pub fn index_status_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "job_id": {"type": "string", "description": "Job ID to check (optional)"},
        },
    })
}

pub fn reindex_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "directory_path": {"type": "string", "description": "Directory to reindex"},
            "scope": {"type": "string", "enum": ["full", "changed"], "default": "changed"},
            "extensions": {"type": "array", "items": {"type": "string"}},
            "exclude": {"type": "array", "items": {"type": "string"}},
        },
        "required": ["directory_path"],
    })
}

pub async fn index_file(ctx: &ToolContext, args: &Value) -> ToolResult {
    let file_path = ctx.resolve_path(arg_str(args, "file_path")?)?;
    let force = opt_bool(args, "force", false);

    let outcome = ctx.indexer.index_file(&file_path, force, None).await;
    serde_json::to_value(&outcome).map_err(|e| ToolError::new(e.to_string()))
}

async fn run_directory_index(
    ctx: &ToolContext,
    args: &Value,
    force: bool,
) -> Result<(Value, String), ToolError> {
    let directory = ctx.resolve_path(arg_str(args, "directory_path")?)?;
    let extensions = opt_string_list(args, "extensions");
    let exclude = opt_string_list(args, "exclude");

    let job_id = ctx.jobs.create(
        "index",
        json!({"directory": directory.to_string_lossy(), "force": force})
            .as_object()
            .cloned()
            .unwrap_or_default(),
    );

    let outcome = ctx
        .indexer
        .index_directory(
            &directory,
            Some(&job_id),
            extensions.as_deref(),
            exclude.as_deref(),
            force,
            Some(&ctx.shutdown),
        )
        .await;

    let mut result = serde_json::to_value(&outcome).map_err(|e| ToolError::new(e.to_string()))?;
    result["job_id"] = Value::from(job_id.clone());
    Ok((result, job_id))
}

pub async fn index_directory(ctx: &ToolContext, args: &Value) -> ToolResult {
    let force = opt_bool(args, "force", false);
    let (result, _) = run_directory_index(ctx, args, force).await?;
    Ok(result)
}

pub async fn reindex(ctx: &ToolContext, args: &Value) -> ToolResult {
    let scope = opt_str(args, "scope").unwrap_or("changed");
    let force = scope == "full";

    let (mut result, _) = run_directory_index(ctx, args, force).await?;
    result["scope"] = Value::from(scope);
    Ok(result)
}

pub async fn index_status(ctx: &ToolContext, args: &Value) -> ToolResult {
    if let Some(job_id) = opt_str(args, "job_id") {
        return match ctx.jobs.get(job_id) {
            Some(job) => serde_json::to_value(&job).map_err(|e| ToolError::new(e.to_string())),
            None => Ok(json!({"status": "not_found", "job_id": job_id})),
        };
    }

    // No job id: aggregate view over what the indexer produced.
    let by_source = Filter::new().eq("source", "indexer").eq("deleted", false);
    let functions = ctx
        .vector
        .count(MemoryKind::Function.collection(), &by_source)
        .await?;
    let components = ctx
        .vector
        .count(MemoryKind::Component.collection(), &by_source)
        .await?;
    let recent_jobs = ctx.jobs.list(Some("index"), None, 5);

    Ok(json!({
        "functions_indexed": functions,
        "components_indexed": components,
        "recent_jobs": serde_json::to_value(&recent_jobs)
            .map_err(|e| ToolError::new(e.to_string()))?,
    }))
}
