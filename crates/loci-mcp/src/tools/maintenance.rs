//! Maintenance tools: normalization, statistics, export/import.

use serde_json::{json, Value};
use tracing::warn;

use super::{opt_bool, opt_str, opt_string_list, parse_kinds};
use crate::context::{ToolContext, ToolError, ToolResult};
use loci_core::{Filter, GraphStore, Memory, MemoryKind, VectorStore};

/// Export samples truncate at this many records when no output path is
/// given.
const EXPORT_SAMPLE_LIMIT: usize = 100;

/// Import reports at most this many per-record errors verbatim.
const IMPORT_ERROR_LIMIT: usize = 20;

pub fn normalize_memory_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "phases": {
                "type": "array",
                "items": {"type": "string"},
                "description": "Specific phases to run"
            },
            "dry_run": {
                "type": "boolean",
                "default": false,
                "description": "Report changes without applying"
            },
        },
    })
}

pub fn normalize_status_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "job_id": {"type": "string", "description": "Job ID to check (optional)"},
        },
    })
}

pub fn memory_statistics_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

pub fn export_memory_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "memory_types": {"type": "array", "items": {"type": "string"}},
            "filters": {"type": "object", "description": "Additional filters"},
            "output_path": {"type": "string", "description": "Path to write JSONL export"},
        },
    })
}

pub fn import_memory_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "input_path": {"type": "string", "description": "Path to JSONL file"},
            "data": {"type": "string", "description": "JSONL data as string"},
            "conflict_resolution": {
                "type": "string",
                "enum": ["skip", "overwrite", "error"],
                "default": "skip"
            },
        },
    })
}

pub async fn normalize_memory(ctx: &ToolContext, args: &Value) -> ToolResult {
    let phases = opt_string_list(args, "phases");
    let dry_run = opt_bool(args, "dry_run", false);

    let job_id = ctx.jobs.create(
        "normalize",
        json!({"phases": phases, "dry_run": dry_run})
            .as_object()
            .cloned()
            .unwrap_or_default(),
    );

    let outcome = ctx
        .normalizer
        .normalize(Some(&job_id), phases.as_deref(), dry_run)
        .await;

    let mut result = serde_json::to_value(&outcome).map_err(|e| ToolError::new(e.to_string()))?;
    result["job_id"] = Value::from(job_id);
    Ok(result)
}

pub async fn normalize_status(ctx: &ToolContext, args: &Value) -> ToolResult {
    if let Some(job_id) = opt_str(args, "job_id") {
        return match ctx.jobs.get(job_id) {
            Some(job) => serde_json::to_value(&job).map_err(|e| ToolError::new(e.to_string())),
            None => Ok(json!({"status": "not_found", "job_id": job_id})),
        };
    }

    let state = ctx.normalizer.state().await;
    serde_json::to_value(&state).map_err(|e| ToolError::new(e.to_string()))
}

pub async fn memory_statistics(ctx: &ToolContext, _args: &Value) -> ToolResult {
    let memory_counts = ctx.manager.counts().await?;
    let sync_status = ctx.sync.status_counts().await?;
    let cache = ctx.embeddings.cache_stats();

    let vector_healthy = ctx.vector.health_check().await;
    let graph_healthy = ctx.graph.health_check().await;
    let graph_nodes = ctx.graph.count_nodes(None, None).await.unwrap_or(0);

    let total: u64 = memory_counts.values().sum();

    Ok(json!({
        "memory_counts": memory_counts,
        "sync_status": serde_json::to_value(sync_status)
            .map_err(|e| ToolError::new(e.to_string()))?,
        "storage": {
            "vector_healthy": vector_healthy,
            "graph_healthy": graph_healthy,
            "graph_nodes": graph_nodes,
        },
        "cache": {
            "entries": cache.entries,
            "capacity": cache.capacity,
            "hits": cache.hits,
            "misses": cache.misses,
        },
        "totals": {"memories": total},
    }))
}

pub async fn export_memory(ctx: &ToolContext, args: &Value) -> ToolResult {
    let kinds = parse_kinds(args, "memory_types")?
        .unwrap_or_else(|| MemoryKind::ALL.to_vec());
    let mut filter = Filter::new().eq("deleted", false);
    if let Some(extra) = args.get("filters") {
        filter = filter.merge(Filter::from_json(extra).map_err(ToolError::from)?);
    }

    // Payloads already exclude embeddings; they are regenerated on import.
    let mut records: Vec<Value> = Vec::new();
    for kind in &kinds {
        let mut offset = None;
        loop {
            let page = ctx
                .vector
                .scroll(kind.collection(), &filter, 500, offset, false)
                .await?;
            records.extend(page.points.into_iter().map(|p| Value::Object(p.payload)));
            match page.next_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
    }

    match opt_str(args, "output_path") {
        Some(raw_path) => {
            let output_path = ctx.resolve_path(raw_path)?;
            let mut lines = String::new();
            for record in &records {
                lines.push_str(&record.to_string());
                lines.push('\n');
            }
            std::fs::write(&output_path, lines)
                .map_err(|e| ToolError::new(format!("export write failed: {}", e)))?;
            Ok(json!({
                "status": "exported",
                "memory_count": records.len(),
                "output_path": output_path.to_string_lossy(),
            }))
        }
        None => {
            let truncated = records.len() > EXPORT_SAMPLE_LIMIT;
            let total = records.len();
            records.truncate(EXPORT_SAMPLE_LIMIT);
            Ok(json!({
                "status": "sampled",
                "memory_count": total,
                "truncated": truncated,
                "memories": records,
            }))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConflictResolution {
    Skip,
    Overwrite,
    Error,
}

pub async fn import_memory(ctx: &ToolContext, args: &Value) -> ToolResult {
    let resolution = match opt_str(args, "conflict_resolution").unwrap_or("skip") {
        "skip" => ConflictResolution::Skip,
        "overwrite" => ConflictResolution::Overwrite,
        "error" => ConflictResolution::Error,
        other => {
            return Err(ToolError::invalid(format!(
                "unknown conflict_resolution: {}",
                other
            )))
        }
    };

    let data = match (opt_str(args, "input_path"), opt_str(args, "data")) {
        (Some(raw_path), _) => {
            let input_path = ctx.resolve_path(raw_path)?;
            std::fs::read_to_string(&input_path)
                .map_err(|e| ToolError::new(format!("import read failed: {}", e)))?
        }
        (None, Some(inline)) => inline.to_string(),
        (None, None) => {
            return Err(ToolError::invalid(
                "either input_path or data is required",
            ))
        }
    };

    let mut imported = 0_u64;
    let mut skipped = 0_u64;
    let mut overwritten = 0_u64;
    let mut errors: Vec<Value> = Vec::new();
    let mut total_errors = 0_u64;

    let mut record_error = |line_number: usize, message: String, errors: &mut Vec<Value>| {
        total_errors += 1;
        if errors.len() < IMPORT_ERROR_LIMIT {
            errors.push(json!({"line": line_number, "error": message}));
        }
    };

    for (index, line) in data.lines().enumerate() {
        let line_number = index + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let payload = match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                record_error(line_number, "record is not an object".into(), &mut errors);
                continue;
            }
            Err(e) => {
                record_error(line_number, format!("parse error: {}", e), &mut errors);
                continue;
            }
        };

        let memory = match Memory::from_payload(&payload) {
            Ok(memory) => memory,
            Err(e) => {
                record_error(line_number, e.to_string(), &mut errors);
                continue;
            }
        };
        let kind = memory.kind();

        let exists = ctx
            .vector
            .get(kind.collection(), memory.id, false)
            .await?
            .is_some();

        if exists {
            match resolution {
                ConflictResolution::Skip => {
                    skipped += 1;
                    continue;
                }
                ConflictResolution::Error => {
                    record_error(
                        line_number,
                        format!("memory {} already exists", memory.id),
                        &mut errors,
                    );
                    continue;
                }
                ConflictResolution::Overwrite => {}
            }
        }

        // Embeddings are stripped on export and regenerated here.
        match ctx.manager.add(memory, false, true).await {
            Ok(_) => {
                if exists {
                    overwritten += 1;
                } else {
                    imported += 1;
                }
            }
            Err(e) => {
                warn!(line = line_number, error = %e, "import record failed");
                record_error(line_number, e.to_string(), &mut errors);
            }
        }
    }

    Ok(json!({
        "status": "completed",
        "imported": imported,
        "skipped": skipped,
        "overwritten": overwritten,
        "total_errors": total_errors,
        "errors": errors,
    }))
}
