//! Analysis tools: design-consistency checks, fix validation, design
//! context, and requirement tracing.

use serde_json::{json, Value};
use uuid::Uuid;

use super::{arg_str, opt_bool, opt_str, opt_string_list};
use crate::context::{ToolContext, ToolError, ToolResult};
use loci_core::{Direction, Filter, MemoryKind, SearchHit, VectorStore};

pub fn check_consistency_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "component_id": {"type": "string", "description": "Component ID to check"},
            "code_snippet": {"type": "string", "description": "Code to validate against design"},
        },
        "required": ["component_id"],
    })
}

pub fn validate_fix_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "fix_description": {"type": "string", "description": "Description of the proposed fix"},
            "affected_component": {"type": "string", "description": "Component ID being fixed"},
            "related_requirements": {
                "type": "array",
                "items": {"type": "string"},
                "description": "Requirement IDs"
            },
        },
        "required": ["fix_description"],
    })
}

pub fn get_design_context_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "component_id": {"type": "string", "description": "Component ID"},
            "query": {"type": "string", "description": "Context query"},
            "include_patterns": {"type": "boolean", "default": true},
            "include_requirements": {"type": "boolean", "default": true},
        },
    })
}

pub fn trace_requirements_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "requirement_id": {"type": "string", "description": "Requirement ID to trace"},
            "direction": {
                "type": "string",
                "enum": ["upstream", "downstream", "both"],
                "default": "both"
            },
        },
        "required": ["requirement_id"],
    })
}

/// Find a component point by its `component_id` field, falling back to a
/// uuid lookup.
async fn find_component(
    ctx: &ToolContext,
    component_id: &str,
) -> Result<Option<(Uuid, loci_core::Payload)>, ToolError> {
    let filter = Filter::new()
        .eq("component_id", component_id)
        .eq("deleted", false);
    let page = ctx
        .vector
        .scroll(MemoryKind::Component.collection(), &filter, 1, None, false)
        .await?;
    if let Some(point) = page.points.into_iter().next() {
        return Ok(Some((point.id, point.payload)));
    }

    if let Ok(id) = Uuid::parse_str(component_id) {
        if let Some(point) = ctx
            .vector
            .get(MemoryKind::Component.collection(), id, false)
            .await?
        {
            return Ok(Some((point.id, point.payload)));
        }
    }
    Ok(None)
}

fn evidence_entry(kind: &str, hit: &SearchHit) -> Value {
    json!({
        "type": kind,
        "id": hit.id.to_string(),
        "content": hit.content.clone(),
        "score": hit.score,
    })
}

/// Score how consistent a component is with the design memories linked to
/// it. Starts from 1.0 and deducts per issue; the issues list names each
/// deduction.
pub async fn check_consistency(ctx: &ToolContext, args: &Value) -> ToolResult {
    let component_id = arg_str(args, "component_id")?;

    let Some((id, payload)) = find_component(ctx, component_id).await? else {
        return Ok(json!({
            "status": "not_found",
            "component_id": component_id,
        }));
    };

    let mut score: f64 = 1.0;
    let mut issues: Vec<String> = Vec::new();

    let related = ctx
        .query
        .get_related(id, None, Direction::Both, 1, Some(50))
        .await?;

    let designs: Vec<_> = related
        .iter()
        .filter(|node| node.labels.iter().any(|l| l == "Design"))
        .collect();
    let requirements: Vec<_> = related
        .iter()
        .filter(|node| node.labels.iter().any(|l| l == "Requirement"))
        .collect();

    if designs.is_empty() {
        issues.push("no design documents are linked to this component".to_string());
        score -= 0.3;
    }
    for design in &designs {
        let status = design
            .properties
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if status == "Superseded" || status == "Deprecated" {
            let title = design
                .properties
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or("unnamed design");
            issues.push(format!("linked design '{}' is {}", title, status));
            score -= 0.2;
        }
    }
    if requirements.is_empty() {
        issues.push("no requirements trace to this component".to_string());
        score -= 0.2;
    }

    if let Some(file_path) = payload.get("file_path").and_then(Value::as_str) {
        let on_disk = ctx
            .resolve_path(file_path)
            .map(|resolved| resolved.exists())
            .unwrap_or(false);
        if !on_disk {
            issues.push(format!("source file '{}' no longer exists", file_path));
            score -= 0.2;
        }
    }

    let consistency_score = score.clamp(0.0, 1.0);
    Ok(json!({
        "component_id": component_id,
        "memory_id": id.to_string(),
        "consistency_score": consistency_score,
        "issues": if issues.is_empty() { Value::Null } else { json!(issues) },
    }))
}

/// Gather evidence that a proposed fix lines up with recorded designs,
/// patterns, and requirements.
pub async fn validate_fix(ctx: &ToolContext, args: &Value) -> ToolResult {
    let fix_description = arg_str(args, "fix_description")?;

    let mut evidence: Vec<Value> = Vec::new();

    for (kind, label) in [
        (MemoryKind::Design, "design"),
        (MemoryKind::CodePattern, "code_pattern"),
        (MemoryKind::Requirements, "requirement"),
    ] {
        let hits = ctx
            .query
            .semantic_search(fix_description, Some(&[kind]), None, None, Some(5), 0)
            .await?;
        evidence.extend(hits.iter().map(|hit| evidence_entry(label, hit)));
    }

    // Explicitly named requirements get pulled in regardless of similarity.
    let mut requirements: Vec<Value> = Vec::new();
    if let Some(requirement_ids) = opt_string_list(args, "related_requirements") {
        for requirement_id in requirement_ids {
            let filter = Filter::new()
                .eq("requirement_id", requirement_id.clone())
                .eq("deleted", false);
            let page = ctx
                .vector
                .scroll(MemoryKind::Requirements.collection(), &filter, 1, None, false)
                .await?;
            match page.points.first() {
                Some(point) => requirements.push(Value::Object(point.payload.clone())),
                None => requirements.push(json!({
                    "requirement_id": requirement_id,
                    "status": "not_found",
                })),
            }
        }
    }

    let component = match opt_str(args, "affected_component") {
        Some(component_id) => find_component(ctx, component_id)
            .await?
            .map(|(id, payload)| json!({"memory_id": id.to_string(), "component": payload})),
        None => None,
    };

    Ok(json!({
        "fix_description": fix_description,
        "evidence": evidence,
        "requirements": requirements,
        "affected_component": component,
    }))
}

/// Designs, patterns, and requirements grouped around a component or a
/// free-form query.
pub async fn get_design_context(ctx: &ToolContext, args: &Value) -> ToolResult {
    let query = match (opt_str(args, "query"), opt_str(args, "component_id")) {
        (Some(query), _) => query.to_string(),
        (None, Some(component_id)) => component_id.to_string(),
        (None, None) => {
            return Err(ToolError::invalid(
                "either component_id or query is required",
            ))
        }
    };
    let include_patterns = opt_bool(args, "include_patterns", true);
    let include_requirements = opt_bool(args, "include_requirements", true);

    let designs = ctx
        .query
        .semantic_search(&query, Some(&[MemoryKind::Design]), None, None, Some(5), 0)
        .await?;

    let patterns = if include_patterns {
        ctx.query
            .semantic_search(
                &query,
                Some(&[MemoryKind::CodePattern]),
                None,
                None,
                Some(5),
                0,
            )
            .await?
    } else {
        Vec::new()
    };

    let requirements = if include_requirements {
        ctx.query
            .semantic_search(
                &query,
                Some(&[MemoryKind::Requirements]),
                None,
                None,
                Some(5),
                0,
            )
            .await?
    } else {
        Vec::new()
    };

    Ok(json!({
        "query": query,
        "designs": serde_json::to_value(&designs).map_err(|e| ToolError::new(e.to_string()))?,
        "patterns": serde_json::to_value(&patterns).map_err(|e| ToolError::new(e.to_string()))?,
        "requirements": serde_json::to_value(&requirements)
            .map_err(|e| ToolError::new(e.to_string()))?,
    }))
}

/// Trace a requirement to the components implementing it and the tests
/// covering those implementations.
pub async fn trace_requirements(ctx: &ToolContext, args: &Value) -> ToolResult {
    let requirement_id = arg_str(args, "requirement_id")?;
    let direction = opt_str(args, "direction").unwrap_or("both");

    let filter = Filter::new()
        .eq("requirement_id", requirement_id)
        .eq("deleted", false);
    let page = ctx
        .vector
        .scroll(MemoryKind::Requirements.collection(), &filter, 1, None, false)
        .await?;
    let Some(requirement) = page.points.into_iter().next() else {
        return Ok(json!({
            "status": "not_found",
            "requirement_id": requirement_id,
        }));
    };

    let mut implementations = Vec::new();
    let mut tests = Vec::new();
    let mut upstream = Vec::new();

    if direction == "downstream" || direction == "both" {
        // Implementers point at the requirement with IMPLEMENTS edges.
        let implementers = ctx
            .query
            .get_related(
                requirement.id,
                Some(&["IMPLEMENTS".to_string()]),
                Direction::Incoming,
                1,
                Some(50),
            )
            .await?;

        for implementer in &implementers {
            let covering = ctx
                .query
                .get_related(
                    implementer.id,
                    Some(&["TESTS".to_string()]),
                    Direction::Incoming,
                    1,
                    Some(20),
                )
                .await?;
            tests.extend(covering);
        }
        implementations = implementers;

        // Tests may also target the requirement directly.
        let direct = ctx
            .query
            .get_related(
                requirement.id,
                Some(&["TESTS".to_string()]),
                Direction::Incoming,
                1,
                Some(20),
            )
            .await?;
        tests.extend(direct);
    }

    if direction == "upstream" || direction == "both" {
        upstream = ctx
            .query
            .get_related(
                requirement.id,
                Some(&["DERIVED_FROM".to_string(), "REFERENCES".to_string()]),
                Direction::Outgoing,
                1,
                Some(20),
            )
            .await?;
    }

    Ok(json!({
        "requirement_id": requirement_id,
        "requirement": Value::Object(requirement.payload),
        "direction": direction,
        "implementations": serde_json::to_value(&implementations)
            .map_err(|e| ToolError::new(e.to_string()))?,
        "tests": serde_json::to_value(&tests).map_err(|e| ToolError::new(e.to_string()))?,
        "upstream": serde_json::to_value(&upstream).map_err(|e| ToolError::new(e.to_string()))?,
    }))
}
