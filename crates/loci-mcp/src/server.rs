//! MCP server core: request routing and tool dispatch.

use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::context::ToolContext;
use crate::protocol::messages::{
    CallToolRequest, CallToolResult, InitializeResult, ListToolsResult, ServerCapabilities,
    ServerInfo, ToolsCapability,
};
use crate::protocol::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_VERSION};
use crate::tools;

pub struct McpServer {
    ctx: Arc<ToolContext>,
    shutdown_requested: bool,
}

impl McpServer {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self {
            ctx,
            shutdown_requested: false,
        }
    }

    /// Whether a `shutdown` request has been served.
    pub fn shutting_down(&self) -> bool {
        self.shutdown_requested
    }

    /// Handle one JSON-RPC request. Notifications produce no response.
    pub async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!("Handling request: {}", request.method);

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(),
            "notifications/initialized" => return None,
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(request.params).await,
            "ping" => Ok(serde_json::json!({})),
            "shutdown" => {
                info!("shutdown requested");
                self.shutdown_requested = true;
                Ok(serde_json::json!({"status": "ok"}))
            }
            method => {
                warn!("Unknown method: {}", method);
                Err(JsonRpcError::method_not_found(method))
            }
        };

        // Requests without an id are notifications even on unknown methods.
        request.id.as_ref()?;

        Some(match result {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(error) => JsonRpcResponse::error(request.id, error),
        })
    }

    fn handle_initialize(&self) -> Result<Value, JsonRpcError> {
        info!(project_id = %self.ctx.settings.project_id, "MCP session initialized");
        let result = InitializeResult {
            protocol_version: MCP_VERSION.to_string(),
            server_info: ServerInfo {
                name: "loci".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                project_id: self.ctx.settings.project_id.clone(),
            },
            capabilities: ServerCapabilities {
                tools: ToolsCapability {
                    list_changed: false,
                },
            },
        };
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    fn handle_tools_list(&self) -> Result<Value, JsonRpcError> {
        let result = ListToolsResult {
            tools: tools::registry(),
        };
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    async fn handle_tools_call(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let request: CallToolRequest = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => return Err(JsonRpcError::invalid_params("Missing tool call parameters")),
        };

        let Some(schema) = tools::schema_for(&request.name) else {
            return Err(JsonRpcError::invalid_params(&format!(
                "Unknown tool: {}",
                request.name
            )));
        };

        let arguments = if request.arguments.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            request.arguments
        };
        validate_arguments(&schema, &arguments)
            .map_err(|message| JsonRpcError::invalid_params(&message))?;

        let start = Instant::now();
        let outcome = tools::dispatch(&self.ctx, &request.name, &arguments)
            .await
            .expect("schema_for already established the tool exists");
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                debug!(tool = %request.name, status = "success", duration_ms, "tool call");
                serde_json::to_value(CallToolResult::text(&result))
                    .map_err(|e| JsonRpcError::internal_error(&e.to_string()))
            }
            Err(error) => {
                warn!(tool = %request.name, status = "error", duration_ms, error = %error, "tool call failed");
                Err(if error.invalid {
                    JsonRpcError::invalid_params(&error.message)
                } else if error.retryable {
                    JsonRpcError::internal_retryable(&format!(
                        "Tool execution failed: {}",
                        error.message
                    ))
                } else {
                    JsonRpcError::internal_error(&format!(
                        "Tool execution failed: {}",
                        error.message
                    ))
                })
            }
        }
    }
}

/// Minimal JSON-Schema enforcement: required fields, enum membership, and
/// declared integer bounds.
fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), String> {
    let Some(arguments) = arguments.as_object() else {
        return Err("arguments must be an object".to_string());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !arguments.contains_key(field) {
                return Err(format!("Missing required field: {}", field));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };

    for (field, spec) in properties {
        let Some(value) = arguments.get(field) else {
            continue;
        };

        if let Some(allowed) = spec.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                return Err(format!(
                    "Field {} must be one of {}",
                    field,
                    serde_json::to_string(allowed).unwrap_or_default()
                ));
            }
        }

        if let Some(number) = value.as_f64() {
            if let Some(maximum) = spec.get("maximum").and_then(Value::as_f64) {
                if number > maximum {
                    return Err(format!("Field {} must be <= {}", field, maximum));
                }
            }
            if let Some(minimum) = spec.get("minimum").and_then(Value::as_f64) {
                if number < minimum {
                    return Err(format!("Field {} must be >= {}", field, minimum));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_required_fields() {
        let schema = json!({
            "type": "object",
            "properties": {"query": {"type": "string"}},
            "required": ["query"],
        });
        assert!(validate_arguments(&schema, &json!({"query": "x"})).is_ok());
        assert!(validate_arguments(&schema, &json!({})).is_err());
    }

    #[test]
    fn test_validate_enum_membership() {
        let schema = json!({
            "type": "object",
            "properties": {"direction": {"enum": ["outgoing", "incoming", "both"]}},
        });
        assert!(validate_arguments(&schema, &json!({"direction": "both"})).is_ok());
        assert!(validate_arguments(&schema, &json!({"direction": "sideways"})).is_err());
    }

    #[test]
    fn test_validate_integer_bounds() {
        let schema = json!({
            "type": "object",
            "properties": {"depth": {"type": "integer", "minimum": 1, "maximum": 5}},
        });
        assert!(validate_arguments(&schema, &json!({"depth": 3})).is_ok());
        assert!(validate_arguments(&schema, &json!({"depth": 6})).is_err());
        assert!(validate_arguments(&schema, &json!({"depth": 0})).is_err());
    }

    #[test]
    fn test_unknown_fields_pass() {
        let schema = json!({"type": "object", "properties": {}});
        assert!(validate_arguments(&schema, &json!({"extra": 1})).is_ok());
    }
}
