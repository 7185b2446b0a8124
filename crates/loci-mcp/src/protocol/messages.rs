//! MCP method payloads: initialize, tools/list, tools/call.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `initialize` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub server_info: ServerInfo,
    pub capabilities: ServerCapabilities,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    /// The immutable project this process serves.
    pub project_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCapabilities {
    pub tools: ToolsCapability,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    pub list_changed: bool,
}

/// One entry of the `tools/list` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<ToolDescription>,
}

/// `tools/call` params.
#[derive(Debug, Clone, Deserialize)]
pub struct CallToolRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// `tools/call` result: one text item carrying the JSON-encoded payload.
#[derive(Debug, Clone, Serialize)]
pub struct CallToolResult {
    pub content: Vec<ContentItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContentItem {
    #[serde(rename = "type")]
    pub item_type: String,
    pub text: String,
}

impl CallToolResult {
    pub fn text(payload: &Value) -> Self {
        Self {
            content: vec![ContentItem {
                item_type: "text".to_string(),
                text: payload.to_string(),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_initialize_result_shape() {
        let result = InitializeResult {
            protocol_version: "2024-11-05".into(),
            server_info: ServerInfo {
                name: "loci".into(),
                version: "0.2.0".into(),
                project_id: "demo".into(),
            },
            capabilities: ServerCapabilities {
                tools: ToolsCapability {
                    list_changed: false,
                },
            },
        };
        let value = serde_json::to_value(result).unwrap();
        assert_eq!(value["protocolVersion"], json!("2024-11-05"));
        assert_eq!(value["serverInfo"]["project_id"], json!("demo"));
        assert_eq!(value["capabilities"]["tools"]["listChanged"], json!(false));
    }

    #[test]
    fn test_call_result_wraps_json_text() {
        let result = CallToolResult::text(&json!({"status": "created"}));
        let value = serde_json::to_value(result).unwrap();
        assert_eq!(value["content"][0]["type"], json!("text"));
        let inner: Value =
            serde_json::from_str(value["content"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(inner["status"], json!("created"));
    }

    #[test]
    fn test_call_request_defaults_arguments() {
        let parsed: CallToolRequest =
            serde_json::from_value(json!({"name": "memory_statistics"})).unwrap();
        assert_eq!(parsed.name, "memory_statistics");
        assert!(parsed.arguments.is_null());
    }
}
