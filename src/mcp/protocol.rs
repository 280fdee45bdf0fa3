//! MCP Protocol types - JSON-RPC messages for Model Context Protocol

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const JSONRPC_VERSION: &str = "2.0";
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// JSON-RPC Request
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC Response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn invalid_request() -> Self {
        Self::new(INVALID_REQUEST, "Invalid Request")
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// What goes back over the wire for one request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RpcReply {
    Single(JsonRpcResponse),
    Batch(Vec<JsonRpcResponse>),
}

/// A request validated at the boundary, one variant per supported method.
#[derive(Debug, Clone, PartialEq)]
pub enum McpRequest {
    Initialize(InitializeRequest),
    Initialized,
    Ping,
    ToolsList,
    ToolsCall(ToolsCallRequest),
    Notification(String),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    #[serde(default)]
    pub protocol_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolsCallRequest {
    pub name: String,
    pub arguments: Map<String, Value>,
}

impl McpRequest {
    /// Route by method and validate params.
    pub fn parse(method: &str, params: Option<Value>) -> Result<Self, JsonRpcError> {
        match method {
            "initialize" => {
                let request = match params {
                    Some(Value::Object(map)) => {
                        serde_json::from_value(Value::Object(map)).unwrap_or_default()
                    }
                    _ => InitializeRequest::default(),
                };
                Ok(McpRequest::Initialize(request))
            }
            "initialized" | "notifications/initialized" => Ok(McpRequest::Initialized),
            "ping" => Ok(McpRequest::Ping),
            "tools/list" => Ok(McpRequest::ToolsList),
            "tools/call" => parse_tools_call(params).map(McpRequest::ToolsCall),
            m if m.starts_with("notifications/") => Ok(McpRequest::Notification(m.to_string())),
            other => Err(JsonRpcError::new(
                METHOD_NOT_FOUND,
                format!("Method not found: {}", other),
            )),
        }
    }
}

fn parse_tools_call(params: Option<Value>) -> Result<ToolsCallRequest, JsonRpcError> {
    let mut params = match params {
        Some(Value::Object(map)) => map,
        Some(_) => return Err(JsonRpcError::invalid_params("Invalid params: expected object.")),
        None => return Err(JsonRpcError::invalid_params("Missing params")),
    };

    let name = match params.remove("name") {
        Some(Value::String(name)) => name,
        Some(_) => return Err(JsonRpcError::invalid_params("Invalid tool name: expected string.")),
        None => return Err(JsonRpcError::invalid_params("Missing tool name")),
    };

    // Some clients send arguments as a JSON-encoded string.
    let arguments = match params.remove("arguments") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                return Err(JsonRpcError::invalid_params(
                    "Invalid arguments: expected object.",
                ))
            }
            Err(_) => {
                return Err(JsonRpcError::invalid_params(
                    "Invalid arguments: string payload is not valid JSON.",
                )
                .with_data(serde_json::json!({ "arguments": raw })))
            }
        },
        Some(_) => {
            return Err(JsonRpcError::invalid_params(
                "Invalid arguments: expected object.",
            ))
        }
    };

    Ok(ToolsCallRequest { name, arguments })
}

/// MCP Server Info
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// MCP Initialize Result
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: ServerInfo,
}

#[derive(Debug, Serialize)]
pub struct ServerCapabilities {
    pub tools: ToolsCapability,
}

#[derive(Debug, Serialize)]
pub struct ToolsCapability {
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

/// Tool Definition
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Tools List Result
#[derive(Debug, Serialize)]
pub struct ToolsListResult<'a> {
    pub tools: &'a [ToolDefinition],
}

/// Tool Result Content
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

/// Tool Call Result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    pub content: Vec<TextContent>,
    pub is_error: bool,
}

impl ToolCallResult {
    pub fn success(text: String) -> Self {
        Self {
            content: vec![TextContent {
                content_type: "text".to_string(),
                text,
            }],
            is_error: false,
        }
    }

    pub fn error(text: String) -> Self {
        Self {
            content: vec![TextContent {
                content_type: "text".to_string(),
                text,
            }],
            is_error: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_tools_call_with_object_arguments() {
        let request = McpRequest::parse(
            "tools/call",
            Some(json!({"name": "grok_search", "arguments": {"query": "rust"}})),
        )
        .unwrap();

        match request {
            McpRequest::ToolsCall(call) => {
                assert_eq!(call.name, "grok_search");
                assert_eq!(call.arguments["query"], "rust");
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_parse_tools_call_with_string_arguments() {
        let request = McpRequest::parse(
            "tools/call",
            Some(json!({"name": "grok_search", "arguments": "{\"query\": \"rust\"}"})),
        )
        .unwrap();
        assert!(matches!(request, McpRequest::ToolsCall(ref c) if c.arguments["query"] == "rust"));
    }

    #[test]
    fn test_parse_tools_call_rejects_bad_arguments() {
        let err = McpRequest::parse(
            "tools/call",
            Some(json!({"name": "grok_search", "arguments": "{not json"})),
        )
        .unwrap_err();
        assert_eq!(err.code, INVALID_PARAMS);
        assert!(err.data.is_some());

        let err = McpRequest::parse(
            "tools/call",
            Some(json!({"name": "grok_search", "arguments": [1, 2]})),
        )
        .unwrap_err();
        assert_eq!(err.code, INVALID_PARAMS);

        let err = McpRequest::parse("tools/call", None).unwrap_err();
        assert_eq!(err.code, INVALID_PARAMS);

        let err = McpRequest::parse("tools/call", Some(json!({"arguments": {}}))).unwrap_err();
        assert_eq!(err.code, INVALID_PARAMS);
    }

    #[test]
    fn test_parse_initialize_reads_protocol_version() {
        let request =
            McpRequest::parse("initialize", Some(json!({"protocolVersion": "2025-03-26"})))
                .unwrap();
        assert_eq!(
            request,
            McpRequest::Initialize(InitializeRequest {
                protocol_version: Some("2025-03-26".to_string())
            })
        );

        let request = McpRequest::parse("initialize", None).unwrap();
        assert_eq!(request, McpRequest::Initialize(InitializeRequest::default()));
    }

    #[test]
    fn test_parse_unknown_method() {
        let err = McpRequest::parse("resources/list", None).unwrap_err();
        assert_eq!(err.code, METHOD_NOT_FOUND);
        assert_eq!(err.message, "Method not found: resources/list");
    }

    #[test]
    fn test_notifications_are_recognised() {
        assert_eq!(
            McpRequest::parse("notifications/cancelled", None).unwrap(),
            McpRequest::Notification("notifications/cancelled".to_string())
        );
        assert_eq!(
            McpRequest::parse("notifications/initialized", None).unwrap(),
            McpRequest::Initialized
        );
    }

    #[test]
    fn test_error_response_shape() {
        let response = JsonRpcResponse::error(Some(json!(7)), JsonRpcError::invalid_request());
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(
            value,
            json!({"jsonrpc": "2.0", "id": 7, "error": {"code": -32600, "message": "Invalid Request"}})
        );
    }

    #[test]
    fn test_tool_call_result_shape() {
        let value = serde_json::to_value(ToolCallResult::error("boom".to_string())).unwrap();
        assert_eq!(
            value,
            json!({"content": [{"type": "text", "text": "boom"}], "isError": true})
        );
    }
}
