//! MCP request dispatcher
//!
//! Transport-agnostic: the HTTP endpoint and the stdio loop both hand raw
//! request bodies to [`McpServer::handle_payload`].

use anyhow::Result;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::core::backend::SearchBackend;
use crate::core::config::{redact_secret, ConfigResolver};

use super::protocol::*;
use super::tools::ToolRegistry;

pub struct McpServer {
    tools: ToolRegistry,
    resolver: ConfigResolver,
    backend: Arc<dyn SearchBackend>,
    server_info: ServerInfo,
}

impl McpServer {
    pub fn new(resolver: ConfigResolver, backend: Arc<dyn SearchBackend>) -> Self {
        Self {
            tools: ToolRegistry::new(),
            resolver,
            backend,
            server_info: ServerInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Handle one raw body: a single request object or a batch array.
    /// Returns `None` when nothing needs to be sent back.
    pub async fn handle_payload(&self, body: &[u8]) -> Option<RpcReply> {
        match serde_json::from_slice::<Value>(body) {
            Ok(value) => self.handle_value(value).await,
            Err(e) => Some(RpcReply::Single(JsonRpcResponse::error(
                None,
                JsonRpcError::new(PARSE_ERROR, format!("Parse error: {}", e)),
            ))),
        }
    }

    pub async fn handle_value(&self, value: Value) -> Option<RpcReply> {
        match value {
            Value::Array(items) if items.is_empty() => Some(RpcReply::Single(
                JsonRpcResponse::error(None, JsonRpcError::invalid_request()),
            )),
            Value::Array(items) => {
                let mut responses = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(response) = self.handle_message(item).await {
                        responses.push(response);
                    }
                }
                if responses.is_empty() {
                    None
                } else {
                    Some(RpcReply::Batch(responses))
                }
            }
            other => self.handle_message(other).await.map(RpcReply::Single),
        }
    }

    /// Handle a single JSON-RPC message.
    pub async fn handle_message(&self, message: Value) -> Option<JsonRpcResponse> {
        if !message.is_object() {
            return Some(JsonRpcResponse::error(
                None,
                JsonRpcError::invalid_request().with_data(message),
            ));
        }

        let request: JsonRpcRequest = match serde_json::from_value(message.clone()) {
            Ok(req) => req,
            Err(_) => {
                return Some(JsonRpcResponse::error(
                    None,
                    JsonRpcError::invalid_request().with_data(message),
                ))
            }
        };

        let id = request.id;
        let method = match request.method {
            Some(m) if !m.is_empty() && request.jsonrpc.as_deref() == Some(JSONRPC_VERSION) => m,
            _ => {
                return Some(JsonRpcResponse::error(
                    id,
                    JsonRpcError::invalid_request().with_data(message),
                ))
            }
        };

        tracing::debug!(method = %method, id = ?id, "rpc request");

        if id.is_none() && method.starts_with("notifications/") {
            return None;
        }

        let request = match McpRequest::parse(&method, request.params) {
            Ok(req) => req,
            Err(error) => {
                tracing::debug!(method = %method, code = error.code, "rpc rejected");
                return Some(JsonRpcResponse::error(id, error));
            }
        };

        let response = match request {
            McpRequest::Initialize(init) => self.handle_initialize(id, init),
            McpRequest::Initialized | McpRequest::Ping => JsonRpcResponse::success(id, json!({})),
            McpRequest::Notification(name) => {
                tracing::debug!(method = %name, "notification sent with an id, acknowledging");
                JsonRpcResponse::success(id, json!({}))
            }
            McpRequest::ToolsList => self.handle_tools_list(id),
            McpRequest::ToolsCall(call) => match self.handle_tools_call(call).await {
                Ok(result) => to_response(id, &result),
                Err(error) => JsonRpcResponse::error(id, error),
            },
        };
        Some(response)
    }

    fn handle_initialize(&self, id: Option<Value>, init: InitializeRequest) -> JsonRpcResponse {
        let result = InitializeResult {
            protocol_version: init
                .protocol_version
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_PROTOCOL_VERSION.to_string()),
            capabilities: ServerCapabilities {
                tools: ToolsCapability {
                    list_changed: false,
                },
            },
            server_info: self.server_info.clone(),
        };

        to_response(id, &result)
    }

    fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        to_response(
            id,
            &ToolsListResult {
                tools: self.tools.list(),
            },
        )
    }

    /// Protocol problems (unknown tool, bad query) are JSON-RPC errors.
    /// Everything that goes wrong after validation is a tool result with
    /// `isError: true`.
    async fn handle_tools_call(
        &self,
        call: ToolsCallRequest,
    ) -> Result<ToolCallResult, JsonRpcError> {
        if !self.tools.contains(&call.name) {
            return Err(JsonRpcError::invalid_params(format!(
                "Unknown tool: {}",
                call.name
            )));
        }

        let query = match call.arguments.get("query") {
            Some(Value::String(q)) if !q.trim().is_empty() => q.trim().to_string(),
            _ => {
                return Err(JsonRpcError::invalid_params(
                    "Missing required argument: query",
                ))
            }
        };

        Ok(self.execute_search(&query).await)
    }

    async fn execute_search(&self, query: &str) -> ToolCallResult {
        let config = match self.resolver.resolve() {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "configuration error");
                return ToolCallResult::error(format!("Configuration error: {}", e));
            }
        };

        let secret = config.api_key.clone();
        match self.backend.invoke(query, config).await {
            Ok(invocation) => {
                tracing::info!(
                    exit_code = invocation.exit_code,
                    duration_ms = invocation.duration_ms,
                    "search finished"
                );
                let text = redact_secret(&invocation.text(), &secret);
                if invocation.succeeded() {
                    ToolCallResult::success(text)
                } else {
                    ToolCallResult::error(text)
                }
            }
            Err(e) => {
                tracing::warn!(error = %redact_secret(&e.to_string(), &secret), "search failed");
                ToolCallResult::error(redact_secret(&e.to_string(), &secret))
            }
        }
    }

    /// Line-delimited JSON-RPC over stdin/stdout.
    pub async fn run_stdio(&self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            if let Some(reply) = self.handle_payload(line.as_bytes()).await {
                let json = serde_json::to_string(&reply)?;
                stdout.write_all(json.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
        }

        Ok(())
    }
}

fn to_response<T: Serialize>(id: Option<Value>, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(
            id,
            JsonRpcError::new(INTERNAL_ERROR, format!("Internal error: {}", e)),
        ),
    }
}
