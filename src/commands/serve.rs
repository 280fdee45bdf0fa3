use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::core::backend::{BackendCommand, SubprocessBackend};
use crate::core::config::ConfigResolver;
use crate::mcp::McpServer;

pub struct ServeOptions {
    pub host: String,
    pub port: u16,
    pub stdio: bool,
    pub resolver: ConfigResolver,
    pub backend: BackendCommand,
}

pub struct AppState {
    server: McpServer,
    started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(server: McpServer) -> Self {
        Self {
            server,
            started_at: Utc::now(),
        }
    }
}

pub async fn run(options: ServeOptions) -> Result<()> {
    match options.backend.resolve_program() {
        Some(path) => tracing::info!(backend = %path.display(), "search backend resolved"),
        None => tracing::warn!(
            backend = %options.backend.display(),
            "search backend not found; tools/call will fail until it is installed"
        ),
    }

    match options.resolver.resolve() {
        Ok(config) => tracing::info!(
            base_url = %config.base_url,
            model = %config.model,
            timeout_seconds = config.timeout_seconds,
            "configuration loaded"
        ),
        Err(e) => tracing::warn!(error = %e, "configuration incomplete; tools/call will report it"),
    }

    let backend = Arc::new(SubprocessBackend::new(options.backend));
    let server = McpServer::new(options.resolver, backend);

    if options.stdio {
        tracing::info!("serving MCP over stdio");
        return server.run_stdio().await;
    }

    let app = router(Arc::new(AppState::new(server)));
    let addr = format!("{}:{}", options.host, options.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Serving MCP on http://{}/mcp", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health).post(rpc_entry))
        .route("/mcp", post(rpc_entry))
        .route("/mcp/", post(rpc_entry))
        .with_state(state)
}

async fn rpc_entry(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match state.server.handle_payload(&body).await {
        Some(reply) => Json(reply).into_response(),
        // Only notifications: nothing to answer.
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "server": state.server.server_info(),
        "startedAt": state.started_at.to_rfc3339(),
    }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{ConfigOverrides, EnvSnapshot};

    fn state() -> Arc<AppState> {
        let resolver = ConfigResolver::new(
            "/nonexistent/grok-search-mcp/config.json",
            EnvSnapshot::default(),
            ConfigOverrides::default(),
        );
        let backend = Arc::new(SubprocessBackend::new(BackendCommand::new("true")));
        Arc::new(AppState::new(McpServer::new(resolver, backend)))
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_rpc_entry_returns_json() {
        let response = rpc_entry(
            State(state()),
            Bytes::from_static(br#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["result"]["tools"][0]["name"], "grok_search");
    }

    #[tokio::test]
    async fn test_rpc_entry_parse_error_is_still_ok() {
        let response = rpc_entry(State(state()), Bytes::from_static(b"not json")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn test_rpc_entry_notification_is_accepted() {
        let response = rpc_entry(
            State(state()),
            Bytes::from_static(br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_config_error_surfaces_as_tool_result() {
        let response = rpc_entry(
            State(state()),
            Bytes::from_static(
                br#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":"grok_search","arguments":{"query":"q"}}}"#,
            ),
        )
        .await;

        let body = body_json(response).await;
        assert!(body.get("error").is_none());
        assert_eq!(body["result"]["isError"], true);
    }

    #[tokio::test]
    async fn test_health() {
        let Json(body) = health(State(state())).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["server"]["name"], "grok-search-mcp");
        assert!(body["startedAt"].as_str().is_some());
    }

    #[test]
    fn test_router_builds() {
        let _ = router(state());
    }
}
