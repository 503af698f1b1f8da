//! HTTP transport for the tool gateway.
//!
//! `POST /mcp/{server_id}` carries one JSON-RPC request per body.
//! `OPTIONS` on the same path answers CORS preflights and `GET /health`
//! reports liveness.

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tracing::info;

use super::ToolGateway;
use crate::error::{CorralError, Result};

/// Build the gateway router
pub fn router(gateway: ToolGateway) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/mcp/{server_id}", post(rpc_handler).options(preflight_handler))
        .with_state(gateway)
}

/// Bind `listen_addr` and serve until `shutdown` flips to `true`.
pub async fn serve(
    listen_addr: &str,
    gateway: ToolGateway,
    shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<()> {
    let addr: SocketAddr = listen_addr.parse().map_err(|e| {
        CorralError::Configuration(format!("invalid listen address {listen_addr:?}: {e}"))
    })?;

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        CorralError::Configuration(format!("failed to bind {addr}: {e}"))
    })?;

    serve_listener(listener, gateway, shutdown).await
}

/// Serve on an already bound listener
pub async fn serve_listener(
    listener: TcpListener,
    gateway: ToolGateway,
    shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "starting tool gateway");
    }

    let mut shutdown = shutdown;
    axum::serve(listener, router(gateway))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|&v| v).await;
        })
        .await
        .map_err(|e| CorralError::Other(format!("gateway server error: {e}")))
}

fn with_cors(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("content-type, authorization"),
    );
    response
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "version": crate::VERSION }))
}

async fn rpc_handler(
    State(gateway): State<ToolGateway>,
    Path(server_id): Path<String>,
    body: Bytes,
) -> Response {
    let response = gateway.handle(&server_id, &body).await;
    with_cors((StatusCode::OK, Json(response)).into_response())
}

async fn preflight_handler() -> Response {
    with_cors(StatusCode::NO_CONTENT.into_response())
}
