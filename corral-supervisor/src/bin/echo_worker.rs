//! Minimal agent worker.
//!
//! Implements the worker side of the supervisor protocol: `/health`,
//! `/shutdown`, `/config` and the skill endpoints. It answers every call
//! with success and records what it received under its working directory:
//!
//! - `worker.json` - startup environment
//! - `config.json` - last pushed configuration document
//! - `skills/{name}.json` - pushed skills
//! - `shutdown.json` - an authorized `/shutdown` arrived
//!
//! Test flags make it misbehave on purpose (`--exit-after`, `--exit-code`,
//! `--unhealthy`).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use clap::Parser;
use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "corral-echo-worker")]
#[command(about = "Reference worker for the corral supervisor", long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(long, env = "CORRAL_WORKER_PORT")]
    port: u16,

    /// Worker id
    #[arg(long, env = "CORRAL_WORKER_ID", default_value = "echo")]
    id: String,

    /// Expected bearer token; unset accepts anything
    #[arg(long, env = "CORRAL_WORKER_TOKEN")]
    token: Option<String>,

    /// Exit on its own after this many milliseconds
    #[arg(long)]
    exit_after: Option<u64>,

    /// Exit code used with --exit-after
    #[arg(long, default_value_t = 0)]
    exit_code: i32,

    /// Answer /health with 503
    #[arg(long)]
    unhealthy: bool,
}

struct AppState {
    token: Option<String>,
    unhealthy: bool,
    workdir: PathBuf,
    shutdown: watch::Sender<bool>,
}

fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = &state.token else {
        return true;
    };
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {expected}"))
}

async fn record(state: &AppState, relative: &str, body: &Value) -> StatusCode {
    let path = state.workdir.join(relative);
    if let Some(parent) = path.parent() {
        if tokio::fs::create_dir_all(parent).await.is_err() {
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    }
    let text = serde_json::to_string_pretty(body).unwrap_or_default();
    match tokio::fs::write(path, text).await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.unhealthy {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "degraded" })))
    } else {
        (StatusCode::OK, Json(json!({ "status": "ok" })))
    }
}

async fn shutdown(State(state): State<Arc<AppState>>, headers: HeaderMap) -> StatusCode {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED;
    }
    info!("shutdown requested");
    let status = record(&state, "shutdown.json", &json!({ "requested": true })).await;
    let _ = state.shutdown.send(true);
    status
}

async fn config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED;
    }
    record(&state, "config.json", &body).await
}

async fn update_skill(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED;
    }
    let relative = format!("skills/{name}.json");
    if !state.workdir.join(&relative).exists() {
        return StatusCode::NOT_FOUND;
    }
    record(&state, &relative, &body).await
}

async fn create_skill(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED;
    }
    let Some(name) = body.get("name").and_then(Value::as_str) else {
        return StatusCode::BAD_REQUEST;
    };
    record(&state, &format!("skills/{name}.json"), &body).await
}

async fn skills_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED;
    }
    record(&state, "skills_status.json", &body).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let workdir = std::env::current_dir()?;

    let startup = json!({
        "id": args.id,
        "port": args.port,
        "data_dir": std::env::var("CORRAL_DATA_DIR").ok(),
        "token_set": args.token.is_some(),
        "provider_keys": std::env::vars()
            .filter(|(k, _)| k.ends_with("_API_KEY"))
            .map(|(k, _)| k)
            .collect::<Vec<_>>(),
    });
    tokio::fs::write(
        workdir.join("worker.json"),
        serde_json::to_string_pretty(&startup)?,
    )
    .await?;

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let state = Arc::new(AppState {
        token: args.token.clone(),
        unhealthy: args.unhealthy,
        workdir,
        shutdown: shutdown_tx,
    });

    if let Some(ms) = args.exit_after {
        let code = args.exit_code;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            info!(code, "exiting on schedule");
            std::process::exit(code);
        });
    }

    let app = Router::new()
        .route("/health", get(health))
        .route("/shutdown", post(shutdown))
        .route("/config", post(config))
        .route("/skills", post(create_skill))
        .route("/skills/status", post(skills_status))
        .route("/skills/{name}", put(update_skill))
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(id = %args.id, addr = %addr, "echo worker listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|&v| v).await;
        })
        .await?;

    info!("echo worker stopped");
    Ok(())
}
