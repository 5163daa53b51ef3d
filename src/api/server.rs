//! HTTP server setup: router and graceful shutdown.
//!
//! Grounded on the reference `start_http_server` (Router + CorsLayer +
//! `axum::serve(..).with_graceful_shutdown` driven by a `watch` channel).
//! Dropped: the embedded-frontend `static_handler`/`rust_embed` fallback
//! and every CRUD route — the web UI and entity CRUD are out-of-scope
//! collaborators (§1).

use super::ws::ws_handler;
use crate::hub::SharedHub;
use crate::log_cache::LogCache;

use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

pub struct ApiState {
    pub hub: SharedHub,
    pub log_cache: Arc<LogCache>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn start_http_server(
    bind: SocketAddr,
    state: Arc<ApiState>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/ws/{room}", get(ws_handler))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, "HTTP server listening");

    let handle = tokio::spawn(async move {
        let mut shutdown = shutdown_rx;
        if let Err(error) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|v| *v).await;
            })
            .await
        {
            tracing::error!(%error, "HTTP server exited with error");
        }
    });

    Ok(handle)
}
