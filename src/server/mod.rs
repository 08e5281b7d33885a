//! HTTP server for the inference orchestration service
//!
//! This module provides the main HTTP server with:
//! - Chat completion and extended inference endpoints at /api/llm/v1
//! - Lateral stream reads over SSE
//! - Conversation and stream state management (deletes)

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use axum::{response::IntoResponse, routing::get, Json, Router};
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

pub mod routes;
pub mod state;

use state::ServerState;

/// Create the main application router
pub fn create_app(state: ServerState) -> Router {
    let timeout_duration = Duration::from_secs(state.config.server.request_timeout_secs);

    Router::new()
        // Health check endpoint
        .route("/", get(health_check))
        .route("/health", get(health_check))
        // Inference API routes
        .nest("/api/llm/v1", routes::llm::create_router())
        // Middleware (order matters: timeout before state)
        .layer(TimeoutLayer::new(timeout_duration))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "inferd",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Start the HTTP server
pub async fn start_server(addr: SocketAddr, state: ServerState) -> Result<()> {
    let app = create_app(state);

    info!("Starting inferd server on {}", addr);
    info!("Inference API available at http://{}/api/llm/v1", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
