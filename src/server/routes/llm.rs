//! Inference API endpoints
//!
//! Chat completions (single-shot), the extended inference endpoint, the
//! lateral stream SSE reader, state deletion and model listing.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Json, Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use futures::StreamExt;
use serde::Deserialize;
use tracing::info;

use crate::api::infer::{InferenceRequest, InferenceResponse};
use crate::api::openai_compat::{
    ChatCompletionRequest, ChatCompletionResponse, ListModelsResponse, StandardResponse,
};
use crate::error::Result;
use crate::lateral::LateralStreamBridge;
use crate::server::state::ServerState;

pub fn create_router() -> Router<ServerState> {
    Router::new()
        .route("/chat/completions", post(chat_completions))
        .route("/infer", post(run_inference))
        .route(
            "/infer/streams/:ctx_id/:key",
            get(read_lateral_stream).delete(delete_stream),
        )
        .route("/infer/streams/:ctx_id", delete(delete_streams_for_context))
        .route("/infer/conversations/:ctx_id/:key", delete(delete_conversation))
        .route(
            "/infer/conversations/:ctx_id",
            delete(delete_conversations_for_context),
        )
        .route("/infer/contexts/:ctx_id", delete(delete_context))
        .route("/models/list", get(list_models))
}

/// Single-shot chat completion, no history, no lateral streaming
async fn chat_completions(
    State(state): State<ServerState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Json<ChatCompletionResponse>> {
    info!(model = %request.model, "Chat completion request");
    let response = state.orchestrator.chat_completion(request).await?;
    Ok(Json(response))
}

/// Extended inference: conversation history, prefix/suffix injection and
/// lateral streaming
async fn run_inference(
    State(state): State<ServerState>,
    Json(request): Json<InferenceRequest>,
) -> Result<Json<InferenceResponse>> {
    info!(
        model = %request.model,
        ctx_id = %request.context.id,
        ctx_key = %request.context.key,
        "Inference request"
    );
    let response = state.orchestrator.infer(request).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    /// Poll interval in milliseconds
    interval: Option<u64>,
}

/// Follow an in-flight generation over SSE. One event per poll cycle carrying
/// the cumulative response text; the stream ends after the done snapshot.
/// Disconnecting cancels the poller.
async fn read_lateral_stream(
    State(state): State<ServerState>,
    Path((ctx_id, key)): Path<(String, String)>,
    Query(query): Query<StreamQuery>,
) -> impl IntoResponse {
    let interval = query
        .interval
        .map(Duration::from_millis)
        .unwrap_or_else(|| state.config.inference.lateral_poll_interval());

    let event_id = LateralStreamBridge::storage_key(&ctx_id, &key);
    let snapshots = state.orchestrator.lateral().subscribe(&ctx_id, &key, interval);

    let stream = snapshots.map(move |item| match item {
        Ok(snapshot) => Ok::<_, Infallible>(
            Event::default().id(event_id.clone()).data(snapshot.response),
        ),
        Err(e) => Ok(Event::default().data(format!("{{\"error\": \"{e}\"}}"))),
    });

    Sse::new(stream).keep_alive(KeepAlive::new())
}

async fn delete_stream(
    State(state): State<ServerState>,
    Path((ctx_id, key)): Path<(String, String)>,
) -> Result<Json<StandardResponse>> {
    state.orchestrator.lateral().delete_one(&ctx_id, &key).await?;
    Ok(Json(StandardResponse::new(format!(
        "Deleted stream {ctx_id}/{key}"
    ))))
}

async fn delete_streams_for_context(
    State(state): State<ServerState>,
    Path(ctx_id): Path<String>,
) -> Result<Json<StandardResponse>> {
    let deleted = state.orchestrator.lateral().delete_all_for_context(&ctx_id).await?;
    Ok(Json(StandardResponse::new(format!(
        "Deleted {deleted} streams for context {ctx_id}"
    ))))
}

async fn delete_conversation(
    State(state): State<ServerState>,
    Path((ctx_id, key)): Path<(String, String)>,
) -> Result<Json<StandardResponse>> {
    state.orchestrator.conversations().delete_one(&ctx_id, &key).await?;
    Ok(Json(StandardResponse::new(format!(
        "Deleted conversation {ctx_id}/{key}"
    ))))
}

async fn delete_conversations_for_context(
    State(state): State<ServerState>,
    Path(ctx_id): Path<String>,
) -> Result<Json<StandardResponse>> {
    let deleted = state
        .orchestrator
        .conversations()
        .delete_all_for_context(&ctx_id)
        .await?;
    Ok(Json(StandardResponse::new(format!(
        "Deleted {deleted} conversations for context {ctx_id}"
    ))))
}

/// Drop all state stored under a context: conversations and lateral streams
async fn delete_context(
    State(state): State<ServerState>,
    Path(ctx_id): Path<String>,
) -> Result<Json<StandardResponse>> {
    let conversations = state
        .orchestrator
        .conversations()
        .delete_all_for_context(&ctx_id)
        .await?;
    let streams = state.orchestrator.lateral().delete_all_for_context(&ctx_id).await?;
    Ok(Json(StandardResponse::new(format!(
        "Deleted context {ctx_id}: {conversations} conversations, {streams} streams"
    ))))
}

/// Proxy the backend's model catalog unchanged
async fn list_models(State(state): State<ServerState>) -> Result<Json<ListModelsResponse>> {
    let models = state.orchestrator.backend().list_models().await?;
    Ok(Json(models))
}
