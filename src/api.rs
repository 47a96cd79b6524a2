//! HTTP handlers, a thin wrapper over the engine and the store.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::chain::ChainStats;
use crate::engine::Engine;
use crate::error::ParrotError;
use crate::store::{MessageStore, NewMessage, StoredMessage};
use crate::ConversationId;

/// Longest continuation a caller may request.
const MAX_GENERATION_LEN: usize = 200;
const DEFAULT_GENERATION_LEN: usize = 20;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub store: Arc<dyn MessageStore>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/load-all", post(load_all))
        .route(
            "/conversations/{id}/messages",
            post(post_message),
        )
        .route("/conversations/{id}/generate", post(generate))
        .route("/conversations/{id}/load", post(load))
        .route("/conversations/{id}/stats", get(stats))
        .route("/conversations/{id}", delete(clear))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let conversations = state
        .store
        .list_conversation_ids()
        .await
        .map(|ids| ids.len())
        .unwrap_or(0);

    Json(serde_json::json!({
        "name": "parrot",
        "version": env!("CARGO_PKG_VERSION"),
        "models": state.engine.cached_models(),
        "conversations": conversations,
    }))
}

#[derive(Debug, Deserialize)]
struct MessageInput {
    user_id: i64,
    text: String,
}

/// Train the model, then persist the raw message. The in-memory update
/// happens first and survives a failed store write.
async fn post_message(
    State(state): State<AppState>,
    Path(id): Path<ConversationId>,
    Json(input): Json<MessageInput>,
) -> Result<(StatusCode, Json<StoredMessage>), ParrotError> {
    state.engine.train(id, &input.text);
    let stored = state
        .store
        .append(NewMessage {
            conversation_id: id,
            user_id: input.user_id,
            text: input.text,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

#[derive(Debug, Default, Deserialize)]
struct GenerateRequest {
    #[serde(default)]
    prefix: String,
    max_length: Option<usize>,
}

#[derive(Debug, Serialize)]
struct GenerateResponse {
    text: String,
}

async fn generate(
    State(state): State<AppState>,
    Path(id): Path<ConversationId>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ParrotError> {
    let max_len = req
        .max_length
        .unwrap_or(DEFAULT_GENERATION_LEN)
        .clamp(1, MAX_GENERATION_LEN);
    let text = state.engine.generate(id, &req.prefix, max_len)?;
    Ok(Json(GenerateResponse { text }))
}

async fn load(
    State(state): State<AppState>,
    Path(id): Path<ConversationId>,
) -> Result<Json<ChainStats>, ParrotError> {
    state.engine.load(id).await?;
    Ok(Json(state.engine.stats(id)))
}

async fn load_all(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ParrotError> {
    let cancel = CancellationToken::new();
    let loaded = state.engine.load_all(&cancel).await?;
    Ok(Json(serde_json::json!({ "loaded": loaded })))
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    chain: ChainStats,
    message_count: usize,
}

async fn stats(
    State(state): State<AppState>,
    Path(id): Path<ConversationId>,
) -> Result<Json<StatsResponse>, ParrotError> {
    let message_count = state.store.count_by_conversation(id).await?;
    Ok(Json(StatsResponse {
        chain: state.engine.stats(id),
        message_count,
    }))
}

/// Wipe the stored history, then drop the in-memory model.
async fn clear(
    State(state): State<AppState>,
    Path(id): Path<ConversationId>,
) -> Result<Json<serde_json::Value>, ParrotError> {
    let deleted = state.store.delete_by_conversation(id).await?;
    state.engine.clear(id);
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}
