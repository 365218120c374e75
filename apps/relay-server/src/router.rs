use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use relay_core::ConversationId;

use crate::responses::{json_ok, problem};
use crate::{ws, AppState};

pub(crate) mod paths {
    pub const WS: &str = "/ws";
    pub const HEALTHZ: &str = "/healthz";
    pub const STATE_PENDING: &str = "/state/pending";
    pub const CONVERSATIONS: &str = "/conversations";
    pub const TRANSCRIPT: &str = "/conversations/{id}/transcript";
    pub const ADMIN_BROADCAST: &str = "/admin/broadcast";
}

pub(crate) fn build(state: AppState) -> Router {
    Router::new()
        .route(paths::WS, get(ws::upgrade))
        .route(paths::HEALTHZ, get(healthz))
        .route(paths::STATE_PENDING, get(pending))
        .route(paths::CONVERSATIONS, get(conversations))
        .route(paths::TRANSCRIPT, get(transcript))
        .route(paths::ADMIN_BROADCAST, post(admin_broadcast))
        .with_state(state)
}

async fn healthz() -> Response {
    json_ok(json!({"ok": true}))
}

async fn pending(State(state): State<AppState>) -> Response {
    json_ok(json!({
        "pending": state.registry().len(),
        "connections": state.connections().live(),
    }))
}

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

async fn conversations(State(state): State<AppState>, Query(q): Query<ListQuery>) -> Response {
    let limit = q.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    let log = state.log();
    match tokio::task::spawn_blocking(move || log.conversations(limit)).await {
        Ok(Ok(ids)) => json_ok(json!({"conversations": ids})),
        Ok(Err(err)) => {
            warn!(%err, "conversation listing failed");
            problem(StatusCode::INTERNAL_SERVER_ERROR, "Store Error", err.to_string())
        }
        Err(join) => problem(StatusCode::INTERNAL_SERVER_ERROR, "Store Error", join.to_string()),
    }
}

async fn transcript(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let log = state.log();
    let conversation = ConversationId::new(id);
    let read = tokio::task::spawn_blocking(move || log.transcript(&conversation)).await;
    match read {
        Ok(Ok(entries)) => json_ok(json!({"transcript": entries})),
        Ok(Err(err)) => {
            warn!(%err, "transcript read failed");
            problem(StatusCode::INTERNAL_SERVER_ERROR, "Store Error", err.to_string())
        }
        Err(join) => problem(StatusCode::INTERNAL_SERVER_ERROR, "Store Error", join.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct BroadcastRequest {
    stream: String,
    event: String,
    #[serde(default)]
    data: Value,
}

async fn admin_broadcast(State(state): State<AppState>, Json(req): Json<BroadcastRequest>) -> Response {
    if req.stream.trim().is_empty() || req.event.trim().is_empty() {
        return problem(
            StatusCode::BAD_REQUEST,
            "Invalid Broadcast",
            "stream and event are required",
        );
    }
    let data = if req.data.is_null() { json!({}) } else { req.data };
    let delivered = state.hub().publish_event(&req.stream, &req.event, &data);
    info!(stream = %req.stream, event = %req.event, delivered, "admin broadcast");
    json_ok(json!({"delivered": delivered}))
}
