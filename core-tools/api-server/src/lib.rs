//! API Server
//!
//! HTTP transport for the Sage turn pipeline.
//!
//! # Endpoints
//!
//! - POST /chat - Run one chat turn
//! - POST /clear-history - Empty a session's history
//! - GET /health - Liveness, session count and available tools

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use sage_engine::agent::AgentCore;
use sage_engine::memory::SessionStore;
use sdk::{ChatRequest, ClearHistoryRequest, ClearHistoryResponse};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// State shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<AgentCore>,
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    pub fn new(agent: AgentCore, sessions: SessionStore) -> Self {
        Self {
            agent: Arc::new(agent),
            sessions: Arc::new(sessions),
        }
    }
}

/// Build the HTTP router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/clear-history", post(clear_history_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Periodically tear down sessions idle for longer than `ttl`
pub fn spawn_session_sweeper(
    sessions: Arc<SessionStore>,
    ttl: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ttl.min(Duration::from_secs(60)));
        loop {
            ticker.tick().await;
            sessions.evict_idle(ttl).await;
        }
    })
}

/// Chat turn endpoint
async fn chat_handler(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    if request.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "message must not be empty"})),
        )
            .into_response();
    }

    let result = state.agent.process_turn(&state.sessions, &request).await;
    tracing::debug!(
        "Turn for session '{}' ended in {:?}",
        request.session_id,
        result.state
    );

    Json(result.to_response()).into_response()
}

/// Clear-history endpoint; idempotent
async fn clear_history_handler(
    State(state): State<AppState>,
    Json(request): Json<ClearHistoryRequest>,
) -> Json<ClearHistoryResponse> {
    let removed = state.sessions.clear(&request.session_id).await;
    tracing::info!(
        "Cleared {} turn(s) from session '{}'",
        removed,
        request.session_id
    );
    Json(ClearHistoryResponse::cleared(request.session_id))
}

/// Health endpoint
async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let tools: Vec<&str> = state
        .agent
        .available_tools()
        .iter()
        .map(|tool| tool.as_str())
        .collect();

    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.sessions.session_count().await,
        "tools": tools,
    }))
}
