//! HTTP + WebSocket surface.

pub mod agent;
pub mod stream;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::require_api_key;
use crate::state::SharedState;

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Liveness ──────────────────────────────────────────────────────────
        .route("/api/health",              get(agent::health_check))
        // ── Event Stream ──────────────────────────────────────────────────────
        .route("/ws/agent",                get(stream::ws_agent))
        // ── Control Loop ──────────────────────────────────────────────────────
        .route("/api/agent/status",        get(agent::get_status))
        .route("/api/agent/start",         post(agent::start_agent))
        .route("/api/agent/stop",          post(agent::stop_agent))
        .route("/api/agent/decisions",     get(agent::get_decisions))
        .route("/api/agent/results",       get(agent::get_results))
        .route("/api/agent/analyze/:id",   post(agent::request_analysis))
        .route("/api/agent/score/:id",     get(agent::score_position))
        // ── Middleware ────────────────────────────────────────────────────────
        .layer(axum::middleware::from_fn_with_state(state.clone(), require_api_key))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
