//! # routes::agent
//!
//! REST control + reporting for the decision loop
//!
//! | Method | Path                      | Description                          |
//! |--------|---------------------------|--------------------------------------|
//! | GET    | `/api/health`             | Liveness (no auth)                   |
//! | GET    | `/api/agent/status`       | Lifecycle, counters, config          |
//! | POST   | `/api/agent/start`        | Start the loop (idempotent)          |
//! | POST   | `/api/agent/stop`         | Stop the loop                        |
//! | GET    | `/api/agent/decisions`    | Last 50 decisions, oldest first      |
//! | GET    | `/api/agent/results`      | AnalysisResults of the last tick     |
//! | POST   | `/api/agent/analyze/:id`  | Queue an on-demand analysis          |
//! | GET    | `/api/agent/score/:id`    | Dry-run scoring, no side effects     |

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::{error::AppError, models::PositionId, state::SharedState};

/// GET /api/health
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "ok":        true,
        "service":   "invoice-agent",
        "booted_at": state.booted_at,
    }))
}

/// GET /api/agent/status
pub async fn get_status(State(state): State<SharedState>) -> impl IntoResponse {
    let status = state.agent.status().await;
    Json(json!({ "ok": true, "status": status }))
}

/// POST /api/agent/start
pub async fn start_agent(State(state): State<SharedState>) -> impl IntoResponse {
    let started = state.agent.start().await;
    let message = if started { "Agent started" } else { "Agent already running" };
    Json(json!({
        "ok":      true,
        "started": started,
        "message": message,
    }))
}

/// POST /api/agent/stop
pub async fn stop_agent(State(state): State<SharedState>) -> impl IntoResponse {
    let stopped = state.agent.stop().await;
    let message = if stopped { "Agent stopped" } else { "Agent was not running" };
    Json(json!({
        "ok":      true,
        "stopped": stopped,
        "message": message,
    }))
}

/// GET /api/agent/decisions
pub async fn get_decisions(State(state): State<SharedState>) -> impl IntoResponse {
    let decisions = state.agent.decisions();
    Json(json!({
        "ok":        true,
        "count":     decisions.len(),
        "decisions": decisions,
    }))
}

/// GET /api/agent/results
pub async fn get_results(State(state): State<SharedState>) -> impl IntoResponse {
    let results = state.agent.last_results();
    Json(json!({
        "ok":      true,
        "count":   results.len(),
        "results": results,
    }))
}

/// POST /api/agent/analyze/:id
pub async fn request_analysis(
    State(state): State<SharedState>,
    Path(id): Path<PositionId>,
) -> Result<impl IntoResponse, AppError> {
    state.agent.request_analysis(id).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({
        "ok":          true,
        "position_id": id,
        "message":     format!("Analysis of position #{id} queued"),
    }))))
}

/// GET /api/agent/score/:id
pub async fn score_position(
    State(state): State<SharedState>,
    Path(id): Path<PositionId>,
) -> Result<impl IntoResponse, AppError> {
    let preview = state.agent.analyzer().preview(id).await?;
    Ok(Json(json!({ "ok": true, "preview": preview })))
}
