//! # auth — API Key Middleware
//!
//! Guards every endpoint with an `X-API-Key` header.
//!
//! ## Mode
//! - `API_KEY` unset (or empty) → **Allow All** (dev mode)
//! - `API_KEY` set → every request must send `X-API-Key: <key>`
//!
//! The key is read once into `AgentConfig`; the middleware never touches the
//! environment.
//!
//! ## Exempt
//! `/api/health`
//!
//! ## Usage
//! ```bash
//! API_KEY=super-secret-key-here cargo run
//! curl -H "X-API-Key: super-secret-key-here" -X POST http://localhost:3000/api/agent/start
//! ```
//!
//! Browsers cannot set headers on a WebSocket handshake, so `/ws/agent` also
//! accepts `?api_key=<key>`.

use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use tracing::warn;

use crate::state::SharedState;

const EXEMPT_PATHS: [&str; 1] = ["/api/health"];

pub async fn require_api_key(
    State(state): State<SharedState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    // ── Dev Mode ──────────────────────────────────────────────────────────────
    let Some(api_key) = state.config.api_key.as_deref() else {
        return next.run(request).await;
    };

    let path = request.uri().path();
    if EXEMPT_PATHS.contains(&path) {
        return next.run(request).await;
    }

    // ── Header, then query (WebSocket handshakes) ─────────────────────────────
    let from_header = request
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok());

    let from_query = request.uri().query().and_then(|q| {
        q.split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == "api_key")
            .map(|(_, v)| v)
    });

    if from_header == Some(api_key) || from_query == Some(api_key) {
        next.run(request).await
    } else {
        warn!(path, "❌ Unauthorized request — invalid or missing X-API-Key");
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "ok":    false,
                "error": "Unauthorized: invalid or missing X-API-Key header",
                "hint":  "Set X-API-Key header with your API key"
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
        Router,
    };
    use tower::ServiceExt;

    use crate::chain::InMemoryChain;
    use crate::config::AgentConfig;
    use crate::routes::router;
    use crate::state::AppState;

    fn app(api_key: Option<&str>) -> Router {
        let chain = Arc::new(InMemoryChain::demo());
        let config = AgentConfig {
            api_key: api_key.map(str::to_string),
            ..AgentConfig::default()
        };
        router(Arc::new(AppState::with_collaborators(config, chain.clone(), chain)))
    }

    async fn status_of(app: &Router, uri: &str, key: Option<&str>) -> StatusCode {
        let mut builder = Request::builder().uri(uri);
        if let Some(key) = key {
            builder = builder.header("X-API-Key", key);
        }
        app.clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_dev_mode_allows_everything() {
        let app = app(None);
        assert_eq!(status_of(&app, "/api/agent/status", None).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_key_required_when_configured() {
        let app = app(Some("secret"));
        assert_eq!(status_of(&app, "/api/agent/status", None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(&app, "/api/agent/status", Some("wrong")).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(&app, "/api/agent/status", Some("secret")).await, StatusCode::OK);
        assert_eq!(status_of(&app, "/api/agent/status?api_key=secret", None).await, StatusCode::OK);
        assert_eq!(status_of(&app, "/api/health", None).await, StatusCode::OK);
    }
}
