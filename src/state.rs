//! # state
//!
//! AppState — wires the collaborators, the analyzer, the control loop and the
//! broadcaster together and hands them to every Axum handler.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::broadcast::Broadcaster;
use crate::chain::{HttpBridge, InMemoryChain, PositionSource, StrategyExecutor};
use crate::config::AgentConfig;
use crate::engine::{Agent, Analyzer};

// ─── AppState ─────────────────────────────────────────────────────────────────

/// Top-level shared state injected into every Axum handler.
pub struct AppState {
    // ── Control Loop ──────────────────────────────────────────────────────────
    pub agent:     Arc<Agent>,

    // ── Event Stream ──────────────────────────────────────────────────────────
    /// Only way in or out of the subscriber set.
    pub events:    Broadcaster,

    // ── Config ────────────────────────────────────────────────────────────────
    /// Immutable after startup.
    pub config:    Arc<AgentConfig>,

    pub booted_at: DateTime<Utc>,
}

impl AppState {
    /// Build with explicit collaborators (tests, alternative bridges).
    pub fn with_collaborators(
        config:   AgentConfig,
        source:   Arc<dyn PositionSource>,
        executor: Arc<dyn StrategyExecutor>,
    ) -> Self {
        let config = Arc::new(config);
        let events = Broadcaster::new();
        let analyzer = Arc::new(Analyzer::new(source, executor, events.clone(), Arc::clone(&config)));
        let agent = Arc::new(Agent::new(analyzer, events.clone(), Arc::clone(&config)));

        Self {
            agent,
            events,
            config,
            booted_at: Utc::now(),
        }
    }

    /// Pick the bridge from `config.bridge_url`.
    pub fn new(config: AgentConfig) -> Self {
        if config.is_mock() {
            info!("🎭 CHAIN_BRIDGE_URL=mock — using in-memory demo chain");
            let chain = Arc::new(InMemoryChain::demo());
            return Self::with_collaborators(config, chain.clone(), chain);
        }

        // reqwest Client is shared by both capabilities (connection pooling)
        let bridge = Arc::new(HttpBridge::new(
            reqwest::Client::new(),
            config.bridge_url.clone(),
            config.call_timeout,
        ));
        info!(bridge = %config.bridge_url, "🔗 Using HTTP chain bridge");
        Self::with_collaborators(config, bridge.clone(), bridge)
    }
}

/// Convenience type alias
pub type SharedState = Arc<AppState>;

pub fn build_state(config: AgentConfig) -> SharedState {
    Arc::new(AppState::new(config))
}
