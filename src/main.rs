//! # Invoice Agent — Autonomous Yield Strategy Loop
//!
//! ```text
//!  ┌─────────────┐  list / fetch / execute   ┌─────────────────────────────┐
//!  │ Chain Bridge│ ◀──────────────────────── │ Agent (control loop)        │
//!  │ (or mock)   │                           │ ├─ Analyzer × N slots       │
//!  └─────────────┘                           │ │   ├─ scoring  (pure)      │
//!                                            │ │   └─ policy   (pure)      │
//!                                            │ ├─ decision log (last 50)   │
//!                                            │ └─ Broadcaster ───────────┐ │
//!                                            └───────────────────────────┼─┘
//!  ┌─────────────┐  ws://host/ws/agent  ◀────────────────────────────────┘
//!  │  Dashboard  │  GET  /api/agent/status | decisions | results | score/:id
//!  └─────────────┘  POST /api/agent/start | stop | analyze/:id
//! ```
//!
//! ## Environment Variables
//!
//! | Variable                      | Default        | Description                         |
//! |-------------------------------|----------------|-------------------------------------|
//! | `BIND_ADDR`                   | `0.0.0.0:3000` | Address Axum listens on             |
//! | `CHAIN_BRIDGE_URL`            | `mock`         | Bridge base URL, `mock` = in-memory |
//! | `AGENT_TICK_INTERVAL_MS`      | `60000`        | Tick interval                       |
//! | `AGENT_MIN_CONFIDENCE`        | `70`           | Minimum confidence to act           |
//! | `AGENT_MAX_CONCURRENT`        | `3`            | Concurrent analyses                 |
//! | `AGENT_AUTO_EXECUTE`          | `false`        | Submit changes vs. recommend only   |
//! | `AGENT_MAX_ANALYSIS_AGE_SECS` | `3600`         | Staleness window                    |
//! | `AGENT_CALL_TIMEOUT_MS`       | `10000`        | Per bridge call timeout             |
//! | `AGENT_AUTOSTART`             | `true`         | Start the loop at boot              |
//! | `API_KEY`                     | *(empty)*      | Enables `X-API-Key` auth            |
//! | `RUST_LOG`                    | —              | Extra tracing directives            |

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod auth;
mod broadcast;
mod chain;
mod config;
mod engine;
mod error;
mod events;
mod models;
mod routes;
mod state;

use config::AgentConfig;
use state::build_state;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Load .env ──────────────────────────────────────────────────────────
    dotenvy::dotenv().ok();

    // ── 2. Structured logging ─────────────────────────────────────────────────
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("invoice_agent=debug".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    info!(r#"

  ╔═══════════════════════════════════════════════════════╗
  ║           INVOICE AGENT — Yield Strategy Loop         ║
  ║  Score · Policy · Schedule · Execute · Stream         ║
  ╚═══════════════════════════════════════════════════════╝"#);

    // ── 3. Config (fatal here, never later) ───────────────────────────────────
    let config = AgentConfig::from_env().context("Failed to load agent config")?;
    let autostart = config.autostart;
    let addr = config.bind_addr;

    // ── 4. Shared state ───────────────────────────────────────────────────────
    let state = build_state(config);

    if autostart {
        state.agent.start().await;
    } else {
        info!("AGENT_AUTOSTART=false — waiting for POST /api/agent/start");
    }

    // ── 5. Router ─────────────────────────────────────────────────────────────
    let app = routes::router(state.clone());

    // ── 6. Bind & Serve ───────────────────────────────────────────────────────
    info!(?addr, "🚀 Invoice agent server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    // ── 7. Drain ──────────────────────────────────────────────────────────────
    state.agent.stop().await;
    Ok(())
}
