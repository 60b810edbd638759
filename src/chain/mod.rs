//! # chain
//!
//! Collaborator seams between the agent and the on-chain layer.
//!
//! The agent never talks to contracts itself.  It consumes two capabilities:
//!
//! * [`PositionSource`]   — list / read positions and their allocations
//! * [`StrategyExecutor`] — submit a strategy-change transaction
//!
//! Two implementations ship with the binary: [`HttpBridge`] (REST adapter in
//! front of the contracts) and [`InMemoryChain`] (`CHAIN_BRIDGE_URL=mock`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{Allocation, Position, PositionId, Strategy};

pub mod http;
pub mod memory;

pub use http::HttpBridge;
pub use memory::InMemoryChain;

// ─── Receipt ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_id:     String,
    /// `false` = submitted but not (yet) confirmed by the executor.
    pub confirmed: bool,
}

// ─── Traits ───────────────────────────────────────────────────────────────────

#[async_trait]
pub trait PositionSource: Send + Sync + 'static {
    /// Ids of positions still open for re-allocation.
    async fn list_eligible_positions(&self) -> Result<Vec<PositionId>, AppError>;

    /// Whether the last analysis of `id` is older than `max_age_secs` (or
    /// missing).  Implementations must fail closed: any error ⇒ `false`.
    async fn needs_analysis(&self, id: PositionId, max_age_secs: u64) -> bool;

    async fn fetch_position(&self, id: PositionId) -> Result<Position, AppError>;

    /// `Ok(None)` = position has no deposit allocated.
    async fn fetch_allocation(&self, id: PositionId) -> Result<Option<Allocation>, AppError>;

    /// Stamp a completed analysis so `needs_analysis` can see it.
    async fn record_analysis(&self, _id: PositionId, _at: DateTime<Utc>) -> Result<(), AppError> {
        Ok(())
    }
}

#[async_trait]
pub trait StrategyExecutor: Send + Sync + 'static {
    async fn execute_strategy_change(
        &self,
        id:       PositionId,
        strategy: Strategy,
    ) -> Result<TxReceipt, AppError>;
}
