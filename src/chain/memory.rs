//! # chain::memory
//!
//! **In-memory chain** — stands in for the bridge when
//! `CHAIN_BRIDGE_URL=mock`, and is the collaborator fake in tests.
//!
//! Supports artificial latency and failure injection, and records how many
//! `fetch_position` calls were in flight at once.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::chain::{PositionSource, StrategyExecutor, TxReceipt};
use crate::error::AppError;
use crate::models::{Allocation, Position, PositionId, PositionStatus, Strategy};

#[derive(Default)]
struct Ledger {
    positions:     HashMap<PositionId, Position>,
    allocations:   HashMap<PositionId, Allocation>,
    last_analysis: HashMap<PositionId, DateTime<Utc>>,
    failing:       HashSet<PositionId>,
    /// Ids currently inside `fetch_position`.
    fetching:      HashSet<PositionId>,
}

#[derive(Default)]
pub struct InMemoryChain {
    ledger:           Mutex<Ledger>,
    latency:          Mutex<Duration>,
    fail_listing:     AtomicBool,
    fail_execution:   AtomicBool,
    confirm_txs:      AtomicBool,
    tx_counter:       AtomicU64,
    active_fetches:   AtomicUsize,
    peak_fetches:     AtomicUsize,
    duplicate_fetch:  AtomicBool,
    fetch_calls:      AtomicUsize,
}

impl InMemoryChain {
    pub fn new() -> Self {
        let chain = Self::default();
        chain.confirm_txs.store(true, Ordering::Relaxed);
        chain
    }

    /// A handful of invoices spanning every scoring band.
    pub fn demo() -> Self {
        let chain = Self::new();
        let now = Utc::now();
        let seed: [(PositionId, u8, u8, i64, Option<Strategy>); 5] = [
            (1, 85, 92,  75, None),
            (2, 65, 80,  40, Some(Strategy::Hold)),
            (3, 45, 60,  20, Some(Strategy::Aggressive)),
            (4, 35, 40,  -5, Some(Strategy::Conservative)),
            (5, 90, 95, 120, Some(Strategy::Conservative)),
        ];

        for (id, risk, pay, due_days, strategy) in seed {
            chain.insert_position(Position {
                id,
                due_date:            now + chrono::Duration::days(due_days),
                created_at:          now - chrono::Duration::days(14),
                owner:               format!("0x{id:040x}"),
                status:              if strategy.is_some() { PositionStatus::InYield } else { PositionStatus::Active },
                risk_score:          risk,
                payment_probability: pay,
            });
            if let Some(strategy) = strategy {
                chain.set_allocation(id, Allocation {
                    strategy,
                    allocated_at:  now - chrono::Duration::days(10),
                    principal:     25_000 * 10u128.pow(18),
                    accrued_yield: 0,
                    active:        true,
                });
            }
        }
        chain
    }

    pub fn insert_position(&self, position: Position) {
        self.ledger().positions.insert(position.id, position);
    }

    pub fn set_allocation(&self, id: PositionId, allocation: Allocation) {
        self.ledger().allocations.insert(id, allocation);
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn current_latency(&self) -> Duration {
        *self.latency.lock().unwrap_or_else(|p| p.into_inner())
    }
}

// ─── Fault Injection / Inspection ─────────────────────────────────────────────

#[cfg(test)]
impl InMemoryChain {
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(|p| p.into_inner()) = latency;
    }

    pub fn fail_position(&self, id: PositionId) {
        self.ledger().failing.insert(id);
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_execution(&self, fail: bool) {
        self.fail_execution.store(fail, Ordering::Relaxed);
    }

    /// `false` = executions return unconfirmed receipts.
    pub fn set_confirm_txs(&self, confirm: bool) {
        self.confirm_txs.store(confirm, Ordering::Relaxed);
    }

    pub fn allocation(&self, id: PositionId) -> Option<Allocation> {
        self.ledger().allocations.get(&id).cloned()
    }

    pub fn last_analysis(&self, id: PositionId) -> Option<DateTime<Utc>> {
        self.ledger().last_analysis.get(&id).copied()
    }

    /// Highest number of concurrent `fetch_position` calls observed.
    pub fn peak_fetches(&self) -> usize {
        self.peak_fetches.load(Ordering::SeqCst)
    }

    /// `true` if the same id was ever fetched twice at the same time.
    pub fn saw_duplicate_fetch(&self) -> bool {
        self.duplicate_fetch.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight gauge even when the fetch future is cancelled.
struct FetchGuard<'a> {
    chain: &'a InMemoryChain,
    id:    PositionId,
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        self.chain.active_fetches.fetch_sub(1, Ordering::SeqCst);
        self.chain.ledger().fetching.remove(&self.id);
    }
}

#[async_trait]
impl PositionSource for InMemoryChain {
    async fn list_eligible_positions(&self) -> Result<Vec<PositionId>, AppError> {
        if self.fail_listing.load(Ordering::Relaxed) {
            return Err(AppError::Collaborator("listing unavailable".into()));
        }
        let mut ids: Vec<PositionId> = self
            .ledger()
            .positions
            .values()
            .filter(|p| p.status.is_open())
            .map(|p| p.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn needs_analysis(&self, id: PositionId, max_age_secs: u64) -> bool {
        let ledger = self.ledger();
        let open = ledger.positions.get(&id).map(|p| p.status.is_open()).unwrap_or(false);
        let last = ledger.last_analysis.get(&id).copied();
        drop(ledger);

        match (open, last) {
            (false, _)       => false,
            (true, None)     => true,
            (true, Some(at)) => (Utc::now() - at).num_seconds() >= max_age_secs as i64,
        }
    }

    async fn fetch_position(&self, id: PositionId) -> Result<Position, AppError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active_fetches.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_fetches.fetch_max(now_active, Ordering::SeqCst);
        let first = self.ledger().fetching.insert(id);
        if !first {
            self.duplicate_fetch.store(true, Ordering::SeqCst);
        }
        let _guard = FetchGuard { chain: self, id };

        let latency = self.current_latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let result = {
            let ledger = self.ledger();
            if ledger.failing.contains(&id) {
                Err(AppError::Collaborator(format!("rpc error reading position #{id}")))
            } else {
                ledger
                    .positions
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| AppError::NotFound(format!("position #{id}")))
            }
        };
        result
    }

    async fn fetch_allocation(&self, id: PositionId) -> Result<Option<Allocation>, AppError> {
        Ok(self.ledger().allocations.get(&id).cloned())
    }

    async fn record_analysis(&self, id: PositionId, at: DateTime<Utc>) -> Result<(), AppError> {
        self.ledger().last_analysis.insert(id, at);
        Ok(())
    }
}

#[async_trait]
impl StrategyExecutor for InMemoryChain {
    async fn execute_strategy_change(
        &self,
        id:       PositionId,
        strategy: Strategy,
    ) -> Result<TxReceipt, AppError> {
        if self.fail_execution.load(Ordering::Relaxed) {
            return Err(AppError::Collaborator("transaction reverted".into()));
        }

        let n = self.tx_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let tx_id = format!("0x{n:064x}");
        let confirmed = self.confirm_txs.load(Ordering::Relaxed);

        if confirmed {
            let mut ledger = self.ledger();
            let now = Utc::now();
            let principal = ledger.allocations.get(&id).map(|a| a.principal).unwrap_or_default();
            ledger.allocations.insert(id, Allocation {
                strategy,
                allocated_at:  now,
                principal,
                accrued_yield: 0,
                active:        strategy != Strategy::Hold,
            });
            if let Some(p) = ledger.positions.get_mut(&id) {
                p.status = PositionStatus::InYield;
            }
        }

        info!(position_id = id, strategy = %strategy, tx_id = %tx_id, "🎭 [MOCK CHAIN] Strategy change applied");
        Ok(TxReceipt { tx_id, confirmed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_demo_lists_open_positions() {
        let chain = InMemoryChain::demo();
        assert_eq!(chain.list_eligible_positions().await.unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_needs_analysis_respects_staleness() {
        let chain = InMemoryChain::demo();
        assert!(chain.needs_analysis(1, 3_600).await);
        chain.record_analysis(1, Utc::now()).await.unwrap();
        assert!(!chain.needs_analysis(1, 3_600).await);
        assert!(chain.needs_analysis(1, 0).await);
        // unknown id fails closed
        assert!(!chain.needs_analysis(99, 0).await);
    }

    #[tokio::test]
    async fn test_execution_updates_allocation() {
        let chain = InMemoryChain::demo();
        let receipt = chain.execute_strategy_change(1, Strategy::Aggressive).await.unwrap();
        assert!(receipt.confirmed);
        assert_eq!(chain.allocation(1).unwrap().strategy, Strategy::Aggressive);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let chain = InMemoryChain::demo();
        chain.fail_position(2);
        chain.set_fail_listing(true);
        assert!(chain.fetch_position(2).await.is_err());
        assert!(chain.list_eligible_positions().await.is_err());
        assert!(matches!(chain.fetch_position(42).await, Err(AppError::NotFound(_))));
    }
}
