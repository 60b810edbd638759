//! # engine::analyzer
//!
//! **Analysis Orchestrator** — one position, one pass, one unit of work
//!
//! ## Sequence (per position id)
//! ```text
//! 1. emit thought         "fetching …"
//! 2. fetch Position       ← collaborator (timeout)
//! 3. validate + lifecycle gate
//! 4. fetch Allocation     ← collaborator (timeout)
//! 5. score                → emit analysis
//! 6. Change Policy        current = allocation strategy | Hold
//! 7. should-act?
//!    a. auto-execute      → executor (timeout) → emit execution | error
//!    b. emit decision
//! 8. stamp analysis time  ← collaborator (best effort)
//! ```
//!
//! Any `AppError` raised along the way becomes an `error` event scoped to the
//! position and `analyze` returns `None`.  Nothing escapes this boundary.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::chain::{PositionSource, StrategyExecutor};
use crate::config::AgentConfig;
use crate::engine::policy::should_change;
use crate::engine::scoring::score_position;
use crate::error::AppError;
use crate::events::AgentEvent;
use crate::models::{
    Allocation, AnalysisResult, Decision, Position, PositionId, Recommendation, Strategy,
};

// ─── Preview ──────────────────────────────────────────────────────────────────

/// Dry-run output: what the agent *would* do, without events or execution.
#[derive(Debug, Clone, Serialize)]
pub struct ScorePreview {
    pub position:         Position,
    pub allocation:       Option<Allocation>,
    pub current_strategy: Strategy,
    pub recommendation:   Recommendation,
    pub should_act:       bool,
}

// ─── Analyzer ─────────────────────────────────────────────────────────────────

pub struct Analyzer {
    source:   Arc<dyn PositionSource>,
    executor: Arc<dyn StrategyExecutor>,
    events:   Broadcaster,
    config:   Arc<AgentConfig>,
}

impl Analyzer {
    pub fn new(
        source:   Arc<dyn PositionSource>,
        executor: Arc<dyn StrategyExecutor>,
        events:   Broadcaster,
        config:   Arc<AgentConfig>,
    ) -> Self {
        Self { source, executor, events, config }
    }

    pub fn source(&self) -> &Arc<dyn PositionSource> {
        &self.source
    }

    /// Run one full analysis.  Never fails: errors are published instead.
    pub async fn analyze(&self, id: PositionId) -> Option<AnalysisResult> {
        match self.try_analyze(id).await {
            Ok(result) => result,
            Err(e) => {
                warn!(position_id = id, error = %e, "Analysis failed — position skipped this tick");
                self.events.publish(AgentEvent::error(id, e.to_string()));
                None
            }
        }
    }

    async fn try_analyze(&self, id: PositionId) -> Result<Option<AnalysisResult>, AppError> {
        // ── 1. Announce ───────────────────────────────────────────────────────
        self.events.publish(AgentEvent::thought(
            id,
            format!("Fetching on-chain state for position #{id}"),
        ));

        // ── 2-3. Position + guards ────────────────────────────────────────────
        let position = self.call("fetch_position", self.source.fetch_position(id)).await?;
        position.validate()?;

        if !position.status.is_open() {
            debug!(position_id = id, status = ?position.status, "Position closed — nothing to allocate");
            self.events.publish(AgentEvent::thought(
                id,
                format!("Position #{id} is {:?}, no allocation possible", position.status),
            ));
            return Ok(None);
        }

        // ── 4. Allocation ─────────────────────────────────────────────────────
        let allocation = self.call("fetch_allocation", self.source.fetch_allocation(id)).await?;

        // ── 5. Score ──────────────────────────────────────────────────────────
        let now = Utc::now();
        let rec = score_position(&position, allocation.as_ref(), now);
        let current = allocation.as_ref().map(|a| a.strategy).unwrap_or(Strategy::Hold);
        let days_until_due = position.days_until_due(now);

        debug!(
            position_id = id,
            score       = rec.score,
            strategy    = %rec.strategy,
            confidence  = rec.confidence,
            "Position scored"
        );
        self.events.publish(
            AgentEvent::analysis(
                id,
                format!("Scored {} → {} ({}% confidence)", rec.score, rec.strategy, rec.confidence),
            )
            .with_data(&rec),
        );

        // ── 6-7. Policy → decision ────────────────────────────────────────────
        let should_act = should_change(current, rec.strategy, rec.confidence, self.config.min_confidence);

        let decision = if should_act {
            Some(self.decide(id, current, &rec).await)
        } else {
            self.events.publish(AgentEvent::thought(
                id,
                format!(
                    "Keeping {current}: {} at {}% does not clear the change policy",
                    rec.strategy, rec.confidence
                ),
            ));
            None
        };

        // ── 8. Stamp ──────────────────────────────────────────────────────────
        if let Err(e) = self.call("record_analysis", self.source.record_analysis(id, now)).await {
            warn!(position_id = id, error = %e, "Could not record analysis time");
        }

        Ok(Some(AnalysisResult {
            position,
            allocation,
            current_strategy:     current,
            recommended_strategy: rec.strategy,
            confidence:           rec.confidence,
            days_until_due,
            should_act,
            decision,
        }))
    }

    async fn decide(&self, id: PositionId, current: Strategy, rec: &Recommendation) -> Decision {
        let mut decision = Decision::new(id, current, rec, Utc::now());

        if self.config.auto_execute {
            let submitted = self
                .call(
                    "execute_strategy_change",
                    self.executor.execute_strategy_change(id, rec.strategy),
                )
                .await;

            match submitted {
                Ok(receipt) => {
                    decision.executed = receipt.confirmed;
                    decision.tx_id = Some(receipt.tx_id.clone());

                    let message = if receipt.confirmed {
                        format!("Moved {current} → {} (tx {})", rec.strategy, receipt.tx_id)
                    } else {
                        format!("Submitted {current} → {} (tx {}), awaiting confirmation", rec.strategy, receipt.tx_id)
                    };
                    info!(
                        position_id = id,
                        from        = %current,
                        to          = %rec.strategy,
                        tx_id       = %receipt.tx_id,
                        confirmed   = receipt.confirmed,
                        "⚡ Strategy change executed"
                    );
                    self.events.publish(AgentEvent::execution(id, message).with_data(&receipt));
                }
                Err(e) => {
                    warn!(position_id = id, error = %e, "Strategy change failed");
                    self.events.publish(
                        AgentEvent::error(id, format!("Strategy change to {} failed: {e}", rec.strategy))
                            .with_data(&json!({ "strategy": rec.strategy })),
                    );
                }
            }
        }

        let verb = if self.config.auto_execute { "Decided" } else { "Recommend" };
        self.events.publish(
            AgentEvent::decision(
                id,
                format!("{verb} {current} → {} ({}% confidence)", rec.strategy, rec.confidence),
            )
            .with_data(&decision),
        );

        decision
    }

    /// Fetch + score without publishing or executing anything.
    pub async fn preview(&self, id: PositionId) -> Result<ScorePreview, AppError> {
        let position = self.call("fetch_position", self.source.fetch_position(id)).await?;
        position.validate()?;
        let allocation = self.call("fetch_allocation", self.source.fetch_allocation(id)).await?;

        let recommendation = score_position(&position, allocation.as_ref(), Utc::now());
        let current_strategy = allocation.as_ref().map(|a| a.strategy).unwrap_or(Strategy::Hold);
        let should_act = position.status.is_open()
            && should_change(
                current_strategy,
                recommendation.strategy,
                recommendation.confidence,
                self.config.min_confidence,
            );

        Ok(ScorePreview { position, allocation, current_strategy, recommendation, should_act })
    }

    /// Bound a collaborator call by the configured timeout.
    async fn call<T, F>(&self, op: &'static str, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        match tokio::time::timeout(self.config.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(format!(
                "{op} did not answer within {} ms",
                self.config.call_timeout.as_millis()
            ))),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Subscription;
    use crate::chain::InMemoryChain;
    use crate::models::PositionStatus;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    fn make_config(auto_execute: bool) -> AgentConfig {
        AgentConfig {
            auto_execute,
            min_confidence: 70,
            call_timeout: Duration::from_millis(100),
            ..AgentConfig::default()
        }
    }

    fn setup(auto_execute: bool) -> (Arc<InMemoryChain>, Analyzer, Subscription) {
        let chain = Arc::new(InMemoryChain::demo());
        let events = Broadcaster::new();
        let sub = events.subscribe();
        let analyzer = Analyzer::new(
            chain.clone(),
            chain.clone(),
            events,
            Arc::new(make_config(auto_execute)),
        );
        (chain, analyzer, sub)
    }

    fn kinds(sub: &mut Subscription) -> Vec<&'static str> {
        std::iter::from_fn(|| sub.try_recv()).map(|e| e.kind()).collect()
    }

    #[tokio::test]
    async fn test_auto_execute_moves_strong_position() {
        // #1: 85 / 92 / +75d, no allocation → Aggressive 85 ≥ 70 + 10
        let (chain, analyzer, mut sub) = setup(true);
        let result = analyzer.analyze(1).await.unwrap();

        assert_eq!(result.current_strategy, Strategy::Hold);
        assert_eq!(result.recommended_strategy, Strategy::Aggressive);
        assert_eq!(result.confidence, 85);
        assert!(result.should_act);

        let decision = result.decision.unwrap();
        assert!(decision.executed);
        assert!(decision.tx_id.is_some());
        assert_eq!(chain.allocation(1).unwrap().strategy, Strategy::Aggressive);
        assert!(chain.last_analysis(1).is_some());

        assert_eq!(kinds(&mut sub), vec!["thought", "analysis", "execution", "decision"]);
    }

    #[tokio::test]
    async fn test_recommend_only_does_not_execute() {
        let (chain, analyzer, mut sub) = setup(false);
        let decision = analyzer.analyze(1).await.unwrap().decision.unwrap();

        assert!(!decision.executed);
        assert!(decision.tx_id.is_none());
        assert!(chain.allocation(1).is_none());
        assert_eq!(kinds(&mut sub), vec!["thought", "analysis", "decision"]);
    }

    #[tokio::test]
    async fn test_no_change_emits_thought() {
        // #2: Hold, 65 / 80 / +40d → 15+15+15 = 45 → Conservative 75 < 80 → stay
        let (_, analyzer, mut sub) = setup(true);
        let result = analyzer.analyze(2).await.unwrap();
        assert!(!result.should_act);
        assert!(result.decision.is_none());
        assert_eq!(kinds(&mut sub), vec!["thought", "analysis", "thought"]);
    }

    #[tokio::test]
    async fn test_fetch_failure_becomes_error_event() {
        let (chain, analyzer, mut sub) = setup(true);
        chain.fail_position(3);
        assert!(analyzer.analyze(3).await.is_none());
        assert_eq!(kinds(&mut sub), vec!["thought", "error"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_treated_as_failure() {
        let (chain, analyzer, mut sub) = setup(true);
        chain.set_latency(Duration::from_secs(5));
        assert!(analyzer.analyze(1).await.is_none());

        let events: Vec<_> = std::iter::from_fn(|| sub.try_recv()).collect();
        assert_eq!(events.last().unwrap().kind(), "error");
        assert!(events.last().unwrap().body().message.contains("did not answer"));
    }

    #[tokio::test]
    async fn test_invalid_position_skipped() {
        let (chain, analyzer, mut sub) = setup(true);
        let now = Utc::now();
        chain.insert_position(Position {
            id:                  9,
            due_date:            now + ChronoDuration::days(10),
            created_at:          now,
            owner:               "0x9".into(),
            status:              PositionStatus::Active,
            risk_score:          180,
            payment_probability: 50,
        });
        assert!(analyzer.analyze(9).await.is_none());
        assert_eq!(kinds(&mut sub), vec!["thought", "error"]);
    }

    #[tokio::test]
    async fn test_execution_failure_keeps_executed_false() {
        let (chain, analyzer, mut sub) = setup(true);
        chain.set_fail_execution(true);
        let decision = analyzer.analyze(1).await.unwrap().decision.unwrap();
        assert!(!decision.executed);
        assert_eq!(kinds(&mut sub), vec!["thought", "analysis", "error", "decision"]);
    }

    #[tokio::test]
    async fn test_unconfirmed_tx_is_not_executed() {
        let (chain, analyzer, _sub) = setup(true);
        chain.set_confirm_txs(false);
        let decision = analyzer.analyze(1).await.unwrap().decision.unwrap();
        assert!(!decision.executed);
        assert!(decision.tx_id.is_some());
    }

    #[tokio::test]
    async fn test_preview_is_silent() {
        let (chain, analyzer, mut sub) = setup(true);
        let preview = analyzer.preview(4).await.unwrap();
        // #4: 35 / 40 / −5d on Conservative → Hold 85, safer → act
        assert_eq!(preview.recommendation.strategy, Strategy::Hold);
        assert_eq!(preview.recommendation.confidence, 85);
        assert!(preview.should_act);
        assert!(kinds(&mut sub).is_empty());
        assert_eq!(chain.allocation(4).unwrap().strategy, Strategy::Conservative);
    }
}
