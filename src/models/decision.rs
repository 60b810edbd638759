//! # models::decision
//!
//! Output types of one analysis pass.
//!
//! `Recommendation` = what the Scoring Engine thinks (pure, never persisted)
//! `AnalysisResult` = everything one worker learned about one position
//! `Decision`       = a recommendation the Change Policy accepted

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Allocation, Position, PositionId, Strategy};

// ─── Recommendation ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub strategy:   Strategy,
    /// 0 … 100
    pub confidence: u8,
    pub rationale:  String,
    /// Contributing factors in scoring order.
    pub factors:    Vec<String>,
    /// Raw additive score the strategy was thresholded from.
    pub score:      i32,
}

// ─── AnalysisResult ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub position:             Position,
    pub allocation:           Option<Allocation>,
    pub current_strategy:     Strategy,
    pub recommended_strategy: Strategy,
    pub confidence:           u8,
    pub days_until_due:       i64,
    pub should_act:           bool,
    /// Present only when `should_act` was true.
    pub decision:             Option<Decision>,
}

// ─── Decision ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub decision_id:          Uuid,
    pub position_id:          PositionId,
    pub previous_strategy:    Strategy,
    pub recommended_strategy: Strategy,
    pub rationale:            String,
    pub confidence:           u8,
    pub decided_at:           DateTime<Utc>,
    /// true only when the executor accepted *and* confirmed the change.
    pub executed:             bool,
    /// Transaction hash once submitted (confirmed or not).
    pub tx_id:                Option<String>,
}

impl Decision {
    pub fn new(
        position_id: PositionId,
        previous:    Strategy,
        rec:         &Recommendation,
        decided_at:  DateTime<Utc>,
    ) -> Self {
        Self {
            decision_id:          Uuid::new_v4(),
            position_id,
            previous_strategy:    previous,
            recommended_strategy: rec.strategy,
            rationale:            rec.rationale.clone(),
            confidence:           rec.confidence,
            decided_at,
            executed:             false,
            tx_id:                None,
        }
    }
}
