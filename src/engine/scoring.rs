//! # engine::scoring
//!
//! **Scoring Engine** — pure mapping Position → Recommendation
//!
//! ## Additive score
//!
//! ```text
//! score = 0
//!     │
//!     ├─ [1] Risk score            ≥80 +30 │ ≥60 +15 │ ≥40 +5  │ else −10
//!     ├─ [2] Payment probability   ≥90 +25 │ ≥75 +15 │ ≥50 +5  │ else −15
//!     ├─ [3] Days until due        ≥60 +20 │ ≥30 +15 │ ≥14 +5  │ ≥0 −5 │ overdue −30
//!     └─ [4] Current allocation    Hold & score>50 +10 │ Aggressive & score<30 −10
//!                                  Hold > 7 days → advisory factor only
//!
//! score ≥ 60 → Aggressive    confidence = min(95, 70 + (score − 60))
//! score ≥ 30 → Conservative  confidence = min(90, 60 + (score − 30))
//! else       → Hold          confidence = min(85, 50 + |score|)
//! ```
//!
//! Lower bounds are inclusive everywhere.  No I/O, no clock reads: `now` is
//! passed in so the same inputs always give the same output.

use chrono::{DateTime, Utc};

use crate::models::{Allocation, Position, Recommendation, Strategy};

/// How many factors make it into the rationale text.
const RATIONALE_FACTORS: usize = 3;

/// Days in Hold before the advisory factor is added.
const IDLE_ADVISORY_DAYS: i64 = 7;

// ─── Contributions ────────────────────────────────────────────────────────────

pub fn risk_contribution(risk_score: u8) -> i32 {
    match risk_score {
        80.. => 30,
        60.. => 15,
        40.. => 5,
        _    => -10,
    }
}

pub fn payment_contribution(payment_probability: u8) -> i32 {
    match payment_probability {
        90.. => 25,
        75.. => 15,
        50.. => 5,
        _    => -15,
    }
}

pub fn due_contribution(days_until_due: i64) -> i32 {
    match days_until_due {
        60.. => 20,
        30.. => 15,
        14.. => 5,
        0..  => -5,
        _    => -30,
    }
}

/// Threshold the final score into a strategy and a clamped confidence.
pub fn select_strategy(score: i32) -> (Strategy, u8) {
    let (strategy, confidence) = if score >= 60 {
        (Strategy::Aggressive, (70 + (score - 60)).min(95))
    } else if score >= 30 {
        (Strategy::Conservative, (60 + (score - 30)).min(90))
    } else {
        (Strategy::Hold, (50 + score.abs()).min(85))
    };
    (strategy, confidence.clamp(0, 100) as u8)
}

// ─── Score ────────────────────────────────────────────────────────────────────

pub fn score_position(
    position:   &Position,
    allocation: Option<&Allocation>,
    now:        DateTime<Utc>,
) -> Recommendation {
    let mut score = 0;
    let mut factors = Vec::with_capacity(4);

    // ── 1. Risk score ─────────────────────────────────────────────────────────
    let risk = position.risk_score;
    score += risk_contribution(risk);
    factors.push(match risk {
        80.. => format!("Strong credit profile (risk score {risk}/100)"),
        60.. => format!("Moderate credit profile (risk score {risk}/100)"),
        40.. => format!("Elevated credit risk (risk score {risk}/100)"),
        _    => format!("High credit risk (risk score {risk}/100)"),
    });

    // ── 2. Payment probability ────────────────────────────────────────────────
    let pay = position.payment_probability;
    score += payment_contribution(pay);
    factors.push(match pay {
        90.. => format!("Very likely to be paid ({pay}% payment probability)"),
        75.. => format!("Likely to be paid ({pay}% payment probability)"),
        50.. => format!("Uncertain repayment ({pay}% payment probability)"),
        _    => format!("Repayment doubtful ({pay}% payment probability)"),
    });

    // ── 3. Time to maturity ───────────────────────────────────────────────────
    let days = position.days_until_due(now);
    score += due_contribution(days);
    factors.push(match days {
        60.. => format!("Long runway: {days} days until due"),
        30.. => format!("Comfortable runway: {days} days until due"),
        14.. => format!("Short runway: {days} days until due"),
        0..  => format!("Due imminently: {days} days until due"),
        _    => format!("Overdue by {} days", -days),
    });

    // ── 4. Current allocation ─────────────────────────────────────────────────
    if let Some(alloc) = allocation {
        match alloc.strategy {
            Strategy::Hold if score > 50 => {
                score += 10;
                factors.push("Idle capital with strong fundamentals, favor activating yield".into());
            }
            Strategy::Aggressive if score < 30 => {
                score -= 10;
                factors.push("Aggressive allocation on weakening fundamentals, de-risk".into());
            }
            _ => {}
        }

        let idle_days = alloc.days_in_strategy(now);
        if alloc.strategy == Strategy::Hold && idle_days > IDLE_ADVISORY_DAYS {
            factors.push(format!("Held idle for {idle_days} days, consider activating yield"));
        }
    }

    let (strategy, confidence) = select_strategy(score);

    Recommendation {
        strategy,
        confidence,
        rationale: build_rationale(strategy, &factors),
        factors,
        score,
    }
}

fn build_rationale(strategy: Strategy, factors: &[String]) -> String {
    let mut parts: Vec<String> = factors
        .iter()
        .take(RATIONALE_FACTORS)
        .cloned()
        .collect();

    parts.push(match strategy {
        Strategy::Aggressive => format!(
            "Recommend {strategy} allocation targeting {}",
            strategy.yield_band()
        ),
        Strategy::Conservative => format!(
            "Recommend {strategy} allocation targeting {} with limited exposure",
            strategy.yield_band()
        ),
        Strategy::Hold => format!(
            "Recommend {strategy} ({}) until the risk profile improves",
            strategy.yield_band()
        ),
    });

    parts.join(". ") + "."
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PositionStatus;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn make_position(risk: u8, pay: u8, due_in_days: i64) -> Position {
        Position {
            id:                  1,
            due_date:            now() + Duration::days(due_in_days),
            created_at:          now() - Duration::days(10),
            owner:               "0xowner".into(),
            status:              PositionStatus::Active,
            risk_score:          risk,
            payment_probability: pay,
        }
    }

    fn make_allocation(strategy: Strategy, days_ago: i64) -> Allocation {
        Allocation {
            strategy,
            allocated_at:  now() - Duration::days(days_ago),
            principal:     1_000_000,
            accrued_yield: 0,
            active:        true,
        }
    }

    #[test]
    fn test_risk_contribution_is_monotonic_step() {
        let mut prev = i32::MIN;
        for r in 0..=100u8 {
            let c = risk_contribution(r);
            assert!(c >= prev, "contribution dropped at r={r}");
            prev = c;
        }
        assert_eq!(risk_contribution(39), -10);
        assert_eq!(risk_contribution(40), 5);
        assert_eq!(risk_contribution(59), 5);
        assert_eq!(risk_contribution(60), 15);
        assert_eq!(risk_contribution(79), 15);
        assert_eq!(risk_contribution(80), 30);
    }

    #[test]
    fn test_payment_and_due_breakpoints() {
        assert_eq!(payment_contribution(49), -15);
        assert_eq!(payment_contribution(50), 5);
        assert_eq!(payment_contribution(75), 15);
        assert_eq!(payment_contribution(90), 25);
        assert_eq!(due_contribution(-1), -30);
        assert_eq!(due_contribution(0), -5);
        assert_eq!(due_contribution(14), 5);
        assert_eq!(due_contribution(30), 15);
        assert_eq!(due_contribution(60), 20);
    }

    #[test]
    fn test_strong_position_goes_aggressive() {
        let rec = score_position(&make_position(85, 92, 75), None, now());
        assert_eq!(rec.score, 75);
        assert_eq!(rec.strategy, Strategy::Aggressive);
        assert_eq!(rec.confidence, 85);
    }

    #[test]
    fn test_overdue_weak_position_holds() {
        let rec = score_position(&make_position(35, 40, -5), None, now());
        assert_eq!(rec.score, -55);
        assert_eq!(rec.strategy, Strategy::Hold);
        assert_eq!(rec.confidence, 85);
        assert!(rec.factors[2].contains("Overdue by 5 days"));
    }

    #[test]
    fn test_confidence_clamps() {
        assert_eq!(select_strategy(100), (Strategy::Aggressive, 95));
        assert_eq!(select_strategy(60), (Strategy::Aggressive, 70));
        assert_eq!(select_strategy(59), (Strategy::Conservative, 89));
        assert_eq!(select_strategy(30), (Strategy::Conservative, 60));
        assert_eq!(select_strategy(29), (Strategy::Hold, 79));
        assert_eq!(select_strategy(-80), (Strategy::Hold, 85));
    }

    #[test]
    fn test_hold_allocation_gets_activation_boost() {
        // 15 + 25 + 20 = 60 > 50 → +10
        let alloc = make_allocation(Strategy::Hold, 2);
        let rec = score_position(&make_position(65, 95, 70), Some(&alloc), now());
        assert_eq!(rec.score, 70);
        assert_eq!(rec.strategy, Strategy::Aggressive);
        assert_eq!(rec.factors.len(), 4);
    }

    #[test]
    fn test_aggressive_allocation_derisks() {
        // 5 + 5 + 15 = 25 < 30 → −10
        let alloc = make_allocation(Strategy::Aggressive, 2);
        let rec = score_position(&make_position(45, 55, 40), Some(&alloc), now());
        assert_eq!(rec.score, 15);
        assert_eq!(rec.strategy, Strategy::Hold);
    }

    #[test]
    fn test_idle_advisory_does_not_change_score() {
        let fresh = make_allocation(Strategy::Hold, 3);
        let stale = make_allocation(Strategy::Hold, 12);
        let p = make_position(45, 55, 40);
        let a = score_position(&p, Some(&fresh), now());
        let b = score_position(&p, Some(&stale), now());
        assert_eq!(a.score, b.score);
        assert_eq!(b.factors.len(), a.factors.len() + 1);
        assert!(b.factors.last().unwrap().contains("12 days"));
    }

    #[test]
    fn test_rationale_uses_top_three_and_yield_band() {
        let alloc = make_allocation(Strategy::Hold, 20);
        let rec = score_position(&make_position(85, 92, 75), Some(&alloc), now());
        assert_eq!(rec.factors.len(), 5);
        assert!(rec.rationale.starts_with(&rec.factors[0]));
        assert!(rec.rationale.contains(&rec.factors[2]));
        assert!(!rec.rationale.contains(&rec.factors[3]));
        assert!(rec.rationale.contains("8-12% APY"));
    }

    #[test]
    fn test_deterministic() {
        let p = make_position(70, 80, 33);
        assert_eq!(score_position(&p, None, now()), score_position(&p, None, now()));
    }
}
