//! # engine::policy
//!
//! **Change Policy** — hysteresis gate between a recommendation and an action
//!
//! ```text
//! [1] same strategy               → stay
//! [2] confidence < min            → stay
//! [3] recommended is safer        → act
//! [4] recommended is riskier      → act only if confidence ≥ min + margin
//! ```
//!
//! Moving to safety is cheap; moving to risk needs a confidence margin so a
//! position hovering near a threshold does not flip every tick.

use crate::models::Strategy;

/// Extra confidence required to step *up* the risk ladder.
pub const RISK_MARGIN: u8 = 10;

pub fn should_change(
    current:        Strategy,
    recommended:    Strategy,
    confidence:     u8,
    min_confidence: u8,
) -> bool {
    if current == recommended {
        return false;
    }
    if confidence < min_confidence {
        return false;
    }
    if recommended < current {
        return true;
    }
    u16::from(confidence) >= u16::from(min_confidence) + u16::from(RISK_MARGIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Strategy; 3] = [Strategy::Hold, Strategy::Conservative, Strategy::Aggressive];

    #[test]
    fn test_same_strategy_never_changes() {
        for s in ALL {
            for c in 0..=100 {
                assert!(!should_change(s, s, c, 0));
                assert!(!should_change(s, s, c, 70));
            }
        }
    }

    #[test]
    fn test_below_threshold_never_changes() {
        assert!(!should_change(Strategy::Aggressive, Strategy::Hold, 69, 70));
        assert!(!should_change(Strategy::Hold, Strategy::Aggressive, 69, 70));
    }

    #[test]
    fn test_safer_move_needs_no_margin() {
        for min in 0..=100u8 {
            for c in min..=100 {
                assert!(should_change(Strategy::Aggressive, Strategy::Conservative, c, min));
                assert!(should_change(Strategy::Conservative, Strategy::Hold, c, min));
            }
        }
        assert!(should_change(Strategy::Aggressive, Strategy::Conservative, 71, 70));
    }

    #[test]
    fn test_riskier_move_needs_margin() {
        for min in 0..=90u8 {
            assert!(!should_change(Strategy::Hold, Strategy::Conservative, min + 9, min));
            assert!(should_change(Strategy::Hold, Strategy::Conservative, min + 10, min));
        }
        assert!(!should_change(Strategy::Hold, Strategy::Aggressive, 79, 70));
        assert!(should_change(Strategy::Hold, Strategy::Aggressive, 80, 70));
    }

    #[test]
    fn test_margin_unreachable_near_ceiling() {
        // min 95 + 10 > 100: a riskier move can never be justified
        assert!(!should_change(Strategy::Conservative, Strategy::Aggressive, 100, 95));
        assert!(should_change(Strategy::Aggressive, Strategy::Conservative, 100, 95));
    }
}
