//! # models::strategy
//!
//! Defines [`Strategy`] — the ordered yield tier a deposit can be allocated to.
//!
//! The derive order of the variants *is* the risk ordering:
//! `Hold < Conservative < Aggressive`.  The Change Policy compares strategies
//! with plain `<` / `>` so never reorder them.

use serde::{Deserialize, Serialize};

// ─── Strategy ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    /// Funds sit idle in the vault — no yield, no protocol exposure.
    Hold,
    /// Low-volatility lending markets.
    Conservative,
    /// Higher-yield, higher-risk liquidity strategies.
    Aggressive,
}

impl Strategy {
    /// Human-readable label used in rationale text and logs.
    pub fn label(self) -> &'static str {
        match self {
            Strategy::Hold         => "Hold",
            Strategy::Conservative => "Conservative",
            Strategy::Aggressive   => "Aggressive",
        }
    }

    /// Indicative APY band quoted in the rationale closing statement.
    pub fn yield_band(self) -> &'static str {
        match self {
            Strategy::Hold         => "0% APY",
            Strategy::Conservative => "3-5% APY",
            Strategy::Aggressive   => "8-12% APY",
        }
    }

    /// On-chain enum index used by the bridge (`0 = Hold` …).
    pub fn index(self) -> u8 {
        match self {
            Strategy::Hold         => 0,
            Strategy::Conservative => 1,
            Strategy::Aggressive   => 2,
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_ordering() {
        assert!(Strategy::Hold < Strategy::Conservative);
        assert!(Strategy::Conservative < Strategy::Aggressive);
        assert_eq!(Strategy::Aggressive.index(), 2);
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_string(&Strategy::Conservative).unwrap();
        assert_eq!(json, r#""CONSERVATIVE""#);
    }
}
