//! # models::position
//!
//! Read-only snapshots produced by the chain bridge on every fetch.
//!
//! ## Why two structs?
//! `Position`   = the tokenized invoice itself (due date, risk, lifecycle)
//! `Allocation` = the yield strategy currently applied to its deposit, if any

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::Strategy;

/// On-chain token id of an invoice.
pub type PositionId = u64;

// ─── PositionStatus ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Active,
    InYield,
    Paid,
    Defaulted,
    Cancelled,
}

impl PositionStatus {
    /// `true` for states where the deposit can still be re-allocated.
    pub fn is_open(self) -> bool {
        matches!(self, PositionStatus::Active | PositionStatus::InYield)
    }
}

// ─── Position ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id:                  PositionId,
    pub due_date:            DateTime<Utc>,
    pub created_at:          DateTime<Utc>,
    /// Owner address (hex string, opaque to the agent).
    pub owner:               String,
    pub status:              PositionStatus,
    /// 0 = very risky … 100 = very safe.
    pub risk_score:          u8,
    /// 0 … 100, probability the debtor pays on time.
    pub payment_probability: u8,
}

impl Position {
    /// Reject snapshots with attributes outside their documented range.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.risk_score > 100 {
            return Err(AppError::InvalidPosition(format!(
                "position #{} risk_score {} outside 0..=100",
                self.id, self.risk_score
            )));
        }
        if self.payment_probability > 100 {
            return Err(AppError::InvalidPosition(format!(
                "position #{} payment_probability {} outside 0..=100",
                self.id, self.payment_probability
            )));
        }
        Ok(())
    }

    /// Whole days until due, floored (negative = overdue).
    pub fn days_until_due(&self, now: DateTime<Utc>) -> i64 {
        (self.due_date - now).num_seconds().div_euclid(86_400)
    }
}

// ─── Allocation ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub strategy:       Strategy,
    pub allocated_at:   DateTime<Utc>,
    /// Token base units — string on the wire, 18-decimal amounts overflow f64.
    #[serde(with = "amount")]
    pub principal:      u128,
    #[serde(with = "amount")]
    pub accrued_yield:  u128,
    pub active:         bool,
}

impl Allocation {
    /// Whole days spent in the current strategy.
    pub fn days_in_strategy(&self, now: DateTime<Utc>) -> i64 {
        (now - self.allocated_at).num_seconds().div_euclid(86_400)
    }
}

/// Serialize `u128` as a decimal string; accept either a string or a number.
mod amount {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(value)
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u128, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Text(s)   => s.parse().map_err(de::Error::custom),
            Raw::Number(n) => Ok(n as u128),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn make_position(risk: u8, pay: u8) -> Position {
        let now = Utc::now();
        Position {
            id:                  7,
            due_date:            now + Duration::days(30),
            created_at:          now,
            owner:               "0xabc".into(),
            status:              PositionStatus::Active,
            risk_score:          risk,
            payment_probability: pay,
        }
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        assert!(make_position(50, 50).validate().is_ok());
        assert!(matches!(make_position(101, 50).validate(), Err(AppError::InvalidPosition(_))));
        assert!(matches!(make_position(50, 250).validate(), Err(AppError::InvalidPosition(_))));
    }

    #[test]
    fn test_days_until_due_floors_negative() {
        let now = Utc::now();
        let mut p = make_position(50, 50);
        p.due_date = now - Duration::hours(1);
        assert_eq!(p.days_until_due(now), -1);
        p.due_date = now + Duration::hours(47);
        assert_eq!(p.days_until_due(now), 1);
    }

    #[test]
    fn test_amount_accepts_string_and_number() {
        let json = r#"{
            "strategy": "HOLD",
            "allocated_at": "2026-01-01T00:00:00Z",
            "principal": "1000000000000000000000000",
            "accrued_yield": 42,
            "active": true
        }"#;
        let alloc: Allocation = serde_json::from_str(json).unwrap();
        assert_eq!(alloc.principal, 1_000_000_000_000_000_000_000_000);
        assert_eq!(alloc.accrued_yield, 42);

        let back = serde_json::to_value(&alloc).unwrap();
        assert_eq!(back["principal"], "1000000000000000000000000");
    }
}
