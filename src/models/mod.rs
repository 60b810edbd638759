//! Domain models shared across the whole agent.

pub mod decision;
pub mod position;
pub mod strategy;

pub use decision::{AnalysisResult, Decision, Recommendation};
pub use position::{Allocation, Position, PositionId, PositionStatus};
pub use strategy::Strategy;
