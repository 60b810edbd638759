//! Decision engine: pure scoring and policy, plus the async orchestration
//! that wraps them.

pub mod analyzer;
pub mod policy;
pub mod scheduler;
pub mod scoring;

pub use analyzer::Analyzer;
pub use scheduler::Agent;
