//! Cycle orchestration
//!
//! - Orchestrator: the periodic loop and single-cycle driver
//! - Cycle results, reports and broadcast events
//! - Delivery retry policy

pub mod cycle;
pub mod retry;
pub mod runner;


pub use cycle::{CycleReport, CycleResult, OrchestratorEvent};
pub use retry::RetryPolicy;
pub use runner::Orchestrator;
