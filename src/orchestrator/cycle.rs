//! Cycle outcomes and orchestrator events

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Terminal outcome of one cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CycleResult {
    /// Uploaded; `attempts` counts compression transcodes
    #[serde(rename_all = "camelCase")]
    Delivered { size_bytes: u64, attempts: u32 },

    CaptureFailed { reason: String },

    /// No encode fit the budget, the input was unusable, or the channel
    /// refused the size
    #[serde(rename_all = "camelCase")]
    CompressionInfeasible { best_size: Option<u64>, attempts: u32 },

    DeliveryFailed { reason: String, retries: u32 },
}

impl CycleResult {
    pub fn is_delivered(&self) -> bool {
        matches!(self, CycleResult::Delivered { .. })
    }
}

impl fmt::Display for CycleResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleResult::Delivered {
                size_bytes,
                attempts,
            } => write!(
                f,
                "delivered {:.2} MB after {} compression attempts",
                mb(*size_bytes),
                attempts
            ),
            CycleResult::CaptureFailed { reason } => write!(f, "capture failed: {}", reason),
            CycleResult::CompressionInfeasible {
                best_size: Some(size),
                attempts,
            } => write!(
                f,
                "compression infeasible, best {:.2} MB after {} attempts",
                mb(*size),
                attempts
            ),
            CycleResult::CompressionInfeasible {
                best_size: None, ..
            } => write!(f, "compression infeasible, no usable output"),
            CycleResult::DeliveryFailed { reason, retries } => {
                write!(f, "delivery failed after {} retries: {}", retries, reason)
            }
        }
    }
}

fn mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// A finished cycle as reported to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    /// 1-based cycle counter for this process
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub result: CycleResult,
}

/// Events emitted by the orchestrator
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    CycleStarted { cycle: u64, started_at: DateTime<Utc> },
    CycleCompleted(CycleReport),
    /// Needs a human, e.g. a rejected bot credential
    OperatorAlert(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let delivered = CycleResult::Delivered {
            size_bytes: 8 * 1024 * 1024,
            attempts: 2,
        };
        assert_eq!(
            delivered.to_string(),
            "delivered 8.00 MB after 2 compression attempts"
        );
        assert!(delivered.is_delivered());

        let failed = CycleResult::CaptureFailed {
            reason: "unreachable".to_string(),
        };
        assert_eq!(failed.to_string(), "capture failed: unreachable");
        assert!(!failed.is_delivered());
    }

    #[test]
    fn test_serializes_with_kind_tag() {
        let json = serde_json::to_value(CycleResult::CompressionInfeasible {
            best_size: Some(42),
            attempts: 5,
        })
        .unwrap();
        assert_eq!(json["kind"], "compressionInfeasible");
        assert_eq!(json["bestSize"], 42);
        assert_eq!(json["attempts"], 5);
    }
}
