use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured reason for a budget rejection. These are expected flow, not
/// failures: callers branch on them instead of bailing out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum RejectReason {
    DailyCapReached { used: u32, cap: u32 },
    Paused { pause_reason: String },
    ShuttingDown,
    Vetoed { template_id: String, score_milli: i64 },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::DailyCapReached { used, cap } => {
                write!(f, "daily cap reached: {}/{}", used, cap)
            }
            RejectReason::Paused { pause_reason } => write!(f, "paused: {}", pause_reason),
            RejectReason::ShuttingDown => write!(f, "shutdown"),
            RejectReason::Vetoed { template_id, .. } => {
                write!(f, "vetoed by template {}", template_id)
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum FeedbackError {
    /// Malformed candidate or decision (e.g. bracket ordering violated).
    /// The single decision is rejected; it never reaches the simulator.
    #[error("validation error: {0}")]
    Validation(String),

    /// Non-monotonic or empty bar data. Aborts that trade only.
    #[error("simulation error: {0}")]
    Simulation(String),

    /// Daily cap reached, paused, or shutting down. Non-fatal.
    #[error("budget rejected: {0}")]
    BudgetRejected(RejectReason),

    /// External decision call failed or timed out. Surfaced as a failed
    /// request state; budget counters are untouched beyond the one attempt.
    #[error("oracle error: {0}")]
    Oracle(String),

    #[error("store error: {0}")]
    Store(String),
}
