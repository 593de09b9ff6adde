use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FeedbackError;
use crate::types::{Candidate, Decision, Direction};

/// Feature snapshot handed to the decision oracle, plus the constraints the
/// caller imposes on the answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleSnapshot {
    pub candidate: Candidate,
    pub allowed_directions: Vec<Direction>,
}

impl OracleSnapshot {
    pub fn new(candidate: Candidate) -> Self {
        let allowed_directions = vec![candidate.direction];
        Self {
            candidate,
            allowed_directions,
        }
    }
}

/// The external decision oracle. Treated as a black box: the budgeter
/// meters and serializes calls to it but does not define its retry or
/// backoff policy.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn decide(&self, snapshot: &OracleSnapshot) -> Result<Decision, FeedbackError>;
}
