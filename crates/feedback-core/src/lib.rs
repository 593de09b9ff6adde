//! Feedback Core
//!
//! Shared data model for the scalp feedback loop: candidates, oracle
//! decisions, simulated trade results, configuration, and the traits that
//! decouple the loop from the decision oracle and the persistence backend.

pub mod config;
pub mod error;
pub mod oracle;
pub mod stats;
pub mod store;
pub mod types;

pub use config::{
    BudgetConfig, CalibratorConfig, FeatureBins, FeedbackConfig, MarketConfig, PatternConfig,
    RiskConfig, VetoConfig,
};
pub use error::{FeedbackError, RejectReason};
pub use oracle::{DecisionOracle, OracleSnapshot};
pub use store::{MemoryStore, StateStore};
pub use types::{
    Bar, Candidate, Decision, Direction, ExitReason, PatternStatus, RequestStatus, TradeOutcome,
    TradeRecord, TradeResult,
};
