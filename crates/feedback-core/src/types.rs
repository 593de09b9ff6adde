use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FeedbackError;

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1.0 for long, -1.0 for short. Used to fold both directions into
    /// one arithmetic path when computing brackets and P&L.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }
}

/// How a simulated trade ended. Exactly one per trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    Breakeven,
    TrailingStop,
    Timeout,
    Manual,
}

impl ExitReason {
    /// Stop-type exits fill as market orders and pay exit slippage.
    pub fn is_market_exit(&self) -> bool {
        !matches!(self, ExitReason::TakeProfit)
    }
}

/// Outcome category for the learning fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeOutcome {
    Win,
    Loss,
    Breakeven,
    Timeout,
}

/// Pattern promotion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternStatus {
    Active,
    Gold,
    Frozen,
}

/// Lifecycle of a budgeted oracle request. Terminal states
/// (Completed/Failed/Rejected) are never mutated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Rejected,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Failed | RequestStatus::Rejected
        )
    }
}

/// A proposed setup awaiting an oracle decision. Read-only after
/// construction; discarded once the decision is made.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub symbol: String,
    pub setup_type: String,
    pub session: String,
    pub direction: Direction,
    /// Upstream prefilter score, 0-100.
    pub prefilter_score: f64,

    // Binned-feature inputs
    pub atr_5m: f64,
    pub volume_multiple: f64,
    pub vwap_distance: f64,
    /// Wick vs body ratio of the recent bars.
    pub wickiness: f64,
    /// Categorical: bullish_aligned / bearish_aligned / mixed.
    pub ema_alignment: String,

    pub confluence_factors: Vec<String>,
    /// Derived by the upstream filter; never mutated after creation.
    pub risk_factors: Vec<String>,
    /// trending / ranging / volatile / mixed.
    pub market_regime: String,
}

impl Candidate {
    /// Validate invariants that must hold before the candidate enters the
    /// decision pipeline.
    pub fn validate(&self) -> Result<(), FeedbackError> {
        if !(0.0..=100.0).contains(&self.prefilter_score) {
            return Err(FeedbackError::Validation(format!(
                "prefilter_score {} outside [0,100]",
                self.prefilter_score
            )));
        }
        if self.atr_5m < 0.0 || self.volume_multiple < 0.0 || self.wickiness < 0.0 {
            return Err(FeedbackError::Validation(
                "negative candidate feature".to_string(),
            ));
        }
        if self.setup_type.is_empty() || self.session.is_empty() {
            return Err(FeedbackError::Validation(
                "candidate missing setup_type or session".to_string(),
            ));
        }
        Ok(())
    }
}

/// Oracle output for one accepted candidate. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub direction: Direction,
    pub entry: f64,
    pub sl: f64,
    pub tp: f64,
    /// 0-100.
    pub confidence: u8,
    pub reasoning: String,
    pub policy_id: String,
}

impl Decision {
    /// Enforce bracket ordering: long requires sl < entry < tp, short
    /// requires tp < entry < sl.
    pub fn validate(&self) -> Result<(), FeedbackError> {
        if self.confidence > 100 {
            return Err(FeedbackError::Validation(format!(
                "confidence {} outside [0,100]",
                self.confidence
            )));
        }
        let ordered = match self.direction {
            Direction::Long => self.sl < self.entry && self.entry < self.tp,
            Direction::Short => self.tp < self.entry && self.entry < self.sl,
        };
        if !ordered {
            return Err(FeedbackError::Validation(format!(
                "bracket ordering violated for {}: sl={} entry={} tp={}",
                self.direction.as_str(),
                self.sl,
                self.entry,
                self.tp
            )));
        }
        Ok(())
    }
}

/// A single OHLC bar fed to the simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Bar {
    pub fn validate(&self) -> Result<(), FeedbackError> {
        let body_hi = self.open.max(self.close);
        let body_lo = self.open.min(self.close);
        if !(self.high.is_finite() && self.low.is_finite() && self.open.is_finite() && self.close.is_finite()) {
            return Err(FeedbackError::Simulation("non-finite OHLC value".to_string()));
        }
        if self.high < self.low || self.high < body_hi || self.low > body_lo {
            return Err(FeedbackError::Simulation(format!(
                "non-monotonic bar at {}: o={} h={} l={} c={}",
                self.timestamp, self.open, self.high, self.low, self.close
            )));
        }
        Ok(())
    }
}

/// Complete outcome of simulating one decision. Immutable; fed exactly once
/// into the feedback fan-out.
///
/// Notes:
///   - `net_pnl_dollars` is net of commission
///   - `net_pnl_points` is net of commission converted to points
///   - `slippage_points` is total entry+exit slippage in points
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeResult {
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub direction: Direction,
    pub exit_reason: ExitReason,
    pub gross_pnl_points: f64,
    pub net_pnl_points: f64,
    pub net_pnl_dollars: f64,
    /// Maximum adverse excursion, >= 0.
    pub mae: f64,
    /// Maximum favorable excursion, >= 0.
    pub mfe: f64,
    pub time_to_target_secs: Option<i64>,
    pub time_to_breakeven_secs: Option<i64>,
    pub slippage_points: f64,
    pub commission_paid: f64,
}

impl TradeResult {
    /// Classify the outcome with a small buffer around zero so that
    /// commission-only losses count as breakeven rather than loss.
    pub fn outcome(&self) -> TradeOutcome {
        if self.exit_reason == ExitReason::Timeout {
            TradeOutcome::Timeout
        } else if self.gross_pnl_points > 0.1 {
            TradeOutcome::Win
        } else if self.gross_pnl_points < -0.1 {
            TradeOutcome::Loss
        } else {
            TradeOutcome::Breakeven
        }
    }
}

/// The record fanned out to the calibrator, pattern memory, and veto engine
/// after a trade completes. Assembled by the coordinator from the candidate,
/// the oracle decision, and the simulated result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: String,
    pub timestamp: DateTime<Utc>,

    // Outcome
    pub outcome: TradeOutcome,
    /// Gross points. The learning components apply their own friction model.
    pub pnl_points: f64,
    /// Net dollars after commission.
    pub pnl_dollars: f64,

    // Setup
    pub prefilter_score: f64,
    pub oracle_confidence: u8,
    pub setup_type: String,
    pub session: String,

    // Execution
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub direction: Direction,
    pub exit_reason: ExitReason,

    // Performance
    pub time_to_target_secs: Option<i64>,
    pub time_to_breakeven_secs: Option<i64>,
    pub mae: f64,
    pub mfe: f64,

    // Market context at entry
    pub volume_multiple: f64,
    pub atr_5m: f64,
    pub ema_alignment: String,
    pub vwap_distance: f64,

    // Quality
    pub wickiness: f64,
    pub slippage_points: f64,
    pub commission_paid: f64,

    // Learning features
    pub confluence_factors: Vec<String>,
    pub risk_factors: Vec<String>,
    pub market_regime: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn decision(direction: Direction, entry: f64, sl: f64, tp: f64) -> Decision {
        Decision {
            direction,
            entry,
            sl,
            tp,
            confidence: 90,
            reasoning: "test".to_string(),
            policy_id: "p1".to_string(),
        }
    }

    #[test]
    fn long_bracket_ordering_enforced() {
        assert!(decision(Direction::Long, 5000.0, 4999.0, 5001.0).validate().is_ok());
        assert!(decision(Direction::Long, 5000.0, 5001.0, 5002.0).validate().is_err());
        assert!(decision(Direction::Long, 5000.0, 4999.0, 4999.5).validate().is_err());
    }

    #[test]
    fn short_bracket_ordering_enforced() {
        assert!(decision(Direction::Short, 5000.0, 5001.25, 4999.0).validate().is_ok());
        assert!(decision(Direction::Short, 5000.0, 4999.0, 5001.0).validate().is_err());
    }

    #[test]
    fn bar_validation_rejects_broken_ohlc() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 20, 14, 30, 0).unwrap();
        let good = Bar { timestamp: ts, open: 100.0, high: 101.0, low: 99.5, close: 100.5, volume: 10.0 };
        assert!(good.validate().is_ok());

        // High below the body
        let bad = Bar { timestamp: ts, open: 100.0, high: 99.9, low: 99.5, close: 100.5, volume: 10.0 };
        assert!(bad.validate().is_err());

        // Inverted high/low
        let inverted = Bar { timestamp: ts, open: 100.0, high: 99.0, low: 101.0, close: 100.0, volume: 10.0 };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn outcome_classification_buffers_breakeven() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 20, 14, 30, 0).unwrap();
        let mut result = TradeResult {
            entry_price: 5000.25,
            exit_price: 5000.3,
            entry_time: ts,
            exit_time: ts,
            direction: Direction::Long,
            exit_reason: ExitReason::Breakeven,
            gross_pnl_points: 0.05,
            net_pnl_points: -0.07,
            net_pnl_dollars: -0.37,
            mae: 0.5,
            mfe: 0.6,
            time_to_target_secs: None,
            time_to_breakeven_secs: Some(60),
            slippage_points: 0.25,
            commission_paid: 0.62,
        };
        assert_eq!(result.outcome(), TradeOutcome::Breakeven);

        result.gross_pnl_points = 1.0;
        assert_eq!(result.outcome(), TradeOutcome::Win);

        result.gross_pnl_points = -1.25;
        assert_eq!(result.outcome(), TradeOutcome::Loss);

        result.exit_reason = ExitReason::Timeout;
        assert_eq!(result.outcome(), TradeOutcome::Timeout);
    }
}
