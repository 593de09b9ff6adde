use std::collections::VecDeque;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use feedback_core::{CalibratorConfig, FeedbackError, TradeOutcome, TradeRecord};

const EVENT_CAP: usize = 50;

/// One floor adjustment, kept for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationEvent {
    pub timestamp: DateTime<Utc>,
    pub old_floor: u8,
    pub new_floor: u8,
    pub trigger: String,
    pub trailing_win_rate: Option<f64>,
    /// Lifetime trades observed when the event fired.
    pub trade_count: u64,
}

/// Win rates over the trailing windows callers care about, in percent.
#[derive(Debug, Clone, Serialize)]
pub struct WinRateStats {
    pub trailing_5: Option<f64>,
    pub trailing_10: Option<f64>,
    pub trailing_20: Option<f64>,
    pub overall: Option<f64>,
    pub lifetime_trades: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CalibratorStatus {
    pub floor: u8,
    pub base_floor: u8,
    pub trades_recorded: usize,
    pub trades_until_adjustable: usize,
    pub trailing_20_win_rate: Option<f64>,
    pub last_event: Option<CalibrationEvent>,
}

/// Win rate by oracle confidence bucket, for inspecting whether higher
/// stated confidence actually wins more.
#[derive(Debug, Clone, Serialize)]
pub struct ConfidenceBucket {
    pub label: String,
    pub trades: usize,
    pub wins: usize,
    pub win_rate: Option<f64>,
}

#[derive(Debug, Clone)]
struct TradeSample {
    won: bool,
    confidence: u8,
}

/// Adaptive confidence floor driven by the trailing win rate.
///
/// Single-threaded by construction; the owner wraps it in a lock.
pub struct ConfidenceCalibrator {
    config: CalibratorConfig,
    floor: u8,
    history: VecDeque<TradeSample>,
    events: VecDeque<CalibrationEvent>,
    last_reset: NaiveDate,
    lifetime_trades: u64,
    lifetime_wins: u64,
}

impl ConfidenceCalibrator {
    pub fn new(config: CalibratorConfig) -> Self {
        let floor = config.confidence_min;
        Self {
            config,
            floor,
            history: VecDeque::new(),
            events: VecDeque::new(),
            last_reset: Utc::now().date_naive(),
            lifetime_trades: 0,
            lifetime_wins: 0,
        }
    }

    /// The current minimum confidence a decision must meet.
    pub fn floor(&self) -> u8 {
        self.floor
    }

    /// Restore the base floor on a UTC day change. Trade history is kept;
    /// only the floor snaps back.
    pub fn roll_day_if_needed(&mut self, today: NaiveDate) {
        if today != self.last_reset {
            self.last_reset = today;
            if self.floor != self.config.confidence_min {
                let old = self.floor;
                self.floor = self.config.confidence_min;
                self.push_event(old, "daily_reset", None);
            }
        }
    }

    /// Fold one completed trade into the history and re-evaluate the floor.
    /// Returns the adjustment event when the floor moved.
    pub fn record_trade(&mut self, record: &TradeRecord) -> Option<CalibrationEvent> {
        self.roll_day_if_needed(Utc::now().date_naive());

        let won = record.outcome == TradeOutcome::Win;
        self.history.push_back(TradeSample {
            won,
            confidence: record.oracle_confidence,
        });
        while self.history.len() > self.config.history_len {
            self.history.pop_front();
        }
        self.lifetime_trades += 1;
        if won {
            self.lifetime_wins += 1;
        }

        self.evaluate()
    }

    /// Operator override. Bounded to the same hard range as the automatic
    /// adjustments.
    pub fn force_floor(&mut self, value: u8, reason: &str) -> Result<(), FeedbackError> {
        if value < self.config.floor_min || value > self.config.floor_max {
            return Err(FeedbackError::Validation(format!(
                "floor {} outside [{}, {}]",
                value, self.config.floor_min, self.config.floor_max
            )));
        }
        let old = self.floor;
        self.floor = value;
        self.push_event(old, &format!("manual_override: {}", reason), None);
        Ok(())
    }

    pub fn win_rate_stats(&self) -> WinRateStats {
        WinRateStats {
            trailing_5: self.trailing_win_rate(5),
            trailing_10: self.trailing_win_rate(10),
            trailing_20: self.trailing_win_rate(20),
            overall: if self.lifetime_trades > 0 {
                Some(100.0 * self.lifetime_wins as f64 / self.lifetime_trades as f64)
            } else {
                None
            },
            lifetime_trades: self.lifetime_trades,
        }
    }

    pub fn status(&self) -> CalibratorStatus {
        CalibratorStatus {
            floor: self.floor,
            base_floor: self.config.confidence_min,
            trades_recorded: self.history.len(),
            trades_until_adjustable: self.config.min_trades.saturating_sub(self.history.len()),
            trailing_20_win_rate: self.trailing_win_rate(20),
            last_event: self.events.back().cloned(),
        }
    }

    pub fn events(&self) -> impl Iterator<Item = &CalibrationEvent> {
        self.events.iter()
    }

    /// Win rate per stated-confidence bucket over the retained history.
    pub fn performance_by_confidence(&self) -> Vec<ConfidenceBucket> {
        let edges: [(u8, u8, &str); 5] = [
            (0, 80, "<80"),
            (80, 85, "80-84"),
            (85, 90, "85-89"),
            (90, 95, "90-94"),
            (95, 101, "95-100"),
        ];
        edges
            .iter()
            .map(|(lo, hi, label)| {
                let mut trades = 0usize;
                let mut wins = 0usize;
                for sample in &self.history {
                    if sample.confidence >= *lo && sample.confidence < *hi {
                        trades += 1;
                        if sample.won {
                            wins += 1;
                        }
                    }
                }
                ConfidenceBucket {
                    label: label.to_string(),
                    trades,
                    wins,
                    win_rate: if trades > 0 {
                        Some(100.0 * wins as f64 / trades as f64)
                    } else {
                        None
                    },
                }
            })
            .collect()
    }

    fn trailing_win_rate(&self, window: usize) -> Option<f64> {
        if self.history.len() < window {
            return None;
        }
        let wins = self
            .history
            .iter()
            .rev()
            .take(window)
            .filter(|s| s.won)
            .count();
        Some(100.0 * wins as f64 / window as f64)
    }

    /// Step the floor when the trailing window says performance moved.
    /// Requires a full minimum history so early noise cannot whip the floor
    /// around.
    fn evaluate(&mut self) -> Option<CalibrationEvent> {
        if self.history.len() < self.config.min_trades {
            return None;
        }
        let win_rate = self.trailing_win_rate(self.config.min_trades)?;

        let old = self.floor;
        if win_rate < self.config.low_win_rate_threshold {
            self.floor = (self.floor + self.config.adjustment_step).min(self.config.floor_max);
        } else if win_rate >= self.config.high_win_rate_threshold {
            self.floor = self
                .floor
                .saturating_sub(self.config.adjustment_step)
                .max(self.config.floor_min);
        }

        if self.floor != old {
            info!(
                old_floor = old,
                new_floor = self.floor,
                win_rate,
                "confidence floor adjusted"
            );
            self.push_event(old, "trailing_win_rate", Some(win_rate));
            return self.events.back().cloned();
        }
        None
    }

    fn push_event(&mut self, old_floor: u8, trigger: &str, trailing_win_rate: Option<f64>) {
        self.events.push_back(CalibrationEvent {
            timestamp: Utc::now(),
            old_floor,
            new_floor: self.floor,
            trigger: trigger.to_string(),
            trailing_win_rate,
            trade_count: self.lifetime_trades,
        });
        while self.events.len() > EVENT_CAP {
            self.events.pop_front();
        }
    }
}
