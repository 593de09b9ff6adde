use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use confidence_calibrator::{CalibratorStatus, ConfidenceCalibrator};
use decision_budgeter::{BudgetUsage, DecisionBudgeter, DecisionRequest};
use feedback_core::{
    Bar, Candidate, Decision, DecisionOracle, FeedbackConfig, FeedbackError, RejectReason,
    StateStore, TradeOutcome, TradeRecord,
};
use hard_negatives::{TemplateOutcome, VetoCheck, VetoEngine, VetoExport, VetoSummary};
use pattern_memory::{MemorySummary, PatternExport, PatternMemory};
use trade_simulator::TradeSimulator;

const RECORD_CAP: usize = 500;
const SIGNAL_CAP: usize = 200;

/// Result of the pre-oracle screen: the veto verdict plus the confidence
/// gate a decision will have to clear.
#[derive(Debug, Clone, Serialize)]
pub struct PreCheck {
    pub veto: VetoCheck,
    pub floor: u8,
    pub pattern_adjustment: i8,
}

impl PreCheck {
    /// Whether a decision at the given confidence clears the gate once the
    /// pattern adjustment is applied.
    pub fn passes(&self, confidence: u8) -> bool {
        let adjusted = confidence as i16 + self.pattern_adjustment as i16;
        adjusted >= self.floor as i16
    }
}

/// Notable condition flagged on a completed trade, for downstream review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    HighConfidenceLoss,
    PoorExecution,
    TimeoutPattern,
    ChoppyConditions,
}

#[derive(Debug, Clone, Serialize)]
pub struct LearningSignal {
    pub trade_id: String,
    pub kind: SignalKind,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSummary {
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: Option<f64>,
    pub total_pnl_points: f64,
    pub avg_mae: f64,
    pub avg_mfe: f64,
    pub budget: BudgetUsage,
    pub calibrator: CalibratorStatus,
    pub patterns: MemorySummary,
    pub vetoes: VetoSummary,
}

/// Owns every component of the loop and the order they see a trade in.
pub struct FeedbackCoordinator {
    config: FeedbackConfig,
    simulator: TradeSimulator,
    budgeter: DecisionBudgeter,
    calibrator: Mutex<ConfidenceCalibrator>,
    patterns: Mutex<PatternMemory>,
    vetoes: Mutex<VetoEngine>,
    records: Mutex<VecDeque<TradeRecord>>,
    signals: Mutex<VecDeque<LearningSignal>>,
    trade_seq: AtomicU64,
}

impl FeedbackCoordinator {
    pub fn new(config: FeedbackConfig, oracle: Arc<dyn DecisionOracle>) -> Self {
        let simulator = TradeSimulator::new(config.risk.clone(), config.market.clone());
        let budgeter = DecisionBudgeter::new(config.budget.clone(), oracle);
        let calibrator = Mutex::new(ConfidenceCalibrator::new(config.calibrator.clone()));
        let patterns = Mutex::new(PatternMemory::new(
            config.pattern.clone(),
            config.bins.clone(),
        ));
        let vetoes = Mutex::new(VetoEngine::new(config.veto.clone(), config.bins.clone()));

        Self {
            config,
            simulator,
            budgeter,
            calibrator,
            patterns,
            vetoes,
            records: Mutex::new(VecDeque::new()),
            signals: Mutex::new(VecDeque::new()),
            trade_seq: AtomicU64::new(0),
        }
    }

    /// Screen a candidate before spending any oracle budget: veto verdict,
    /// current confidence floor, and the pattern-memory adjustment.
    pub async fn pre_check(&self, candidate: &Candidate) -> PreCheck {
        let now = Utc::now();
        let veto = self.vetoes.lock().await.check(candidate, now);
        let floor = {
            let mut calibrator = self.calibrator.lock().await;
            calibrator.roll_day_if_needed(now.date_naive());
            calibrator.floor()
        };
        let pattern_adjustment = self.patterns.lock().await.confidence_adjustment(candidate);
        PreCheck {
            veto,
            floor,
            pattern_adjustment,
        }
    }

    /// Validate, screen, and submit a candidate to the budgeter. A vetoed
    /// candidate is rejected before it can consume oracle budget.
    pub async fn submit_candidate(&self, candidate: Candidate) -> Result<String, FeedbackError> {
        candidate.validate()?;

        let check = self.pre_check(&candidate).await;
        if check.veto.vetoed {
            info!(
                template = check.veto.template_id.as_deref().unwrap_or("?"),
                score = check.veto.score,
                "candidate vetoed before submission"
            );
            return Err(FeedbackError::BudgetRejected(RejectReason::Vetoed {
                template_id: check.veto.template_id.unwrap_or_default(),
                score_milli: (check.veto.score * 1000.0).round() as i64,
            }));
        }

        self.budgeter.submit(candidate).await
    }

    pub async fn wait_for_decision(
        &self,
        request_id: &str,
        timeout: Duration,
    ) -> Option<DecisionRequest> {
        self.budgeter.wait_for(request_id, timeout).await
    }

    /// Simulate a decision against real bars, assemble the trade record,
    /// and fan it out to every learning component. The fan-out is best
    /// effort: one component misbehaving does not lose the trade.
    pub async fn complete_trade(
        &self,
        candidate: &Candidate,
        decision: &Decision,
        bars: &[Bar],
    ) -> Result<TradeRecord, FeedbackError> {
        decision.validate()?;
        let entry_time = bars
            .first()
            .map(|b| b.timestamp)
            .ok_or_else(|| FeedbackError::Simulation("empty bar data".to_string()))?;

        let result =
            self.simulator
                .simulate(decision.entry, entry_time, decision.direction, bars)?;

        let seq = self.trade_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let record = TradeRecord {
            trade_id: format!("trade_{:06}", seq),
            timestamp: result.exit_time,
            outcome: result.outcome(),
            pnl_points: result.gross_pnl_points,
            pnl_dollars: result.net_pnl_dollars,
            prefilter_score: candidate.prefilter_score,
            oracle_confidence: decision.confidence,
            setup_type: candidate.setup_type.clone(),
            session: candidate.session.clone(),
            entry_price: result.entry_price,
            exit_price: result.exit_price,
            entry_time: result.entry_time,
            exit_time: result.exit_time,
            direction: result.direction,
            exit_reason: result.exit_reason,
            time_to_target_secs: result.time_to_target_secs,
            time_to_breakeven_secs: result.time_to_breakeven_secs,
            mae: result.mae,
            mfe: result.mfe,
            volume_multiple: candidate.volume_multiple,
            atr_5m: candidate.atr_5m,
            ema_alignment: candidate.ema_alignment.clone(),
            vwap_distance: candidate.vwap_distance,
            wickiness: candidate.wickiness,
            slippage_points: result.slippage_points,
            commission_paid: result.commission_paid,
            confluence_factors: candidate.confluence_factors.clone(),
            risk_factors: candidate.risk_factors.clone(),
            market_regime: candidate.market_regime.clone(),
        };

        self.fan_out(&record).await;
        Ok(record)
    }

    async fn fan_out(&self, record: &TradeRecord) {
        if let Some(event) = self.calibrator.lock().await.record_trade(record) {
            info!(
                old_floor = event.old_floor,
                new_floor = event.new_floor,
                "calibration adjusted after trade"
            );
        }

        if let Some(template_id) = self.vetoes.lock().await.on_trade(record) {
            info!(template = %template_id, trade = %record.trade_id, "hard negative learned");
        }

        let update = self.patterns.lock().await.record_trade(record);
        if update.status != update.previous_status {
            info!(
                pattern = %update.pattern_id,
                status = ?update.status,
                "pattern status changed after trade"
            );
        }

        self.budgeter
            .record_trade_outcome(record.outcome == TradeOutcome::Loss)
            .await;

        let signals = derive_signals(record);
        {
            let mut stored = self.signals.lock().await;
            for signal in &signals {
                warn!(trade = %signal.trade_id, kind = ?signal.kind, detail = %signal.detail, "learning signal");
                stored.push_back(signal.clone());
            }
            while stored.len() > SIGNAL_CAP {
                stored.pop_front();
            }
        }

        let mut records = self.records.lock().await;
        records.push_back(record.clone());
        while records.len() > RECORD_CAP {
            records.pop_front();
        }
    }

    /// Resolve a fired veto or a pass-through once its hypothetical or real
    /// outcome is known.
    pub async fn record_veto_feedback(
        &self,
        template_id: &str,
        outcome: TemplateOutcome,
    ) -> Result<(), FeedbackError> {
        self.vetoes
            .lock()
            .await
            .feedback(template_id, outcome, Utc::now())
    }

    pub async fn recent_records(&self, limit: usize) -> Vec<TradeRecord> {
        let records = self.records.lock().await;
        records.iter().rev().take(limit).cloned().collect()
    }

    pub async fn recent_signals(&self, limit: usize) -> Vec<LearningSignal> {
        let signals = self.signals.lock().await;
        signals.iter().rev().take(limit).cloned().collect()
    }

    /// Aggregate view over the last `lookback` trades plus each component's
    /// own status.
    pub async fn performance_summary(&self, lookback: usize) -> PerformanceSummary {
        let records = self.records.lock().await;
        let window: Vec<&TradeRecord> = records.iter().rev().take(lookback).collect();

        let trades = window.len();
        let wins = window
            .iter()
            .filter(|r| r.outcome == TradeOutcome::Win)
            .count();
        let losses = window
            .iter()
            .filter(|r| r.outcome == TradeOutcome::Loss)
            .count();
        let total_pnl_points: f64 = window.iter().map(|r| r.pnl_points).sum();
        let (avg_mae, avg_mfe) = if trades > 0 {
            (
                window.iter().map(|r| r.mae).sum::<f64>() / trades as f64,
                window.iter().map(|r| r.mfe).sum::<f64>() / trades as f64,
            )
        } else {
            (0.0, 0.0)
        };
        drop(records);

        PerformanceSummary {
            trades,
            wins,
            losses,
            win_rate: if trades > 0 {
                Some(100.0 * wins as f64 / trades as f64)
            } else {
                None
            },
            total_pnl_points,
            avg_mae,
            avg_mfe,
            budget: self.budgeter.usage().await,
            calibrator: self.calibrator.lock().await.status(),
            patterns: self.patterns.lock().await.summary(),
            vetoes: self.vetoes.lock().await.summary(),
        }
    }

    pub async fn pattern_export(&self) -> PatternExport {
        self.patterns.lock().await.export()
    }

    pub async fn veto_export(&self) -> VetoExport {
        self.vetoes.lock().await.export()
    }

    pub async fn import_patterns(&self, export: &PatternExport) -> usize {
        self.patterns.lock().await.import(export, Utc::now()).imported
    }

    pub async fn import_vetoes(&self, export: &VetoExport) -> usize {
        self.vetoes.lock().await.import(export, Utc::now())
    }

    /// Persist the learned state to the store, one document per concern.
    pub async fn snapshot_to(&self, store: &dyn StateStore) -> Result<(), FeedbackError> {
        let patterns = self.pattern_export().await;
        let vetoes = self.veto_export().await;

        let patterns_doc = serde_json::to_value(&patterns)
            .map_err(|e| FeedbackError::Store(e.to_string()))?;
        let vetoes_doc =
            serde_json::to_value(&vetoes).map_err(|e| FeedbackError::Store(e.to_string()))?;

        store.save("pattern_memory", "snapshot", patterns_doc).await?;
        store.save("veto_templates", "snapshot", vetoes_doc).await?;
        info!(
            patterns = patterns.patterns.len(),
            templates = vetoes.templates.len(),
            "learned state snapshotted"
        );
        Ok(())
    }

    pub fn budgeter(&self) -> &DecisionBudgeter {
        &self.budgeter
    }

    pub fn config(&self) -> &FeedbackConfig {
        &self.config
    }

    pub async fn shutdown(&self) {
        self.budgeter.shutdown().await;
    }
}

/// Flag conditions worth a second look. Thresholds are in points except
/// wickiness, which is the wick-to-body ratio.
fn derive_signals(record: &TradeRecord) -> Vec<LearningSignal> {
    let mut signals = Vec::new();
    if record.outcome == TradeOutcome::Loss && record.oracle_confidence >= 90 {
        signals.push(LearningSignal {
            trade_id: record.trade_id.clone(),
            kind: SignalKind::HighConfidenceLoss,
            detail: format!(
                "confidence {} lost {:.2} points",
                record.oracle_confidence,
                record.pnl_points.abs()
            ),
        });
    }
    if record.mae > 1.0 {
        signals.push(LearningSignal {
            trade_id: record.trade_id.clone(),
            kind: SignalKind::PoorExecution,
            detail: format!("adverse excursion {:.2} points", record.mae),
        });
    }
    if record.outcome == TradeOutcome::Timeout {
        signals.push(LearningSignal {
            trade_id: record.trade_id.clone(),
            kind: SignalKind::TimeoutPattern,
            detail: format!("{} stalled until the timeout", record.setup_type),
        });
    }
    if record.wickiness > 2.0 {
        signals.push(LearningSignal {
            trade_id: record.trade_id.clone(),
            kind: SignalKind::ChoppyConditions,
            detail: format!("wickiness {:.2} at entry", record.wickiness),
        });
    }
    signals
}
