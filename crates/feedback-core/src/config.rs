use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Risk parameters for the trade simulator, in points unless noted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub tp: f64,
    pub sl: f64,
    /// Favorable move (points) after which the stop moves to the fill price.
    pub move_to_be_at: f64,
    /// Favorable move (points) after which trailing activates.
    pub trail_after: f64,
    /// Distance the trailing stop keeps from the best price.
    pub trail_distance: f64,
    pub timeout_minutes: i64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            tp: 1.0,
            sl: 1.25,
            move_to_be_at: 0.5,
            trail_after: 0.75,
            trail_distance: 0.5,
            timeout_minutes: 15,
        }
    }
}

/// Contract parameters for the traded market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    pub tick_size: f64,
    /// Dollars per point.
    pub contract_size: f64,
    /// Round-trip commission in dollars.
    pub commission_per_trade: f64,
    /// Base slippage in ticks, applied against the trader.
    pub base_slippage_ticks: f64,
    /// First-bar high-low spread beyond which entry slippage widens 1.5x.
    pub wide_spread_threshold: f64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            tick_size: 0.25,
            contract_size: 5.0,
            commission_per_trade: 0.62,
            base_slippage_ticks: 1.0,
            wide_spread_threshold: 2.0,
        }
    }
}

/// Decision budgeter knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub daily_call_cap: u32,
    /// Emergency pause looks at this many most recent admissions.
    pub emergency_window: usize,
    /// Session losses at or above this trip the emergency pause.
    pub emergency_loss_threshold: u32,
    /// Bounded completed-request history: trimmed to half once exceeded.
    pub history_cap: usize,
    /// Worker join timeout on shutdown, milliseconds.
    pub shutdown_join_ms: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_call_cap: 5,
            emergency_window: 3,
            emergency_loss_threshold: 2,
            history_cap: 100,
            shutdown_join_ms: 5_000,
        }
    }
}

/// Confidence calibrator knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibratorConfig {
    /// Base confidence floor, restored on each UTC day change.
    pub confidence_min: u8,
    pub floor_min: u8,
    pub floor_max: u8,
    pub adjustment_step: u8,
    pub low_win_rate_threshold: f64,
    pub high_win_rate_threshold: f64,
    /// Ring buffer capacity for trade history.
    pub history_len: usize,
    /// Minimum trades before the floor may adjust.
    pub min_trades: usize,
}

impl Default for CalibratorConfig {
    fn default() -> Self {
        Self {
            confidence_min: 85,
            floor_min: 82,
            floor_max: 92,
            adjustment_step: 2,
            low_win_rate_threshold: 78.0,
            high_win_rate_threshold: 85.0,
            history_len: 50,
            min_trades: 20,
        }
    }
}

/// Pattern memory promotion, cost, and import guardrail knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternConfig {
    pub min_samples_for_gold: u32,
    /// Wilson lower bound (percent) required for gold.
    pub min_win_rate_for_gold: f64,
    pub min_expectancy_for_gold: f64,
    /// Gold also requires the last trade within this many days.
    pub recency_days: i64,
    pub freeze_min_samples: u32,
    pub freeze_win_rate: f64,
    pub reactivate_min_samples: u32,
    pub reactivate_win_rate: f64,
    pub cooldown_days: i64,
    /// EWMA decay for ew_win_rate / ew_expectancy.
    pub ewma_alpha: f64,
    /// Cost model folded into expectancy, in points.
    pub commission_pts: f64,
    pub slippage_pts: f64,
    /// Import guardrails.
    pub import_max_entries: usize,
    pub import_stale_days: i64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            min_samples_for_gold: 30,
            min_win_rate_for_gold: 82.0,
            min_expectancy_for_gold: 0.5,
            recency_days: 7,
            freeze_min_samples: 20,
            freeze_win_rate: 60.0,
            reactivate_min_samples: 10,
            reactivate_win_rate: 70.0,
            cooldown_days: 3,
            ewma_alpha: 0.12,
            commission_pts: 0.06,
            slippage_pts: 0.02,
            import_max_entries: 2000,
            import_stale_days: 180,
        }
    }
}

/// Hard-negative veto engine knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VetoConfig {
    /// Oracle confidence at or above which a loss seeds a template.
    pub high_confidence: u8,
    /// Match score required before a veto can fire.
    pub min_veto_score: f64,
    /// Wilson lower bound on the feedback loss rate required to fire.
    pub min_loss_lb: f64,
    /// Score contribution per matching binned feature.
    pub feature_match_weight: f64,
    pub regime_penalty: f64,
    pub session_penalty: f64,
    /// More binned-feature mismatches than this and the template is skipped.
    pub max_mismatches: usize,
    /// Cooldown applied to a template after it fires.
    pub veto_cooldown_minutes: i64,
    /// Cooldown applied by the false-veto self-correction.
    pub cooldown_days: i64,
    /// False vetoes at or above this with a poor save ratio trigger the
    /// self-correction cooldown.
    pub false_veto_limit: u32,
    /// Maintenance horizon for clear_old_templates.
    pub expiry_days: i64,
    pub import_max_entries: usize,
    pub import_stale_days: i64,
}

impl Default for VetoConfig {
    fn default() -> Self {
        Self {
            high_confidence: 90,
            min_veto_score: 1.0,
            min_loss_lb: 0.60,
            feature_match_weight: 0.30,
            regime_penalty: 0.25,
            session_penalty: 0.25,
            max_mismatches: 2,
            veto_cooldown_minutes: 60,
            cooldown_days: 1,
            false_veto_limit: 3,
            expiry_days: 30,
            import_max_entries: 1000,
            import_stale_days: 180,
        }
    }
}

/// Binning thresholds for the categorical feature signature shared by the
/// pattern memory and the veto engine. Thresholds are configuration, not
/// constants: the bins decide fingerprint identity, so changing them
/// invalidates accumulated statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureBins {
    pub atr_normal: f64,
    pub atr_elevated: f64,
    pub atr_high: f64,
    pub volume_normal: f64,
    pub volume_high: f64,
    pub volume_extreme: f64,
    pub vwap_medium: f64,
    pub vwap_far: f64,
    pub wick_mixed: f64,
    pub wick_wicky: f64,
}

impl Default for FeatureBins {
    fn default() -> Self {
        Self {
            atr_normal: 0.8,
            atr_elevated: 1.2,
            atr_high: 1.6,
            volume_normal: 1.5,
            volume_high: 2.0,
            volume_extreme: 2.5,
            vwap_medium: 0.5,
            vwap_far: 1.0,
            wick_mixed: 0.6,
            wick_wicky: 1.2,
        }
    }
}

impl FeatureBins {
    pub fn bin_atr(&self, atr: f64) -> &'static str {
        if atr < self.atr_normal {
            "low"
        } else if atr < self.atr_elevated {
            "normal"
        } else if atr < self.atr_high {
            "elevated"
        } else {
            "high"
        }
    }

    pub fn bin_volume_multiple(&self, volume_multiple: f64) -> &'static str {
        if volume_multiple < self.volume_normal {
            "low"
        } else if volume_multiple < self.volume_high {
            "normal"
        } else if volume_multiple < self.volume_extreme {
            "high"
        } else {
            "extreme"
        }
    }

    pub fn bin_vwap_distance(&self, distance: f64) -> &'static str {
        let abs = distance.abs();
        if abs < self.vwap_medium {
            "near"
        } else if abs < self.vwap_far {
            "medium"
        } else {
            "far"
        }
    }

    pub fn bin_wickiness(&self, wickiness: f64) -> &'static str {
        if wickiness < self.wick_mixed {
            "clean"
        } else if wickiness < self.wick_wicky {
            "mixed"
        } else {
            "wicky"
        }
    }

    /// EMA alignment is already categorical.
    pub fn bin_ema_alignment<'a>(&self, alignment: &'a str) -> &'a str {
        alignment
    }
}

/// Aggregated configuration for the whole feedback core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackConfig {
    pub risk: RiskConfig,
    pub market: MarketConfig,
    pub budget: BudgetConfig,
    pub calibrator: CalibratorConfig,
    pub pattern: PatternConfig,
    pub veto: VetoConfig,
    pub bins: FeatureBins,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => Ok(raw.parse()?),
        Err(_) => Ok(default),
    }
}

impl FeedbackConfig {
    /// Build configuration from the environment, falling back to defaults
    /// for anything unset.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            risk: RiskConfig {
                tp: env_parse("RISK_TP_POINTS", defaults.risk.tp)?,
                sl: env_parse("RISK_SL_POINTS", defaults.risk.sl)?,
                move_to_be_at: env_parse("RISK_MOVE_TO_BE_AT", defaults.risk.move_to_be_at)?,
                trail_after: env_parse("RISK_TRAIL_AFTER", defaults.risk.trail_after)?,
                trail_distance: env_parse("RISK_TRAIL_DISTANCE", defaults.risk.trail_distance)?,
                timeout_minutes: env_parse("RISK_TIMEOUT_MINUTES", defaults.risk.timeout_minutes)?,
            },
            market: MarketConfig {
                tick_size: env_parse("MARKET_TICK_SIZE", defaults.market.tick_size)?,
                contract_size: env_parse("MARKET_CONTRACT_SIZE", defaults.market.contract_size)?,
                commission_per_trade: env_parse(
                    "MARKET_COMMISSION",
                    defaults.market.commission_per_trade,
                )?,
                base_slippage_ticks: env_parse(
                    "MARKET_BASE_SLIPPAGE_TICKS",
                    defaults.market.base_slippage_ticks,
                )?,
                wide_spread_threshold: env_parse(
                    "MARKET_WIDE_SPREAD",
                    defaults.market.wide_spread_threshold,
                )?,
            },
            budget: BudgetConfig {
                daily_call_cap: env_parse("BUDGET_DAILY_CALL_CAP", defaults.budget.daily_call_cap)?,
                ..defaults.budget
            },
            calibrator: CalibratorConfig {
                confidence_min: env_parse("CALIBRATOR_CONFIDENCE_MIN", defaults.calibrator.confidence_min)?,
                floor_min: env_parse("CALIBRATOR_FLOOR_MIN", defaults.calibrator.floor_min)?,
                floor_max: env_parse("CALIBRATOR_FLOOR_MAX", defaults.calibrator.floor_max)?,
                ..defaults.calibrator
            },
            pattern: defaults.pattern,
            veto: VetoConfig {
                high_confidence: env_parse("VETO_HIGH_CONFIDENCE", defaults.veto.high_confidence)?,
                min_veto_score: env_parse("VETO_MIN_SCORE", defaults.veto.min_veto_score)?,
                min_loss_lb: env_parse("VETO_MIN_LOSS_LB", defaults.veto.min_loss_lb)?,
                ..defaults.veto
            },
            bins: defaults.bins,
        })
    }
}
