use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use feedback_core::stats::{ewma, wilson_95};
use feedback_core::{
    Candidate, FeatureBins, PatternConfig, PatternStatus, TradeOutcome, TradeRecord,
};

use crate::fingerprint::FingerprintKey;

/// Accumulated statistics for one fingerprint.
///
/// `win_rate`/`wr_lo95`/`wr_hi95` are lifetime figures in percent; the
/// `ew_` fields are EWMA-smoothed and favor recent trades. Expectancy is in
/// points, net of the configured per-trade friction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternFingerprint {
    pub pattern_id: String,
    pub key: FingerprintKey,

    pub samples: u32,
    pub wins: u32,
    pub losses: u32,
    pub breakevens: u32,
    pub timeouts: u32,

    pub win_rate: f64,
    pub wr_lo95: f64,
    pub wr_hi95: f64,
    pub ew_win_rate: f64,
    pub ew_expectancy: f64,
    pub expectancy: f64,
    pub total_pnl_points: f64,
    /// Gross win points over gross loss points. Approximate: ignores
    /// per-trade friction, like the lifetime win_rate above.
    pub profit_factor: f64,
    pub avg_mae: f64,
    pub avg_mfe: f64,
    #[serde(default)]
    sum_win_points: f64,
    #[serde(default)]
    sum_loss_points: f64,

    pub status: PatternStatus,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl PatternFingerprint {
    fn new(pattern_id: String, key: FingerprintKey, now: DateTime<Utc>) -> Self {
        Self {
            pattern_id,
            key,
            samples: 0,
            wins: 0,
            losses: 0,
            breakevens: 0,
            timeouts: 0,
            win_rate: 0.0,
            wr_lo95: 0.0,
            wr_hi95: 0.0,
            ew_win_rate: 0.0,
            ew_expectancy: 0.0,
            expectancy: 0.0,
            total_pnl_points: 0.0,
            profit_factor: 0.0,
            sum_win_points: 0.0,
            sum_loss_points: 0.0,
            avg_mae: 0.0,
            avg_mfe: 0.0,
            status: PatternStatus::Active,
            cooldown_until: None,
            first_seen: now,
            last_seen: now,
        }
    }

    fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.map_or(false, |until| until > now)
    }
}

/// Result of folding one trade into the memory.
#[derive(Debug, Clone)]
pub struct PatternUpdate {
    pub pattern_id: String,
    pub samples: u32,
    pub status: PatternStatus,
    pub previous_status: PatternStatus,
}

/// Win/pnl aggregate for a regime or confluence factor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BucketStats {
    pub trades: u32,
    pub wins: u32,
    pub total_pnl_points: f64,
}

impl BucketStats {
    pub fn win_rate(&self) -> Option<f64> {
        if self.trades == 0 {
            None
        } else {
            Some(100.0 * self.wins as f64 / self.trades as f64)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MemorySummary {
    pub total_patterns: usize,
    pub active: usize,
    pub gold: usize,
    pub frozen: usize,
    pub total_samples: u64,
}

/// Serialized snapshot for transfer between environments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternExport {
    pub export_timestamp: DateTime<Utc>,
    pub patterns: Vec<PatternFingerprint>,
    pub regimes: HashMap<String, BucketStats>,
    pub confluences: HashMap<String, BucketStats>,
}

#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped_stale: usize,
    pub skipped_existing: usize,
    pub skipped_excess: usize,
}

/// The pattern store plus the regime and confluence side aggregates.
/// Single-threaded; the owner wraps it in a lock.
pub struct PatternMemory {
    config: PatternConfig,
    bins: FeatureBins,
    patterns: HashMap<String, PatternFingerprint>,
    regimes: HashMap<String, BucketStats>,
    confluences: HashMap<String, BucketStats>,
}

impl PatternMemory {
    pub fn new(config: PatternConfig, bins: FeatureBins) -> Self {
        Self {
            config,
            bins,
            patterns: HashMap::new(),
            regimes: HashMap::new(),
            confluences: HashMap::new(),
        }
    }

    /// Fold one completed trade into its fingerprint and the side
    /// aggregates, then re-run the status transitions.
    pub fn record_trade(&mut self, record: &TradeRecord) -> PatternUpdate {
        let now = record.exit_time;
        let key = FingerprintKey::from_record(record, &self.bins);
        let pattern_id = key.pattern_id();

        let pattern = self
            .patterns
            .entry(pattern_id.clone())
            .or_insert_with(|| PatternFingerprint::new(pattern_id.clone(), key, now));

        let won = record.outcome == TradeOutcome::Win;
        pattern.samples += 1;
        match record.outcome {
            TradeOutcome::Win => pattern.wins += 1,
            TradeOutcome::Loss => pattern.losses += 1,
            TradeOutcome::Breakeven => pattern.breakevens += 1,
            TradeOutcome::Timeout => pattern.timeouts += 1,
        }

        let n = pattern.samples as f64;
        pattern.win_rate = 100.0 * pattern.wins as f64 / n;
        let (lo, hi) = wilson_95(pattern.wins, pattern.samples);
        pattern.wr_lo95 = 100.0 * lo;
        pattern.wr_hi95 = 100.0 * hi;

        let cost = self.config.commission_pts + self.config.slippage_pts;
        let cost_adjusted = record.pnl_points - cost;
        pattern.ew_win_rate = ewma(
            pattern.ew_win_rate,
            if won { 100.0 } else { 0.0 },
            self.config.ewma_alpha,
        );
        pattern.ew_expectancy = ewma(pattern.ew_expectancy, cost_adjusted, self.config.ewma_alpha);
        pattern.expectancy += (cost_adjusted - pattern.expectancy) / n;
        pattern.total_pnl_points += record.pnl_points;
        if record.pnl_points > 0.0 {
            pattern.sum_win_points += record.pnl_points;
        } else {
            pattern.sum_loss_points += record.pnl_points.abs();
        }
        pattern.profit_factor = if pattern.sum_loss_points > 0.0 {
            pattern.sum_win_points / pattern.sum_loss_points
        } else {
            pattern.sum_win_points
        };
        pattern.avg_mae += (record.mae - pattern.avg_mae) / n;
        pattern.avg_mfe += (record.mfe - pattern.avg_mfe) / n;
        pattern.last_seen = now;

        let previous_status = pattern.status;
        apply_transitions(pattern, &self.config, now);
        let update = PatternUpdate {
            pattern_id: pattern.pattern_id.clone(),
            samples: pattern.samples,
            status: pattern.status,
            previous_status,
        };
        if update.status != update.previous_status {
            info!(
                pattern = %update.pattern_id,
                from = ?update.previous_status,
                to = ?update.status,
                samples = update.samples,
                "pattern status changed"
            );
        } else {
            debug!(pattern = %update.pattern_id, samples = update.samples, "pattern updated");
        }

        // Side aggregates keyed by regime and by each confluence factor.
        let regime = self
            .regimes
            .entry(record.market_regime.clone())
            .or_default();
        regime.trades += 1;
        regime.total_pnl_points += record.pnl_points;
        if won {
            regime.wins += 1;
        }
        for factor in &record.confluence_factors {
            let bucket = self.confluences.entry(factor.clone()).or_default();
            bucket.trades += 1;
            bucket.total_pnl_points += record.pnl_points;
            if won {
                bucket.wins += 1;
            }
        }

        update
    }

    /// Confidence delta for a candidate whose fingerprint is already known.
    /// Gold patterns earn a small boost, frozen ones a hard penalty.
    pub fn confidence_adjustment(&self, candidate: &Candidate) -> i8 {
        match self.pattern_for(candidate) {
            Some(p) if p.status == PatternStatus::Gold && p.wr_lo95 >= 85.0 => 3,
            Some(p) if p.status == PatternStatus::Gold => 1,
            Some(p) if p.status == PatternStatus::Frozen => -5,
            _ => 0,
        }
    }

    pub fn pattern_for(&self, candidate: &Candidate) -> Option<&PatternFingerprint> {
        let id = FingerprintKey::from_candidate(candidate, &self.bins).pattern_id();
        self.patterns.get(&id)
    }

    pub fn get(&self, pattern_id: &str) -> Option<&PatternFingerprint> {
        self.patterns.get(pattern_id)
    }

    pub fn summary(&self) -> MemorySummary {
        let mut summary = MemorySummary {
            total_patterns: self.patterns.len(),
            active: 0,
            gold: 0,
            frozen: 0,
            total_samples: 0,
        };
        for p in self.patterns.values() {
            summary.total_samples += p.samples as u64;
            match p.status {
                PatternStatus::Active => summary.active += 1,
                PatternStatus::Gold => summary.gold += 1,
                PatternStatus::Frozen => summary.frozen += 1,
            }
        }
        summary
    }

    /// Best patterns by smoothed expectancy, requiring a minimum sample
    /// count so one lucky trade cannot top the list.
    pub fn top_patterns(&self, limit: usize, min_samples: u32) -> Vec<&PatternFingerprint> {
        let mut ranked: Vec<&PatternFingerprint> = self
            .patterns
            .values()
            .filter(|p| p.samples >= min_samples)
            .collect();
        ranked.sort_by(|a, b| {
            b.ew_expectancy
                .partial_cmp(&a.ew_expectancy)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(limit);
        ranked
    }

    /// Gold patterns, best smoothed expectancy first.
    pub fn gold_patterns(&self) -> Vec<&PatternFingerprint> {
        let mut gold: Vec<&PatternFingerprint> = self
            .patterns
            .values()
            .filter(|p| p.status == PatternStatus::Gold)
            .collect();
        gold.sort_by(|a, b| {
            b.ew_expectancy
                .partial_cmp(&a.ew_expectancy)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        gold
    }

    /// Win/pnl aggregate per setup type, folded across all fingerprints
    /// that share it.
    pub fn setup_performance(&self) -> HashMap<String, BucketStats> {
        let mut setups: HashMap<String, BucketStats> = HashMap::new();
        for p in self.patterns.values() {
            let bucket = setups.entry(p.key.setup_type.clone()).or_default();
            bucket.trades += p.samples;
            bucket.wins += p.wins;
            bucket.total_pnl_points += p.total_pnl_points;
        }
        setups
    }

    pub fn regime_performance(&self) -> &HashMap<String, BucketStats> {
        &self.regimes
    }

    pub fn confluence_attribution(&self) -> &HashMap<String, BucketStats> {
        &self.confluences
    }

    /// Re-run the status transitions without new trades, e.g. after an
    /// import or an elapsed cooldown.
    pub fn reevaluate_all(&mut self, now: DateTime<Utc>) {
        for pattern in self.patterns.values_mut() {
            apply_transitions(pattern, &self.config, now);
        }
    }

    /// Drop patterns not seen for `max_age_days`. Gold survives regardless
    /// of age. Returns the number removed.
    pub fn cleanup_old(&mut self, now: DateTime<Utc>, max_age_days: i64) -> usize {
        let cutoff = now - Duration::days(max_age_days);
        let before = self.patterns.len();
        self.patterns
            .retain(|_, p| p.status == PatternStatus::Gold || p.last_seen >= cutoff);
        before - self.patterns.len()
    }

    pub fn export(&self) -> PatternExport {
        PatternExport {
            export_timestamp: Utc::now(),
            patterns: self.patterns.values().cloned().collect(),
            regimes: self.regimes.clone(),
            confluences: self.confluences.clone(),
        }
    }

    /// Merge an exported snapshot. Entries past the cap and stale entries
    /// are skipped, not fatal; the rest import. On id collision the entry
    /// with more samples wins.
    pub fn import(&mut self, export: &PatternExport, now: DateTime<Utc>) -> ImportReport {
        let cap = self.config.import_max_entries;
        let stale_cutoff = now - Duration::days(self.config.import_stale_days);
        let mut report = ImportReport::default();
        if export.patterns.len() > cap {
            report.skipped_excess = export.patterns.len() - cap;
            warn!(
                skipped = report.skipped_excess,
                cap, "pattern import truncated at the entry cap"
            );
        }
        for incoming in export.patterns.iter().take(cap) {
            if incoming.last_seen < stale_cutoff {
                report.skipped_stale += 1;
                continue;
            }
            match self.patterns.get(&incoming.pattern_id) {
                Some(existing) if existing.samples >= incoming.samples => {
                    report.skipped_existing += 1;
                }
                _ => {
                    self.patterns
                        .insert(incoming.pattern_id.clone(), incoming.clone());
                    report.imported += 1;
                }
            }
        }
        if report.skipped_stale > 0 {
            warn!(
                skipped = report.skipped_stale,
                "stale pattern entries skipped during import"
            );
        }
        info!(
            imported = report.imported,
            skipped_stale = report.skipped_stale,
            skipped_existing = report.skipped_existing,
            skipped_excess = report.skipped_excess,
            "pattern import finished"
        );
        report
    }
}

/// Status transitions, evaluated after every update.
///
/// Order matters: a pattern bad enough to freeze never reaches the gold
/// check, and a frozen pattern only thaws through the reactivation gate
/// once its cooldown has elapsed.
fn apply_transitions(pattern: &mut PatternFingerprint, config: &PatternConfig, now: DateTime<Utc>) {
    match pattern.status {
        PatternStatus::Frozen => {
            if !pattern.in_cooldown(now)
                && pattern.samples >= config.reactivate_min_samples
                && pattern.ew_win_rate > config.reactivate_win_rate
                && pattern.ew_expectancy >= 0.0
            {
                pattern.status = PatternStatus::Active;
                pattern.cooldown_until = None;
            }
        }
        _ => {
            let recency_ok = now - pattern.last_seen <= Duration::days(config.recency_days);
            if pattern.samples >= config.freeze_min_samples
                && pattern.ew_win_rate < config.freeze_win_rate
                && pattern.ew_expectancy < 0.0
            {
                pattern.status = PatternStatus::Frozen;
                pattern.cooldown_until = Some(now + Duration::days(config.cooldown_days));
            } else if pattern.samples >= config.min_samples_for_gold
                && pattern.wr_lo95 >= config.min_win_rate_for_gold
                && pattern.ew_expectancy >= config.min_expectancy_for_gold
                && recency_ok
                && !pattern.in_cooldown(now)
            {
                // Gold is sticky: it only ends in a freeze, never a demotion.
                pattern.status = PatternStatus::Gold;
            }
        }
    }
}
