use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use feedback_core::stats::wilson_95;
use feedback_core::{
    Candidate, Direction, FeatureBins, FeedbackError, TradeOutcome, TradeRecord, VetoConfig,
};

/// A learned no-trade zone: the binned context of one or more
/// high-confidence losses, plus the feedback that decides whether it has
/// earned the right to veto.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoTradeTemplate {
    pub template_id: String,
    pub setup_type: String,
    pub session: String,
    pub market_regime: String,
    pub direction: Direction,
    pub atr_bin: String,
    pub volume_bin: String,
    pub vwap_bin: String,
    pub wick_bin: String,
    pub ema_alignment: String,

    /// Seeding losses folded into this template.
    pub samples: u32,
    /// Sum of |pnl| weighted by how confident the oracle was when it lost.
    pub severity_sum: f64,

    /// Feedback counters.
    pub vetoes: u32,
    pub true_saves: u32,
    pub false_vetoes: u32,
    pub post_pass_losses: u32,
    pub post_pass_wins: u32,

    /// Wilson lower bound on the loss rate across all feedback, 0-1. A
    /// template with no feedback sits at 0 and cannot veto.
    pub loss_rate_lo95: f64,
    /// Wilson lower bound on saves among fired vetoes, 0-1.
    pub save_rate_lo95: f64,

    pub cooldown_until: Option<DateTime<Utc>>,
    pub last_matched: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_loss_at: DateTime<Utc>,
}

impl NoTradeTemplate {
    fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.map_or(false, |until| until > now)
    }

    fn recompute_bounds(&mut self) {
        let feedback_total =
            self.true_saves + self.false_vetoes + self.post_pass_losses + self.post_pass_wins;
        let losses = self.true_saves + self.post_pass_losses;
        self.loss_rate_lo95 = wilson_95(losses, feedback_total).0;

        let fired = self.true_saves + self.false_vetoes;
        self.save_rate_lo95 = wilson_95(self.true_saves, fired).0;
    }

    fn last_activity(&self) -> DateTime<Utc> {
        self.last_matched
            .map_or(self.last_loss_at, |m| m.max(self.last_loss_at))
    }
}

/// Post-decision feedback on a template.
///
/// TrueSave / FalseVeto resolve a fired veto (the hypothetical replay lost
/// or won); PostPassLoss / PostPassWin track matches that were allowed
/// through anyway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateOutcome {
    TrueSave,
    FalseVeto,
    PostPassLoss,
    PostPassWin,
}

/// Outcome of screening one candidate.
#[derive(Debug, Clone, Serialize)]
pub struct VetoCheck {
    pub vetoed: bool,
    pub score: f64,
    pub template_id: Option<String>,
    pub reason: Option<String>,
}

impl VetoCheck {
    fn clean() -> Self {
        Self {
            vetoed: false,
            score: 0.0,
            template_id: None,
            reason: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VetoSummary {
    pub templates: usize,
    pub credible: usize,
    pub total_vetoes: u32,
    pub total_true_saves: u32,
    pub total_false_vetoes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VetoExport {
    pub export_timestamp: DateTime<Utc>,
    pub templates: Vec<NoTradeTemplate>,
}

/// The template store and matcher. Single-threaded; the owner wraps it in
/// a lock.
pub struct VetoEngine {
    config: VetoConfig,
    bins: FeatureBins,
    templates: HashMap<String, NoTradeTemplate>,
}

impl VetoEngine {
    pub fn new(config: VetoConfig, bins: FeatureBins) -> Self {
        Self {
            config,
            bins,
            templates: HashMap::new(),
        }
    }

    /// Seed or reinforce a template from a completed trade. Only losses the
    /// oracle was highly confident about qualify; everything else is noise
    /// this engine should not learn from.
    pub fn on_trade(&mut self, record: &TradeRecord) -> Option<String> {
        if record.outcome != TradeOutcome::Loss
            || record.oracle_confidence < self.config.high_confidence
        {
            return None;
        }

        let atr_bin = self.bins.bin_atr(record.atr_5m).to_string();
        let volume_bin = self.bins.bin_volume_multiple(record.volume_multiple).to_string();
        let vwap_bin = self.bins.bin_vwap_distance(record.vwap_distance).to_string();
        let wick_bin = self.bins.bin_wickiness(record.wickiness).to_string();
        let ema_alignment = record.ema_alignment.clone();

        let signature = format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}",
            record.setup_type,
            record.session,
            record.market_regime,
            record.direction.as_str(),
            atr_bin,
            volume_bin,
            vwap_bin,
            wick_bin,
            ema_alignment,
        );
        let digest = Sha256::digest(signature.as_bytes());
        let template_id = format!("veto_{}", &hex::encode(digest)[..12]);

        // Confidence above the qualifying threshold makes the loss weigh
        // more: being very sure and wrong is the signal.
        let severity =
            record.pnl_points.abs() * (1.0 + (record.oracle_confidence as f64 - 80.0) / 20.0);

        let template = self
            .templates
            .entry(template_id.clone())
            .or_insert_with(|| NoTradeTemplate {
                template_id: template_id.clone(),
                setup_type: record.setup_type.clone(),
                session: record.session.clone(),
                market_regime: record.market_regime.clone(),
                direction: record.direction,
                atr_bin,
                volume_bin,
                vwap_bin,
                wick_bin,
                ema_alignment,
                samples: 0,
                severity_sum: 0.0,
                vetoes: 0,
                true_saves: 0,
                false_vetoes: 0,
                post_pass_losses: 0,
                post_pass_wins: 0,
                loss_rate_lo95: 0.0,
                save_rate_lo95: 0.0,
                cooldown_until: None,
                last_matched: None,
                created_at: record.exit_time,
                last_loss_at: record.exit_time,
            });
        template.samples += 1;
        template.severity_sum += severity;
        template.last_loss_at = record.exit_time;

        info!(
            template = %template_id,
            samples = template.samples,
            severity,
            "hard negative recorded"
        );
        Some(template_id)
    }

    /// Screen a candidate against every template of the same setup and
    /// direction. The best credible match at or above the score threshold
    /// fires the veto and puts that template on cooldown.
    pub fn check(&mut self, candidate: &Candidate, now: DateTime<Utc>) -> VetoCheck {
        let atr_bin = self.bins.bin_atr(candidate.atr_5m);
        let volume_bin = self.bins.bin_volume_multiple(candidate.volume_multiple);
        let vwap_bin = self.bins.bin_vwap_distance(candidate.vwap_distance);
        let wick_bin = self.bins.bin_wickiness(candidate.wickiness);

        let mut best: Option<(String, f64)> = None;
        for template in self.templates.values() {
            if template.setup_type != candidate.setup_type
                || template.direction != candidate.direction
            {
                continue;
            }

            let feature_matches = [
                template.atr_bin == atr_bin,
                template.volume_bin == volume_bin,
                template.vwap_bin == vwap_bin,
                template.wick_bin == wick_bin,
                template.ema_alignment == candidate.ema_alignment,
            ];
            let matches = feature_matches.iter().filter(|m| **m).count();
            let mismatches = feature_matches.len() - matches;
            if mismatches > self.config.max_mismatches {
                continue;
            }

            let mut score = matches as f64 * self.config.feature_match_weight;
            if template.session != candidate.session {
                score -= self.config.session_penalty;
            }
            if template.market_regime != candidate.market_regime {
                score -= self.config.regime_penalty;
            }

            debug!(
                template = %template.template_id,
                score,
                matches,
                loss_lb = template.loss_rate_lo95,
                "veto template scored"
            );

            if score < self.config.min_veto_score
                || template.loss_rate_lo95 < self.config.min_loss_lb
                || template.in_cooldown(now)
            {
                continue;
            }
            if best.as_ref().map_or(true, |(_, s)| score > *s) {
                best = Some((template.template_id.clone(), score));
            }
        }

        let Some((template_id, score)) = best else {
            return VetoCheck::clean();
        };

        let template = match self.templates.get_mut(&template_id) {
            Some(t) => t,
            None => return VetoCheck::clean(),
        };
        template.vetoes += 1;
        template.last_matched = Some(now);
        template.cooldown_until = Some(now + Duration::minutes(self.config.veto_cooldown_minutes));

        info!(
            template = %template_id,
            score,
            loss_lb = template.loss_rate_lo95,
            "candidate vetoed"
        );
        VetoCheck {
            vetoed: true,
            score,
            reason: Some(format!(
                "matched {} (score {:.2}, loss_lb {:.2})",
                template_id, score, template.loss_rate_lo95
            )),
            template_id: Some(template_id),
        }
    }

    /// Fold post-decision feedback into a template and re-derive its
    /// credibility bounds. Applies the false-veto self-correction cooldown.
    pub fn feedback(
        &mut self,
        template_id: &str,
        outcome: TemplateOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), FeedbackError> {
        let template = self.templates.get_mut(template_id).ok_or_else(|| {
            FeedbackError::Validation(format!("unknown template {}", template_id))
        })?;

        match outcome {
            TemplateOutcome::TrueSave => template.true_saves += 1,
            TemplateOutcome::FalseVeto => template.false_vetoes += 1,
            TemplateOutcome::PostPassLoss => template.post_pass_losses += 1,
            TemplateOutcome::PostPassWin => template.post_pass_wins += 1,
        }
        template.recompute_bounds();

        // A template that keeps blocking good trades gets benched.
        let fired = template.true_saves + template.false_vetoes;
        if template.false_vetoes >= self.config.false_veto_limit
            && fired > 0
            && (template.true_saves as f64 / fired as f64) < 0.5
        {
            template.cooldown_until = Some(now + Duration::days(self.config.cooldown_days));
            warn!(
                template = %template_id,
                false_vetoes = template.false_vetoes,
                true_saves = template.true_saves,
                "template benched for false vetoes"
            );
        }
        Ok(())
    }

    pub fn get(&self, template_id: &str) -> Option<&NoTradeTemplate> {
        self.templates.get(template_id)
    }

    pub fn summary(&self) -> VetoSummary {
        let mut summary = VetoSummary {
            templates: self.templates.len(),
            credible: 0,
            total_vetoes: 0,
            total_true_saves: 0,
            total_false_vetoes: 0,
        };
        for t in self.templates.values() {
            if t.loss_rate_lo95 >= self.config.min_loss_lb {
                summary.credible += 1;
            }
            summary.total_vetoes += t.vetoes;
            summary.total_true_saves += t.true_saves;
            summary.total_false_vetoes += t.false_vetoes;
        }
        summary
    }

    /// Drop templates with no activity inside the expiry horizon. Returns
    /// the number removed.
    pub fn clear_old_templates(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::days(self.config.expiry_days);
        let before = self.templates.len();
        self.templates.retain(|_, t| t.last_activity() >= cutoff);
        before - self.templates.len()
    }

    pub fn export(&self) -> VetoExport {
        VetoExport {
            export_timestamp: Utc::now(),
            templates: self.templates.values().cloned().collect(),
        }
    }

    /// Merge an exported snapshot under the same guardrails as the pattern
    /// memory: entries past the cap and stale entries are skipped, and on
    /// collision the template with more feedback wins.
    pub fn import(&mut self, export: &VetoExport, now: DateTime<Utc>) -> usize {
        let cap = self.config.import_max_entries;
        if export.templates.len() > cap {
            warn!(
                skipped = export.templates.len() - cap,
                cap, "veto template import truncated at the entry cap"
            );
        }
        let stale_cutoff = now - Duration::days(self.config.import_stale_days);
        let mut imported = 0;
        for incoming in export.templates.iter().take(cap) {
            if incoming.last_activity() < stale_cutoff {
                continue;
            }
            let incoming_feedback = incoming.true_saves
                + incoming.false_vetoes
                + incoming.post_pass_losses
                + incoming.post_pass_wins;
            let keep_existing = self.templates.get(&incoming.template_id).is_some_and(|e| {
                e.true_saves + e.false_vetoes + e.post_pass_losses + e.post_pass_wins
                    >= incoming_feedback
            });
            if !keep_existing {
                self.templates
                    .insert(incoming.template_id.clone(), incoming.clone());
                imported += 1;
            }
        }
        info!(imported, "veto template import finished");
        imported
    }
}
