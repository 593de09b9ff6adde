use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use feedback_core::{Candidate, Direction, FeatureBins, TradeRecord};

/// The binned feature identity of a setup. Two trades with the same key are
/// treated as the same pattern, so every field here must be categorical:
/// raw floats go through the bin thresholds first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintKey {
    pub setup_type: String,
    pub session: String,
    pub direction: Direction,
    pub atr_bin: String,
    pub volume_bin: String,
    pub ema_alignment: String,
    pub vwap_bin: String,
    /// Sorted, at most three. Sorting makes the key order-insensitive.
    pub top_confluences: Vec<String>,
    pub market_regime: String,
}

impl FingerprintKey {
    pub fn from_candidate(candidate: &Candidate, bins: &FeatureBins) -> Self {
        Self::build(
            &candidate.setup_type,
            &candidate.session,
            candidate.direction,
            candidate.atr_5m,
            candidate.volume_multiple,
            &candidate.ema_alignment,
            candidate.vwap_distance,
            &candidate.confluence_factors,
            &candidate.market_regime,
            bins,
        )
    }

    pub fn from_record(record: &TradeRecord, bins: &FeatureBins) -> Self {
        Self::build(
            &record.setup_type,
            &record.session,
            record.direction,
            record.atr_5m,
            record.volume_multiple,
            &record.ema_alignment,
            record.vwap_distance,
            &record.confluence_factors,
            &record.market_regime,
            bins,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        setup_type: &str,
        session: &str,
        direction: Direction,
        atr_5m: f64,
        volume_multiple: f64,
        ema_alignment: &str,
        vwap_distance: f64,
        confluence_factors: &[String],
        market_regime: &str,
        bins: &FeatureBins,
    ) -> Self {
        let mut top_confluences = confluence_factors.to_vec();
        top_confluences.sort();
        top_confluences.truncate(3);

        Self {
            setup_type: setup_type.to_string(),
            session: session.to_string(),
            direction,
            atr_bin: bins.bin_atr(atr_5m).to_string(),
            volume_bin: bins.bin_volume_multiple(volume_multiple).to_string(),
            ema_alignment: bins.bin_ema_alignment(ema_alignment).to_string(),
            vwap_bin: bins.bin_vwap_distance(vwap_distance).to_string(),
            top_confluences,
            market_regime: market_regime.to_string(),
        }
    }

    /// Stable id: "pattern_" plus the first 12 hex chars of the signature
    /// hash. Deterministic across runs and processes.
    pub fn pattern_id(&self) -> String {
        let digest = Sha256::digest(self.signature().as_bytes());
        format!("pattern_{}", &hex::encode(digest)[..12])
    }

    fn signature(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.setup_type,
            self.session,
            self.direction.as_str(),
            self.atr_bin,
            self.volume_bin,
            self.ema_alignment,
            self.vwap_bin,
            self.top_confluences.join(","),
            self.market_regime,
        )
    }
}
