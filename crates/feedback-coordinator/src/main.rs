use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tracing::{info, warn};

use feedback_core::{
    Bar, Candidate, Decision, DecisionOracle, Direction, FeedbackConfig, FeedbackError,
    OracleSnapshot, RequestStatus,
};
use feedback_coordinator::FeedbackCoordinator;

/// Stand-in oracle for dry runs: confidence tracks the prefilter score and
/// brackets come straight from the risk settings. Replace with a real
/// oracle client in deployment.
struct HeuristicOracle {
    config: FeedbackConfig,
}

#[async_trait]
impl DecisionOracle for HeuristicOracle {
    async fn decide(&self, snapshot: &OracleSnapshot) -> Result<Decision, FeedbackError> {
        let candidate = &snapshot.candidate;
        let confidence = (60.0 + candidate.prefilter_score * 0.4).clamp(0.0, 99.0) as u8;
        let entry = 5000.0;
        let sign = candidate.direction.sign();
        Ok(Decision {
            direction: candidate.direction,
            entry,
            sl: entry - sign * self.config.risk.sl,
            tp: entry + sign * self.config.risk.tp,
            confidence,
            reasoning: format!(
                "{} in {} regime, prefilter {:.0}",
                candidate.setup_type, candidate.market_regime, candidate.prefilter_score
            ),
            policy_id: "heuristic-v1".to_string(),
        })
    }
}

fn demo_candidate(i: usize) -> Candidate {
    Candidate {
        symbol: "MES".to_string(),
        setup_type: if i % 2 == 0 { "orb_breakout" } else { "vwap_fade" }.to_string(),
        session: "ny_open".to_string(),
        direction: if i % 2 == 0 {
            Direction::Long
        } else {
            Direction::Short
        },
        prefilter_score: 60.0 + (i % 5) as f64 * 8.0,
        atr_5m: 0.9 + (i % 3) as f64 * 0.3,
        volume_multiple: 1.6 + (i % 4) as f64 * 0.3,
        vwap_distance: 0.3,
        wickiness: 0.5,
        ema_alignment: if i % 2 == 0 {
            "bullish_aligned"
        } else {
            "bearish_aligned"
        }
        .to_string(),
        confluence_factors: vec!["vwap_reclaim".to_string(), "volume_surge".to_string()],
        risk_factors: vec![],
        market_regime: "trending".to_string(),
    }
}

/// Synthetic bar path: even trades run to the target, odd ones to the stop.
fn demo_bars(i: usize, direction: Direction) -> Vec<Bar> {
    let start = Utc::now() - ChronoDuration::minutes(20);
    let sign = direction.sign();
    let push = if i % 2 == 0 { 1.6 } else { -1.6 };
    vec![
        Bar {
            timestamp: start,
            open: 5000.1,
            high: 5000.1 + sign.max(0.0) * 0.2 + 0.1,
            low: 5000.1 + sign.min(0.0) * 0.2 - 0.1,
            close: 5000.1 + sign * 0.15,
            volume: 1200.0,
        },
        Bar {
            timestamp: start + ChronoDuration::minutes(1),
            open: 5000.1 + sign * 0.15,
            high: 5000.1 + (sign * push).max(0.0) + 0.1,
            low: 5000.1 + (sign * push).min(0.0) - 0.1,
            close: 5000.1 + sign * push,
            volume: 1500.0,
        },
    ]
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(env_filter()).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter()).init();
    }

    let config = FeedbackConfig::from_env()?;
    info!(
        daily_cap = config.budget.daily_call_cap,
        floor = config.calibrator.confidence_min,
        "feedback loop starting (dry run)"
    );

    let oracle = Arc::new(HeuristicOracle {
        config: config.clone(),
    });
    let coordinator = FeedbackCoordinator::new(config, oracle);

    for i in 0..8 {
        let candidate = demo_candidate(i);
        let request_id = match coordinator.submit_candidate(candidate.clone()).await {
            Ok(id) => id,
            Err(err) => {
                warn!(%err, "candidate not admitted");
                continue;
            }
        };
        let Some(request) = coordinator
            .wait_for_decision(&request_id, Duration::from_secs(5))
            .await
        else {
            continue;
        };
        if request.status != RequestStatus::Completed {
            continue;
        }
        let Some(decision) = request.decision else {
            continue;
        };

        let check = coordinator.pre_check(&candidate).await;
        if !check.passes(decision.confidence) {
            info!(
                confidence = decision.confidence,
                floor = check.floor,
                "decision below the confidence gate, skipped"
            );
            continue;
        }

        let bars = demo_bars(i, decision.direction);
        match coordinator.complete_trade(&candidate, &decision, &bars).await {
            Ok(record) => info!(
                trade = %record.trade_id,
                outcome = ?record.outcome,
                pnl_points = record.pnl_points,
                "trade simulated"
            ),
            Err(err) => warn!(%err, "trade simulation failed"),
        }
    }

    let summary = coordinator.performance_summary(20).await;
    info!(
        trades = summary.trades,
        wins = summary.wins,
        losses = summary.losses,
        total_pnl_points = summary.total_pnl_points,
        patterns = summary.patterns.total_patterns,
        templates = summary.vetoes.templates,
        "dry run finished"
    );

    coordinator.shutdown().await;
    Ok(())
}
