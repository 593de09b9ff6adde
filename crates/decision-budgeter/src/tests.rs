use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use feedback_core::{
    BudgetConfig, Candidate, Decision, DecisionOracle, Direction, FeedbackError, OracleSnapshot,
    RejectReason, RequestStatus,
};

use crate::budgeter::{BudgetState, DecisionBudgeter};

fn candidate() -> Candidate {
    Candidate {
        symbol: "MES".to_string(),
        setup_type: "orb_breakout".to_string(),
        session: "ny_open".to_string(),
        direction: Direction::Long,
        prefilter_score: 72.0,
        atr_5m: 1.1,
        volume_multiple: 1.8,
        vwap_distance: 0.4,
        wickiness: 0.5,
        ema_alignment: "bullish_aligned".to_string(),
        confluence_factors: vec!["vwap_reclaim".to_string()],
        risk_factors: vec![],
        market_regime: "trending".to_string(),
    }
}

struct MockOracle {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
    mode: Mode,
}

enum Mode {
    Ok,
    Fail,
    InvalidBrackets,
}

impl MockOracle {
    fn new(mode: Mode, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            delay,
            mode,
        })
    }
}

#[async_trait]
impl DecisionOracle for MockOracle {
    async fn decide(&self, snapshot: &OracleSnapshot) -> Result<Decision, FeedbackError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let concurrent = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(concurrent, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.mode {
            Mode::Fail => Err(FeedbackError::Oracle("upstream timeout".to_string())),
            Mode::InvalidBrackets => Ok(Decision {
                direction: snapshot.candidate.direction,
                entry: 5000.0,
                sl: 5001.0,
                tp: 5001.25,
                confidence: 90,
                reasoning: "bad brackets".to_string(),
                policy_id: "p1".to_string(),
            }),
            Mode::Ok => Ok(Decision {
                direction: snapshot.candidate.direction,
                entry: 5000.0,
                sl: 4998.75,
                tp: 5001.0,
                confidence: 88,
                reasoning: "clean breakout".to_string(),
                policy_id: "p1".to_string(),
            }),
        }
    }
}

fn config(cap: u32) -> BudgetConfig {
    BudgetConfig {
        daily_call_cap: cap,
        ..BudgetConfig::default()
    }
}

#[tokio::test]
async fn submitted_request_completes_with_a_decision() {
    let oracle = MockOracle::new(Mode::Ok, Duration::ZERO);
    let budgeter = DecisionBudgeter::new(config(5), oracle.clone());

    let id = budgeter.submit(candidate()).await.unwrap();
    let done = budgeter.wait_for(&id, Duration::from_secs(1)).await.unwrap();

    assert_eq!(done.status, RequestStatus::Completed);
    assert_eq!(done.decision.as_ref().unwrap().confidence, 88);
    assert!(done.completed_at.is_some());
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);

    budgeter.shutdown().await;
}

#[tokio::test]
async fn daily_cap_rejects_the_overflow_submission() {
    let oracle = MockOracle::new(Mode::Ok, Duration::ZERO);
    let budgeter = DecisionBudgeter::new(config(2), oracle.clone());

    budgeter.submit(candidate()).await.unwrap();
    budgeter.submit(candidate()).await.unwrap();
    let err = budgeter.submit(candidate()).await.unwrap_err();

    assert!(matches!(
        err,
        FeedbackError::BudgetRejected(RejectReason::DailyCapReached { used: 2, cap: 2 })
    ));

    let usage = budgeter.usage().await;
    assert_eq!(usage.used_today, 2);
    assert_eq!(usage.remaining, 0);
    budgeter.shutdown().await;
}

#[tokio::test]
async fn oracle_calls_are_serialized() {
    let oracle = MockOracle::new(Mode::Ok, Duration::from_millis(20));
    let budgeter = DecisionBudgeter::new(config(5), oracle.clone());

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(budgeter.submit(candidate()).await.unwrap());
    }
    for id in &ids {
        let done = budgeter.wait_for(id, Duration::from_secs(2)).await.unwrap();
        assert_eq!(done.status, RequestStatus::Completed);
    }

    assert_eq!(oracle.max_in_flight.load(Ordering::SeqCst), 1);
    budgeter.shutdown().await;
}

#[tokio::test]
async fn oracle_failure_marks_request_failed_but_spends_budget() {
    let oracle = MockOracle::new(Mode::Fail, Duration::ZERO);
    let budgeter = DecisionBudgeter::new(config(5), oracle);

    let id = budgeter.submit(candidate()).await.unwrap();
    let done = budgeter.wait_for(&id, Duration::from_secs(1)).await.unwrap();

    assert_eq!(done.status, RequestStatus::Failed);
    assert!(done.error.as_ref().unwrap().contains("upstream timeout"));
    // The attempt still consumed one admission.
    assert_eq!(budgeter.usage().await.used_today, 1);
    budgeter.shutdown().await;
}

#[tokio::test]
async fn invalid_oracle_brackets_mark_request_failed() {
    let oracle = MockOracle::new(Mode::InvalidBrackets, Duration::ZERO);
    let budgeter = DecisionBudgeter::new(config(5), oracle);

    let id = budgeter.submit(candidate()).await.unwrap();
    let done = budgeter.wait_for(&id, Duration::from_secs(1)).await.unwrap();

    assert_eq!(done.status, RequestStatus::Failed);
    assert!(done.error.as_ref().unwrap().contains("bracket"));
    budgeter.shutdown().await;
}

#[tokio::test]
async fn pause_blocks_submissions_until_resume() {
    let oracle = MockOracle::new(Mode::Ok, Duration::ZERO);
    let budgeter = DecisionBudgeter::new(config(5), oracle);

    budgeter.pause("manual review").await;
    let err = budgeter.submit(candidate()).await.unwrap_err();
    assert!(matches!(
        err,
        FeedbackError::BudgetRejected(RejectReason::Paused { .. })
    ));

    budgeter.resume().await;
    assert!(budgeter.submit(candidate()).await.is_ok());
    budgeter.shutdown().await;
}

#[tokio::test]
async fn loss_streak_trips_the_emergency_pause() {
    let oracle = MockOracle::new(Mode::Ok, Duration::ZERO);
    let budgeter = DecisionBudgeter::new(config(5), oracle);

    budgeter.record_trade_outcome(true).await;
    assert!(!budgeter.usage().await.paused);

    budgeter.record_trade_outcome(true).await;
    let usage = budgeter.usage().await;
    assert!(usage.paused);
    assert_eq!(usage.pause_reason.as_deref(), Some("emergency_loss_streak"));
    assert_eq!(usage.session_losses, 2);

    // Clearing the session lifts the emergency pause.
    budgeter.reset_session().await;
    let usage = budgeter.usage().await;
    assert!(!usage.paused);
    assert_eq!(usage.session_losses, 0);
    budgeter.shutdown().await;
}

#[tokio::test]
async fn wins_push_losses_out_of_the_emergency_window() {
    let oracle = MockOracle::new(Mode::Ok, Duration::ZERO);
    // Window of 3: loss, win, win leaves only one loss in the window.
    let budgeter = DecisionBudgeter::new(config(5), oracle);

    budgeter.record_trade_outcome(true).await;
    budgeter.record_trade_outcome(false).await;
    budgeter.record_trade_outcome(false).await;
    budgeter.record_trade_outcome(true).await;

    assert!(!budgeter.usage().await.paused);
    budgeter.shutdown().await;
}

#[tokio::test]
async fn shutdown_rejects_new_submissions() {
    let oracle = MockOracle::new(Mode::Ok, Duration::ZERO);
    let budgeter = DecisionBudgeter::new(config(5), oracle);

    budgeter.shutdown().await;
    let err = budgeter.submit(candidate()).await.unwrap_err();
    assert!(matches!(
        err,
        FeedbackError::BudgetRejected(RejectReason::ShuttingDown)
    ));
}

#[tokio::test]
async fn gate_rejections_land_in_the_request_history() {
    let oracle = MockOracle::new(Mode::Ok, Duration::ZERO);
    let budgeter = DecisionBudgeter::new(config(1), oracle);

    let ok_id = budgeter.submit(candidate()).await.unwrap();
    budgeter.wait_for(&ok_id, Duration::from_secs(1)).await.unwrap();
    let err = budgeter.submit(candidate()).await.unwrap_err();
    assert!(matches!(
        err,
        FeedbackError::BudgetRejected(RejectReason::DailyCapReached { used: 1, cap: 1 })
    ));

    // The rejection is visible in the monitoring surface, not just the error.
    let recent = budgeter.recent(10).await;
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].status, RequestStatus::Rejected);
    assert!(matches!(
        recent[0].reject_reason,
        Some(RejectReason::DailyCapReached { used: 1, cap: 1 })
    ));
    assert!(recent[0].completed_at.is_some());
    assert_eq!(recent[1].id, ok_id);
    budgeter.shutdown().await;
}

#[tokio::test]
async fn usage_reports_queue_depth_and_the_active_request() {
    let oracle = MockOracle::new(Mode::Ok, Duration::from_millis(200));
    let budgeter = DecisionBudgeter::new(config(5), oracle);

    let first = budgeter.submit(candidate()).await.unwrap();
    let second = budgeter.submit(candidate()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The worker holds the first request; the second waits its turn.
    let usage = budgeter.usage().await;
    assert_eq!(usage.active_request_id.as_deref(), Some(first.as_str()));
    assert_eq!(usage.queue_depth, 1);

    budgeter
        .wait_for(&second, Duration::from_secs(2))
        .await
        .unwrap();
    let usage = budgeter.usage().await;
    assert_eq!(usage.queue_depth, 0);
    assert!(usage.active_request_id.is_none());
    budgeter.shutdown().await;
}

#[tokio::test]
async fn recent_returns_newest_first() {
    let oracle = MockOracle::new(Mode::Ok, Duration::ZERO);
    let budgeter = DecisionBudgeter::new(config(5), oracle);

    let a = budgeter.submit(candidate()).await.unwrap();
    let b = budgeter.submit(candidate()).await.unwrap();
    budgeter.wait_for(&b, Duration::from_secs(1)).await.unwrap();

    let recent = budgeter.recent(10).await;
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].id, b);
    assert_eq!(recent[1].id, a);
    budgeter.shutdown().await;
}

#[test]
fn day_roll_resets_the_counter_but_not_the_session() {
    let mut state = BudgetState {
        used_today: 5,
        last_reset: NaiveDate::from_ymd_opt(2025, 1, 20).unwrap(),
        paused: true,
        pause_reason: Some("emergency_loss_streak".to_string()),
        session_losses: 2,
        recent_outcomes: VecDeque::from(vec![true, true]),
        history: VecDeque::new(),
    };

    // Same day: nothing changes.
    state.roll_day_if_needed(NaiveDate::from_ymd_opt(2025, 1, 20).unwrap());
    assert_eq!(state.used_today, 5);

    // New UTC day: counter resets, pause and session losses survive.
    state.roll_day_if_needed(NaiveDate::from_ymd_opt(2025, 1, 21).unwrap());
    assert_eq!(state.used_today, 0);
    assert!(state.paused);
    assert_eq!(state.session_losses, 2);
}

#[test]
fn day_roll_lifts_a_cap_pause() {
    let mut state = BudgetState {
        used_today: 5,
        last_reset: NaiveDate::from_ymd_opt(2025, 1, 20).unwrap(),
        paused: true,
        pause_reason: Some("daily_cap_exceeded".to_string()),
        session_losses: 0,
        recent_outcomes: VecDeque::new(),
        history: VecDeque::new(),
    };

    state.roll_day_if_needed(NaiveDate::from_ymd_opt(2025, 1, 21).unwrap());
    assert_eq!(state.used_today, 0);
    assert!(!state.paused);
    assert!(state.pause_reason.is_none());
}

#[tokio::test]
async fn cap_exhaustion_pauses_until_the_next_day() {
    let oracle = MockOracle::new(Mode::Ok, Duration::ZERO);
    let budgeter = DecisionBudgeter::new(config(1), oracle);

    budgeter.submit(candidate()).await.unwrap();
    let err = budgeter.submit(candidate()).await.unwrap_err();
    assert!(matches!(
        err,
        FeedbackError::BudgetRejected(RejectReason::DailyCapReached { used: 1, cap: 1 })
    ));

    let usage = budgeter.usage().await;
    assert!(usage.paused);
    assert_eq!(usage.pause_reason.as_deref(), Some("daily_cap_exceeded"));

    // Later submissions short-circuit on the pause flag.
    let err = budgeter.submit(candidate()).await.unwrap_err();
    assert!(matches!(
        err,
        FeedbackError::BudgetRejected(RejectReason::Paused { .. })
    ));
    budgeter.shutdown().await;
}
