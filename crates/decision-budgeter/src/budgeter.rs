use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use feedback_core::{
    BudgetConfig, Candidate, Decision, DecisionOracle, FeedbackError, OracleSnapshot,
    RejectReason, RequestStatus,
};

/// One budgeted oracle request, from submission to a terminal state.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DecisionRequest {
    pub id: String,
    pub candidate: Candidate,
    pub status: RequestStatus,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub decision: Option<Decision>,
    pub error: Option<String>,
    pub reject_reason: Option<RejectReason>,
}

/// Counter snapshot for callers that want to know whether submitting is
/// worthwhile right now.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BudgetUsage {
    pub used_today: u32,
    pub daily_cap: u32,
    pub remaining: u32,
    pub paused: bool,
    pub pause_reason: Option<String>,
    pub session_losses: u32,
    /// Requests admitted but not yet picked up by the worker.
    pub queue_depth: usize,
    /// The request the worker is processing right now, if any.
    pub active_request_id: Option<String>,
}

/// Mutable budget counters, guarded by one mutex. The request index lives
/// outside this lock so status reads never contend with admissions.
pub(crate) struct BudgetState {
    pub(crate) used_today: u32,
    pub(crate) last_reset: NaiveDate,
    pub(crate) paused: bool,
    pub(crate) pause_reason: Option<String>,
    pub(crate) session_losses: u32,
    /// Recent trade outcomes (true = loss), bounded to the emergency window.
    pub(crate) recent_outcomes: VecDeque<bool>,
    /// Admitted request ids, oldest first, bounded by history_cap.
    pub(crate) history: VecDeque<String>,
}

impl BudgetState {
    fn new(today: NaiveDate) -> Self {
        Self {
            used_today: 0,
            last_reset: today,
            paused: false,
            pause_reason: None,
            session_losses: 0,
            recent_outcomes: VecDeque::new(),
            history: VecDeque::new(),
        }
    }

    /// Reset the daily counter when the UTC day has rolled over. A pause
    /// caused by cap exhaustion lifts with the roll; the emergency pause and
    /// session-loss counters survive it and need reset_session or an
    /// explicit resume.
    pub(crate) fn roll_day_if_needed(&mut self, today: NaiveDate) {
        if today != self.last_reset {
            info!(
                used = self.used_today,
                %today,
                "daily budget reset"
            );
            self.used_today = 0;
            self.last_reset = today;
            if self.pause_reason.as_deref() == Some("daily_cap_exceeded") {
                self.paused = false;
                self.pause_reason = None;
            }
        }
    }

    /// Admission check. Does not consume budget; the caller increments
    /// used_today only after a pass.
    fn admit(&mut self, cap: u32, today: NaiveDate) -> Result<(), RejectReason> {
        self.roll_day_if_needed(today);
        if self.paused {
            return Err(RejectReason::Paused {
                pause_reason: self
                    .pause_reason
                    .clone()
                    .unwrap_or_else(|| "unspecified".to_string()),
            });
        }
        if self.used_today >= cap {
            // Pause until the next UTC day so later submissions short-circuit.
            self.paused = true;
            self.pause_reason = Some("daily_cap_exceeded".to_string());
            return Err(RejectReason::DailyCapReached {
                used: self.used_today,
                cap,
            });
        }
        Ok(())
    }
}

struct Inner {
    config: BudgetConfig,
    oracle: Arc<dyn DecisionOracle>,
    state: Mutex<BudgetState>,
    requests: DashMap<String, DecisionRequest>,
}

impl Inner {
    fn mark(&self, id: &str, f: impl FnOnce(&mut DecisionRequest)) {
        if let Some(mut entry) = self.requests.get_mut(id) {
            // Terminal states are never mutated again.
            if !entry.status.is_terminal() {
                f(&mut entry);
            }
        }
    }
}

/// Serializes oracle calls through a single worker and enforces the daily
/// admission cap. Submissions are cheap; the expensive call happens on the
/// worker in FIFO order.
pub struct DecisionBudgeter {
    inner: Arc<Inner>,
    tx: mpsc::UnboundedSender<String>,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
    shutting_down: AtomicBool,
}

impl DecisionBudgeter {
    pub fn new(config: BudgetConfig, oracle: Arc<dyn DecisionOracle>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(Inner {
            config,
            oracle,
            state: Mutex::new(BudgetState::new(Utc::now().date_naive())),
            requests: DashMap::new(),
        });

        let worker = tokio::spawn(run_worker(inner.clone(), rx, shutdown_rx));

        Self {
            inner,
            tx,
            shutdown_tx,
            worker: Mutex::new(Some(worker)),
            next_id: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Submit a candidate for an oracle decision. Consumes one unit of the
    /// daily budget on admission; returns the request id for status polling.
    /// A rejection at the gate still gets an id and a history entry so it
    /// shows up in `recent()`.
    pub async fn submit(&self, candidate: Candidate) -> Result<String, FeedbackError> {
        candidate.validate()?;

        let now = Utc::now();
        let mut state = self.inner.state.lock().await;
        let gate = if self.shutting_down.load(Ordering::SeqCst) {
            Err(RejectReason::ShuttingDown)
        } else {
            state.admit(self.inner.config.daily_call_cap, now.date_naive())
        };
        if gate.is_ok() {
            state.used_today += 1;
        }

        let seq = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("req_{:06}", seq);
        state.history.push_back(id.clone());

        // Trim to half the cap so trims are rare, and drop the evicted
        // requests from the index with them.
        if state.history.len() > self.inner.config.history_cap {
            let keep = self.inner.config.history_cap / 2;
            while state.history.len() > keep {
                if let Some(old) = state.history.pop_front() {
                    self.inner.requests.remove(&old);
                }
            }
        }
        drop(state);

        let mut request = DecisionRequest {
            id: id.clone(),
            candidate,
            status: RequestStatus::Pending,
            submitted_at: now,
            completed_at: None,
            decision: None,
            error: None,
            reject_reason: None,
        };

        match gate {
            Err(reason) => {
                request.status = RequestStatus::Rejected;
                request.reject_reason = Some(reason.clone());
                request.completed_at = Some(now);
                self.inner.requests.insert(id.clone(), request);
                debug!(request = %id, %reason, "decision request rejected at the gate");
                Err(FeedbackError::BudgetRejected(reason))
            }
            Ok(()) => {
                self.inner.requests.insert(id.clone(), request);
                self.tx
                    .send(id.clone())
                    .map_err(|_| FeedbackError::Oracle("decision worker is gone".to_string()))?;
                debug!(request = %id, "decision request queued");
                Ok(id)
            }
        }
    }

    /// Current state of a request, admitted or already terminal.
    pub fn status(&self, id: &str) -> Option<DecisionRequest> {
        self.inner.requests.get(id).map(|r| r.clone())
    }

    /// Poll a request until it reaches a terminal state or the deadline
    /// passes. Returns the last observed state either way.
    pub async fn wait_for(&self, id: &str, timeout: Duration) -> Option<DecisionRequest> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let current = self.status(id)?;
            if current.status.is_terminal() {
                return Some(current);
            }
            if tokio::time::Instant::now() >= deadline {
                return Some(current);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn usage(&self) -> BudgetUsage {
        let mut queue_depth = 0;
        let mut active_request_id = None;
        for request in self.inner.requests.iter() {
            match request.status {
                RequestStatus::Pending => queue_depth += 1,
                RequestStatus::Processing => active_request_id = Some(request.id.clone()),
                _ => {}
            }
        }

        let mut state = self.inner.state.lock().await;
        state.roll_day_if_needed(Utc::now().date_naive());
        BudgetUsage {
            used_today: state.used_today,
            daily_cap: self.inner.config.daily_call_cap,
            remaining: self.inner.config.daily_call_cap.saturating_sub(state.used_today),
            paused: state.paused,
            pause_reason: state.pause_reason.clone(),
            session_losses: state.session_losses,
            queue_depth,
            active_request_id,
        }
    }

    /// Most recent admitted requests, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<DecisionRequest> {
        let state = self.inner.state.lock().await;
        state
            .history
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| self.inner.requests.get(id).map(|r| r.clone()))
            .collect()
    }

    pub async fn pause(&self, reason: &str) {
        let mut state = self.inner.state.lock().await;
        state.paused = true;
        state.pause_reason = Some(reason.to_string());
        warn!(reason, "decision budget paused");
    }

    pub async fn resume(&self) {
        let mut state = self.inner.state.lock().await;
        state.paused = false;
        state.pause_reason = None;
        info!("decision budget resumed");
    }

    /// Feed a completed trade outcome into the emergency-pause window. Trips
    /// the pause when losses inside the window reach the threshold.
    pub async fn record_trade_outcome(&self, is_loss: bool) {
        let mut state = self.inner.state.lock().await;
        if is_loss {
            state.session_losses += 1;
        }
        state.recent_outcomes.push_back(is_loss);
        while state.recent_outcomes.len() > self.inner.config.emergency_window {
            state.recent_outcomes.pop_front();
        }
        let window_losses = state.recent_outcomes.iter().filter(|l| **l).count() as u32;
        // A cap pause lifts at the day roll, so a loss streak upgrades it.
        let can_trip = !state.paused
            || state.pause_reason.as_deref() == Some("daily_cap_exceeded");
        if can_trip && window_losses >= self.inner.config.emergency_loss_threshold {
            state.paused = true;
            state.pause_reason = Some("emergency_loss_streak".to_string());
            warn!(
                window_losses,
                threshold = self.inner.config.emergency_loss_threshold,
                "emergency pause tripped"
            );
        }
    }

    /// Clear session-loss tracking. Also lifts the pause when it was tripped
    /// by the loss streak (a manual pause stays until resume).
    pub async fn reset_session(&self) {
        let mut state = self.inner.state.lock().await;
        state.session_losses = 0;
        state.recent_outcomes.clear();
        if state.pause_reason.as_deref() == Some("emergency_loss_streak") {
            state.paused = false;
            state.pause_reason = None;
        }
    }

    /// Stop accepting work, mark everything still queued as rejected, and
    /// join the worker with a bounded wait.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);

        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            let join_timeout = Duration::from_millis(self.inner.config.shutdown_join_ms);
            if tokio::time::timeout(join_timeout, handle).await.is_err() {
                warn!("decision worker did not stop within the join timeout");
            }
        }
    }
}

async fn run_worker(
    inner: Arc<Inner>,
    mut rx: mpsc::UnboundedReceiver<String>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                // Drain: anything still queued is rejected, not dropped.
                while let Ok(id) = rx.try_recv() {
                    inner.mark(&id, |req| {
                        req.status = RequestStatus::Rejected;
                        req.reject_reason = Some(RejectReason::ShuttingDown);
                        req.completed_at = Some(Utc::now());
                    });
                }
                break;
            }
            maybe_id = rx.recv() => {
                let Some(id) = maybe_id else { break };
                handle_request(&inner, &id).await;
            }
        }
    }
    debug!("decision worker stopped");
}

async fn handle_request(inner: &Arc<Inner>, id: &str) {
    // Conditions may have changed while the request sat in the queue, so
    // the pause flag is re-checked at dequeue time. The daily cap was
    // consumed at admission and is not re-checked here.
    {
        let mut state = inner.state.lock().await;
        state.roll_day_if_needed(Utc::now().date_naive());
        if state.paused {
            let pause_reason = state
                .pause_reason
                .clone()
                .unwrap_or_else(|| "unspecified".to_string());
            drop(state);
            inner.mark(id, |req| {
                req.status = RequestStatus::Rejected;
                req.reject_reason = Some(RejectReason::Paused { pause_reason });
                req.completed_at = Some(Utc::now());
            });
            return;
        }
    }

    let Some(candidate) = inner.requests.get(id).map(|r| r.candidate.clone()) else {
        return;
    };

    inner.mark(id, |req| req.status = RequestStatus::Processing);

    let snapshot = OracleSnapshot::new(candidate);
    let verdict = inner.oracle.decide(&snapshot).await;

    match verdict.and_then(|decision| decision.validate().map(|_| decision)) {
        Ok(decision) => {
            info!(
                request = %id,
                confidence = decision.confidence,
                direction = decision.direction.as_str(),
                "oracle decision completed"
            );
            inner.mark(id, |req| {
                req.status = RequestStatus::Completed;
                req.decision = Some(decision);
                req.completed_at = Some(Utc::now());
            });
        }
        Err(err) => {
            warn!(request = %id, error = %err, "oracle decision failed");
            inner.mark(id, |req| {
                req.status = RequestStatus::Failed;
                req.error = Some(err.to_string());
                req.completed_at = Some(Utc::now());
            });
        }
    }
}
