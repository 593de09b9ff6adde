use chrono::{DateTime, Utc};
use tracing::debug;

use feedback_core::{Bar, Direction, ExitReason, FeedbackError, MarketConfig, RiskConfig, TradeResult};

/// Bracket-order trade simulator with realistic fills.
///
/// Pure with respect to its inputs: the same (entry price, direction, bars)
/// always produce the same result. All prices are in points.
pub struct TradeSimulator {
    risk: RiskConfig,
    market: MarketConfig,
}

/// Mutable trade state carried across bars.
struct TradeState {
    fill_price: f64,
    current_sl: f64,
    tp: f64,
    be_moved: bool,
    trail_active: bool,
    mae: f64,
    mfe: f64,
    time_to_breakeven_secs: Option<i64>,
    time_to_target_secs: Option<i64>,
    entry_slippage: f64,
}

impl TradeSimulator {
    pub fn new(risk: RiskConfig, market: MarketConfig) -> Self {
        Self { risk, market }
    }

    /// Simulate one complete trade with bracket orders.
    ///
    /// `bars` must be non-empty OHLC data starting at or after `entry_time`.
    /// Malformed bars abort this trade only, not the caller's batch.
    pub fn simulate(
        &self,
        entry_price: f64,
        entry_time: DateTime<Utc>,
        direction: Direction,
        bars: &[Bar],
    ) -> Result<TradeResult, FeedbackError> {
        let first = bars
            .first()
            .ok_or_else(|| FeedbackError::Simulation("empty bar data".to_string()))?;
        for bar in bars {
            bar.validate()?;
        }

        // Fill first, then brackets: levels are anchored to the actual
        // slipped fill price, not the requested entry.
        let entry_slippage = self.entry_slippage(first);
        let fill_price = entry_price + direction.sign() * entry_slippage;
        let sign = direction.sign();

        let mut state = TradeState {
            fill_price,
            current_sl: fill_price - sign * self.risk.sl,
            tp: fill_price + sign * self.risk.tp,
            be_moved: false,
            trail_active: false,
            mae: 0.0,
            mfe: 0.0,
            time_to_breakeven_secs: None,
            time_to_target_secs: None,
            entry_slippage,
        };

        debug!(
            fill = fill_price,
            tp = state.tp,
            sl = state.current_sl,
            direction = direction.as_str(),
            "trade filled"
        );

        for bar in bars {
            // Timeout is checked before the bar is processed: a stale trade
            // exits at this bar's close, not at a bracket level.
            if (bar.timestamp - entry_time).num_seconds() >= self.risk.timeout_minutes * 60 {
                return Ok(self.finish(
                    &state,
                    entry_time,
                    bar.timestamp,
                    bar.close,
                    ExitReason::Timeout,
                    direction,
                ));
            }

            if let Some(result) = self.process_bar(bar, &mut state, direction, entry_time) {
                return Ok(result);
            }
        }

        // Brackets never fired: force-close at the last known close.
        let last = bars.last().ok_or_else(|| {
            FeedbackError::Simulation("empty bar data".to_string())
        })?;
        Ok(self.finish(
            &state,
            entry_time,
            last.timestamp,
            last.close,
            ExitReason::Manual,
            direction,
        ))
    }

    /// Entry slippage in points, against the trader. Widens 1.5x when the
    /// first bar's spread signals thin or fast conditions.
    fn entry_slippage(&self, first_bar: &Bar) -> f64 {
        let mut slippage = self.market.base_slippage_ticks * self.market.tick_size;
        if first_bar.high - first_bar.low > self.market.wide_spread_threshold {
            slippage *= 1.5;
        }
        slippage
    }

    fn process_bar(
        &self,
        bar: &Bar,
        state: &mut TradeState,
        direction: Direction,
        entry_time: DateTime<Utc>,
    ) -> Option<TradeResult> {
        let sign = direction.sign();

        // (a) Running excursions from the fill.
        let favorable = match direction {
            Direction::Long => bar.high - state.fill_price,
            Direction::Short => state.fill_price - bar.low,
        };
        let adverse = match direction {
            Direction::Long => state.fill_price - bar.low,
            Direction::Short => bar.high - state.fill_price,
        };
        state.mfe = state.mfe.max(favorable);
        state.mae = state.mae.max(adverse);

        // (b) Breakeven move.
        if !state.be_moved && favorable >= self.risk.move_to_be_at {
            state.current_sl = state.fill_price;
            state.be_moved = true;
            state.time_to_breakeven_secs = Some((bar.timestamp - entry_time).num_seconds());
        }

        // (c) Trailing activates only after the stop is at breakeven.
        if !state.trail_active && state.be_moved && favorable >= self.risk.trail_after {
            state.trail_active = true;
        }

        // (d) Ratchet the trailing stop, monotonically favorable only.
        if state.trail_active {
            match direction {
                Direction::Long => {
                    state.current_sl = state.current_sl.max(bar.high - self.risk.trail_distance)
                }
                Direction::Short => {
                    state.current_sl = state.current_sl.min(bar.low + self.risk.trail_distance)
                }
            }
        }

        // (e) Intrabar execution: walk Open -> (Low,High ordered by whether
        // the bar closed up or down) -> Close, resolving the first trigger.
        for price in intrabar_path(bar) {
            let stop_hit = sign * (price - state.current_sl) <= 0.0;
            if stop_hit {
                let reason = if state.trail_active {
                    ExitReason::TrailingStop
                } else if state.be_moved {
                    ExitReason::Breakeven
                } else {
                    ExitReason::StopLoss
                };
                return Some(self.finish(
                    state,
                    entry_time,
                    bar.timestamp,
                    state.current_sl,
                    reason,
                    direction,
                ));
            }

            let target_hit = sign * (price - state.tp) >= 0.0;
            if target_hit {
                state.time_to_target_secs = Some((bar.timestamp - entry_time).num_seconds());
                return Some(self.finish(
                    state,
                    entry_time,
                    bar.timestamp,
                    state.tp,
                    ExitReason::TakeProfit,
                    direction,
                ));
            }
        }

        None
    }

    /// Assemble the final result, applying exit slippage and the cost model.
    fn finish(
        &self,
        state: &TradeState,
        entry_time: DateTime<Utc>,
        exit_time: DateTime<Utc>,
        raw_exit_price: f64,
        exit_reason: ExitReason,
        direction: Direction,
    ) -> TradeResult {
        let sign = direction.sign();
        let mut exit_price = raw_exit_price;

        // Stop-type and timeout exits fill as market orders and pay exit
        // slippage; a resting target order does not.
        let exit_slippage = if exit_reason.is_market_exit() {
            self.market.base_slippage_ticks * self.market.tick_size
        } else {
            0.0
        };
        exit_price -= sign * exit_slippage;

        let gross_pnl_points = sign * (exit_price - state.fill_price);
        let gross_pnl_dollars = gross_pnl_points * self.market.contract_size;
        let net_pnl_dollars = gross_pnl_dollars - self.market.commission_per_trade;
        let commission_points = self.market.commission_per_trade / self.market.contract_size;
        let net_pnl_points = gross_pnl_points - commission_points;

        TradeResult {
            entry_price: state.fill_price,
            exit_price,
            entry_time,
            exit_time,
            direction,
            exit_reason,
            gross_pnl_points,
            net_pnl_points,
            net_pnl_dollars,
            mae: state.mae,
            mfe: state.mfe,
            time_to_target_secs: state.time_to_target_secs,
            time_to_breakeven_secs: state.time_to_breakeven_secs,
            slippage_points: state.entry_slippage + exit_slippage,
            commission_paid: self.market.commission_per_trade,
        }
    }
}

/// Approximate intrabar price path. An up-close bar is assumed to trade its
/// low before its high; a down-close bar the reverse.
fn intrabar_path(bar: &Bar) -> Vec<f64> {
    let mut prices = vec![bar.open];
    if bar.high != bar.open && bar.low != bar.open {
        if bar.close > bar.open {
            prices.push(bar.low);
            prices.push(bar.high);
        } else {
            prices.push(bar.high);
            prices.push(bar.low);
        }
    } else if bar.high != bar.open {
        prices.push(bar.high);
    } else if bar.low != bar.open {
        prices.push(bar.low);
    }
    prices.push(bar.close);
    prices
}
