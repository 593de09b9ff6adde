use chrono::{DateTime, Duration, TimeZone, Utc};

use feedback_core::{Bar, Direction, ExitReason, MarketConfig, RiskConfig};

use crate::simulator::TradeSimulator;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 20, 14, 30, 0).unwrap()
}

/// Helper: a bar `secs` after entry with the given OHLC.
fn bar(secs: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
    Bar {
        timestamp: t0() + Duration::seconds(secs),
        open,
        high,
        low,
        close,
        volume: 1000.0,
    }
}

/// Risk config with breakeven/trailing pushed out of reach, so tests can
/// exercise the plain TP/SL brackets in isolation.
fn risk_brackets_only() -> RiskConfig {
    RiskConfig {
        tp: 1.0,
        sl: 1.25,
        move_to_be_at: 10.0,
        trail_after: 10.0,
        trail_distance: 0.5,
        timeout_minutes: 15,
    }
}

fn risk_full() -> RiskConfig {
    RiskConfig {
        tp: 1.0,
        sl: 1.25,
        move_to_be_at: 0.5,
        trail_after: 0.75,
        trail_distance: 0.5,
        timeout_minutes: 15,
    }
}

fn sim(risk: RiskConfig) -> TradeSimulator {
    TradeSimulator::new(risk, MarketConfig::default())
}

// =============================================================================
// Fill, brackets, and take-profit (reference scenario)
// =============================================================================

#[test]
fn long_fill_slips_against_trader_and_hits_target() {
    // Long at 5000.00 with 0.25 base slippage: filled 5000.25,
    // tp = 5001.25, initial_sl = 4999.00. The bar reaches the target
    // before the stop, so the exit is a clean take-profit of 1.00 gross.
    let simulator = sim(risk_brackets_only());
    let bars = vec![bar(60, 5000.5, 5001.25, 4999.5, 5001.0)];

    let result = simulator
        .simulate(5000.0, t0(), Direction::Long, &bars)
        .unwrap();

    assert_eq!(result.entry_price, 5000.25);
    assert_eq!(result.exit_reason, ExitReason::TakeProfit);
    assert!((result.gross_pnl_points - 1.0).abs() < 1e-9);
    assert_eq!(result.exit_price, 5001.25);
    assert_eq!(result.time_to_target_secs, Some(60));
    // Target fills at the resting order, no exit slippage.
    assert!((result.slippage_points - 0.25).abs() < 1e-9);
}

#[test]
fn bracket_ordering_holds_for_both_directions() {
    let simulator = sim(risk_brackets_only());

    let long = simulator
        .simulate(5000.0, t0(), Direction::Long, &[bar(60, 5000.5, 5001.25, 4999.5, 5001.0)])
        .unwrap();
    // initial_sl < fill < tp for a long
    assert!(5000.25 - 1.25 < long.entry_price && long.entry_price < 5000.25 + 1.0);

    let short = simulator
        .simulate(5000.0, t0(), Direction::Short, &[bar(60, 4999.5, 4999.6, 4998.7, 4998.8)])
        .unwrap();
    // Short fills below the requested entry, tp below fill, sl above.
    assert_eq!(short.entry_price, 4999.75);
    assert_eq!(short.exit_reason, ExitReason::TakeProfit);
    assert!((short.gross_pnl_points - 1.0).abs() < 1e-9);
}

// =============================================================================
// Intrabar path ordering: the bar's close decides which extreme trades first
// =============================================================================

#[test]
fn down_close_bar_trades_high_before_low() {
    // Bar spans both the target and the stop. It closed down, so the high
    // is reached first and the target fires.
    let simulator = sim(risk_brackets_only());
    let bars = vec![bar(60, 5000.5, 5001.3, 4998.9, 4999.0)];

    let result = simulator
        .simulate(5000.0, t0(), Direction::Long, &bars)
        .unwrap();
    assert_eq!(result.exit_reason, ExitReason::TakeProfit);
}

#[test]
fn up_close_bar_trades_low_before_high() {
    // Same price span, but an up-close bar dips first: the stop fires.
    let simulator = sim(risk_brackets_only());
    let bars = vec![bar(60, 5000.5, 5001.3, 4998.9, 5001.2)];

    let result = simulator
        .simulate(5000.0, t0(), Direction::Long, &bars)
        .unwrap();
    assert_eq!(result.exit_reason, ExitReason::StopLoss);
    // Stop exits pay exit slippage: 4999.00 - 0.25.
    assert_eq!(result.exit_price, 4998.75);
    assert!((result.slippage_points - 0.5).abs() < 1e-9);
}

// =============================================================================
// Stop lifecycle: initial stop, breakeven move, trailing ratchet
// =============================================================================

#[test]
fn stop_loss_records_mae_and_zero_mfe() {
    let simulator = sim(risk_brackets_only());
    let bars = vec![bar(60, 5000.0, 5000.1, 4998.5, 4998.6)];

    let result = simulator
        .simulate(5000.0, t0(), Direction::Long, &bars)
        .unwrap();
    assert_eq!(result.exit_reason, ExitReason::StopLoss);
    assert!((result.mae - 1.75).abs() < 1e-9);
    assert_eq!(result.mfe, 0.0);
    assert!(result.net_pnl_points < result.gross_pnl_points);
}

#[test]
fn breakeven_move_reclassifies_the_stop() {
    let simulator = sim(risk_full());
    let bars = vec![
        // Favorable excursion 0.55 >= 0.5: stop moves to the fill.
        bar(60, 5000.3, 5000.8, 5000.3, 5000.7),
        // Pullback through the fill exits at breakeven.
        bar(120, 5000.6, 5000.7, 5000.0, 5000.1),
    ];

    let result = simulator
        .simulate(5000.0, t0(), Direction::Long, &bars)
        .unwrap();
    assert_eq!(result.exit_reason, ExitReason::Breakeven);
    assert_eq!(result.time_to_breakeven_secs, Some(60));
    // Exit at the moved stop (5000.25) minus exit slippage.
    assert_eq!(result.exit_price, 5000.0);
}

#[test]
fn trailing_stop_ratchets_up_and_never_down() {
    let simulator = sim(risk_full());
    let bars = vec![
        // 0.65 favorable: breakeven only, trailing not yet armed.
        bar(60, 5000.5, 5000.9, 5000.4, 5000.8),
        // 0.90 favorable: trailing activates, stop ratchets to 5000.65.
        bar(120, 5000.9, 5001.15, 5000.85, 5001.1),
        // Lower high would ratchet the stop down; it must not. The dip to
        // 5000.5 takes out the trailing stop at 5000.65.
        bar(180, 5001.0, 5001.05, 5000.5, 5000.6),
    ];

    let result = simulator
        .simulate(5000.0, t0(), Direction::Long, &bars)
        .unwrap();
    assert_eq!(result.exit_reason, ExitReason::TrailingStop);
    // 5000.65 stop minus exit slippage.
    assert!((result.exit_price - 5000.4).abs() < 1e-9);
    assert!(result.gross_pnl_points > 0.0);
}

// =============================================================================
// Timeout and forced close
// =============================================================================

#[test]
fn timeout_exits_at_bar_close_before_processing() {
    let simulator = sim(risk_brackets_only());
    let bars = vec![
        bar(60, 5000.3, 5000.4, 5000.2, 5000.35),
        // 16 minutes in: past the 15 minute timeout. Exit at this bar's
        // close even though the bar itself is benign.
        bar(16 * 60, 5000.8, 5000.95, 5000.7, 5000.9),
    ];

    let result = simulator
        .simulate(5000.0, t0(), Direction::Long, &bars)
        .unwrap();
    assert_eq!(result.exit_reason, ExitReason::Timeout);
    // Close 5000.9 minus exit slippage.
    assert!((result.exit_price - 5000.65).abs() < 1e-9);
}

#[test]
fn exhausted_bars_force_manual_close() {
    let simulator = sim(risk_brackets_only());
    let bars = vec![bar(60, 5000.3, 5000.45, 5000.2, 5000.4)];

    let result = simulator
        .simulate(5000.0, t0(), Direction::Long, &bars)
        .unwrap();
    assert_eq!(result.exit_reason, ExitReason::Manual);
    assert!((result.exit_price - 5000.15).abs() < 1e-9);
}

// =============================================================================
// Slippage widening and the cost model
// =============================================================================

#[test]
fn wide_first_bar_widens_entry_slippage() {
    let simulator = sim(risk_brackets_only());
    // Spread 2.5 > 2.0 threshold: slippage widens to 0.375.
    let bars = vec![bar(60, 5000.0, 5001.5, 4999.0, 5001.4)];

    let result = simulator
        .simulate(5000.0, t0(), Direction::Long, &bars)
        .unwrap();
    assert_eq!(result.entry_price, 5000.375);
}

#[test]
fn gross_net_points_and_dollars_are_consistent() {
    let simulator = sim(risk_brackets_only());
    let bars = vec![bar(60, 5000.5, 5001.25, 4999.5, 5001.0)];

    let result = simulator
        .simulate(5000.0, t0(), Direction::Long, &bars)
        .unwrap();

    let market = MarketConfig::default();
    let commission_points = market.commission_per_trade / market.contract_size;
    assert!((result.net_pnl_points - (result.gross_pnl_points - commission_points)).abs() < 1e-9);
    assert!(
        (result.net_pnl_dollars
            - (result.gross_pnl_points * market.contract_size - market.commission_per_trade))
            .abs()
            < 1e-9
    );
    assert_eq!(result.commission_paid, market.commission_per_trade);
}

// =============================================================================
// Malformed input
// =============================================================================

#[test]
fn empty_bars_abort_the_trade() {
    let simulator = sim(risk_brackets_only());
    let err = simulator.simulate(5000.0, t0(), Direction::Long, &[]);
    assert!(err.is_err());
}

#[test]
fn broken_ohlc_aborts_the_trade() {
    let simulator = sim(risk_brackets_only());
    // High below the low.
    let bad = Bar {
        timestamp: t0() + Duration::seconds(60),
        open: 5000.0,
        high: 4999.0,
        low: 5001.0,
        close: 5000.0,
        volume: 0.0,
    };
    let err = simulator.simulate(5000.0, t0(), Direction::Long, &[bad]);
    assert!(err.is_err());
}
