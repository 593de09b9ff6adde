//! Trade Execution Simulator
//!
//! Converts an entry decision plus subsequent price bars into a realistic
//! fill, bracket-order lifecycle (TP/SL/breakeven/trailing), and net P&L
//! with slippage and commission applied.

pub mod simulator;

#[cfg(test)]
mod tests;

pub use simulator::TradeSimulator;
