//! Decision Budgeter
//!
//! Meters and serializes calls to the external decision oracle: one worker,
//! a FIFO queue, a hard daily cap on admissions (UTC day boundary), and an
//! emergency pause that trips after a streak of session losses.

pub mod budgeter;

#[cfg(test)]
mod tests;

pub use budgeter::{BudgetUsage, DecisionBudgeter, DecisionRequest};
