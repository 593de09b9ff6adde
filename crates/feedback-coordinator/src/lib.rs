//! Feedback Coordinator
//!
//! Wires the whole loop together: candidates are screened by the veto
//! engine, metered through the decision budgeter, simulated against real
//! bars, and the finished trade record is fanned out to the calibrator,
//! the pattern memory, and the veto engine.

pub mod coordinator;


pub use coordinator::{
    FeedbackCoordinator, LearningSignal, PerformanceSummary, PreCheck, SignalKind,
};
