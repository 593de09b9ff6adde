//! Hard-Negative Veto Engine
//!
//! Learns "do not take this trade" templates from high-confidence losses
//! and vetoes future candidates that land in the same binned-feature
//! neighborhood. A template can only veto once its post-decision feedback
//! proves, with a Wilson lower bound, that passing its matches loses.

pub mod engine;


pub use engine::{NoTradeTemplate, TemplateOutcome, VetoCheck, VetoEngine, VetoExport, VetoSummary};
