//! Pattern Memory
//!
//! Accumulates per-setup statistics keyed by a hashed feature fingerprint:
//! Wilson-bounded win rates, EWMA-smoothed recent performance, cost-aware
//! expectancy, and the GOLD/FROZEN promotion lifecycle that feeds small
//! confidence adjustments back into the decision gate.

pub mod fingerprint;
pub mod memory;


pub use fingerprint::FingerprintKey;
pub use memory::{
    BucketStats, ImportReport, MemorySummary, PatternExport, PatternFingerprint, PatternMemory,
    PatternUpdate,
};
