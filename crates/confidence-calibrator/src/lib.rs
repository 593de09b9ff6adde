//! Confidence Calibrator
//!
//! Maintains the adaptive confidence floor: the minimum oracle confidence a
//! decision needs before it is allowed to trade. The floor tightens when the
//! trailing win rate degrades and relaxes when it recovers, bounded to a
//! hard range, and snaps back to the base value at each UTC day change.

pub mod calibrator;


pub use calibrator::{
    CalibrationEvent, CalibratorStatus, ConfidenceBucket, ConfidenceCalibrator, WinRateStats,
};
