//! Small statistical helpers shared by the learning components.

/// Wilson score interval for a binomial proportion, returned in [0, 1].
///
/// More reliable than the normal approximation at the small sample sizes
/// fingerprints and veto templates live at. z = 1.96 gives a 95% interval.
pub fn wilson_interval(successes: u32, total: u32, z: f64) -> (f64, f64) {
    if total == 0 {
        return (0.0, 0.0);
    }
    let n = total as f64;
    let p = successes as f64 / n;
    let z2 = z * z;
    let denom = 1.0 + z2 / n;
    let center = (p + z2 / (2.0 * n)) / denom;
    let margin = (z / denom) * (p * (1.0 - p) / n + z2 / (4.0 * n * n)).sqrt();
    ((center - margin).max(0.0), (center + margin).min(1.0))
}

/// Wilson 95% interval.
pub fn wilson_95(successes: u32, total: u32) -> (f64, f64) {
    wilson_interval(successes, total, 1.96)
}

/// Exponentially weighted moving average. Seeded by the first observation:
/// a zero previous value is treated as "no history yet".
pub fn ewma(old: f64, new: f64, alpha: f64) -> f64 {
    if old == 0.0 {
        new
    } else {
        alpha * new + (1.0 - alpha) * old
    }
}
