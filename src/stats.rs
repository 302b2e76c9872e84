//! Delay statistics helpers used by the aggregation engine.
//!
//! `percentile_cont` follows the SQL `PERCENTILE_CONT` definition (linear
//! interpolation between closest ranks) so rollups match what an analytical
//! engine with ordered-set aggregates would produce.

/// Computes the arithmetic mean of a slice of values. Returns 0.0 for empty input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Continuous percentile over an ascending-sorted slice, `p` in [0, 1].
/// Returns 0.0 for empty input.
pub fn percentile_cont(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (rank - lo as f64) * (sorted[hi] - sorted[lo])
    }
}

/// Median of an ascending-sorted slice; interpolates for even-sized input.
pub fn median(sorted: &[f64]) -> f64 {
    percentile_cont(sorted, 0.5)
}
