//! Summary statistics over a metric series.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SummaryStatistic {
    pub count: usize,
    pub mean: f64,
    /// Midpoint of the observed range, `min + (max - min) / 2`.
    pub median: f64,
    /// Half the observed range.
    pub error: f64,
    pub min: f64,
    pub max: f64,
}

/// `None` for an empty series.
pub fn summarize(samples: &[f64]) -> Option<SummaryStatistic> {
    let (first, rest) = samples.split_first()?;
    let (min, max, sum) = rest
        .iter()
        .fold((*first, *first, *first), |(lo, hi, sum), &v| {
            (lo.min(v), hi.max(v), sum + v)
        });
    let error = (max - min) / 2.0;
    Some(SummaryStatistic {
        count: samples.len(),
        mean: sum / samples.len() as f64,
        median: min + error,
        error,
        min,
        max,
    })
}

/// Scales a byte count to B/KB/MB/GB/TB with two decimals.
///
/// Units step by 1024 but switch at powers of 1000, so 1000 KiB already reads as MB.
pub fn human_size(bytes: u64) -> String {
    const K: u64 = 1000;
    let b = bytes as f64;
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < K.pow(2) {
        format!("{} KB", round2(b / 1024.0))
    } else if bytes < K.pow(3) {
        format!("{} MB", round2(b / 1024f64.powi(2)))
    } else if bytes < K.pow(4) {
        format!("{} GB", round2(b / 1024f64.powi(3)))
    } else {
        format!("{} TB", round2(b / 1024f64.powi(4)))
    }
}

fn round2(v: f64) -> String {
    let rounded = (v * 100.0).round() / 100.0;
    let s = rounded.to_string();
    if s.contains('.') { s } else { format!("{s}.0") }
}
