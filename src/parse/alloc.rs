//! Allocation totals from GC logs and explicit `allocated <N>` lines.

use regex::Regex;

use std::sync::LazyLock;

static GC_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)K->(\d+)K").expect("gc pattern"));
static ALLOCATED_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^allocated (\d+)$").expect("allocated pattern"));

/// Sums bytes reclaimed by each collection plus explicitly reported totals.
///
/// A line holding `<before>K-><after>K` contributes `(before - after) * 1024`
/// (a collection that grew occupancy contributes nothing); otherwise a line that
/// is exactly `allocated <N>` contributes `N`. Text with neither yields zero.
pub fn parse_allocation(text: &str) -> u64 {
    let mut allocated = 0u64;
    for line in text.lines() {
        if let Some(caps) = GC_LINE.captures(line) {
            let (Some(before), Some(after)) = (kib(&caps[1]), kib(&caps[2])) else {
                tracing::debug!("ignoring out-of-range gc line {line:?}");
                continue;
            };
            allocated = allocated.saturating_add(before.saturating_sub(after));
        } else if let Some(caps) = ALLOCATED_LINE.captures(line) {
            match caps[1].parse::<u64>() {
                Ok(bytes) => allocated = allocated.saturating_add(bytes),
                Err(err) => tracing::debug!("ignoring allocated line {line:?}: {err}"),
            }
        }
    }
    allocated
}

fn kib(digits: &str) -> Option<u64> {
    digits.parse::<u64>().ok()?.checked_mul(1024)
}
