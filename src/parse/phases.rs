//! Nested phase timings from `before-<name> <t>` / `after-<name> <t>` marker lines.

use regex::Regex;

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use crate::{MetricsError, MetricsResult};

/// Region whose direct children are checked against its own duration.
pub const ROOT_REGION: &str = "run";
/// Top-level region used to derive the launcher overhead.
pub const MAIN_REGION: &str = "main";
pub const TOTAL_KEY: &str = "total";
pub const JVM_KEY: &str = "jvm";
pub const UNACCOUNTED_KEY: &str = "unaccounted";

static MARKER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+) (\d+\.\d+)$").expect("marker pattern"));

#[derive(Debug, Clone, PartialEq)]
pub struct PhaseEntry {
    pub name: String,
    /// 0 for `total`, 1 for top-level regions, and so on.
    pub depth: usize,
    pub seconds: f64,
}

/// Parsed durations for one sample, in first-encountered order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PhaseTrace {
    pub entries: Vec<PhaseEntry>,
}

impl PhaseTrace {
    pub fn get(&self, name: &str, depth: usize) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| e.name == name && e.depth == depth)
            .map(|e| e.seconds)
    }

    pub fn total(&self) -> Option<f64> {
        self.get(TOTAL_KEY, 0)
    }
}

#[derive(Debug, Clone, Copy)]
enum SlotState {
    Open(f64),
    Closed(f64),
}

#[derive(Debug)]
struct Slot {
    name: String,
    depth: usize,
    state: SlotState,
}

/// Regions keyed by (depth, name); parents are implied by the depth counter.
#[derive(Debug, Default)]
struct RegionTable {
    slots: Vec<Slot>,
    index: HashMap<(usize, String), usize>,
}

impl RegionTable {
    fn open(&mut self, depth: usize, name: &str, start: f64) -> MetricsResult<()> {
        let key = (depth, name.to_string());
        if self.index.contains_key(&key) {
            return Err(MetricsError::Protocol(format!(
                "before-{name} at depth {depth} duplicates an existing region"
            )));
        }
        self.index.insert(key, self.slots.len());
        self.slots.push(Slot {
            name: name.to_string(),
            depth,
            state: SlotState::Open(start),
        });
        Ok(())
    }

    /// Closes the open region and returns the elapsed time of this interval.
    fn close(&mut self, depth: usize, name: &str, end: f64) -> MetricsResult<f64> {
        let slot = self
            .index
            .get(&(depth, name.to_string()))
            .and_then(|&i| self.slots.get_mut(i));
        let Some(slot) = slot else {
            return Err(MetricsError::Protocol(format!(
                "after-{name} at depth {depth} without matching before-{name}"
            )));
        };
        match slot.state {
            SlotState::Open(start) => {
                let elapsed = end - start;
                slot.state = SlotState::Closed(elapsed);
                Ok(elapsed)
            }
            SlotState::Closed(_) => Err(MetricsError::Protocol(format!(
                "after-{name} at depth {depth} without matching before-{name}"
            ))),
        }
    }

    fn record(&mut self, depth: usize, name: &str, seconds: f64) {
        let key = (depth, name.to_string());
        match self.index.get(&key).and_then(|&i| self.slots.get_mut(i)) {
            Some(slot) => slot.state = SlotState::Closed(seconds),
            None => {
                self.index.insert(key, self.slots.len());
                self.slots.push(Slot {
                    name: name.to_string(),
                    depth,
                    state: SlotState::Closed(seconds),
                });
            }
        }
    }

    fn closed(&self, depth: usize, name: &str) -> Option<f64> {
        let slot = self
            .index
            .get(&(depth, name.to_string()))
            .and_then(|&i| self.slots.get(i))?;
        match slot.state {
            SlotState::Closed(seconds) => Some(seconds),
            SlotState::Open(_) => None,
        }
    }
}

/// Parses phase markers from `text` given the sample's measured wall time.
///
/// Lines that do not look like `<marker> <seconds>` are ignored, as are
/// matching lines without a `before-`/`after-` prefix. An `after-` marker
/// without an open `before-` of the same name at the current depth, or a
/// `before-` marker reusing a (depth, name) pair already seen in this trace,
/// is a protocol violation. Regions still open at the end are dropped.
pub fn parse_phases(text: &str, total_wall_time: Duration) -> MetricsResult<PhaseTrace> {
    let mut table = RegionTable::default();
    let mut depth = 0usize;
    let mut run_depth: Option<usize> = None;
    let mut accounted_for = 0.0f64;

    for line in text.lines() {
        let Some(caps) = MARKER_LINE.captures(line) else {
            continue;
        };
        let marker = &caps[1];
        let time: f64 = caps[2]
            .parse()
            .map_err(|e| MetricsError::Protocol(format!("bad timestamp in {line:?}: {e}")))?;

        if let Some(name) = marker.strip_prefix("before-") {
            depth += 1;
            table.open(depth, name, time)?;
            if name == ROOT_REGION {
                run_depth = Some(depth);
                accounted_for = 0.0;
            }
        } else if let Some(name) = marker.strip_prefix("after-") {
            let elapsed = table.close(depth, name, time)?;
            if run_depth.is_some_and(|d| depth == d + 1) {
                accounted_for += elapsed;
            } else if name == ROOT_REGION {
                table.record(depth + 1, UNACCOUNTED_KEY, elapsed - accounted_for);
            }
            depth -= 1;
        }
    }

    let total = total_wall_time.as_secs_f64();
    let mut entries = vec![PhaseEntry {
        name: TOTAL_KEY.to_string(),
        depth: 0,
        seconds: total,
    }];
    if let Some(main) = table.closed(1, MAIN_REGION) {
        entries.push(PhaseEntry {
            name: JVM_KEY.to_string(),
            depth: 1,
            seconds: total - main,
        });
    }
    for slot in table.slots {
        match slot.state {
            SlotState::Closed(seconds) => entries.push(PhaseEntry {
                name: slot.name,
                depth: slot.depth,
                seconds,
            }),
            SlotState::Open(_) => {
                tracing::debug!("region {:?} at depth {} never closed", slot.name, slot.depth);
            }
        }
    }
    Ok(PhaseTrace { entries })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn attributes_unaccounted_time_under_run() {
        let text = "before-run 1.000\nbefore-load 1.200\nafter-load 1.500\nafter-run 2.000\n";
        let trace = parse_phases(text, Duration::from_secs(2)).expect("parse");
        assert!(approx(trace.get("load", 2).expect("load"), 0.3));
        assert!(approx(trace.get("run", 1).expect("run"), 1.0));
        assert!(approx(trace.get(UNACCOUNTED_KEY, 2).expect("unaccounted"), 0.7));
        assert!(approx(trace.total().expect("total"), 2.0));
        assert_eq!(trace.get(JVM_KEY, 1), None);
    }

    #[test]
    fn keeps_first_encountered_order() {
        let text = "before-run 1.000\nbefore-load 1.200\nafter-load 1.500\nafter-run 2.000\n";
        let trace = parse_phases(text, Duration::from_secs(2)).expect("parse");
        let names: Vec<&str> = trace.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["total", "run", "load", "unaccounted"]);
    }

    #[test]
    fn derives_jvm_overhead_from_main() {
        let text = "before-main 0.500\nbefore-run 0.600\nafter-run 1.600\nafter-main 1.700\n";
        let trace = parse_phases(text, Duration::from_millis(2000)).expect("parse");
        assert!(approx(trace.get("main", 1).expect("main"), 1.2));
        assert!(approx(trace.get(JVM_KEY, 1).expect("jvm"), 0.8));
        assert!(approx(trace.get(UNACCOUNTED_KEY, 3).expect("unaccounted"), 1.0));
        assert_eq!(trace.entries[1].name, JVM_KEY);
    }

    #[test]
    fn only_direct_children_of_run_are_accounted() {
        let text = concat!(
            "before-run 0.0\n",
            "before-a 0.1\n",
            "before-inner 0.2\n",
            "after-inner 0.3\n",
            "after-a 0.5\n",
            "before-b 0.6\n",
            "after-b 0.7\n",
            "after-run 1.0\n",
        );
        let trace = parse_phases(text, Duration::from_secs(1)).expect("parse");
        assert!(approx(trace.get(UNACCOUNTED_KEY, 2).expect("unaccounted"), 0.5));
        assert!(approx(trace.get("inner", 3).expect("inner"), 0.1));
    }

    #[test]
    fn rejects_after_without_before() {
        let err = parse_phases("after-load 1.0\n", Duration::from_secs(1)).expect_err("must fail");
        assert!(matches!(err, MetricsError::Protocol(_)));

        let err = parse_phases("before-run 1.0\nafter-load 1.5\n", Duration::from_secs(1))
            .expect_err("must fail");
        assert!(matches!(err, MetricsError::Protocol(_)));
    }

    #[test]
    fn rejects_after_at_wrong_depth() {
        let text = "before-a 0.1\nbefore-b 0.2\nafter-a 0.3\n";
        let err = parse_phases(text, Duration::from_secs(1)).expect_err("must fail");
        assert!(matches!(err, MetricsError::Protocol(_)));
    }

    #[test]
    fn rejects_duplicate_region_key() {
        let text = "before-a 0.1\nafter-a 0.2\nbefore-a 0.3\nafter-a 0.4\n";
        let err = parse_phases(text, Duration::from_secs(1)).expect_err("must fail");
        assert!(matches!(err, MetricsError::Protocol(_)));
    }

    #[test]
    fn same_name_at_different_depths_is_allowed() {
        let text = "before-a 0.1\nbefore-a 0.2\nafter-a 0.3\nafter-a 0.6\n";
        let trace = parse_phases(text, Duration::from_secs(1)).expect("parse");
        assert!(approx(trace.get("a", 1).expect("outer"), 0.5));
        assert!(approx(trace.get("a", 2).expect("inner"), 0.1));
    }

    #[test]
    fn repeated_after_is_rejected() {
        let text = "before-a 0.1\nafter-a 0.2\nafter-a 0.3\n";
        let err = parse_phases(text, Duration::from_secs(1)).expect_err("must fail");
        assert!(matches!(err, MetricsError::Protocol(_)));
    }

    #[test]
    fn ignores_unrelated_lines() {
        let text = "hello\nloaded 3.5\nbefore-run 1.0\nprogress 50%\nafter-run 1.5\n";
        let trace = parse_phases(text, Duration::from_secs(2)).expect("parse");
        assert!(approx(trace.get("run", 1).expect("run"), 0.5));
        assert!(trace.get("loaded", 1).is_none());
    }

    #[test]
    fn parsing_is_idempotent() {
        let text = "before-main 0.1\nbefore-run 0.2\nbefore-x 0.3\nafter-x 0.4\nafter-run 0.9\nafter-main 1.0\n";
        let a = parse_phases(text, Duration::from_secs(1)).expect("first");
        let b = parse_phases(text, Duration::from_secs(1)).expect("second");
        assert_eq!(a, b);
    }

    #[test]
    fn empty_trace_still_reports_total() {
        let trace = parse_phases("", Duration::from_millis(1500)).expect("parse");
        assert_eq!(trace.entries.len(), 1);
        assert!(approx(trace.total().expect("total"), 1.5));
    }
}
