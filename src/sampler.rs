//! Repeated measurement of one command and accumulation of per-key series.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{
    CommandRunner, CommandSpec, MetricsError, MetricsResult, Progress, RssPlatform, Sample, Unit,
    parse_allocation, parse_instructions, parse_phases, wrap_perf_stat,
};

/// A metric name plus its nesting depth (0 for scalar metrics and `total`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    pub name: String,
    pub depth: usize,
}

impl MetricKey {
    pub fn new(name: impl Into<String>, depth: usize) -> Self {
        Self {
            name: name.into(),
            depth,
        }
    }

    pub fn scalar(name: impl Into<String>) -> Self {
        Self::new(name, 0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSeries {
    pub key: MetricKey,
    pub values: Vec<f64>,
}

/// Caller-owned accumulator; series keep first-encountered key order.
#[derive(Debug, Default)]
pub struct SeriesSet {
    series: Vec<MetricSeries>,
    expected_keys: Option<Vec<MetricKey>>,
    usable: usize,
    excluded: usize,
    inconsistent: usize,
}

impl SeriesSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one sample's values. Returns `false` when the sample's key set
    /// differs from the first usable sample's; the values are still merged.
    pub fn record(&mut self, values: Vec<(MetricKey, f64)>) -> bool {
        let keys: Vec<MetricKey> = values.iter().map(|(k, _)| k.clone()).collect();
        let consistent = match &self.expected_keys {
            None => {
                self.expected_keys = Some(keys);
                true
            }
            Some(expected) => same_key_set(expected, &keys),
        };
        if !consistent {
            self.inconsistent += 1;
        }
        for (key, value) in values {
            match self.series.iter_mut().find(|s| s.key == key) {
                Some(series) => series.values.push(value),
                None => self.series.push(MetricSeries {
                    key,
                    values: vec![value],
                }),
            }
        }
        self.usable += 1;
        consistent
    }

    pub fn exclude(&mut self) {
        self.excluded += 1;
    }

    pub fn series(&self) -> &[MetricSeries] {
        &self.series
    }

    pub fn get(&self, key: &MetricKey) -> Option<&MetricSeries> {
        self.series.iter().find(|s| &s.key == key)
    }

    pub fn usable_samples(&self) -> usize {
        self.usable
    }

    pub fn excluded_samples(&self) -> usize {
        self.excluded
    }

    pub fn inconsistent_samples(&self) -> usize {
        self.inconsistent
    }
}

fn same_key_set(a: &[MetricKey], b: &[MetricKey]) -> bool {
    a.len() == b.len() && a.iter().all(|k| b.contains(k))
}

/// What is measured and how: the command wrapper plus the trace parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Allocation,
    PhaseTiming,
    MaxRss(RssPlatform),
    Instructions,
}

impl Probe {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Allocation => "alloc",
            Self::PhaseTiming => "time",
            Self::MaxRss(_) => "maxrss",
            Self::Instructions => "instructions",
        }
    }

    pub fn unit(&self) -> Unit {
        match self {
            Self::Allocation => Unit::Bytes,
            Self::PhaseTiming => Unit::Seconds,
            Self::MaxRss(_) => Unit::Mebibytes,
            Self::Instructions => Unit::Count,
        }
    }

    /// Whether the trace may come from a log file instead of captured output.
    pub fn reads_trace_file(&self) -> bool {
        matches!(self, Self::Allocation | Self::PhaseTiming)
    }

    pub fn prepare(&self, command: CommandSpec) -> CommandSpec {
        match self {
            Self::Allocation | Self::PhaseTiming => command,
            Self::MaxRss(platform) => platform.wrap(command),
            Self::Instructions => wrap_perf_stat(command),
        }
    }

    /// Parses one sample. `trace` is the text the program emitted its markers to.
    pub fn extract(&self, sample: &Sample, trace: &str) -> MetricsResult<Vec<(MetricKey, f64)>> {
        match self {
            Self::Allocation => Ok(vec![(
                MetricKey::scalar("allocated"),
                parse_allocation(trace) as f64,
            )]),
            Self::PhaseTiming => Ok(parse_phases(trace, sample.elapsed)?
                .entries
                .into_iter()
                .map(|e| (MetricKey::new(e.name, e.depth), e.seconds))
                .collect()),
            Self::MaxRss(platform) => Ok(vec![(
                MetricKey::scalar("maxrss"),
                platform.parse(&sample.stderr)?,
            )]),
            Self::Instructions => Ok(vec![(
                MetricKey::scalar("instructions"),
                parse_instructions(&sample.stderr)? as f64,
            )]),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SamplingPlan {
    pub probe: Probe,
    pub command: CommandSpec,
    pub reps: u32,
    pub timeout: Option<Duration>,
    pub trace_file: Option<PathBuf>,
}

/// Runs `plan.reps` sequential samples and appends their values to `series`.
///
/// Failed runs and unparsable traces are excluded with a warning. Fails with
/// [`MetricsError::NoUsableSamples`] when nothing usable was collected.
pub fn run_samples<R: CommandRunner + ?Sized>(
    runner: &mut R,
    plan: &SamplingPlan,
    series: &mut SeriesSet,
    progress: &mut Progress,
) -> MetricsResult<()> {
    if plan.trace_file.is_some() && !plan.probe.reads_trace_file() {
        return Err(MetricsError::InvalidArgument(format!(
            "{} reads its own tool output and does not accept a trace file",
            plan.probe.name()
        )));
    }
    let command = plan.probe.prepare(plan.command.clone());
    tracing::debug!("sampling {} x{}: {}", plan.probe.name(), plan.reps, command.display());

    for index in 0..plan.reps {
        if let Some(path) = &plan.trace_file {
            remove_stale_trace(path)?;
        }
        let sample = runner.run(&command, plan.timeout);
        progress.step(".", "sampling");

        if !sample.succeeded {
            tracing::warn!("sample {index} excluded: {}", sample.failure_reason());
            series.exclude();
            continue;
        }
        let trace = match trace_text(&sample, plan.trace_file.as_deref()) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!("sample {index} excluded: {err}");
                series.exclude();
                continue;
            }
        };
        match plan.probe.extract(&sample, &trace) {
            Ok(values) => {
                if !series.record(values) {
                    tracing::warn!(
                        "sample {index} reported a different set of {} keys than the first sample",
                        plan.probe.name()
                    );
                }
            }
            Err(err) if err.is_sample_local() => {
                tracing::warn!("sample {index} excluded: {err}");
                series.exclude();
            }
            Err(err) => return Err(err),
        }
    }
    progress.finish();

    if series.usable_samples() == 0 {
        return Err(MetricsError::NoUsableSamples(format!(
            "all {} samples of `{}` failed or produced unparsable output",
            plan.reps,
            command.display()
        )));
    }
    Ok(())
}

fn remove_stale_trace(path: &Path) -> MetricsResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn trace_text(sample: &Sample, trace_file: Option<&Path>) -> MetricsResult<String> {
    match trace_file {
        Some(path) => std::fs::read_to_string(path).map_err(|e| {
            MetricsError::MissingPattern(format!("trace file {} unreadable: {e}", path.display()))
        }),
        None => Ok(sample.combined()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::capture::SharedBuffer;
    use std::collections::VecDeque;

    /// Replays canned samples in order and records every command it was given.
    struct ScriptedRunner {
        samples: VecDeque<Sample>,
        seen: Vec<CommandSpec>,
    }

    impl ScriptedRunner {
        fn new(samples: Vec<Sample>) -> Self {
            Self {
                samples: samples.into(),
                seen: Vec::new(),
            }
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&mut self, command: &CommandSpec, _timeout: Option<Duration>) -> Sample {
            self.seen.push(command.clone());
            self.samples.pop_front().unwrap_or_default()
        }
    }

    fn ok(stdout: &str, stderr: &str, secs: f64) -> Sample {
        Sample {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            succeeded: true,
            elapsed: Duration::from_secs_f64(secs),
            exit_code: Some(0),
            ..Sample::default()
        }
    }

    fn plan(probe: Probe, reps: u32) -> SamplingPlan {
        SamplingPlan {
            probe,
            command: CommandSpec::new("app"),
            reps,
            timeout: None,
            trace_file: None,
        }
    }

    #[test]
    fn allocation_samples_accumulate_in_one_series() {
        let mut runner = ScriptedRunner::new(vec![
            ok("allocated 10\n", "", 0.1),
            ok("", "allocated 20\n", 0.1),
            ok("allocated 30\n", "", 0.1),
        ]);
        let mut series = SeriesSet::new();
        run_samples(&mut runner, &plan(Probe::Allocation, 3), &mut series, &mut Progress::silent())
            .expect("sampling");
        let allocated = series.get(&MetricKey::scalar("allocated")).expect("series");
        assert_eq!(allocated.values, vec![10.0, 20.0, 30.0]);
        assert_eq!(runner.seen.len(), 3);
        assert_eq!(runner.seen[0].display(), "app");
    }

    #[test]
    fn failed_and_violating_samples_are_excluded() {
        let mut runner = ScriptedRunner::new(vec![
            Sample::default(),
            ok("", "after-run 1.0\n", 1.0),
            ok("", "before-run 0.5\nafter-run 1.0\n", 1.5),
        ]);
        let mut series = SeriesSet::new();
        run_samples(&mut runner, &plan(Probe::PhaseTiming, 3), &mut series, &mut Progress::silent())
            .expect("sampling");
        assert_eq!(series.usable_samples(), 1);
        assert_eq!(series.excluded_samples(), 2);
        let run = series.get(&MetricKey::new("run", 1)).expect("run");
        assert_eq!(run.values, vec![0.5]);
    }

    #[test]
    fn inconsistent_keys_merge_by_union() {
        let mut runner = ScriptedRunner::new(vec![
            ok("", "before-a 0.0\nafter-a 0.5\n", 1.0),
            ok("", "before-b 0.0\nafter-b 0.25\n", 1.0),
        ]);
        let mut series = SeriesSet::new();
        run_samples(&mut runner, &plan(Probe::PhaseTiming, 2), &mut series, &mut Progress::silent())
            .expect("sampling");
        assert_eq!(series.inconsistent_samples(), 1);
        let names: Vec<&str> = series.series().iter().map(|s| s.key.name.as_str()).collect();
        assert_eq!(names, vec!["total", "a", "b"]);
        assert_eq!(series.get(&MetricKey::new("a", 1)).expect("a").values, vec![0.5]);
        assert_eq!(series.get(&MetricKey::new("b", 1)).expect("b").values, vec![0.25]);
        assert_eq!(
            series.get(&MetricKey::new("total", 0)).expect("total").values,
            vec![1.0, 1.0]
        );
    }

    #[test]
    fn missing_rss_line_means_no_data() {
        let mut runner = ScriptedRunner::new(vec![
            ok("", "Maximum resident set size (kbytes): 2048\n", 0.1),
            ok("", "no report\n", 0.1),
        ]);
        let mut series = SeriesSet::new();
        run_samples(
            &mut runner,
            &plan(Probe::MaxRss(RssPlatform::Linux), 2),
            &mut series,
            &mut Progress::silent(),
        )
        .expect("sampling");
        assert_eq!(
            series.get(&MetricKey::scalar("maxrss")).expect("rss").values,
            vec![2.0]
        );
        assert_eq!(runner.seen[0].program, "/usr/bin/time");
    }

    #[test]
    fn nothing_usable_is_fatal() {
        let mut runner = ScriptedRunner::new(vec![Sample::default(), Sample::default()]);
        let mut series = SeriesSet::new();
        let err = run_samples(&mut runner, &plan(Probe::Allocation, 2), &mut series, &mut Progress::silent())
            .expect_err("must fail");
        assert!(matches!(err, MetricsError::NoUsableSamples(_)));
    }

    #[test]
    fn trace_file_replaces_captured_output() {
        let dir = std::env::temp_dir().join(format!("procmetrics-sampler-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        let trace = dir.join("gc.log");
        std::fs::write(&trace, "stale 1K->0K\n").expect("stale trace");

        struct WritingRunner(PathBuf);
        impl CommandRunner for WritingRunner {
            fn run(&mut self, _command: &CommandSpec, _timeout: Option<Duration>) -> Sample {
                assert!(!self.0.exists(), "stale trace must be removed before each run");
                std::fs::write(&self.0, "4K->2K\n").expect("write trace");
                Sample {
                    stdout: "allocated 999\n".to_string(),
                    succeeded: true,
                    ..Sample::default()
                }
            }
        }

        let mut runner = WritingRunner(trace.clone());
        let mut series = SeriesSet::new();
        let mut p = plan(Probe::Allocation, 2);
        p.trace_file = Some(trace);
        run_samples(&mut runner, &p, &mut series, &mut Progress::silent()).expect("sampling");
        assert_eq!(
            series.get(&MetricKey::scalar("allocated")).expect("series").values,
            vec![2048.0, 2048.0]
        );
    }

    #[test]
    fn tool_probes_reject_trace_files() {
        let mut runner = ScriptedRunner::new(Vec::new());
        let mut p = plan(Probe::Instructions, 1);
        p.trace_file = Some(PathBuf::from("perf.log"));
        let err = run_samples(&mut runner, &p, &mut SeriesSet::new(), &mut Progress::silent())
            .expect_err("must fail");
        assert!(matches!(err, MetricsError::InvalidArgument(_)));
        assert!(runner.seen.is_empty());
    }

    #[test]
    fn one_progress_marker_per_sample_including_failures() {
        let mut runner = ScriptedRunner::new(vec![
            ok("allocated 1\n", "", 0.1),
            Sample::default(),
            ok("allocated 3\n", "", 0.1),
        ]);
        let buf = SharedBuffer::default();
        let mut progress = Progress::new(true, Box::new(buf.clone()));
        let mut series = SeriesSet::new();
        run_samples(&mut runner, &plan(Probe::Allocation, 3), &mut series, &mut progress)
            .expect("sampling");
        assert_eq!(buf.text(), "...\n");
        assert_eq!(series.excluded_samples(), 1);

        let buf = SharedBuffer::default();
        let mut progress = Progress::new(false, Box::new(buf.clone()));
        let mut runner = ScriptedRunner::new(vec![ok("allocated 1\n", "", 0.1)]);
        run_samples(&mut runner, &plan(Probe::Allocation, 1), &mut SeriesSet::new(), &mut progress)
            .expect("sampling");
        assert_eq!(buf.text(), "sampling\n");
    }
}
