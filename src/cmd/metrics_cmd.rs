//! Measurement commands (`procmetrics metrics ...`).

use clap::{Args, Subcommand};
use time::OffsetDateTime;

use std::path::PathBuf;

use crate::{
    BoundReport, BoundedCommand, CommandOutput, CommandRunner, CommandSpec, Config, MetricsDuration,
    MetricsError, MetricsResult, MetricsReport, Probe, Progress, RssPlatform, SamplingPlan,
    SearchConfig, SeriesSet, run_samples, search_min_bound,
};

const COMMAND_HELP: &str = "Program to profile followed by its arguments (use `--` before flags meant for it).";

#[derive(Debug, Clone, Args)]
pub struct SampleArgs {
    /// Samples to take (defaults to `reps` from the config).
    #[arg(long)]
    pub reps: Option<u32>,
    /// Kill a sample that runs longer than this, e.g. `30s`.
    #[arg(long)]
    pub timeout: Option<MetricsDuration>,
}

#[derive(Debug, Subcommand)]
pub enum MetricsCommand {
    /// Bytes allocated per run, from GC lines (`<n>K-><m>K`) and `allocated <n>` lines.
    Alloc {
        #[command(flatten)]
        sample: SampleArgs,
        /// Read markers from this log file instead of the captured output.
        #[arg(long)]
        trace_file: Option<PathBuf>,
        #[arg(value_name = "COMMAND", help = COMMAND_HELP, required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Smallest heap bound the program runs under reliably.
    Minheap {
        /// Consecutive successes required at the answer (defaults to `reps`).
        #[arg(long)]
        confirmations: Option<u32>,
        /// Per-trial timeout (defaults to `minheap.timeout`).
        #[arg(long)]
        timeout: Option<MetricsDuration>,
        /// Argument template carrying the bound, e.g. `-Xmx{bound}M`.
        #[arg(long, allow_hyphen_values = true)]
        bound_arg: Option<String>,
        /// Pass the bound through this environment variable instead.
        #[arg(long)]
        bound_env: Option<String>,
        #[arg(value_name = "COMMAND", help = COMMAND_HELP, required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Peak resident memory in MB, via `/usr/bin/time`.
    Maxrss {
        #[command(flatten)]
        sample: SampleArgs,
        #[arg(value_name = "COMMAND", help = COMMAND_HELP, required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Retired instructions, via `perf stat`. Takes one sample unless `--reps` is given.
    Instructions {
        #[command(flatten)]
        sample: SampleArgs,
        #[arg(value_name = "COMMAND", help = COMMAND_HELP, required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Wall time split into nested `before-<name>` / `after-<name>` phases.
    Time {
        #[command(flatten)]
        sample: SampleArgs,
        /// Read markers from this log file instead of the captured output.
        #[arg(long)]
        trace_file: Option<PathBuf>,
        #[arg(value_name = "COMMAND", help = COMMAND_HELP, required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

pub fn metrics_command<R: CommandRunner + ?Sized>(
    config: &Config,
    command: &MetricsCommand,
    runner: &mut R,
    progress: &mut Progress,
) -> MetricsResult<CommandOutput> {
    match command {
        MetricsCommand::Alloc {
            sample,
            trace_file,
            command,
        } => sample_metric(
            runner,
            progress,
            Probe::Allocation,
            sample.reps.unwrap_or(config.reps),
            sample,
            trace_file.clone(),
            command,
        ),
        MetricsCommand::Time {
            sample,
            trace_file,
            command,
        } => sample_metric(
            runner,
            progress,
            Probe::PhaseTiming,
            sample.reps.unwrap_or(config.reps),
            sample,
            trace_file.clone(),
            command,
        ),
        MetricsCommand::Maxrss { sample, command } => {
            let platform = RssPlatform::resolve(config.rss_platform)?;
            sample_metric(
                runner,
                progress,
                Probe::MaxRss(platform),
                sample.reps.unwrap_or(config.reps),
                sample,
                None,
                command,
            )
        }
        MetricsCommand::Instructions { sample, command } => sample_metric(
            runner,
            progress,
            Probe::Instructions,
            sample.reps.unwrap_or(1),
            sample,
            None,
            command,
        ),
        MetricsCommand::Minheap {
            confirmations,
            timeout,
            bound_arg,
            bound_env,
            command,
        } => {
            let started_at = OffsetDateTime::now_utc();
            let heap = &config.minheap;
            let bounded = BoundedCommand {
                command: command_spec(command)?,
                bound_arg: bound_arg.clone().unwrap_or_else(|| heap.bound_arg.clone()),
                bound_env: bound_env.clone().or_else(|| heap.bound_env.clone()),
            };
            if bounded.bound_env.is_none() && !bounded.bound_arg.contains("{bound}") {
                return Err(MetricsError::InvalidArgument(format!(
                    "bound argument {:?} has no {{bound}} placeholder",
                    bounded.bound_arg
                )));
            }
            let search = SearchConfig {
                initial_bound: heap.initial_bound,
                coarse_step: heap.coarse_step,
                confirmations: confirmations.unwrap_or(config.reps),
                max_bound: heap.max_bound,
            };
            let timeout = timeout.unwrap_or(heap.timeout).0;
            let outcome = search_min_bound(
                runner,
                &bounded,
                &search,
                Some(timeout),
                progress,
                &heap.unit,
            )?;
            let report = BoundReport::new(
                &outcome,
                &heap.unit,
                &bounded.command.display(),
                started_at,
            );
            CommandOutput::from_report(&report)
        }
    }
}

fn sample_metric<R: CommandRunner + ?Sized>(
    runner: &mut R,
    progress: &mut Progress,
    probe: Probe,
    reps: u32,
    sample: &SampleArgs,
    trace_file: Option<PathBuf>,
    command: &[String],
) -> MetricsResult<CommandOutput> {
    if reps == 0 {
        return Err(MetricsError::InvalidArgument(
            "--reps must be at least 1".to_string(),
        ));
    }
    let started_at = OffsetDateTime::now_utc();
    let plan = SamplingPlan {
        probe,
        command: command_spec(command)?,
        reps,
        timeout: sample.timeout.map(|d| d.0),
        trace_file,
    };
    let mut series = SeriesSet::new();
    run_samples(runner, &plan, &mut series, progress)?;
    let report = MetricsReport::from_series(
        probe.name(),
        probe.unit(),
        &series,
        &plan.command.display(),
        started_at,
    );
    tracing::info!(
        "{}: {} usable, {} excluded",
        probe.name(),
        report.usable_samples,
        report.excluded_samples
    );
    CommandOutput::from_report(&report)
}

fn command_spec(words: &[String]) -> MetricsResult<CommandSpec> {
    let (program, args) = words
        .split_first()
        .ok_or_else(|| MetricsError::InvalidArgument("missing command to profile".to_string()))?;
    Ok(CommandSpec::new(program.clone()).args(args.iter().cloned()))
}
