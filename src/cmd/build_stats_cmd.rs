//! Build artifact statistics (`procmetrics build-stats ...`).

use clap::Subcommand;
use serde_json::Value;

use std::path::{Path, PathBuf};

use crate::{
    BuildStatReport, CommandOutput, MetricsResult, parse_build_time,
    parse_runtime_compilable_methods,
};

#[derive(Debug, Subcommand)]
pub enum BuildStatsCommand {
    /// Size of a built binary in MB.
    BinarySize {
        #[arg(value_name = "BINARY")]
        path: PathBuf,
    },
    /// Total build time in seconds, from a `[total]: <n> ms` build log line.
    BuildTime {
        #[arg(value_name = "BUILD_LOG")]
        log: PathBuf,
    },
    /// Methods included for runtime compilation, from a build log.
    RuntimeCompilableMethods {
        #[arg(value_name = "BUILD_LOG")]
        log: PathBuf,
    },
}

impl BuildStatsCommand {
    pub fn attribute(&self) -> &'static str {
        match self {
            Self::BinarySize { .. } => "binary-size",
            Self::BuildTime { .. } => "build-time",
            Self::RuntimeCompilableMethods { .. } => "runtime-compilable-methods",
        }
    }
}

pub fn build_stats_command(command: &BuildStatsCommand) -> MetricsResult<CommandOutput> {
    let value = match command {
        BuildStatsCommand::BinarySize { path } => binary_size_mb(path).map(Value::from),
        BuildStatsCommand::BuildTime { log } => {
            read_log(log).and_then(|text| parse_build_time(&text)).map(Value::from)
        }
        BuildStatsCommand::RuntimeCompilableMethods { log } => read_log(log)
            .and_then(|text| parse_runtime_compilable_methods(&text))
            .map(Value::from),
    };
    if value.is_none() {
        tracing::warn!("{} unavailable", command.attribute());
    }
    CommandOutput::from_report(&BuildStatReport::new(command.attribute(), value))
}

fn binary_size_mb(path: &Path) -> Option<f64> {
    match std::fs::metadata(path) {
        Ok(meta) => {
            let mb = meta.len() as f64 / 1024.0 / 1024.0;
            Some((mb * 100.0).round() / 100.0)
        }
        Err(err) => {
            tracing::debug!("cannot stat {}: {err}", path.display());
            None
        }
    }
}

fn read_log(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .map_err(|err| tracing::debug!("cannot read {}: {err}", path.display()))
        .ok()
}
