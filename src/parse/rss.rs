//! Peak resident set size from `/usr/bin/time` reports.

use regex::Regex;
use serde::{Deserialize, Serialize};

use std::sync::LazyLock;

use crate::{CommandSpec, MetricsError, MetricsResult};

static GNU_TIME_RSS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Maximum resident set size \(kbytes\): (\d+)").expect("gnu time pattern")
});
static BSD_TIME_RSS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)\s+maximum resident set size").expect("bsd time pattern")
});

/// Which `time` report format the host produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RssPlatform {
    /// GNU `time -v`, reported in kibibytes.
    Linux,
    /// BSD `time -l`, reported in bytes.
    Macos,
}

impl RssPlatform {
    pub fn detect() -> Option<Self> {
        if cfg!(target_os = "linux") {
            Some(Self::Linux)
        } else if cfg!(target_os = "macos") {
            Some(Self::Macos)
        } else {
            None
        }
    }

    /// Uses the configured platform, falling back to the host's.
    pub fn resolve(configured: Option<Self>) -> MetricsResult<Self> {
        configured.or_else(Self::detect).ok_or_else(|| {
            MetricsError::UnsupportedPlatform(
                "can't measure RSS on this platform (set rss_platform in procmetrics.toml)"
                    .to_string(),
            )
        })
    }

    pub fn wrap(self, command: CommandSpec) -> CommandSpec {
        match self {
            Self::Linux => command.wrapped("/usr/bin/time", &["-v", "--"]),
            Self::Macos => command.wrapped("/usr/bin/time", &["-l", "--"]),
        }
    }

    /// Peak RSS in mebibytes.
    pub fn parse(self, text: &str) -> MetricsResult<f64> {
        match self {
            Self::Linux => {
                let kib = capture_u64(&GNU_TIME_RSS, text, "Maximum resident set size (kbytes)")?;
                Ok(kib as f64 / 1024.0)
            }
            Self::Macos => {
                let bytes = capture_u64(&BSD_TIME_RSS, text, "maximum resident set size")?;
                Ok(bytes as f64 / 1024.0 / 1024.0)
            }
        }
    }
}

fn capture_u64(pattern: &Regex, text: &str, what: &str) -> MetricsResult<u64> {
    let caps = pattern
        .captures(text)
        .ok_or_else(|| MetricsError::MissingPattern(format!("no {what:?} line in output")))?;
    caps[1]
        .parse::<u64>()
        .map_err(|e| MetricsError::MissingPattern(format!("unreadable {what:?} value: {e}")))
}
