//! `procmetrics.toml` config loading.

use serde::{Deserialize, Serialize};

use std::path::Path;
use std::time::Duration;

use crate::{MetricsDuration, MetricsError, MetricsResult, Reporter, RssPlatform};

/// Environment variable overriding [`Config::reps`].
pub const REPS_ENV: &str = "PROCMETRICS_REPS";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Samples taken per metric, and confirmations required by the bound search.
    #[serde(default = "default_reps")]
    pub reps: u32,

    /// Default reporter for CLI commands.
    #[serde(default = "default_reporter")]
    pub reporter: Reporter,

    /// Forces a max-RSS output format instead of detecting it from the host.
    #[serde(default)]
    pub rss_platform: Option<RssPlatform>,

    #[serde(default)]
    pub minheap: MinHeapConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MinHeapConfig {
    #[serde(default = "default_initial_bound")]
    pub initial_bound: u64,
    #[serde(default = "default_coarse_step")]
    pub coarse_step: u64,
    #[serde(default = "default_max_bound")]
    pub max_bound: u64,
    #[serde(default = "default_timeout")]
    pub timeout: MetricsDuration,
    /// Argument prepended to the command; `{bound}` is replaced by the bound under test.
    #[serde(default = "default_bound_arg")]
    pub bound_arg: String,
    /// When set, the bound is passed through this environment variable instead of `bound_arg`.
    #[serde(default)]
    pub bound_env: Option<String>,
    #[serde(default = "default_unit")]
    pub unit: String,
}

fn default_reps() -> u32 {
    10
}

fn default_reporter() -> Reporter {
    Reporter::Pretty
}

fn default_initial_bound() -> u64 {
    10
}

fn default_coarse_step() -> u64 {
    10
}

fn default_max_bound() -> u64 {
    65_536
}

fn default_timeout() -> MetricsDuration {
    MetricsDuration(Duration::from_secs(60))
}

fn default_bound_arg() -> String {
    "-Xmx{bound}M".to_string()
}

fn default_unit() -> String {
    "MB".to_string()
}

impl Default for MinHeapConfig {
    fn default() -> Self {
        Self {
            initial_bound: default_initial_bound(),
            coarse_step: default_coarse_step(),
            max_bound: default_max_bound(),
            timeout: default_timeout(),
            bound_arg: default_bound_arg(),
            bound_env: None,
            unit: default_unit(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reps: default_reps(),
            reporter: default_reporter(),
            rss_platform: None,
            minheap: MinHeapConfig::default(),
        }
    }
}

impl Config {
    pub fn load_optional(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(s) => match toml::from_str::<Config>(&s) {
                Ok(cfg) => cfg,
                Err(err) => {
                    tracing::warn!("failed to parse config {}: {err}", path.display());
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                tracing::warn!("failed to read config {}: {err}", path.display());
                Self::default()
            }
        }
    }

    /// Applies `PROCMETRICS_REPS` on top of the file values.
    pub fn with_env_overrides(mut self) -> MetricsResult<Self> {
        if let Ok(raw) = std::env::var(REPS_ENV) {
            self.reps = parse_reps(&raw)?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> MetricsResult<()> {
        if self.reps == 0 {
            return Err(MetricsError::Config("reps must be at least 1".to_string()));
        }
        if self.minheap.coarse_step == 0 {
            return Err(MetricsError::Config(
                "minheap.coarse_step must be at least 1".to_string(),
            ));
        }
        if self.minheap.initial_bound == 0 {
            return Err(MetricsError::Config(
                "minheap.initial_bound must be at least 1".to_string(),
            ));
        }
        if self.minheap.bound_env.is_none() && !self.minheap.bound_arg.contains("{bound}") {
            return Err(MetricsError::Config(format!(
                "minheap.bound_arg {:?} has no {{bound}} placeholder",
                self.minheap.bound_arg
            )));
        }
        Ok(())
    }
}

fn parse_reps(raw: &str) -> MetricsResult<u32> {
    raw.trim()
        .parse::<u32>()
        .map_err(|e| MetricsError::Config(format!("{REPS_ENV}={raw:?} is not a count: {e}")))
}
