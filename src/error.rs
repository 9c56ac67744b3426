//! Crate-wide error types.

use thiserror::Error;

pub type MetricsResult<T> = Result<T, MetricsError>;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Trace text broke the before/after marker protocol.
    #[error("trace protocol violation: {0}")]
    Protocol(String),

    /// An expected numeric pattern was absent. Means "no data", never zero.
    #[error("missing pattern: {0}")]
    MissingPattern(String),

    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("bound search exhausted: {0}")]
    SearchExhausted(String),

    #[error("no usable samples: {0}")]
    NoUsableSamples(String),
}

impl MetricsError {
    /// Errors that disqualify a single sample without aborting the run.
    pub fn is_sample_local(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::MissingPattern(_))
    }
}
