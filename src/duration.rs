//! Human duration strings (`500ms`, `60s`, `2m`) for config and CLI flags.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::{MetricsError, MetricsResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsDuration(pub Duration);

pub fn parse_duration(input: &str) -> MetricsResult<Duration> {
    let s = input.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    if digits.is_empty() {
        return Err(MetricsError::InvalidArgument(format!(
            "invalid duration {input:?} (expected e.g. 500ms, 60s, 2m)"
        )));
    }
    let value: u64 = digits
        .parse()
        .map_err(|e| MetricsError::InvalidArgument(format!("invalid duration {input:?}: {e}")))?;
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value.saturating_mul(60))),
        other => Err(MetricsError::InvalidArgument(format!(
            "invalid duration unit {other:?} in {input:?}"
        ))),
    }
}

impl FromStr for MetricsDuration {
    type Err = MetricsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_duration(s).map(Self)
    }
}

impl fmt::Display for MetricsDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = self.0.as_millis();
        if ms % 1000 == 0 {
            write!(f, "{}s", ms / 1000)
        } else {
            write!(f, "{ms}ms")
        }
    }
}

impl Serialize for MetricsDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MetricsDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
