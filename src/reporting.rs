//! Report documents and their human-readable rendering.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::{MetricsResult, SearchOutcome, SeriesSet, SummaryStatistic, human_size, summarize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reporter {
    Pretty,
    Json,
}

impl clap::ValueEnum for Reporter {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Pretty, Self::Json]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Pretty => clap::builder::PossibleValue::new("pretty"),
            Self::Json => clap::builder::PossibleValue::new("json"),
        })
    }
}

/// How a series' values are rendered for humans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Bytes,
    Seconds,
    Mebibytes,
    Count,
}

impl Unit {
    pub fn human(&self, name: &str, stat: &SummaryStatistic) -> String {
        match self {
            Self::Bytes => format!(
                "{} ± {}",
                human_size(stat.median as u64),
                human_size(stat.error as u64)
            ),
            Self::Seconds => format!("{:.3} {name}", stat.mean),
            Self::Mebibytes => format!("{name} {:.2} MB", stat.mean),
            Self::Count => format!("{} {name}", stat.mean.round() as u64),
        }
    }

    fn sample_value(&self, value: f64) -> Value {
        match self {
            Self::Bytes | Self::Count => serde_json::json!(value as u64),
            Self::Seconds | Self::Mebibytes => serde_json::json!(value),
        }
    }
}

/// Anything printable as indented text lines.
pub trait HumanReadable {
    fn human_lines(&self) -> Vec<String>;
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    #[serde(skip)]
    pub name: String,
    #[serde(skip)]
    pub depth: usize,
    pub samples: Vec<Value>,
    pub mean: f64,
    pub median: f64,
    pub error: f64,
    pub human: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    #[serde(rename = "schemaVersion")]
    pub schema_version: String,
    pub metric: String,
    #[serde(rename = "runId")]
    pub run_id: String,
    #[serde(rename = "startedAt")]
    pub started_at: String,
    pub command: String,
    #[serde(rename = "usableSamples")]
    pub usable_samples: usize,
    #[serde(rename = "excludedSamples")]
    pub excluded_samples: usize,
    #[serde(serialize_with = "serialize_entries")]
    pub results: Vec<ReportEntry>,
}

impl MetricsReport {
    pub fn from_series(
        metric: &str,
        unit: Unit,
        series: &SeriesSet,
        command: &str,
        started_at: OffsetDateTime,
    ) -> Self {
        let results = series
            .series()
            .iter()
            .filter_map(|s| {
                let stat = summarize(&s.values)?;
                Some(ReportEntry {
                    name: s.key.name.clone(),
                    depth: s.key.depth,
                    samples: s.values.iter().map(|v| unit.sample_value(*v)).collect(),
                    mean: stat.mean,
                    median: stat.median,
                    error: stat.error,
                    human: unit.human(&s.key.name, &stat),
                })
            })
            .collect();
        Self {
            schema_version: format!("procmetrics.{metric}.v1"),
            metric: metric.to_string(),
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: rfc3339(started_at),
            command: command.to_string(),
            usable_samples: series.usable_samples(),
            excluded_samples: series.excluded_samples(),
            results,
        }
    }

    pub fn entry(&self, name: &str) -> Option<&ReportEntry> {
        self.results.iter().find(|e| e.name == name)
    }
}

impl HumanReadable for MetricsReport {
    fn human_lines(&self) -> Vec<String> {
        self.results
            .iter()
            .map(|e| format!("{}{}", " ".repeat(e.depth), e.human))
            .collect()
    }
}

/// Results keyed by region name in series order; a name seen at several
/// depths is disambiguated as `name@depth`.
fn serialize_entries<S: serde::Serializer>(
    entries: &[ReportEntry],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeMap as _;
    let mut map = serializer.serialize_map(Some(entries.len()))?;
    for entry in entries {
        let shared = entries.iter().filter(|e| e.name == entry.name).count() > 1;
        let key = if shared {
            format!("{}@{}", entry.name, entry.depth)
        } else {
            entry.name.clone()
        };
        map.serialize_entry(&key, entry)?;
    }
    map.end()
}

#[derive(Debug, Clone, Serialize)]
pub struct BoundReport {
    #[serde(rename = "schemaVersion")]
    pub schema_version: String,
    #[serde(rename = "runId")]
    pub run_id: String,
    #[serde(rename = "startedAt")]
    pub started_at: String,
    pub command: String,
    pub min: u64,
    pub unit: String,
    pub trials: u64,
    #[serde(rename = "firstSuccess")]
    pub first_success: Option<u64>,
    pub human: String,
}

impl BoundReport {
    pub fn new(outcome: &SearchOutcome, unit: &str, command: &str, started_at: OffsetDateTime) -> Self {
        Self {
            schema_version: "procmetrics.minheap.v1".to_string(),
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: rfc3339(started_at),
            command: command.to_string(),
            min: outcome.bound,
            unit: unit.to_string(),
            trials: outcome.trials,
            first_success: outcome.first_success,
            human: format!("{} {unit}", outcome.bound),
        }
    }
}

impl HumanReadable for BoundReport {
    fn human_lines(&self) -> Vec<String> {
        vec![self.human.clone()]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildStatReport {
    #[serde(rename = "schemaVersion")]
    pub schema_version: String,
    pub attribute: String,
    pub value: Option<Value>,
    pub human: String,
}

impl BuildStatReport {
    pub fn new(attribute: &str, value: Option<Value>) -> Self {
        let human = match &value {
            Some(v) => format!("{attribute}: {v}"),
            None => format!("{attribute}: unavailable"),
        };
        Self {
            schema_version: "procmetrics.build_stats.v1".to_string(),
            attribute: attribute.to_string(),
            value,
            human,
        }
    }
}

impl HumanReadable for BuildStatReport {
    fn human_lines(&self) -> Vec<String> {
        vec![self.human.clone()]
    }
}

/// A finished command: the structured document plus its human lines.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub document: Value,
    pub human: Vec<String>,
}

impl CommandOutput {
    pub fn from_report<T: Serialize + HumanReadable>(report: &T) -> MetricsResult<Self> {
        Ok(Self {
            document: serde_json::to_value(report)?,
            human: report.human_lines(),
        })
    }
}

fn rfc3339(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|err| {
        tracing::debug!("timestamp formatting failed: {err}");
        at.unix_timestamp().to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MetricKey;

    fn fixed_time() -> OffsetDateTime {
        time::macros::datetime!(2026-01-01 00:00:00 UTC)
    }

    #[test]
    fn byte_series_renders_scaled_center_and_error() {
        let mut series = SeriesSet::new();
        for bytes in [215_540.0, 225_540.0] {
            series.record(vec![(MetricKey::scalar("allocated"), bytes)]);
        }
        let report = MetricsReport::from_series("alloc", Unit::Bytes, &series, "app", fixed_time());
        let entry = report.entry("allocated").expect("entry");
        assert_eq!(entry.median, 220_540.0);
        assert_eq!(entry.error, 5_000.0);
        assert_eq!(entry.human, "215.37 KB ± 4.88 KB");
        assert_eq!(report.started_at, "2026-01-01T00:00:00Z");
    }

    #[test]
    fn phase_report_keeps_order_and_indentation() {
        let mut series = SeriesSet::new();
        series.record(vec![
            (MetricKey::new("total", 0), 2.0),
            (MetricKey::new("run", 1), 1.0),
            (MetricKey::new("load", 2), 0.3),
            (MetricKey::new("unaccounted", 2), 0.7),
        ]);
        let report = MetricsReport::from_series("time", Unit::Seconds, &series, "app", fixed_time());
        assert_eq!(
            report.human_lines(),
            vec!["2.000 total", " 1.000 run", "  0.300 load", "  0.700 unaccounted"]
        );
        let json = serde_json::to_value(&report).expect("json");
        let keys: Vec<&String> = json["results"].as_object().expect("results").keys().collect();
        assert_eq!(keys, vec!["total", "run", "load", "unaccounted"]);
        assert_eq!(json["results"]["load"]["samples"], serde_json::json!([0.3]));
        assert_eq!(json["schemaVersion"], "procmetrics.time.v1");
    }

    #[test]
    fn repeated_names_are_disambiguated_by_depth() {
        let mut series = SeriesSet::new();
        series.record(vec![(MetricKey::new("a", 1), 0.5), (MetricKey::new("a", 2), 0.1)]);
        let report = MetricsReport::from_series("time", Unit::Seconds, &series, "app", fixed_time());
        let json = serde_json::to_value(&report).expect("json");
        assert!(json["results"].get("a@1").is_some());
        assert!(json["results"].get("a@2").is_some());
    }

    #[test]
    fn count_and_rss_units() {
        let stat = summarize(&[1_000.0, 3_000.0]).expect("stats");
        assert_eq!(Unit::Count.human("instructions", &stat), "2000 instructions");
        let stat = summarize(&[12.345]).expect("stats");
        assert_eq!(Unit::Mebibytes.human("maxrss", &stat), "maxrss 12.35 MB");
        assert_eq!(Unit::Bytes.sample_value(42.0), serde_json::json!(42));
    }

    #[test]
    fn bound_report_human() {
        let outcome = SearchOutcome {
            bound: 37,
            trials: 12,
            first_success: Some(40),
        };
        let report = BoundReport::new(&outcome, "MB", "ruby -e 1", fixed_time());
        assert_eq!(report.human_lines(), vec!["37 MB"]);
        let json = serde_json::to_value(&report).expect("json");
        assert_eq!(json["min"], 37);
        assert_eq!(json["firstSuccess"], 40);
    }

    #[test]
    fn missing_build_stat_is_unavailable_not_a_sentinel() {
        let report = BuildStatReport::new("build-time", None);
        assert_eq!(report.human, "build-time: unavailable");
        let json = serde_json::to_value(&report).expect("json");
        assert!(json["value"].is_null());
    }
}
