//! Statistics scraped from ahead-of-time build logs.

use regex::Regex;

use std::sync::LazyLock;

static TOTAL_BUILD_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[total\]: ([\d,.]+) ms").expect("build time pattern"));
static RUNTIME_COMPILABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+) method\(s\) included for runtime compilation")
        .expect("runtime compilable pattern")
});

/// Total build time in seconds from a `[total]: 12,345.67 ms` line.
pub fn parse_build_time(log: &str) -> Option<f64> {
    let caps = TOTAL_BUILD_TIME.captures(log)?;
    let ms: f64 = caps[1].replace(',', "").parse().ok()?;
    Some(ms / 1000.0)
}

pub fn parse_runtime_compilable_methods(log: &str) -> Option<u64> {
    RUNTIME_COMPILABLE.captures(log)?[1].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_time_drops_separators() {
        let log = "[ruby:1234]    analysis:  40,123.45 ms\n[ruby:1234]     [total]: 123,456.78 ms\n";
        let secs = parse_build_time(log).expect("build time");
        assert!((secs - 123.45678).abs() < 1e-9);
    }

    #[test]
    fn runtime_compilable_count() {
        let log = "...\n8731 method(s) included for runtime compilation\n";
        assert_eq!(parse_runtime_compilable_methods(log), Some(8731));
    }

    #[test]
    fn absent_lines_are_none() {
        assert_eq!(parse_build_time("nothing here"), None);
        assert_eq!(parse_runtime_compilable_methods("nothing here"), None);
    }
}
