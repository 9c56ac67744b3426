//! Retired instruction counts from `perf stat -e instructions`.

use regex::Regex;

use std::sync::LazyLock;

use crate::{CommandSpec, MetricsError, MetricsResult};

static INSTRUCTIONS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d[\d,.'\x{202F}]*)\s+instructions").expect("instructions pattern")
});

pub fn wrap_perf_stat(command: CommandSpec) -> CommandSpec {
    command.wrapped("perf", &["stat", "-e", "instructions", "--"])
}

/// Instruction count with thousands separators (`,` `.` `'` or narrow space) removed.
pub fn parse_instructions(text: &str) -> MetricsResult<u64> {
    let caps = INSTRUCTIONS_LINE.captures(text).ok_or_else(|| {
        MetricsError::MissingPattern("no \"<count> instructions\" line in output".to_string())
    })?;
    let digits: String = caps[1].chars().filter(char::is_ascii_digit).collect();
    digits.parse::<u64>().map_err(|e| {
        MetricsError::MissingPattern(format!("unreadable instruction count {:?}: {e}", &caps[1]))
    })
}
