//! Minimum resource bound search: coarse growth, then confirmation one unit at a time.
//!
//! Assumes success is monotonic in the bound. Phase one grows the bound by a
//! coarse step until a trial succeeds. Phase two restarts just above the last
//! coarse failure and climbs by one, accepting a bound only after it succeeds
//! `confirmations` times in a row.

use serde::Serialize;

use std::time::Duration;

use crate::{CommandRunner, CommandSpec, MetricsError, MetricsResult, Progress};

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub initial_bound: u64,
    pub coarse_step: u64,
    pub confirmations: u32,
    /// Trials above this bound abort the search.
    pub max_bound: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            initial_bound: 10,
            coarse_step: 10,
            confirmations: 10,
            max_bound: 65_536,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPhase {
    Coarse,
    Confirm,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchState {
    pub phase: SearchPhase,
    pub bound: u64,
    pub step: u64,
    pub successes: u32,
    pub trials: u64,
    pub first_success: Option<u64>,
}

impl SearchState {
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            phase: SearchPhase::Coarse,
            bound: config.initial_bound.max(1),
            step: config.coarse_step.max(1),
            successes: 0,
            trials: 0,
            first_success: None,
        }
    }

    /// Records the outcome of a trial at `self.bound`. Returns the answer once confirmed.
    pub fn advance(&mut self, succeeded: bool, config: &SearchConfig) -> Option<u64> {
        self.trials += 1;
        match self.phase {
            SearchPhase::Coarse if succeeded => {
                self.first_success = Some(self.bound);
                self.bound = self.bound.saturating_sub(self.step - 1).max(1);
                self.step = 1;
                self.phase = SearchPhase::Confirm;
                None
            }
            SearchPhase::Coarse => {
                self.bound = self.bound.saturating_add(self.step);
                None
            }
            SearchPhase::Confirm if succeeded => {
                self.successes += 1;
                (self.successes >= config.confirmations.max(1)).then_some(self.bound)
            }
            SearchPhase::Confirm => {
                self.successes = 0;
                self.bound = self.bound.saturating_add(self.step);
                None
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub bound: u64,
    pub trials: u64,
    #[serde(rename = "firstSuccess")]
    pub first_success: Option<u64>,
}

/// Drives [`SearchState`] with an arbitrary trial predicate.
pub fn find_min_bound<F>(
    config: &SearchConfig,
    mut trial: F,
    progress: &mut Progress,
    unit: &str,
) -> MetricsResult<SearchOutcome>
where
    F: FnMut(u64) -> bool,
{
    let mut state = SearchState::new(config);
    loop {
        if state.bound > config.max_bound {
            progress.finish();
            return Err(MetricsError::SearchExhausted(format!(
                "no stable bound at or below {} {unit} after {} trials",
                config.max_bound, state.trials
            )));
        }
        match (state.phase, state.successes) {
            (SearchPhase::Coarse, _) => progress.step(">", &format!("Trying {} {unit}", state.bound)),
            (SearchPhase::Confirm, 0) => progress.step("+", &format!("Trying {} {unit}", state.bound)),
            (SearchPhase::Confirm, _) => {
                progress.step("?", &format!("Verifying {} {unit}", state.bound))
            }
        }
        let bound = state.bound;
        let ok = trial(bound);
        tracing::debug!(bound, ok, phase = ?state.phase, "bound trial");
        if let Some(answer) = state.advance(ok, config) {
            progress.finish();
            tracing::info!("minimum bound {answer} {unit} after {} trials", state.trials);
            return Ok(SearchOutcome {
                bound: answer,
                trials: state.trials,
                first_success: state.first_success,
            });
        }
    }
}

/// A command whose resource bound is injected per trial.
#[derive(Debug, Clone)]
pub struct BoundedCommand {
    pub command: CommandSpec,
    /// Prepended argument; `{bound}` is replaced by the bound under test.
    pub bound_arg: String,
    /// Passes the bound through this environment variable instead of `bound_arg`.
    pub bound_env: Option<String>,
}

impl BoundedCommand {
    pub fn at(&self, bound: u64) -> CommandSpec {
        let rendered = bound.to_string();
        let base = self.command.clone().discard_output();
        match &self.bound_env {
            Some(var) => base.env(var.clone(), rendered),
            None => {
                let mut args = vec![self.bound_arg.replace("{bound}", &rendered)];
                args.extend(base.args);
                CommandSpec { args, ..base }
            }
        }
    }
}

/// Finds the smallest bound under which `bounded` exits cleanly within `timeout`.
pub fn search_min_bound<R: CommandRunner + ?Sized>(
    runner: &mut R,
    bounded: &BoundedCommand,
    config: &SearchConfig,
    timeout: Option<Duration>,
    progress: &mut Progress,
    unit: &str,
) -> MetricsResult<SearchOutcome> {
    find_min_bound(
        config,
        |bound| {
            let sample = runner.run(&bounded.at(bound), timeout);
            if !sample.succeeded {
                tracing::debug!("bound {bound} failed: {}", sample.failure_reason());
            }
            sample.succeeded
        },
        progress,
        unit,
    )
}
