//! procmetrics core library: process sampling, trace parsers, bound search and reporting.

mod cmd;
mod config;
mod duration;
mod error;
mod parse;
mod progress;
mod reporting;
mod runner;
mod sampler;
mod search;
mod stats;

pub use cmd::*;
pub use config::*;
pub use duration::*;
pub use error::*;
pub use parse::*;
pub use progress::*;
pub use reporting::*;
pub use runner::*;
pub use sampler::*;
pub use search::*;
pub use stats::*;
