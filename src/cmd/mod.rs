//! Clap subcommand trees and their handlers.

mod build_stats_cmd;
mod metrics_cmd;

pub use build_stats_cmd::*;
pub use metrics_cmd::*;
