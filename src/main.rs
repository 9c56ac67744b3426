mod cli_logger;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use std::io::IsTerminal as _;
use std::path::PathBuf;
use std::process::ExitCode;

use cli_logger::CliLogger;
use procmetrics::{
    BuildStatsCommand, Config, MetricsCommand, ProcessRunner, Progress, Reporter,
    build_stats_command, metrics_command,
};

#[derive(Debug, Parser)]
#[command(name = "procmetrics", version, about = "Repeatable runtime metrics for external programs")]
struct Cli {
    /// Config file; missing means defaults.
    #[arg(long, global = true, default_value = "procmetrics.toml")]
    config: PathBuf,
    /// Print the JSON document on stdout (human lines go to stderr).
    #[arg(long, global = true)]
    json: bool,
    /// Output style; overrides `reporter` from the config.
    #[arg(long, global = true, value_enum)]
    reporter: Option<Reporter>,
    #[arg(long, global = true)]
    no_color: bool,
    /// Debug-level logging on stderr (`RUST_LOG` takes precedence).
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sample a program and report one metric.
    #[command(subcommand)]
    Metrics(MetricsCommand),
    /// Read statistics of a finished build.
    #[command(subcommand)]
    BuildStats(BuildStatsCommand),
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load_optional(&cli.config);
    let json = cli.json || cli.reporter.unwrap_or(config.reporter) == Reporter::Json;
    let logger = CliLogger::new(json, cli.no_color || !std::io::stdout().is_terminal());

    match run(&cli.command, config, &logger) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            logger.print_error(&format!("{err:#}"));
            ExitCode::FAILURE
        }
    }
}

fn run(command: &Command, config: Config, logger: &CliLogger) -> Result<()> {
    let config = config.with_env_overrides()?;
    config.validate()?;
    let output = match command {
        Command::Metrics(command) => {
            metrics_command(&config, command, &mut ProcessRunner, &mut Progress::stderr())?
        }
        Command::BuildStats(command) => build_stats_command(command)?,
    };
    logger.print_output(&output)
}
