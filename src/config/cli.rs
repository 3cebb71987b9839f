use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the flexcache binary.
#[derive(Debug, Parser)]
#[command(
    name = "flexcache",
    version,
    about = "Publish queue recovery and inspection tools"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "FLEXCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Replay the job store the way a restarting process would and report the outcome.
    Replay(ReplayArgs),
    /// Print the stored publish jobs as JSON.
    Inspect(InspectArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct StoreOverrides {
    /// Override the directory holding stored publish jobs.
    #[arg(long = "store-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub store_dir: Option<PathBuf>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ReplayArgs {
    #[command(flatten)]
    pub overrides: StoreOverrides,

    /// Override the persistence mode (disabled|best_effort|strict).
    #[arg(long = "queue-persistence", value_name = "MODE")]
    pub persistence: Option<String>,

    /// Override how many finished jobs are read back into history.
    #[arg(long = "queue-revival-limit", value_name = "COUNT")]
    pub revival_limit: Option<usize>,

    /// Only revive jobs enqueued within this many hours.
    #[arg(long = "queue-revival-window-hours", value_name = "HOURS")]
    pub revival_window_hours: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct InspectArgs {
    #[command(flatten)]
    pub overrides: StoreOverrides,

    /// Maximum number of finished jobs to print; unfinished jobs are always shown.
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(usize))]
    pub limit: usize,
}
