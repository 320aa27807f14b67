//! Command-line definition.

use crate::tracing::{LogLevel, TracingFormat};
use clap::{Parser, Subcommand};
use conflux_loader::{Error, LoaderConfig};
use std::path::PathBuf;

/// Successful run
pub const EXIT_OK: i32 = 0;
/// Any failure other than interruption
pub const EXIT_ERROR: i32 = 1;
/// Exit code for SIGINT (128 + signal number 2)
pub const EXIT_SIGINT: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "conflux")]
#[command(about = "Resolve remote compose projects into local files")]
#[command(long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        long,
        global = true,
        env = "CONFLUX_CACHE_DIR",
        help = "Cache root directory [default: user cache dir]/conflux"
    )]
    pub cache_dir: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "CONFLUX_OFFLINE",
        help = "Skip remote references instead of fetching them"
    )]
    pub offline: bool,

    #[arg(
        long = "insecure-registry",
        global = true,
        env = "CONFLUX_INSECURE_REGISTRIES",
        value_delimiter = ',',
        help = "Registry host to reach over plain HTTP (repeatable)"
    )]
    pub insecure_registries: Vec<String>,

    #[arg(
        short = 'l',
        long,
        global = true,
        help = "Set logging level",
        default_value = "warn",
        value_enum
    )]
    pub log_level: LogLevel,

    #[arg(
        long,
        global = true,
        help = "Tracing filter directive, overrides RUST_LOG and --log-level"
    )]
    pub log_filter: Option<String>,

    #[arg(
        long,
        global = true,
        help = "Log output format",
        default_value = "compact",
        value_enum
    )]
    pub log_format: TracingFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Resolve references to local compose files")]
    Resolve {
        #[arg(required = true, help = "References such as oci://registry/repo:tag")]
        references: Vec<String>,
    },
    #[command(about = "Remove unused entries from the cache")]
    Prune {
        #[arg(long, help = "Remove entries unused for this many days", default_value_t = 30)]
        max_age_days: u64,
        #[arg(long, help = "Shrink the cache below this many bytes, least recently used first")]
        max_size_bytes: Option<u64>,
    },
}

impl Cli {
    /// Loader configuration derived from the global flags.
    pub fn loader_config(&self) -> LoaderConfig {
        let config = LoaderConfig::new().with_offline(self.offline);
        match &self.cache_dir {
            Some(dir) => config.with_cache_root(dir),
            None => config,
        }
    }
}

/// Parse the process arguments.
pub fn parse() -> Cli {
    Cli::parse()
}

/// Map a failed run to its process exit code.
pub fn exit_code_for(report: &miette::Report) -> i32 {
    match report.downcast_ref::<Error>() {
        Some(Error::Cancelled) => EXIT_SIGINT,
        _ => EXIT_ERROR,
    }
}
