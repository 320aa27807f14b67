//! conflux CLI
//!
//! Resolves scheme-prefixed references (currently `oci://`) into local compose
//! files and manages the cache that backs them.

// CLI binary needs to output to stdout/stderr
#![allow(clippy::print_stderr)]

mod cli;
mod commands;
mod tracing;

use crate::cli::{Cli, Commands, EXIT_ERROR, EXIT_OK, exit_code_for};
use crate::tracing::{TracingConfig, init_tracing};
use conflux_loader::PrunePolicy;
use tokio_util::sync::CancellationToken;

fn main() {
    // NOTE: tracing may be unusable during a panic, so write to stderr directly.
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Application panicked: {panic_info}");
        eprintln!("Internal error occurred. Run with RUST_LOG=debug for more information.");
    }));

    let cli = cli::parse();

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Fatal error: Failed to create tokio runtime: {e}");
            std::process::exit(EXIT_ERROR);
        }
    };

    std::process::exit(rt.block_on(run(cli)));
}

/// Run the CLI and translate the outcome into an exit code.
async fn run(cli: Cli) -> i32 {
    match real_main(cli).await {
        Ok(()) => EXIT_OK,
        Err(report) => {
            eprintln!("{report:?}");
            exit_code_for(&report)
        }
    }
}

async fn real_main(cli: Cli) -> miette::Result<()> {
    init_tracing(TracingConfig {
        format: cli.log_format,
        level: cli.log_level.into(),
        filter: cli.log_filter.clone(),
    })?;

    let config = cli.loader_config();
    let mut stdout = std::io::stdout().lock();

    match cli.command {
        Commands::Resolve { references } => {
            let registry = commands::build_registry(&config, &cli.insecure_registries)?;

            // Ctrl-C cancels in-flight downloads; partial entries are discarded
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ::tracing::info!("Received Ctrl-C, cancelling");
                    on_signal.cancel();
                }
            });

            commands::resolve(&registry, &references, &cancel, &mut stdout).await
        }
        Commands::Prune {
            max_age_days,
            max_size_bytes,
        } => {
            let policy = PrunePolicy {
                max_age_days: Some(max_age_days),
                max_size_bytes,
            };
            commands::prune(&config.cache(), &policy, &mut stdout)
        }
    }
}
