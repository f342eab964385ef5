mod cli;
mod commands;
mod config;
mod error;
mod logging;
mod output;
mod utils;

use crate::cli::{Cli, Commands};
use crate::error::Result;
use clap::Parser;
use tracing::{debug, error, info};

fn main() {
    if let Err(e) = run_app() {
        eprintln!("\n❌ Error: {}", e);
        std::process::exit(1);
    }
}

fn run_app() -> Result<()> {
    let cli = Cli::parse();
    logging::setup_logging(cli.verbose, cli.quiet, cli.log_file.as_deref())?;

    info!("peakgroup v{} starting up.", env!("CARGO_PKG_VERSION"));
    debug!("Full CLI arguments parsed: {:?}", &cli);

    if let Some(num_threads) = cli.threads {
        configure_thread_pool(num_threads)?;
    }

    let command_result = match cli.command {
        Commands::Cluster(args) => {
            info!("Dispatching to 'cluster' command.");
            commands::cluster::run(args, cli.quiet)
        }
        Commands::Identify(args) => {
            info!("Dispatching to 'identify' command.");
            commands::identify::run(args, cli.quiet)
        }
    };

    match &command_result {
        Ok(_) => {
            info!("Command completed successfully.");
            println!("✅ Command completed successfully.");
        }
        Err(e) => error!("Command failed: {}", e),
    }
    command_result
}

#[cfg(feature = "parallel")]
fn configure_thread_pool(num_threads: usize) -> Result<()> {
    info!("Setting Rayon global thread pool to {} threads.", num_threads);
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()
        .map_err(|e| {
            error::CliError::Other(anyhow::anyhow!("Failed to build global thread pool: {}", e))
        })
}

#[cfg(not(feature = "parallel"))]
fn configure_thread_pool(num_threads: usize) -> Result<()> {
    tracing::warn!(
        threads = num_threads,
        "Built without the 'parallel' feature; --threads is ignored."
    );
    Ok(())
}
