mod cli;
mod config;
mod error;
mod output;
mod session;

use std::process;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::cli::{Args, Commands};
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::session::RunOptions;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.verbose, args.quiet)?;

    let mut config = AppConfig::load(args.config.as_deref())?;

    match args.command {
        Commands::Fetch { endpoint } => {
            if let Some(endpoint) = endpoint {
                config.endpoint = Some(endpoint);
                config.streams.clear();
            }
            session::fetch(&config).await
        }
        Commands::Run(run_args) => {
            config.apply_run_args(&run_args)?;
            let options = RunOptions {
                duration: (run_args.duration > 0).then(|| Duration::from_secs(run_args.duration)),
                json: run_args.json,
            };

            let token = CancellationToken::new();
            spawn_signal_handler(token.clone());
            session::run(config, options, token).await
        }
    }
}

fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                debug!("Received Ctrl-C");
                token.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });
}

fn init_logging(verbose: bool, quiet: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    // Logs go to stderr so stdout only carries events and status lines.
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose)
                .with_level(true),
        )
        .try_init()
        .map_err(|e| AppError::Logging(e.to_string()))
}
