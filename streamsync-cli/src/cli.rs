use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Synchronized multi-camera HLS playback
#[derive(Parser, Debug)]
#[command(name = "streamsync", author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file (defaults to <config dir>/streamsync/config.toml)
    #[arg(short, long, global = true, env = "STREAMSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a synchronized session against simulated playback surfaces
    Run(RunArgs),

    /// Fetch the stream list and print it as JSON
    Fetch {
        /// Stream list endpoint
        #[arg(long, env = "STREAMSYNC_ENDPOINT")]
        endpoint: Option<String>,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Stream list endpoint
    #[arg(long, env = "STREAMSYNC_ENDPOINT", conflicts_with = "urls")]
    pub endpoint: Option<String>,

    /// Stream URL, repeat once per camera
    #[arg(long = "url", value_name = "URL")]
    pub urls: Vec<String>,

    /// Stop after this many seconds (0 runs until Ctrl-C)
    #[arg(long, default_value_t = 30)]
    pub duration: u64,

    /// Extra playback rate per follower camera, e.g. 0.05
    #[arg(long, value_name = "RATE")]
    pub skew: Option<f64>,

    /// Drift tolerance in seconds
    #[arg(long, value_name = "SECS")]
    pub drift_tolerance: Option<f64>,

    /// How long a manual sync is reported as in progress
    #[arg(long, value_name = "MS")]
    pub settle_delay_ms: Option<u64>,

    /// Print events and status as JSON lines
    #[arg(long)]
    pub json: bool,
}
