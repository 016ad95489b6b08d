//! On-disk configuration for the CLI.
//!
//! Every field is optional; flags given on the command line win over the
//! file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use streamsync::{SimulationProfile, SyncConfig};
use tracing::debug;

use crate::cli::RunArgs;
use crate::error::{AppError, Result};

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Stream list endpoint used when no URLs are given.
    pub endpoint: Option<String>,
    /// Fixed stream URLs, used when neither `--url` nor an endpoint is set.
    pub streams: Vec<String>,
    pub status_interval_ms: Option<u64>,
    pub sync: SyncConfig,
    pub simulation: SimulationSettings,
}

/// Tuning of the simulated surfaces used by `run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub load_delay_ms: u64,
    pub tick_interval_ms: u64,
    /// Extra playback rate per follower camera.
    pub skew: f64,
    pub native_hls: bool,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            load_delay_ms: 300,
            tick_interval_ms: 250,
            skew: 0.05,
            native_hls: false,
        }
    }
}

impl SimulationSettings {
    /// Profile of the camera at zero-based `index`. The first camera plays
    /// at normal speed, each later one `skew` faster than the previous.
    pub fn profile(&self, index: usize) -> SimulationProfile {
        SimulationProfile {
            load_delay: Duration::from_millis(self.load_delay_ms),
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            native_hls: self.native_hls,
            ..SimulationProfile::default()
        }
        .with_rate(1.0 + self.skew * index as f64)
    }
}

impl AppConfig {
    pub const DEFAULT_STATUS_INTERVAL_MS: u64 = 1000;

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("streamsync").join(CONFIG_FILE))
    }

    /// Loads `path`, or the default location when `path` is `None`.
    ///
    /// A missing default file yields the defaults; a missing explicit file
    /// is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !explicit && !path.exists() {
            debug!(path = %path.display(), "No configuration file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.sync.validate()?;
        Ok(config)
    }

    /// Applies `run` flags on top of the file settings.
    pub fn apply_run_args(&mut self, args: &RunArgs) -> Result<()> {
        if let Some(endpoint) = &args.endpoint {
            self.endpoint = Some(endpoint.clone());
        }
        if !args.urls.is_empty() {
            self.streams = args.urls.clone();
            self.endpoint = None;
        }
        if let Some(skew) = args.skew {
            if !skew.is_finite() || skew < 0.0 {
                return Err(AppError::InvalidInput(format!(
                    "--skew must be a non-negative number, got {skew}"
                )));
            }
            self.simulation.skew = skew;
        }
        if let Some(tolerance) = args.drift_tolerance {
            self.sync.drift_tolerance_secs = tolerance;
        }
        if let Some(settle) = args.settle_delay_ms {
            self.sync.settle_delay_ms = settle;
        }
        self.sync
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(
            self.status_interval_ms
                .unwrap_or(Self::DEFAULT_STATUS_INTERVAL_MS)
                .max(1),
        )
    }
}
