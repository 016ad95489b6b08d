use std::time::Duration;

use rand::RngExt;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Tuning handed to every adaptive loader instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Run demuxing in a worker context when the loader supports it.
    pub enable_worker: bool,
    /// Favour the live edge over buffer depth.
    pub low_latency_mode: bool,
    /// Seconds of already-played media kept in the back buffer.
    pub back_buffer_length_secs: f64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            enable_worker: false,
            low_latency_mode: true,
            back_buffer_length_secs: 90.0,
        }
    }
}

/// Backoff used when a retry is *scheduled* for a failed stream.
///
/// Retries are never started automatically; this only decides how long a
/// scheduled retry waits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Base delay. Actual delay = base * 2^attempt + jitter.
    pub base_delay_ms: u64,
    /// Hard cap on the computed delay.
    pub max_delay_ms: u64,
    /// Adds random jitter of [0, base/2), never exceeding the cap.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Compute the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = self.base_delay();
        let max_delay = self.max_delay();

        // 2^attempt with a checked shift so attempts >= 32 saturate.
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let exp_delay = base_delay.checked_mul(multiplier).unwrap_or(max_delay);
        let capped = exp_delay.min(max_delay);

        if !self.jitter {
            return capped;
        }

        let jitter_range_ms = self.base_delay_ms / 2;
        if jitter_range_ms == 0 {
            return capped;
        }

        let remaining_ms = u64::try_from(max_delay.saturating_sub(capped).as_millis()).unwrap_or(0);
        let jitter_limit_ms = jitter_range_ms.min(remaining_ms);
        if jitter_limit_ms == 0 {
            return capped;
        }

        let jitter_ms = rand::rng().random_range(0..jitter_limit_ms);
        (capped + Duration::from_millis(jitter_ms)).min(max_delay)
    }
}

/// Configuration of one synchronization session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Followers drifting further than this from the master get a seek.
    pub drift_tolerance_secs: f64,
    /// How long a manual sync is reported as in progress.
    pub settle_delay_ms: u64,
    /// Upper bound on how long a follower is exempt from correction after a seek.
    pub seek_grace_ms: u64,
    /// Delay of the resync issued after Play All. `None` disables it.
    pub resync_after_play_ms: Option<u64>,
    /// Maximum number of streams in the synchronized group.
    pub max_streams: usize,
    /// Capacity of the outward event channel.
    pub event_capacity: usize,
    pub loader: LoaderConfig,
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            drift_tolerance_secs: 0.2,
            settle_delay_ms: 1000,
            seek_grace_ms: 500,
            resync_after_play_ms: Some(1000),
            max_streams: 3,
            event_capacity: 256,
            loader: LoaderConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn drift_tolerance(&self) -> f64 {
        self.drift_tolerance_secs
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn seek_grace(&self) -> Duration {
        Duration::from_millis(self.seek_grace_ms)
    }

    pub fn resync_after_play(&self) -> Option<Duration> {
        self.resync_after_play_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.drift_tolerance_secs.is_finite() || self.drift_tolerance_secs <= 0.0 {
            return Err(SyncError::configuration(format!(
                "drift_tolerance_secs must be a positive number, got {}",
                self.drift_tolerance_secs
            )));
        }
        if self.max_streams == 0 {
            return Err(SyncError::configuration("max_streams must be at least 1"));
        }
        if self.event_capacity == 0 {
            return Err(SyncError::configuration("event_capacity must be at least 1"));
        }
        if !self.loader.back_buffer_length_secs.is_finite()
            || self.loader.back_buffer_length_secs < 0.0
        {
            return Err(SyncError::configuration(
                "loader.back_buffer_length_secs must be a non-negative number",
            ));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(SyncError::configuration(
                "retry.max_delay_ms must not be smaller than retry.base_delay_ms",
            ));
        }
        Ok(())
    }
}
