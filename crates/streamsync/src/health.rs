//! Per-stream failure and recovery bookkeeping.
//!
//! Every stream has its own [`StreamHealth`] record. There is no shared
//! retry budget and no global breaker: recording a failure or a retry for
//! one stream never touches another stream's record.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::config::RetryPolicy;
use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthState {
    #[default]
    Loading,
    Ready,
    Playing,
    Error,
    /// A retry has been scheduled and has not fired yet.
    Retrying,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loading => "LOADING",
            Self::Ready => "READY",
            Self::Playing => "PLAYING",
            Self::Error => "ERROR",
            Self::Retrying => "RETRYING",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Error | Self::Retrying)
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StreamHealth {
    pub state: HealthState,
    /// Failures since the stream was last Ready.
    pub consecutive_failures: u32,
    pub total_failures: u32,
    /// Non-fatal warnings (blocked playback, recoverable loader errors).
    pub warnings: u32,
    pub last_error: Option<ErrorKind>,
    pub last_reason: Option<String>,
    pub last_failure_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub retry_at: Option<Instant>,
}

#[derive(Debug)]
pub struct PlaybackHealthMonitor {
    streams: HashMap<Arc<str>, StreamHealth>,
    policy: RetryPolicy,
}

impl PlaybackHealthMonitor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            streams: HashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Starts tracking `stream_id` in `Loading`, replacing any previous record.
    pub fn track(&mut self, stream_id: Arc<str>) {
        self.streams.insert(stream_id, StreamHealth::default());
    }

    pub fn clear(&mut self) {
        self.streams.clear();
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn record_loading(&mut self, stream_id: &str) {
        if let Some(health) = self.streams.get_mut(stream_id) {
            health.state = HealthState::Loading;
            health.retry_at = None;
        }
    }

    pub fn record_ready(&mut self, stream_id: &str) {
        if let Some(health) = self.streams.get_mut(stream_id) {
            health.state = HealthState::Ready;
            health.consecutive_failures = 0;
            health.retry_at = None;
        }
    }

    pub fn record_playing(&mut self, stream_id: &str) {
        if let Some(health) = self.streams.get_mut(stream_id)
            && !health.state.is_failed()
        {
            health.state = HealthState::Playing;
        }
    }

    /// Playback went back to a paused-but-healthy state.
    pub fn record_paused(&mut self, stream_id: &str) {
        if let Some(health) = self.streams.get_mut(stream_id)
            && health.state == HealthState::Playing
        {
            health.state = HealthState::Ready;
        }
    }

    pub fn record_failure(
        &mut self,
        stream_id: &str,
        kind: ErrorKind,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) {
        let Some(health) = self.streams.get_mut(stream_id) else {
            return;
        };
        health.state = HealthState::Error;
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        health.total_failures = health.total_failures.saturating_add(1);
        health.last_error = Some(kind);
        health.last_reason = Some(reason.into());
        health.last_failure_at = Some(at);
        health.retry_at = None;
        debug!(
            stream_id,
            consecutive_failures = health.consecutive_failures,
            "Recorded stream failure"
        );
    }

    pub fn record_warning(&mut self, stream_id: &str, reason: impl Into<String>) {
        if let Some(health) = self.streams.get_mut(stream_id) {
            health.warnings = health.warnings.saturating_add(1);
            health.last_reason = Some(reason.into());
        }
    }

    /// Whether the stream is in a state a retry can start from.
    pub fn can_retry(&self, stream_id: &str) -> bool {
        self.streams
            .get(stream_id)
            .is_some_and(|health| health.state.is_failed())
    }

    /// Marks a scheduled retry and returns its delay.
    pub fn schedule_retry(&mut self, stream_id: &str, now: Instant) -> Option<Duration> {
        let health = self.streams.get_mut(stream_id)?;
        if !health.state.is_failed() {
            return None;
        }
        let attempt = health.consecutive_failures.saturating_sub(1);
        let delay = self.policy.delay_for_attempt(attempt);
        health.state = HealthState::Retrying;
        health.retry_at = Some(now + delay);
        Some(delay)
    }

    /// A retry is starting; the stream is loading again.
    pub fn begin_retry(&mut self, stream_id: &str) -> bool {
        if !self.can_retry(stream_id) {
            return false;
        }
        self.record_loading(stream_id);
        true
    }

    pub fn health(&self, stream_id: &str) -> Option<&StreamHealth> {
        self.streams.get(stream_id)
    }

    pub fn state(&self, stream_id: &str) -> Option<HealthState> {
        self.streams.get(stream_id).map(|health| health.state)
    }

    pub fn snapshot(&self) -> HashMap<String, StreamHealth> {
        self.streams
            .iter()
            .map(|(id, health)| (id.to_string(), health.clone()))
            .collect()
    }
}
