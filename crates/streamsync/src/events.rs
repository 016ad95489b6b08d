//! Sync events for presentation layers.
//!
//! Events are emitted by the [`SyncCoordinator`](crate::SyncCoordinator) and
//! fanned out over a broadcast channel; slow subscribers lag rather than
//! blocking the coordinator.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::coordinator::{SessionPhase, SyncTrigger};
use crate::error::ErrorKind;

/// Events emitted by the sync coordinator.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A new stream set was activated.
    RegistryLoaded {
        stream_ids: Vec<String>,
        generation: u64,
        timestamp: DateTime<Utc>,
    },
    /// The stream list could not be obtained; nothing is active.
    NoStreams {
        reason: String,
        timestamp: DateTime<Utc>,
    },
    StreamReady {
        stream_id: String,
        timestamp: DateTime<Utc>,
    },
    MasterElected {
        stream_id: String,
        timestamp: DateTime<Utc>,
    },
    SessionStateChanged {
        old_phase: SessionPhase,
        new_phase: SessionPhase,
        timestamp: DateTime<Utc>,
    },
    SyncStarted {
        trigger: SyncTrigger,
        master_position_secs: f64,
        timestamp: DateTime<Utc>,
    },
    /// A follower was told to seek to the master position.
    FollowerSeek {
        stream_id: String,
        target_secs: f64,
        /// Measured drift; absent for manual syncs, which seek regardless.
        drift_secs: Option<f64>,
        trigger: SyncTrigger,
        timestamp: DateTime<Utc>,
    },
    SyncCompleted {
        timestamp: DateTime<Utc>,
    },
    /// The master failed; followers keep their last alignment.
    DegradedSync {
        master_stream_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    StreamFailed {
        stream_id: String,
        kind: ErrorKind,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// Recoverable problem; the stream's state is unchanged.
    PlaybackWarning {
        stream_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    RetryScheduled {
        stream_id: String,
        delay_ms: u64,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    StreamRetrying {
        stream_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl SyncEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            SyncEvent::RegistryLoaded { timestamp, .. }
            | SyncEvent::NoStreams { timestamp, .. }
            | SyncEvent::StreamReady { timestamp, .. }
            | SyncEvent::MasterElected { timestamp, .. }
            | SyncEvent::SessionStateChanged { timestamp, .. }
            | SyncEvent::SyncStarted { timestamp, .. }
            | SyncEvent::FollowerSeek { timestamp, .. }
            | SyncEvent::SyncCompleted { timestamp }
            | SyncEvent::DegradedSync { timestamp, .. }
            | SyncEvent::StreamFailed { timestamp, .. }
            | SyncEvent::PlaybackWarning { timestamp, .. }
            | SyncEvent::RetryScheduled { timestamp, .. }
            | SyncEvent::StreamRetrying { timestamp, .. } => *timestamp,
        }
    }

    /// The stream this event is about, if any.
    pub fn stream_id(&self) -> Option<&str> {
        match self {
            SyncEvent::StreamReady { stream_id, .. }
            | SyncEvent::MasterElected { stream_id, .. }
            | SyncEvent::FollowerSeek { stream_id, .. }
            | SyncEvent::StreamFailed { stream_id, .. }
            | SyncEvent::PlaybackWarning { stream_id, .. }
            | SyncEvent::RetryScheduled { stream_id, .. }
            | SyncEvent::StreamRetrying { stream_id, .. } => Some(stream_id),
            SyncEvent::DegradedSync {
                master_stream_id, ..
            } => Some(master_stream_id),
            _ => None,
        }
    }

    /// Get a human-readable description of the event.
    pub fn description(&self) -> String {
        match self {
            SyncEvent::RegistryLoaded { stream_ids, .. } => {
                format!("loaded {} stream(s): {}", stream_ids.len(), stream_ids.join(", "))
            }
            SyncEvent::NoStreams { reason, .. } => format!("no streams available: {}", reason),
            SyncEvent::StreamReady { stream_id, .. } => format!("{} is ready", stream_id),
            SyncEvent::MasterElected { stream_id, .. } => format!("{} is the master", stream_id),
            SyncEvent::SessionStateChanged {
                old_phase,
                new_phase,
                ..
            } => format!("session {} -> {}", old_phase, new_phase),
            SyncEvent::SyncStarted {
                trigger,
                master_position_secs,
                ..
            } => format!("{} sync at {:.3}s", trigger, master_position_secs),
            SyncEvent::FollowerSeek {
                stream_id,
                target_secs,
                drift_secs,
                ..
            } => match drift_secs {
                Some(drift) => format!(
                    "{} seek to {:.3}s (drift {:+.3}s)",
                    stream_id, target_secs, drift
                ),
                None => format!("{} seek to {:.3}s", stream_id, target_secs),
            },
            SyncEvent::SyncCompleted { .. } => "sync completed".to_string(),
            SyncEvent::DegradedSync {
                master_stream_id,
                reason,
                ..
            } => format!("sync degraded, master {} failed: {}", master_stream_id, reason),
            SyncEvent::StreamFailed {
                stream_id,
                kind,
                reason,
                ..
            } => format!("{}: {} - {}", stream_id, kind, reason),
            SyncEvent::PlaybackWarning {
                stream_id, reason, ..
            } => format!("{}: warning - {}", stream_id, reason),
            SyncEvent::RetryScheduled {
                stream_id,
                delay_ms,
                attempt,
                ..
            } => format!(
                "{}: retry in {}ms (attempt {})",
                stream_id, delay_ms, attempt
            ),
            SyncEvent::StreamRetrying { stream_id, .. } => format!("{}: retrying", stream_id),
        }
    }
}

/// Fan-out of [`SyncEvent`]s to any number of listeners.
///
/// Clones share one channel. A listener that falls more than `capacity`
/// events behind sees a lag error and resumes at the oldest retained event.
#[derive(Clone)]
pub struct SyncEventBroadcaster {
    sender: broadcast::Sender<SyncEvent>,
}

impl SyncEventBroadcaster {
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Returns false when nobody is listening; the event is dropped.
    pub fn publish(&self, event: SyncEvent) -> bool {
        self.sender.send(event).is_ok()
    }
}

impl std::fmt::Debug for SyncEventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEventBroadcaster")
            .field("listeners", &self.sender.receiver_count())
            .finish()
    }
}
