use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase of a synchronization session.
///
/// `Idle` until a master is elected; afterwards the session is
/// active and alternates between `Synced` and `Syncing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionPhase {
    #[default]
    Idle,
    Synced,
    Syncing,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Synced => "SYNCED",
            Self::Syncing => "SYNCING",
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What caused a sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    /// Master time advanced and a follower was out of tolerance.
    Drift,
    /// Explicit resync request.
    Manual,
    /// Resync issued after Play All.
    PostPlay,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drift => "drift",
            Self::Manual => "manual",
            Self::PostPlay => "post-play",
        }
    }
}

impl std::fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outward sync indicator.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_syncing: bool,
    /// Milliseconds since the Unix epoch.
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub last_sync_timestamp: Option<DateTime<Utc>>,
}

/// Master/follower bookkeeping of one coordinator.
///
/// Streams are referenced by id only; the coordinator owns the sources.
/// At most one master exists, and it is never a follower.
#[derive(Debug, Clone)]
pub struct SyncSession {
    master_stream_id: Option<Arc<str>>,
    follower_stream_ids: BTreeSet<Arc<str>>,
    last_sync_at: Option<DateTime<Utc>>,
    sync_in_flight: bool,
    drift_tolerance_secs: f64,
    phase: SessionPhase,
    master_degraded: bool,
    master_position_secs: Option<f64>,
}

impl SyncSession {
    pub fn new(drift_tolerance_secs: f64) -> Self {
        Self {
            master_stream_id: None,
            follower_stream_ids: BTreeSet::new(),
            last_sync_at: None,
            sync_in_flight: false,
            drift_tolerance_secs,
            phase: SessionPhase::Idle,
            master_degraded: false,
            master_position_secs: None,
        }
    }

    pub fn master_stream_id(&self) -> Option<&str> {
        self.master_stream_id.as_deref()
    }

    pub(crate) fn master(&self) -> Option<&Arc<str>> {
        self.master_stream_id.as_ref()
    }

    pub fn follower_stream_ids(&self) -> impl Iterator<Item = &str> {
        self.follower_stream_ids.iter().map(|id| id.as_ref())
    }

    pub fn is_master(&self, stream_id: &str) -> bool {
        self.master_stream_id.as_deref() == Some(stream_id)
    }

    pub fn is_follower(&self, stream_id: &str) -> bool {
        self.follower_stream_ids.contains(stream_id)
    }

    pub fn follower_count(&self) -> usize {
        self.follower_stream_ids.len()
    }

    pub fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        self.last_sync_at
    }

    pub fn sync_in_flight(&self) -> bool {
        self.sync_in_flight
    }

    pub fn drift_tolerance_secs(&self) -> f64 {
        self.drift_tolerance_secs
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// The master failed and has not recovered.
    pub fn is_degraded(&self) -> bool {
        self.master_degraded
    }

    /// Last position reported by the master.
    pub fn master_position_secs(&self) -> Option<f64> {
        self.master_position_secs
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            is_syncing: self.sync_in_flight,
            last_sync_timestamp: self.last_sync_at,
        }
    }

    /// Signed drift of a follower; positive when the follower is behind.
    pub fn drift(master_secs: f64, follower_secs: f64) -> f64 {
        master_secs - follower_secs
    }

    pub fn exceeds_tolerance(&self, drift: f64) -> bool {
        drift.abs() > self.drift_tolerance_secs
    }

    /// Elects `stream_id` unless a master already exists.
    pub(crate) fn elect_master(&mut self, stream_id: Arc<str>) -> bool {
        if self.master_stream_id.is_some() {
            return false;
        }
        self.follower_stream_ids.remove(&stream_id);
        self.master_stream_id = Some(stream_id);
        true
    }

    pub(crate) fn add_follower(&mut self, stream_id: Arc<str>) -> bool {
        if self.is_master(&stream_id) {
            return false;
        }
        self.follower_stream_ids.insert(stream_id)
    }

    pub(crate) fn remove_follower(&mut self, stream_id: &str) -> bool {
        self.follower_stream_ids.remove(stream_id)
    }

    pub(crate) fn set_degraded(&mut self, degraded: bool) {
        self.master_degraded = degraded;
    }

    pub(crate) fn set_master_position(&mut self, seconds: f64) {
        self.master_position_secs = Some(seconds);
    }

    pub(crate) fn set_phase(&mut self, phase: SessionPhase) -> SessionPhase {
        std::mem::replace(&mut self.phase, phase)
    }

    pub(crate) fn begin_sync(&mut self, at: DateTime<Utc>) {
        self.sync_in_flight = true;
        self.last_sync_at = Some(at);
    }

    pub(crate) fn finish_sync(&mut self) {
        self.sync_in_flight = false;
    }

    /// Back to `Idle` with no streams. The tolerance is kept.
    pub(crate) fn reset(&mut self) {
        *self = Self::new(self.drift_tolerance_secs);
    }
}
