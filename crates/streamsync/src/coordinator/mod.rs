//! Master election and follower drift correction.
//!
//! The [`SyncCoordinator`] owns every [`StreamSource`], the [`SyncSession`],
//! the [`PlaybackHealthMonitor`] and the coordinator timers. Surfaces report
//! through [`EventSink`]s into a queue the coordinator drains in
//! [`pump`](SyncCoordinator::pump), so all session state is mutated from one
//! place regardless of which thread a surface emits on.

mod session;

pub use session::{SessionPhase, SyncSession, SyncStatus, SyncTrigger};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{Notify, broadcast, mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::descriptor::StreamDescriptor;
use crate::error::{ErrorKind, Result, SyncError};
use crate::events::{SyncEvent, SyncEventBroadcaster};
use crate::health::PlaybackHealthMonitor;
use crate::provider::StreamListProvider;
use crate::registry::StreamRegistry;
use crate::source::{SeekOutcome, SourceOutcome, SourceSnapshot, SourceState, StreamSource};
use crate::surface::{EventSink, SourceToken, SurfaceEvent, SurfaceFactory};
use crate::timers::{TimerKey, TimerSet};

/// Result of a manual or post-play sync pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub trigger: SyncTrigger,
    pub master_stream_id: String,
    pub master_position_secs: f64,
    /// Followers that received a seek, with the applied target.
    pub seeks: Vec<(String, f64)>,
    /// Followers that could not be seeked (not ready, failed).
    pub skipped: Vec<String>,
}

/// Outcome of an aggregate play or pause.
///
/// Every active source is attempted; one failure never stops the rest.
#[derive(Debug, Default)]
pub struct TransportReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, SyncError)>,
    /// Sources not in a state that accepts transport commands.
    pub skipped: Vec<String>,
}

impl TransportReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

pub struct SyncCoordinator {
    config: SyncConfig,
    factory: Arc<dyn SurfaceFactory>,
    clock: Arc<dyn Clock>,
    registry: StreamRegistry,
    sources: HashMap<Arc<str>, StreamSource>,
    session: SyncSession,
    health: PlaybackHealthMonitor,
    timers: TimerSet,
    event_tx: mpsc::UnboundedSender<SurfaceEvent>,
    event_rx: mpsc::UnboundedReceiver<SurfaceEvent>,
    wakeup: Arc<Notify>,
    next_generation: u64,
    /// Set by `play_all`, cleared by `pause_all`; sources that become ready
    /// later start playing on their own.
    play_requested: bool,
    events: SyncEventBroadcaster,
    status_tx: watch::Sender<SyncStatus>,
}

impl SyncCoordinator {
    pub fn new(
        config: SyncConfig,
        factory: Arc<dyn SurfaceFactory>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(SyncStatus::default());
        Ok(Self {
            session: SyncSession::new(config.drift_tolerance()),
            health: PlaybackHealthMonitor::new(config.retry.clone()),
            events: SyncEventBroadcaster::with_capacity(config.event_capacity),
            config,
            factory,
            clock,
            registry: StreamRegistry::new(),
            sources: HashMap::new(),
            timers: TimerSet::new(),
            event_tx,
            event_rx,
            wakeup: Arc::new(Notify::new()),
            next_generation: 0,
            play_requested: false,
            status_tx,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    pub fn session(&self) -> &SyncSession {
        &self.session
    }

    pub fn phase(&self) -> SessionPhase {
        self.session.phase()
    }

    pub fn health(&self) -> &PlaybackHealthMonitor {
        &self.health
    }

    pub fn status(&self) -> SyncStatus {
        self.session.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn event_broadcaster(&self) -> &SyncEventBroadcaster {
        &self.events
    }

    /// Notified whenever a surface queues an event.
    pub fn wakeup(&self) -> Arc<Notify> {
        Arc::clone(&self.wakeup)
    }

    /// Earliest pending timer, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Time left until the earliest pending timer, zero if already due.
    pub fn time_until_next_deadline(&self) -> Option<Duration> {
        self.next_deadline()
            .map(|deadline| deadline.saturating_duration_since(self.clock.now()))
    }

    pub fn source(&self, stream_id: &str) -> Option<&StreamSource> {
        self.sources.get(stream_id)
    }

    pub fn source_snapshot(&self, stream_id: &str) -> Option<SourceSnapshot> {
        self.sources.get(stream_id).map(StreamSource::snapshot)
    }

    /// Per-source state in registry order.
    pub fn snapshots(&self) -> Vec<SourceSnapshot> {
        self.registry
            .iter()
            .filter_map(|descriptor| self.sources.get(descriptor.id()))
            .map(StreamSource::snapshot)
            .collect()
    }

    /// Replaces the active stream set.
    ///
    /// Every current source is torn down before the new set is activated in
    /// registry order. An invalid batch is rejected and nothing changes.
    pub fn load_streams(&mut self, mut descriptors: Vec<StreamDescriptor>) -> Result<()> {
        if descriptors.len() > self.config.max_streams {
            warn!(
                available = descriptors.len(),
                max_streams = self.config.max_streams,
                "Stream list exceeds the synchronized group size, truncating"
            );
            descriptors.truncate(self.config.max_streams);
        }

        self.registry.load(descriptors)?;
        self.teardown_sources();

        let ids: Vec<Arc<str>> = self
            .registry
            .iter()
            .map(|descriptor| Arc::from(descriptor.id()))
            .collect();
        let descriptors: Vec<_> = self.registry.iter().cloned().collect();
        for (stream_id, descriptor) in ids.iter().zip(descriptors) {
            self.activate(Arc::clone(stream_id), descriptor);
        }

        info!(
            generation = self.registry.generation(),
            streams = ids.len(),
            "Activated stream set"
        );
        let timestamp = self.clock.wall_time();
        self.emit(SyncEvent::RegistryLoaded {
            stream_ids: ids.iter().map(|id| id.to_string()).collect(),
            generation: self.registry.generation(),
            timestamp,
        });
        if ids.is_empty() {
            self.emit(SyncEvent::NoStreams {
                reason: "stream list is empty".to_string(),
                timestamp,
            });
        }
        self.publish_status();
        Ok(())
    }

    fn activate(&mut self, stream_id: Arc<str>, descriptor: Arc<StreamDescriptor>) {
        self.next_generation += 1;
        let token = SourceToken {
            stream_id: Arc::clone(&stream_id),
            generation: self.next_generation,
        };
        let sink = EventSink::new(token, self.event_tx.clone(), Arc::clone(&self.wakeup));
        let mut source = StreamSource::new(descriptor, self.factory.as_ref(), sink);
        self.health.track(Arc::clone(&stream_id));

        match source.open(self.factory.as_ref(), &self.config.loader) {
            Ok(()) => self.health.record_loading(&stream_id),
            Err(e) => self.report_failure(&stream_id, ErrorKind::LoadError, e.to_string()),
        }
        self.sources.insert(stream_id, source);
    }

    /// Applies the result of a stream list fetch.
    ///
    /// A failed fetch leaves an empty registry and an idle session; the
    /// error is handed back so the caller can decide whether to fetch again.
    pub fn apply_fetch(&mut self, result: Result<Vec<StreamDescriptor>>) -> Result<()> {
        match result {
            Ok(descriptors) => self.load_streams(descriptors),
            Err(e) => {
                warn!(error = %e, "Stream list unavailable, clearing active streams");
                self.teardown_sources();
                self.registry.clear();
                self.emit(SyncEvent::NoStreams {
                    reason: e.to_string(),
                    timestamp: self.clock.wall_time(),
                });
                self.publish_status();
                Err(e)
            }
        }
    }

    /// Fetches the stream list and activates it.
    pub async fn refresh(&mut self, provider: &dyn StreamListProvider) -> Result<()> {
        let result = provider.fetch_stream_list().await;
        self.apply_fetch(result)
    }

    /// Drains queued surface events and fires due timers.
    ///
    /// Returns the number of surface events handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        loop {
            while let Ok(event) = self.event_rx.try_recv() {
                self.handle_surface_event(event);
                handled += 1;
            }
            let due = self.timers.take_due(self.clock.now());
            if due.is_empty() {
                break;
            }
            for key in due {
                self.fire_timer(key);
            }
        }
        handled
    }

    fn handle_surface_event(&mut self, event: SurfaceEvent) {
        let SurfaceEvent { token, kind } = event;
        let now = self.clock.now();
        let tolerance = self.config.drift_tolerance();

        let Some(source) = self.sources.get_mut(&token.stream_id) else {
            trace!(stream_id = %token.stream_id, "Dropping event for inactive stream");
            return;
        };
        if source.generation() != token.generation {
            trace!(
                stream_id = %token.stream_id,
                event_generation = token.generation,
                live_generation = source.generation(),
                "Dropping event from a replaced source"
            );
            return;
        }

        let outcome = source.apply_event(kind, now, tolerance);
        let stream_id = token.stream_id;
        match outcome {
            SourceOutcome::Ready => self.on_ready(stream_id, now),
            SourceOutcome::TimeAdvanced { position } => {
                if self.session.is_master(&stream_id) && !self.session.is_degraded() {
                    self.session.set_master_position(position);
                    self.correct_drift(position, now);
                }
            }
            SourceOutcome::SeekSettled { position } => {
                trace!(stream_id = %stream_id, position, "Seek completed");
            }
            SourceOutcome::Failed { kind, reason } => {
                self.report_failure(&stream_id, kind, reason.clone());
                self.on_source_failed(&stream_id, reason);
            }
            SourceOutcome::Warning { reason } => self.report_warning(&stream_id, reason),
            SourceOutcome::Ignored => {}
        }
    }

    fn on_ready(&mut self, stream_id: Arc<str>, now: Instant) {
        self.health.record_ready(&stream_id);
        self.emit(SyncEvent::StreamReady {
            stream_id: stream_id.to_string(),
            timestamp: self.clock.wall_time(),
        });

        if self.session.is_master(&stream_id) {
            if self.session.is_degraded() {
                info!(stream_id = %stream_id, "Master recovered");
                self.session.set_degraded(false);
            }
        } else {
            // Joins as a follower; it is promoted below if it turns out to be
            // the earliest ready stream in registry order.
            self.session.add_follower(Arc::clone(&stream_id));
            debug!(stream_id = %stream_id, "Follower joined session");
            self.elect_master();
        }

        if self.play_requested {
            self.play_source(&stream_id, now);
        }
    }

    /// Registry-order candidate for the master role.
    ///
    /// Entries that failed are passed over; one still loading blocks every
    /// later entry until it is ready or fails.
    fn master_candidate(&self) -> Option<Arc<str>> {
        for descriptor in self.registry.master_eligible() {
            let Some(source) = self.sources.get(descriptor.id()) else {
                continue;
            };
            match source.state() {
                state if state.accepts_transport() => return Some(Arc::clone(source.id())),
                SourceState::Error => continue,
                _ => return None,
            }
        }
        None
    }

    /// Elects the master once, if a candidate is settled. Never reassigns.
    fn elect_master(&mut self) {
        if self.session.master().is_some() {
            return;
        }
        let Some(stream_id) = self.master_candidate() else {
            return;
        };
        if !self.session.elect_master(Arc::clone(&stream_id)) {
            return;
        }
        if let Some(source) = self.sources.get_mut(&stream_id) {
            source.set_master(true);
        }
        info!(stream_id = %stream_id, "Master elected");
        self.emit(SyncEvent::MasterElected {
            stream_id: stream_id.to_string(),
            timestamp: self.clock.wall_time(),
        });
        self.set_phase(SessionPhase::Synced);
    }

    fn on_source_failed(&mut self, stream_id: &Arc<str>, reason: String) {
        if self.session.is_master(stream_id) {
            // The master role is kept; followers hold their last alignment.
            self.session.set_degraded(true);
            warn!(stream_id = %stream_id, %reason, "Master failed, sync degraded");
            self.emit(SyncEvent::DegradedSync {
                master_stream_id: stream_id.to_string(),
                reason,
                timestamp: self.clock.wall_time(),
            });
            return;
        }
        if self.session.remove_follower(stream_id) {
            debug!(stream_id = %stream_id, "Follower left session");
        }
        // A failed entry no longer blocks later ready streams.
        self.elect_master();
    }

    fn report_failure(&mut self, stream_id: &str, kind: ErrorKind, reason: String) {
        error!(stream_id, error_kind = %kind, %reason, "Stream failed");
        let timestamp = self.clock.wall_time();
        self.health
            .record_failure(stream_id, kind, reason.clone(), timestamp);
        self.emit(SyncEvent::StreamFailed {
            stream_id: stream_id.to_string(),
            kind,
            reason,
            timestamp,
        });
    }

    fn report_warning(&mut self, stream_id: &str, reason: String) {
        self.health.record_warning(stream_id, reason.clone());
        self.emit(SyncEvent::PlaybackWarning {
            stream_id: stream_id.to_string(),
            reason,
            timestamp: self.clock.wall_time(),
        });
    }

    /// Seeks every follower that drifted out of tolerance from `master_secs`.
    ///
    /// Followers with a seek still in flight are skipped: their position
    /// reports are expected to jump and are not drift.
    fn correct_drift(&mut self, master_secs: f64, now: Instant) -> usize {
        let grace = self.config.seek_grace();
        let corrections: Vec<(Arc<str>, f64)> = self
            .registry
            .iter()
            .filter(|descriptor| self.session.is_follower(descriptor.id()))
            .filter_map(|descriptor| self.sources.get(descriptor.id()))
            .filter(|source| source.state().accepts_transport())
            .filter(|source| !source.is_seek_pending(now, grace))
            .map(|source| {
                let drift = SyncSession::drift(master_secs, source.estimated_position(now));
                (Arc::clone(source.id()), drift)
            })
            .filter(|(_, drift)| self.session.exceeds_tolerance(*drift))
            .collect();

        if corrections.is_empty() {
            return 0;
        }

        self.set_phase(SessionPhase::Syncing);
        let timestamp = self.clock.wall_time();
        self.emit(SyncEvent::SyncStarted {
            trigger: SyncTrigger::Drift,
            master_position_secs: master_secs,
            timestamp,
        });

        let mut issued = 0;
        for (stream_id, drift) in corrections {
            let Some(source) = self.sources.get_mut(&stream_id) else {
                continue;
            };
            if let SeekOutcome::Applied(target) = source.seek_to(master_secs, now) {
                debug!(
                    stream_id = %stream_id,
                    drift_secs = drift,
                    target_secs = target,
                    "Correcting follower drift"
                );
                self.emit(SyncEvent::FollowerSeek {
                    stream_id: stream_id.to_string(),
                    target_secs: target,
                    drift_secs: Some(drift),
                    trigger: SyncTrigger::Drift,
                    timestamp,
                });
                issued += 1;
            }
        }

        // Seeks are fire-and-forget; a drift pass completes immediately
        // unless a manual sync is still settling.
        if !self.session.sync_in_flight() {
            self.set_phase(SessionPhase::Synced);
        }
        issued
    }

    /// Seeks every follower to the master position regardless of drift.
    ///
    /// `is_syncing` turns on immediately and clears after the settle delay.
    /// A second call while settling restarts the settle window.
    pub fn manual_sync(&mut self) -> Result<SyncReport> {
        self.sync_all(SyncTrigger::Manual)
    }

    fn sync_all(&mut self, trigger: SyncTrigger) -> Result<SyncReport> {
        let master_id = self
            .session
            .master()
            .cloned()
            .ok_or(SyncError::NoActiveSession)?;
        let now = self.clock.now();
        let master_secs = match self.sources.get(&master_id) {
            Some(master) => master.estimated_position(now),
            None => self.session.master_position_secs().unwrap_or(0.0),
        };

        let timestamp = self.clock.wall_time();
        self.session.begin_sync(timestamp);
        self.set_phase(SessionPhase::Syncing);
        info!(%trigger, master_stream_id = %master_id, master_secs, "Synchronizing followers");
        self.emit(SyncEvent::SyncStarted {
            trigger,
            master_position_secs: master_secs,
            timestamp,
        });

        let followers: Vec<Arc<str>> = self
            .registry
            .iter()
            .filter(|descriptor| self.session.is_follower(descriptor.id()))
            .map(|descriptor| Arc::from(descriptor.id()))
            .collect();

        let mut report = SyncReport {
            trigger,
            master_stream_id: master_id.to_string(),
            master_position_secs: master_secs,
            seeks: Vec::with_capacity(followers.len()),
            skipped: Vec::new(),
        };
        for stream_id in followers {
            let Some(source) = self.sources.get_mut(&stream_id) else {
                continue;
            };
            match source.seek_to(master_secs, now) {
                SeekOutcome::Applied(target) => {
                    self.emit(SyncEvent::FollowerSeek {
                        stream_id: stream_id.to_string(),
                        target_secs: target,
                        drift_secs: None,
                        trigger,
                        timestamp,
                    });
                    report.seeks.push((stream_id.to_string(), target));
                }
                SeekOutcome::SkippedMaster | SeekOutcome::SkippedInactive => {
                    report.skipped.push(stream_id.to_string());
                }
            }
        }

        let restarted = self
            .timers
            .schedule(TimerKey::Settle, now + self.config.settle_delay());
        if restarted {
            debug!("Settle window restarted");
        }
        self.publish_status();
        Ok(report)
    }

    fn finish_sync(&mut self) {
        self.session.finish_sync();
        let phase = if self.session.master().is_some() {
            SessionPhase::Synced
        } else {
            SessionPhase::Idle
        };
        self.set_phase(phase);
        debug!("Sync settled");
        self.emit(SyncEvent::SyncCompleted {
            timestamp: self.clock.wall_time(),
        });
        self.publish_status();
    }

    fn play_source(&mut self, stream_id: &Arc<str>, now: Instant) -> Option<SyncError> {
        let source = self.sources.get_mut(stream_id)?;
        match source.play(now) {
            Ok(()) => {
                self.health.record_playing(stream_id);
                None
            }
            Err(e) => {
                if e.kind() == Some(ErrorKind::PlaybackBlocked) {
                    self.report_warning(stream_id, e.to_string());
                }
                Some(e)
            }
        }
    }

    /// Starts playback on every active source.
    ///
    /// Blocked playback is reported per source as a warning. When enabled, a
    /// resync is scheduled shortly after.
    pub fn play_all(&mut self) -> TransportReport {
        let now = self.clock.now();
        let mut report = TransportReport::default();
        self.play_requested = true;

        let ids: Vec<Arc<str>> = self.ordered_ids();
        for stream_id in ids {
            let accepts = self
                .sources
                .get(&stream_id)
                .is_some_and(|source| source.state().accepts_transport());
            if !accepts {
                report.skipped.push(stream_id.to_string());
                continue;
            }
            match self.play_source(&stream_id, now) {
                None => report.succeeded.push(stream_id.to_string()),
                Some(e) => report.failed.push((stream_id.to_string(), e)),
            }
        }

        if let Some(delay) = self.config.resync_after_play()
            && !report.succeeded.is_empty()
        {
            self.timers.schedule(TimerKey::PostPlayResync, now + delay);
        }
        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Play all"
        );
        report
    }

    /// Pauses every active source. Pausing twice is harmless.
    pub fn pause_all(&mut self) -> TransportReport {
        let now = self.clock.now();
        let mut report = TransportReport::default();
        self.play_requested = false;
        self.timers.cancel(&TimerKey::PostPlayResync);

        let ids: Vec<Arc<str>> = self.ordered_ids();
        for stream_id in ids {
            let Some(source) = self.sources.get_mut(&stream_id) else {
                continue;
            };
            if !source.state().accepts_transport() {
                report.skipped.push(stream_id.to_string());
                continue;
            }
            match source.pause(now) {
                Ok(()) => {
                    self.health.record_paused(&stream_id);
                    report.succeeded.push(stream_id.to_string());
                }
                Err(e) => report.failed.push((stream_id.to_string(), e)),
            }
        }
        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Pause all"
        );
        report
    }

    /// Asks one stream's surface to reload its source.
    ///
    /// The stream is back in `Loading` until it reports ready again. A
    /// follower leaves the pool meanwhile; the master keeps its role.
    pub fn reload(&mut self, stream_id: &str) -> Result<()> {
        let Some(source) = self.sources.get_mut(stream_id) else {
            return Err(SyncError::unknown_stream(stream_id));
        };
        source.reload()?;
        let stream_id = Arc::clone(source.id());
        self.health.record_loading(&stream_id);
        if self.session.remove_follower(&stream_id) {
            debug!(stream_id = %stream_id, "Follower left session while reloading");
        }
        info!(stream_id = %stream_id, "Reloading stream");
        Ok(())
    }

    /// Reloads a failed stream now. Siblings are not touched.
    pub fn retry(&mut self, stream_id: &str) -> Result<()> {
        let Some(source) = self.sources.get_mut(stream_id) else {
            return Err(SyncError::unknown_stream(stream_id));
        };
        if !self.health.can_retry(stream_id) {
            return Err(SyncError::invalid_state(stream_id, "retry", source.state()));
        }
        let stream_id = Arc::clone(source.id());
        self.timers.cancel(&TimerKey::Retry(Arc::clone(&stream_id)));
        self.health.begin_retry(&stream_id);

        let result = source.retry(self.factory.as_ref(), &self.config.loader);
        info!(stream_id = %stream_id, "Retrying stream");
        self.emit(SyncEvent::StreamRetrying {
            stream_id: stream_id.to_string(),
            timestamp: self.clock.wall_time(),
        });
        if let Err(e) = &result {
            self.report_failure(&stream_id, ErrorKind::LoadError, e.to_string());
        }
        result
    }

    /// Schedules a retry after the backoff for the stream's failure count.
    pub fn schedule_retry(&mut self, stream_id: &str) -> Result<Duration> {
        let Some(source) = self.sources.get(stream_id) else {
            return Err(SyncError::unknown_stream(stream_id));
        };
        let stream_id = Arc::clone(source.id());
        let state = source.state();
        let now = self.clock.now();
        let Some(delay) = self.health.schedule_retry(&stream_id, now) else {
            return Err(SyncError::invalid_state(
                stream_id.as_ref(),
                "schedule a retry",
                state,
            ));
        };
        self.timers
            .schedule(TimerKey::Retry(Arc::clone(&stream_id)), now + delay);

        let attempt = self
            .health
            .health(&stream_id)
            .map_or(1, |health| health.consecutive_failures);
        debug!(stream_id = %stream_id, delay_ms = delay.as_millis() as u64, attempt, "Retry scheduled");
        self.emit(SyncEvent::RetryScheduled {
            stream_id: stream_id.to_string(),
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt,
            timestamp: self.clock.wall_time(),
        });
        Ok(delay)
    }

    fn fire_timer(&mut self, key: TimerKey) {
        match key {
            TimerKey::Settle => self.finish_sync(),
            TimerKey::PostPlayResync => {
                if let Err(e) = self.sync_all(SyncTrigger::PostPlay) {
                    debug!(error = %e, "Skipping post-play resync");
                }
            }
            TimerKey::Retry(stream_id) => {
                if let Err(e) = self.retry(&stream_id) {
                    warn!(stream_id = %stream_id, error = %e, "Scheduled retry failed");
                }
            }
        }
    }

    /// Tears down every source and returns the session to `Idle`.
    pub fn shutdown(&mut self) {
        self.teardown_sources();
        self.publish_status();
        debug!("Coordinator shut down");
    }

    fn teardown_sources(&mut self) {
        // Timers first so nothing can revive a stream mid-teardown.
        self.timers.clear();
        for source in self.sources.values_mut() {
            source.teardown();
        }
        self.sources.clear();
        self.health.clear();
        self.play_requested = false;
        let previous = self.session.phase();
        self.session.reset();
        if previous != SessionPhase::Idle {
            self.emit(SyncEvent::SessionStateChanged {
                old_phase: previous,
                new_phase: SessionPhase::Idle,
                timestamp: self.clock.wall_time(),
            });
        }
    }

    fn ordered_ids(&self) -> Vec<Arc<str>> {
        self.registry
            .iter()
            .filter_map(|descriptor| self.sources.get(descriptor.id()))
            .map(|source| Arc::clone(source.id()))
            .collect()
    }

    fn set_phase(&mut self, phase: SessionPhase) -> SessionPhase {
        let previous = self.session.set_phase(phase);
        if previous != phase {
            debug!(from = %previous, to = %phase, "Session phase changed");
            self.emit(SyncEvent::SessionStateChanged {
                old_phase: previous,
                new_phase: phase,
                timestamp: self.clock.wall_time(),
            });
        }
        previous
    }

    fn publish_status(&self) {
        self.status_tx.send_if_modified(|status| {
            let next = self.session.status();
            if *status == next {
                return false;
            }
            *status = next;
            true
        });
    }

    fn emit(&self, event: SyncEvent) {
        if !self.events.publish(event) {
            trace!("No event listeners");
        }
    }
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("generation", &self.registry.generation())
            .field("streams", &self.sources.len())
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
