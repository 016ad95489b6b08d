//! One playable stream bound to one playback surface.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::LoaderConfig;
use crate::descriptor::{MediaType, StreamDescriptor};
use crate::error::{ErrorKind, Result, SyncError};
use crate::surface::{
    AdaptiveLoader, EventSink, PlaybackSurface, SurfaceError, SurfaceEventKind, SurfaceFactory,
};

/// Lifecycle states of a stream source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceState {
    #[default]
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Error,
}

impl SourceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Loading => "LOADING",
            Self::Ready => "READY",
            Self::Playing => "PLAYING",
            Self::Paused => "PAUSED",
            Self::Error => "ERROR",
        }
    }

    /// Whether the source accepts transport commands (play, pause, seek).
    pub fn accepts_transport(&self) -> bool {
        matches!(self, Self::Ready | Self::Playing | Self::Paused)
    }

    pub fn can_transition_to(&self, target: SourceState) -> bool {
        use SourceState::*;

        match (self, target) {
            (from, to) if *from == to => true,
            // Teardown is always allowed
            (_, Idle) => true,
            (Idle, Loading | Error) => true,
            (Loading, Ready | Error) => true,
            (Ready | Playing | Paused, Playing | Paused | Loading | Error) => true,
            (Error, Loading) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the media reaches the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadPath {
    Native,
    Adaptive,
}

/// What a surface event meant for the source, for the coordinator to act on.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceOutcome {
    /// First readiness since the last `open`.
    Ready,
    TimeAdvanced { position: f64 },
    SeekSettled { position: f64 },
    Failed { kind: ErrorKind, reason: String },
    /// Non-fatal problem; state unchanged.
    Warning { reason: String },
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeekOutcome {
    Applied(f64),
    /// Masters own their position.
    SkippedMaster,
    /// The source is not in a state that accepts seeks.
    SkippedInactive,
}

#[derive(Debug, Clone, Copy)]
struct PendingSeek {
    target: f64,
    issued_at: Instant,
}

/// Presentation-friendly view of a source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSnapshot {
    pub id: String,
    pub title: String,
    pub url: String,
    pub media_type: MediaType,
    pub state: SourceState,
    pub position_secs: f64,
    pub is_master: bool,
    pub is_visible: bool,
    pub load_path: Option<LoadPath>,
    pub last_error: Option<ErrorKind>,
}

pub struct StreamSource {
    descriptor: Arc<StreamDescriptor>,
    stream_id: Arc<str>,
    generation: u64,
    state: SourceState,
    position: f64,
    observed_at: Option<Instant>,
    is_master: bool,
    is_visible: bool,
    ready_emitted: bool,
    last_error: Option<ErrorKind>,
    last_error_reason: Option<String>,
    load_path: Option<LoadPath>,
    pending_seek: Option<PendingSeek>,
    surface: Box<dyn PlaybackSurface>,
    sink: EventSink,
    loader: Option<Box<dyn AdaptiveLoader>>,
    loader_sink: Option<EventSink>,
    torn_down: bool,
}

impl StreamSource {
    /// Creates the surface for `descriptor`. Nothing is loaded until [`open`](Self::open).
    pub fn new(
        descriptor: Arc<StreamDescriptor>,
        factory: &dyn SurfaceFactory,
        sink: EventSink,
    ) -> Self {
        let surface = factory.create_surface(&descriptor, sink.clone());
        let token = sink.token().clone();
        Self {
            descriptor,
            stream_id: token.stream_id,
            generation: token.generation,
            state: SourceState::Idle,
            position: 0.0,
            observed_at: None,
            is_master: false,
            is_visible: false,
            ready_emitted: false,
            last_error: None,
            last_error_reason: None,
            load_path: None,
            pending_seek: None,
            surface,
            sink,
            loader: None,
            loader_sink: None,
            torn_down: false,
        }
    }

    pub fn id(&self) -> &Arc<str> {
        &self.stream_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn is_master(&self) -> bool {
        self.is_master
    }

    pub fn set_master(&mut self, is_master: bool) {
        self.is_master = is_master;
    }

    pub fn is_visible(&self) -> bool {
        self.is_visible
    }

    pub fn last_error(&self) -> Option<ErrorKind> {
        self.last_error
    }

    pub fn last_error_reason(&self) -> Option<&str> {
        self.last_error_reason.as_deref()
    }

    pub fn load_path(&self) -> Option<LoadPath> {
        self.load_path
    }

    fn transition(&mut self, target: SourceState) {
        if self.state == target {
            return;
        }
        if !self.state.can_transition_to(target) {
            warn!(
                stream_id = %self.stream_id,
                from = %self.state,
                to = %target,
                "Unexpected source state transition"
            );
        }
        debug!(stream_id = %self.stream_id, from = %self.state, to = %target, "Source state changed");
        self.state = target;
        if matches!(target, SourceState::Loading | SourceState::Error | SourceState::Idle) {
            self.is_visible = false;
        }
    }

    /// Begins loading, natively when the surface can, through an adaptive loader otherwise.
    ///
    /// When neither path is available the source ends up in `Error`.
    pub fn open(&mut self, factory: &dyn SurfaceFactory, config: &LoaderConfig) -> Result<()> {
        self.transition(SourceState::Loading);
        self.ready_emitted = false;
        self.pending_seek = None;

        let media_type = self.descriptor.media_type();
        if self.surface.can_play_natively(media_type) {
            debug!(stream_id = %self.stream_id, media_type = %media_type, "Using native playback");
            self.load_path = Some(LoadPath::Native);
            self.surface.assign_source(self.descriptor.url());
            return Ok(());
        }

        let loader_sink = self.sink.child();
        match factory.create_loader(&self.descriptor, config, loader_sink.clone()) {
            Some(mut loader) => {
                debug!(stream_id = %self.stream_id, "Using adaptive loader");
                loader.load_source(self.descriptor.url());
                loader.attach(self.surface.as_mut());
                self.load_path = Some(LoadPath::Adaptive);
                self.loader = Some(loader);
                self.loader_sink = Some(loader_sink);
                Ok(())
            }
            None => {
                loader_sink.detach();
                let reason = format!("no native or adaptive playback support for {media_type}");
                self.fail(ErrorKind::LoadError, reason.clone());
                Err(SyncError::load(self.stream_id.as_ref(), reason))
            }
        }
    }

    fn fail(&mut self, kind: ErrorKind, reason: String) {
        self.last_error = Some(kind);
        self.last_error_reason = Some(reason);
        self.pending_seek = None;
        self.transition(SourceState::Error);
    }

    fn release_loader(&mut self) {
        if let Some(sink) = self.loader_sink.take() {
            sink.detach();
        }
        if let Some(mut loader) = self.loader.take() {
            loader.destroy();
        }
    }

    /// Discards the current loader and loads again. Only valid in `Error`.
    pub fn retry(&mut self, factory: &dyn SurfaceFactory, config: &LoaderConfig) -> Result<()> {
        if self.state != SourceState::Error {
            return Err(SyncError::invalid_state(
                self.stream_id.as_ref(),
                "retry",
                self.state,
            ));
        }
        info!(stream_id = %self.stream_id, "Retrying stream");
        self.release_loader();
        self.last_error = None;
        self.last_error_reason = None;
        self.open(factory, config)
    }

    /// Asks the surface to reload its current source.
    pub fn reload(&mut self) -> Result<()> {
        if !matches!(
            self.state,
            SourceState::Ready | SourceState::Playing | SourceState::Paused | SourceState::Loading
        ) {
            return Err(SyncError::invalid_state(
                self.stream_id.as_ref(),
                "reload",
                self.state,
            ));
        }
        self.surface.reload();
        self.ready_emitted = false;
        self.pending_seek = None;
        self.transition(SourceState::Loading);
        Ok(())
    }

    /// Interprets a surface or loader event.
    pub fn apply_event(&mut self, kind: SurfaceEventKind, now: Instant, tolerance: f64) -> SourceOutcome {
        if self.torn_down {
            return SourceOutcome::Ignored;
        }

        match kind {
            SurfaceEventKind::LoadStart => {
                if self.state == SourceState::Loading {
                    debug!(stream_id = %self.stream_id, "Load started");
                }
                SourceOutcome::Ignored
            }
            SurfaceEventKind::CanPlay | SurfaceEventKind::ManifestParsed => {
                if self.state != SourceState::Loading || self.ready_emitted {
                    return SourceOutcome::Ignored;
                }
                self.ready_emitted = true;
                self.transition(SourceState::Ready);
                self.is_visible = true;
                SourceOutcome::Ready
            }
            SurfaceEventKind::TimeAdvance(seconds) => {
                if matches!(self.state, SourceState::Idle | SourceState::Error) {
                    return SourceOutcome::Ignored;
                }
                let position = clamp_position(seconds);
                self.position = position;
                self.observed_at = Some(now);
                if let Some(pending) = self.pending_seek
                    && (position - pending.target).abs() <= tolerance
                {
                    self.pending_seek = None;
                }
                SourceOutcome::TimeAdvanced { position }
            }
            SurfaceEventKind::SeekCompleted(seconds) => {
                let position = clamp_position(seconds);
                self.position = position;
                self.observed_at = Some(now);
                self.pending_seek = None;
                SourceOutcome::SeekSettled { position }
            }
            SurfaceEventKind::LoaderError { fatal: false, reason } => {
                debug!(stream_id = %self.stream_id, %reason, "Non-fatal loader error");
                SourceOutcome::Warning { reason }
            }
            SurfaceEventKind::LoaderError { fatal: true, reason }
            | SurfaceEventKind::PlaybackError { reason } => {
                if self.state == SourceState::Error {
                    return SourceOutcome::Ignored;
                }
                self.fail(ErrorKind::LoadError, reason.clone());
                SourceOutcome::Failed {
                    kind: ErrorKind::LoadError,
                    reason,
                }
            }
        }
    }

    /// Requests playback. A refusal by the environment is reported without a state change.
    pub fn play(&mut self, now: Instant) -> Result<()> {
        if !self.state.accepts_transport() {
            return Err(SyncError::invalid_state(
                self.stream_id.as_ref(),
                "play",
                self.state,
            ));
        }
        match self.surface.play() {
            Ok(()) => {
                if self.state != SourceState::Playing {
                    // Anchor position estimation at the moment playback starts.
                    self.observed_at = Some(now);
                }
                self.transition(SourceState::Playing);
                Ok(())
            }
            Err(SurfaceError::Blocked(reason) | SurfaceError::Unavailable(reason)) => {
                warn!(stream_id = %self.stream_id, %reason, "Playback request refused");
                Err(SyncError::playback_blocked(self.stream_id.as_ref(), reason))
            }
        }
    }

    /// Pauses playback. Pausing a paused source is a no-op.
    pub fn pause(&mut self, now: Instant) -> Result<()> {
        if !self.state.accepts_transport() {
            return Err(SyncError::invalid_state(
                self.stream_id.as_ref(),
                "pause",
                self.state,
            ));
        }
        if self.state == SourceState::Paused {
            return Ok(());
        }
        self.position = self.estimated_position(now);
        self.observed_at = Some(now);
        self.surface.pause();
        self.transition(SourceState::Paused);
        Ok(())
    }

    /// Seeks a follower. Negative or non-finite targets are clamped to zero.
    pub fn seek_to(&mut self, seconds: f64, now: Instant) -> SeekOutcome {
        if self.is_master {
            return SeekOutcome::SkippedMaster;
        }
        if !self.state.accepts_transport() {
            return SeekOutcome::SkippedInactive;
        }
        let target = clamp_position(seconds);
        self.surface.seek(target);
        self.position = target;
        self.observed_at = Some(now);
        self.pending_seek = Some(PendingSeek {
            target,
            issued_at: now,
        });
        SeekOutcome::Applied(target)
    }

    /// Whether a recently issued seek has not landed yet.
    pub fn is_seek_pending(&self, now: Instant, grace: Duration) -> bool {
        self.pending_seek
            .is_some_and(|pending| now.saturating_duration_since(pending.issued_at) < grace)
    }

    /// Best available estimate of the playback position.
    pub fn estimated_position(&self, now: Instant) -> f64 {
        if let Some(position) = self.surface.current_position() {
            return clamp_position(position);
        }
        match (self.state, self.observed_at) {
            (SourceState::Playing, Some(observed_at)) => {
                self.position + now.saturating_duration_since(observed_at).as_secs_f64()
            }
            _ => self.position,
        }
    }

    pub fn snapshot(&self) -> SourceSnapshot {
        SourceSnapshot {
            id: self.stream_id.to_string(),
            title: self.descriptor.title().to_string(),
            url: self.descriptor.url().to_string(),
            media_type: self.descriptor.media_type(),
            state: self.state,
            position_secs: self.position,
            is_master: self.is_master,
            is_visible: self.is_visible,
            load_path: self.load_path,
            last_error: self.last_error,
        }
    }

    /// Detaches callbacks, destroys the loader, then releases the surface.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.sink.detach();
        self.release_loader();
        self.surface.release();
        self.pending_seek = None;
        self.transition(SourceState::Idle);
        self.torn_down = true;
        debug!(stream_id = %self.stream_id, generation = self.generation, "Source torn down");
    }
}

impl Drop for StreamSource {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSource")
            .field("stream_id", &self.stream_id)
            .field("generation", &self.generation)
            .field("state", &self.state)
            .field("position", &self.position)
            .field("is_master", &self.is_master)
            .field("load_path", &self.load_path)
            .finish_non_exhaustive()
    }
}

fn clamp_position(seconds: f64) -> f64 {
    if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        0.0
    }
}
