//! Headless playback surfaces driven by tokio timers.
//!
//! Simulated surfaces advance their position in real (or paused tokio) time
//! at a configurable rate, which makes drift between cameras observable
//! without a decoder. They must be created inside a tokio runtime; outside
//! one they never report anything.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::LoaderConfig;
use crate::descriptor::{MediaType, StreamDescriptor};
use crate::surface::{
    AdaptiveLoader, EventSink, PlaybackSurface, SurfaceError, SurfaceEventKind, SurfaceFactory,
};

const MEDIA_SOURCE_SCHEME: &str = "blob:";

/// Behaviour of one simulated camera.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationProfile {
    /// Time from source assignment to readiness.
    pub load_delay: Duration,
    /// Interval between position reports while playing.
    pub tick_interval: Duration,
    /// Media seconds per wall second.
    pub playback_rate: f64,
    /// Position the stream starts at, e.g. a live edge offset.
    pub start_position_secs: f64,
    /// Whether the surface decodes HLS without a loader.
    pub native_hls: bool,
    /// Whether an adaptive loader is available.
    pub adaptive: bool,
    /// Fail loading with this reason.
    pub fail_load: Option<String>,
    /// Refuse `play()` as an autoplay policy would.
    pub block_play: bool,
    /// Report `SeekCompleted` after each seek.
    pub seek_completion: bool,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            load_delay: Duration::from_millis(300),
            tick_interval: Duration::from_millis(250),
            playback_rate: 1.0,
            start_position_secs: 0.0,
            native_hls: false,
            adaptive: true,
            fail_load: None,
            block_play: false,
            seek_completion: true,
        }
    }
}

impl SimulationProfile {
    pub fn with_rate(mut self, playback_rate: f64) -> Self {
        self.playback_rate = playback_rate;
        self
    }

    pub fn with_start_position(mut self, seconds: f64) -> Self {
        self.start_position_secs = seconds;
        self
    }

    pub fn failing(mut self, reason: impl Into<String>) -> Self {
        self.fail_load = Some(reason.into());
        self
    }
}

/// Creates [`SimulationProfile`]-driven surfaces and loaders.
#[derive(Debug, Clone, Default)]
pub struct SimulatedSurfaceFactory {
    default_profile: SimulationProfile,
    overrides: HashMap<String, SimulationProfile>,
}

impl SimulatedSurfaceFactory {
    pub fn new(default_profile: SimulationProfile) -> Self {
        Self {
            default_profile,
            overrides: HashMap::new(),
        }
    }

    /// Overrides the profile of one stream id.
    pub fn with_profile(mut self, stream_id: impl Into<String>, profile: SimulationProfile) -> Self {
        self.overrides.insert(stream_id.into(), profile);
        self
    }

    pub fn profile_for(&self, stream_id: &str) -> &SimulationProfile {
        self.overrides
            .get(stream_id)
            .unwrap_or(&self.default_profile)
    }
}

impl SurfaceFactory for SimulatedSurfaceFactory {
    fn create_surface(
        &self,
        descriptor: &StreamDescriptor,
        sink: EventSink,
    ) -> Box<dyn PlaybackSurface> {
        let profile = self.profile_for(descriptor.id()).clone();
        Box::new(SimulatedSurface::new(profile, sink))
    }

    fn create_loader(
        &self,
        descriptor: &StreamDescriptor,
        config: &LoaderConfig,
        sink: EventSink,
    ) -> Option<Box<dyn AdaptiveLoader>> {
        let profile = self.profile_for(descriptor.id());
        if !profile.adaptive {
            return None;
        }
        debug!(
            stream_id = descriptor.id(),
            low_latency = config.low_latency_mode,
            back_buffer_secs = config.back_buffer_length_secs,
            "Creating simulated adaptive loader"
        );
        Some(Box::new(SimulatedLoader {
            stream_id: descriptor.id().to_string(),
            profile: profile.clone(),
            sink,
            url: None,
        }))
    }
}

#[derive(Debug)]
struct Playhead {
    position: f64,
    /// Set while playing.
    playing_since: Option<Instant>,
    rate: f64,
}

impl Playhead {
    fn position(&self, now: Instant) -> f64 {
        match self.playing_since {
            Some(since) => self.position + now.saturating_duration_since(since).as_secs_f64() * self.rate,
            None => self.position,
        }
    }

    /// Folds elapsed playback into `position` and re-anchors at `now`.
    fn rebase(&mut self, now: Instant) {
        self.position = self.position(now);
        if self.playing_since.is_some() {
            self.playing_since = Some(now);
        }
    }
}

struct SimulatedSurface {
    profile: SimulationProfile,
    sink: EventSink,
    playhead: Arc<Mutex<Playhead>>,
    source: Option<String>,
    ticker_started: bool,
}

impl SimulatedSurface {
    fn new(profile: SimulationProfile, sink: EventSink) -> Self {
        let playhead = Playhead {
            position: profile.start_position_secs.max(0.0),
            playing_since: None,
            rate: profile.playback_rate,
        };
        Self {
            profile,
            sink,
            playhead: Arc::new(Mutex::new(playhead)),
            source: None,
            ticker_started: false,
        }
    }

    fn spawn_load(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(stream_id = %self.sink.token().stream_id, "No tokio runtime, simulated surface stays idle");
            return;
        };
        let sink = self.sink.clone();
        let delay = self.profile.load_delay;
        let failure = self.profile.fail_load.clone();
        runtime.spawn(async move {
            sink.emit(SurfaceEventKind::LoadStart);
            tokio::select! {
                _ = sink.detached() => {}
                _ = tokio::time::sleep(delay) => match failure {
                    Some(reason) => sink.emit(SurfaceEventKind::PlaybackError { reason }),
                    None => sink.emit(SurfaceEventKind::CanPlay),
                },
            }
        });
    }

    fn spawn_ticker(&mut self) {
        if self.ticker_started {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        self.ticker_started = true;
        let sink = self.sink.clone();
        let playhead = Arc::clone(&self.playhead);
        let period = self.profile.tick_interval.max(Duration::from_millis(1));
        runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let detached = sink.detached();
            tokio::pin!(detached);
            loop {
                tokio::select! {
                    _ = &mut detached => break,
                    _ = ticker.tick() => {
                        let position = {
                            let playhead = playhead.lock();
                            playhead.playing_since.map(|_| playhead.position(Instant::now()))
                        };
                        if let Some(position) = position {
                            sink.emit(SurfaceEventKind::TimeAdvance(position));
                        }
                    }
                }
            }
            trace!(stream_id = %sink.token().stream_id, "Simulated ticker stopped");
        });
    }
}

impl PlaybackSurface for SimulatedSurface {
    fn can_play_natively(&self, media_type: MediaType) -> bool {
        match media_type {
            MediaType::Mp4 => true,
            MediaType::Hls => self.profile.native_hls,
        }
    }

    fn assign_source(&mut self, url: &str) {
        self.source = Some(url.to_string());
        self.spawn_ticker();
        // Media-source URLs come from a loader, which reports readiness itself.
        if !url.starts_with(MEDIA_SOURCE_SCHEME) {
            self.spawn_load();
        }
    }

    fn play(&mut self) -> Result<(), SurfaceError> {
        if self.profile.block_play {
            return Err(SurfaceError::Blocked("autoplay is not allowed".to_string()));
        }
        if self.source.is_none() {
            return Err(SurfaceError::Unavailable("no source assigned".to_string()));
        }
        let mut playhead = self.playhead.lock();
        if playhead.playing_since.is_none() {
            playhead.playing_since = Some(Instant::now());
        }
        Ok(())
    }

    fn pause(&mut self) {
        let mut playhead = self.playhead.lock();
        playhead.rebase(Instant::now());
        playhead.playing_since = None;
    }

    fn seek(&mut self, seconds: f64) {
        {
            let mut playhead = self.playhead.lock();
            playhead.rebase(Instant::now());
            playhead.position = seconds.max(0.0);
        }
        if self.profile.seek_completion {
            self.sink.emit(SurfaceEventKind::SeekCompleted(seconds.max(0.0)));
        }
    }

    fn current_position(&self) -> Option<f64> {
        self.source
            .as_ref()
            .map(|_| self.playhead.lock().position(Instant::now()))
    }

    fn reload(&mut self) {
        if let Some(url) = self.source.clone() {
            self.pause();
            if !url.starts_with(MEDIA_SOURCE_SCHEME) {
                self.spawn_load();
            }
        }
    }

    fn release(&mut self) {
        self.sink.detach();
        self.source = None;
        self.playhead.lock().playing_since = None;
    }

    fn reports_seek_completion(&self) -> bool {
        self.profile.seek_completion
    }
}

struct SimulatedLoader {
    stream_id: String,
    profile: SimulationProfile,
    sink: EventSink,
    url: Option<String>,
}

impl AdaptiveLoader for SimulatedLoader {
    fn load_source(&mut self, url: &str) {
        self.url = Some(url.to_string());
    }

    fn attach(&mut self, surface: &mut dyn PlaybackSurface) {
        surface.assign_source(&format!("{MEDIA_SOURCE_SCHEME}sim/{}", self.stream_id));

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(stream_id = %self.stream_id, "No tokio runtime, simulated loader stays idle");
            return;
        };
        let sink = self.sink.clone();
        let delay = self.profile.load_delay;
        let failure = self.profile.fail_load.clone();
        runtime.spawn(async move {
            tokio::select! {
                _ = sink.detached() => {}
                _ = tokio::time::sleep(delay) => match failure {
                    Some(reason) => sink.emit(SurfaceEventKind::LoaderError { fatal: true, reason }),
                    None => sink.emit(SurfaceEventKind::ManifestParsed),
                },
            }
        });
    }

    fn destroy(&mut self) {
        self.sink.detach();
        self.url = None;
    }
}
