#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use streamsync::{
    AdaptiveLoader, Clock, EventSink, LoaderConfig, ManualClock, MediaType, PlaybackSurface,
    RetryPolicy, StreamDescriptor, SurfaceError, SurfaceEventKind, SurfaceFactory, SyncConfig,
    SyncCoordinator,
};

/// What a fake surface was asked to do.
#[derive(Debug, Default, Clone)]
pub struct SurfaceLog {
    pub assigned: Vec<String>,
    pub seeks: Vec<f64>,
    pub plays: u32,
    pub pauses: u32,
    pub reloads: u32,
    pub released: bool,
}

#[derive(Default)]
struct FakeState {
    native: bool,
    adaptive: bool,
    blocked: HashSet<String>,
    logs: HashMap<String, Arc<Mutex<SurfaceLog>>>,
    sinks: HashMap<String, EventSink>,
    loader_sinks: HashMap<String, EventSink>,
    lifecycle: Vec<String>,
    surfaces_created: HashMap<String, u32>,
}

/// Surface factory recording every call, with sinks exposed so tests can
/// play the part of the decoder.
#[derive(Clone)]
pub struct FakeFactory {
    state: Arc<Mutex<FakeState>>,
}

impl FakeFactory {
    /// Surfaces play everything natively.
    pub fn native() -> Self {
        Self::with_support(true, false)
    }

    /// Surfaces need an adaptive loader.
    pub fn adaptive() -> Self {
        Self::with_support(false, true)
    }

    /// Neither native playback nor a loader is available.
    pub fn unsupported() -> Self {
        Self::with_support(false, false)
    }

    fn with_support(native: bool, adaptive: bool) -> Self {
        let state = FakeState {
            native,
            adaptive,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn block_play(&self, stream_id: &str) {
        self.state.lock().blocked.insert(stream_id.to_string());
    }

    pub fn log(&self, stream_id: &str) -> SurfaceLog {
        self.state
            .lock()
            .logs
            .get(stream_id)
            .map(|log| log.lock().clone())
            .unwrap_or_default()
    }

    pub fn seeks(&self, stream_id: &str) -> Vec<f64> {
        self.log(stream_id).seeks
    }

    pub fn sink(&self, stream_id: &str) -> EventSink {
        self.state.lock().sinks[stream_id].clone()
    }

    pub fn loader_sink(&self, stream_id: &str) -> EventSink {
        self.state.lock().loader_sinks[stream_id].clone()
    }

    pub fn emit(&self, stream_id: &str, kind: SurfaceEventKind) {
        self.sink(stream_id).emit(kind);
    }

    pub fn lifecycle(&self) -> Vec<String> {
        self.state.lock().lifecycle.clone()
    }

    pub fn surfaces_created(&self, stream_id: &str) -> u32 {
        self.state
            .lock()
            .surfaces_created
            .get(stream_id)
            .copied()
            .unwrap_or(0)
    }
}

struct FakeSurface {
    stream_id: String,
    state: Arc<Mutex<FakeState>>,
    log: Arc<Mutex<SurfaceLog>>,
}

impl PlaybackSurface for FakeSurface {
    fn can_play_natively(&self, _media_type: MediaType) -> bool {
        self.state.lock().native
    }

    fn assign_source(&mut self, url: &str) {
        self.log.lock().assigned.push(url.to_string());
    }

    fn play(&mut self) -> Result<(), SurfaceError> {
        if self.state.lock().blocked.contains(&self.stream_id) {
            return Err(SurfaceError::Blocked("autoplay policy".to_string()));
        }
        self.log.lock().plays += 1;
        Ok(())
    }

    fn pause(&mut self) {
        self.log.lock().pauses += 1;
    }

    fn seek(&mut self, seconds: f64) {
        self.log.lock().seeks.push(seconds);
    }

    fn current_position(&self) -> Option<f64> {
        None
    }

    fn reload(&mut self) {
        self.log.lock().reloads += 1;
    }

    fn release(&mut self) {
        self.log.lock().released = true;
        self.state
            .lock()
            .lifecycle
            .push(format!("surface_released:{}", self.stream_id));
    }
}

struct FakeLoader {
    stream_id: String,
    state: Arc<Mutex<FakeState>>,
}

impl AdaptiveLoader for FakeLoader {
    fn load_source(&mut self, url: &str) {
        self.state
            .lock()
            .lifecycle
            .push(format!("loader_loaded:{}:{url}", self.stream_id));
    }

    fn attach(&mut self, surface: &mut dyn PlaybackSurface) {
        surface.assign_source(&format!("blob:{}", self.stream_id));
    }

    fn destroy(&mut self) {
        self.state
            .lock()
            .lifecycle
            .push(format!("loader_destroyed:{}", self.stream_id));
    }
}

impl SurfaceFactory for FakeFactory {
    fn create_surface(
        &self,
        descriptor: &StreamDescriptor,
        sink: EventSink,
    ) -> Box<dyn PlaybackSurface> {
        let id = descriptor.id().to_string();
        let log = Arc::new(Mutex::new(SurfaceLog::default()));
        let mut state = self.state.lock();
        state.logs.insert(id.clone(), Arc::clone(&log));
        state.sinks.insert(id.clone(), sink);
        *state.surfaces_created.entry(id.clone()).or_default() += 1;
        Box::new(FakeSurface {
            stream_id: id,
            state: Arc::clone(&self.state),
            log,
        })
    }

    fn create_loader(
        &self,
        descriptor: &StreamDescriptor,
        _config: &LoaderConfig,
        sink: EventSink,
    ) -> Option<Box<dyn AdaptiveLoader>> {
        let mut state = self.state.lock();
        if !state.adaptive {
            return None;
        }
        let id = descriptor.id().to_string();
        state.loader_sinks.insert(id.clone(), sink);
        Some(Box::new(FakeLoader {
            stream_id: id,
            state: Arc::clone(&self.state),
        }))
    }
}

pub fn descriptors(ids: &[&str]) -> Vec<StreamDescriptor> {
    ids.iter()
        .map(|id| {
            let index = id.trim_start_matches(|c: char| !c.is_ascii_digit());
            StreamDescriptor::new(*id, format!("Camera {index}"), format!("u{index}"), MediaType::Hls)
        })
        .collect()
}

pub fn test_config() -> SyncConfig {
    SyncConfig {
        retry: RetryPolicy {
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter: false,
        },
        ..SyncConfig::default()
    }
}

pub struct Harness {
    pub coordinator: SyncCoordinator,
    pub factory: FakeFactory,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new(factory: FakeFactory) -> Self {
        Self::with_config(factory, test_config())
    }

    pub fn with_config(factory: FakeFactory, config: SyncConfig) -> Self {
        let clock = Arc::new(ManualClock::new());
        let coordinator = SyncCoordinator::new(
            config,
            Arc::new(factory.clone()),
            Arc::clone(&clock) as Arc<dyn Clock>,
        )
        .unwrap();
        Self {
            coordinator,
            factory,
            clock,
        }
    }

    /// Loads `ids` and reports every stream ready, in the given order.
    pub fn loaded(ids: &[&str]) -> Self {
        let mut harness = Self::new(FakeFactory::native());
        harness.coordinator.load_streams(descriptors(ids)).unwrap();
        for id in ids {
            harness.emit(id, SurfaceEventKind::CanPlay);
        }
        harness
    }

    /// Emits on the stream's surface sink and drains the queue.
    pub fn emit(&mut self, stream_id: &str, kind: SurfaceEventKind) {
        self.factory.emit(stream_id, kind);
        self.coordinator.pump();
    }

    pub fn report_time(&mut self, stream_id: &str, seconds: f64) {
        self.emit(stream_id, SurfaceEventKind::TimeAdvance(seconds));
    }

    pub fn fail(&mut self, stream_id: &str, reason: &str) {
        self.emit(
            stream_id,
            SurfaceEventKind::PlaybackError {
                reason: reason.to_string(),
            },
        );
    }

    pub fn advance(&mut self, by: Duration) {
        self.clock.advance(by);
        self.coordinator.pump();
    }

    pub fn masters(&self) -> Vec<String> {
        self.coordinator
            .snapshots()
            .into_iter()
            .filter(|snapshot| snapshot.is_master)
            .map(|snapshot| snapshot.id)
            .collect()
    }
}
