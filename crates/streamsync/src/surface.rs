//! Contract of the playback surface the engine drives.
//!
//! A surface is an abstract video-rendering handle. The engine never talks
//! to a decoder directly: it assigns sources, issues transport commands and
//! listens to the events surfaces and loaders push through an [`EventSink`].

use std::sync::Arc;

use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::config::LoaderConfig;
use crate::descriptor::{MediaType, StreamDescriptor};

/// Identifies the source instance an event belongs to.
///
/// `generation` changes every time a stream id is re-activated, so events
/// from a torn-down instance can never be attributed to its replacement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceToken {
    pub stream_id: Arc<str>,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEventKind {
    /// The surface started fetching media.
    LoadStart,
    /// Enough media is buffered to start playback.
    CanPlay,
    /// The adaptive loader negotiated the manifest.
    ManifestParsed,
    /// Playback position update, in seconds.
    TimeAdvance(f64),
    /// The surface finished applying a seek, in seconds.
    SeekCompleted(f64),
    /// Adaptive loader error. Only fatal errors affect stream state.
    LoaderError { fatal: bool, reason: String },
    /// The surface failed to decode or fetch media.
    PlaybackError { reason: String },
}

#[derive(Debug, Clone)]
pub struct SurfaceEvent {
    pub token: SourceToken,
    pub kind: SurfaceEventKind,
}

/// Handle surfaces and loaders use to report events.
///
/// Once cancelled, emissions are dropped silently. Loader sinks are children
/// of the surface sink, so tearing down a source detaches both at once.
#[derive(Debug, Clone)]
pub struct EventSink {
    token: SourceToken,
    tx: mpsc::UnboundedSender<SurfaceEvent>,
    wakeup: Arc<Notify>,
    cancel: CancellationToken,
}

impl EventSink {
    pub fn new(
        token: SourceToken,
        tx: mpsc::UnboundedSender<SurfaceEvent>,
        wakeup: Arc<Notify>,
    ) -> Self {
        Self {
            token,
            tx,
            wakeup,
            cancel: CancellationToken::new(),
        }
    }

    /// A sink for the same source that can be detached independently.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.clone(),
            tx: self.tx.clone(),
            wakeup: Arc::clone(&self.wakeup),
            cancel: self.cancel.child_token(),
        }
    }

    pub fn token(&self) -> &SourceToken {
        &self.token
    }

    pub fn emit(&self, kind: SurfaceEventKind) {
        if self.cancel.is_cancelled() {
            trace!(stream_id = %self.token.stream_id, ?kind, "Dropping event from detached sink");
            return;
        }
        let event = SurfaceEvent {
            token: self.token.clone(),
            kind,
        };
        // A closed channel means the coordinator is gone.
        if self.tx.send(event).is_ok() {
            self.wakeup.notify_one();
        }
    }

    pub fn detach(&self) {
        self.cancel.cancel();
    }

    pub fn is_detached(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the sink has been detached.
    pub fn detached(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SurfaceError {
    #[error("playback blocked: {0}")]
    Blocked(String),
    #[error("surface unavailable: {0}")]
    Unavailable(String),
}

pub trait PlaybackSurface: Send {
    /// Whether the surface decodes this media type without a protocol loader.
    fn can_play_natively(&self, media_type: MediaType) -> bool;

    fn assign_source(&mut self, url: &str);

    fn play(&mut self) -> Result<(), SurfaceError>;

    fn pause(&mut self);

    fn seek(&mut self, seconds: f64);

    /// Current position if the surface can report it cheaply.
    fn current_position(&self) -> Option<f64>;

    fn reload(&mut self);

    /// Frees the surface. Called after any loader has been destroyed.
    fn release(&mut self);

    /// Whether the surface emits [`SurfaceEventKind::SeekCompleted`].
    fn reports_seek_completion(&self) -> bool {
        false
    }
}

/// Adaptive-bitrate protocol loader bound to one surface.
pub trait AdaptiveLoader: Send {
    fn load_source(&mut self, url: &str);

    fn attach(&mut self, surface: &mut dyn PlaybackSurface);

    /// Stops all network activity and callbacks.
    fn destroy(&mut self);
}

pub trait SurfaceFactory: Send + Sync {
    fn create_surface(
        &self,
        descriptor: &StreamDescriptor,
        sink: EventSink,
    ) -> Box<dyn PlaybackSurface>;

    /// Returns `None` when adaptive streaming is unsupported in this environment.
    fn create_loader(
        &self,
        descriptor: &StreamDescriptor,
        config: &LoaderConfig,
        sink: EventSink,
    ) -> Option<Box<dyn AdaptiveLoader>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> (EventSink, mpsc::UnboundedReceiver<SurfaceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = SourceToken {
            stream_id: Arc::from("cam"),
            generation: 7,
        };
        (EventSink::new(token, tx, Arc::new(Notify::new())), rx)
    }

    #[test]
    fn emit_tags_events_with_token() {
        let (sink, mut rx) = sink();
        sink.emit(SurfaceEventKind::CanPlay);
        let event = rx.try_recv().unwrap();
        assert_eq!(&*event.token.stream_id, "cam");
        assert_eq!(event.token.generation, 7);
        assert_eq!(event.kind, SurfaceEventKind::CanPlay);
    }

    #[test]
    fn detaching_parent_silences_children() {
        let (sink, mut rx) = sink();
        let loader_sink = sink.child();

        sink.detach();
        loader_sink.emit(SurfaceEventKind::ManifestParsed);
        sink.emit(SurfaceEventKind::TimeAdvance(1.0));

        assert!(loader_sink.is_detached());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn detaching_child_keeps_parent() {
        let (sink, mut rx) = sink();
        let loader_sink = sink.child();

        loader_sink.detach();
        loader_sink.emit(SurfaceEventKind::ManifestParsed);
        sink.emit(SurfaceEventKind::TimeAdvance(2.5));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, SurfaceEventKind::TimeAdvance(2.5));
        assert!(rx.try_recv().is_err());
    }
}
