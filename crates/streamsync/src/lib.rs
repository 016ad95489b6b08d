//! # streamsync
//!
//! Synchronized playback of several independent HLS camera streams.
//!
//! One stream is elected master; every other stream follows the master's
//! playback position through best-effort seeks whenever the measured drift
//! exceeds a tolerance. Each stream loads, fails and recovers on its own,
//! so a broken camera never disturbs its siblings.
//!
//! ## Features
//!
//! - [`SyncCoordinator`]: master election, drift correction, manual resync
//!   with a settle window, aggregate play/pause
//! - [`StreamSource`]: per-stream lifecycle over an abstract playback surface,
//!   using the native path when available and an adaptive loader otherwise
//! - [`PlaybackHealthMonitor`]: isolated per-stream error/retry tracking
//! - [`StreamRegistry`]: the ordered set of configured streams
//! - [`SyncService`]: a tokio task that owns a coordinator and serializes
//!   every session mutation
//!
//! The playback surface itself is an external collaborator described by the
//! [`PlaybackSurface`], [`AdaptiveLoader`] and [`SurfaceFactory`] traits.

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod descriptor;
pub mod error;
pub mod events;
pub mod health;
pub mod provider;
pub mod registry;
pub mod service;
pub mod sim;
pub mod source;
pub mod surface;
mod timers;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LoaderConfig, RetryPolicy, SyncConfig};
pub use coordinator::{
    SessionPhase, SyncCoordinator, SyncReport, SyncSession, SyncStatus, SyncTrigger,
    TransportReport,
};
pub use descriptor::{MediaType, StreamDescriptor};
pub use error::{ErrorKind, Result, SyncError};
pub use events::{SyncEvent, SyncEventBroadcaster};
pub use health::{HealthState, PlaybackHealthMonitor, StreamHealth};
pub use provider::{
    HttpStreamListProvider, StaticStreamList, StreamListProvider, install_rustls_provider,
    parse_stream_list,
};
pub use registry::StreamRegistry;
pub use service::{SyncCommand, SyncHandle, SyncService};
pub use sim::{SimulatedSurfaceFactory, SimulationProfile};
pub use source::{LoadPath, SeekOutcome, SourceOutcome, SourceSnapshot, SourceState, StreamSource};
pub use surface::{
    AdaptiveLoader, EventSink, PlaybackSurface, SourceToken, SurfaceError, SurfaceEvent,
    SurfaceEventKind, SurfaceFactory,
};
