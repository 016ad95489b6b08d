//! Async driver for a [`SyncCoordinator`].
//!
//! The service moves the coordinator into a single tokio task. Commands,
//! surface wakeups and timer deadlines are all handled in that task, so
//! session state is only ever mutated from one place.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordinator::{SyncCoordinator, SyncReport, SyncStatus, TransportReport};
use crate::descriptor::StreamDescriptor;
use crate::error::{Result, SyncError};
use crate::events::{SyncEvent, SyncEventBroadcaster};
use crate::health::StreamHealth;
use crate::provider::StreamListProvider;
use crate::source::SourceSnapshot;

const COMMAND_CAPACITY: usize = 64;

/// Messages accepted by the service task.
#[derive(Debug)]
pub enum SyncCommand {
    /// Resync every follower. `reply` is `None` for fire-and-forget requests.
    ManualSync {
        reply: Option<oneshot::Sender<Result<SyncReport>>>,
    },
    PlayAll {
        reply: oneshot::Sender<TransportReport>,
    },
    PauseAll {
        reply: oneshot::Sender<TransportReport>,
    },
    Retry {
        stream_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    ScheduleRetry {
        stream_id: String,
        reply: oneshot::Sender<Result<Duration>>,
    },
    Reload {
        stream_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    LoadStreams {
        descriptors: Vec<StreamDescriptor>,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Result of a stream list fetch performed outside the service task.
    ApplyFetch {
        result: Result<Vec<StreamDescriptor>>,
        reply: oneshot::Sender<Result<()>>,
    },
    Snapshots {
        reply: oneshot::Sender<Vec<SourceSnapshot>>,
    },
    Health {
        reply: oneshot::Sender<HashMap<String, StreamHealth>>,
    },
    /// Tear down every stream and stop the task.
    Shutdown,
}

pub struct SyncService {
    coordinator: SyncCoordinator,
    commands: mpsc::Receiver<SyncCommand>,
    cancel: CancellationToken,
}

impl SyncService {
    /// Spawns the service task.
    ///
    /// The task stops when `token` (or the returned handle) is cancelled, on
    /// [`SyncHandle::shutdown`], or once every handle is dropped.
    pub fn spawn(
        coordinator: SyncCoordinator,
        token: CancellationToken,
    ) -> (SyncHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let cancel = token.child_token();
        let handle = SyncHandle {
            commands: tx,
            status: coordinator.subscribe_status(),
            events: coordinator.event_broadcaster().clone(),
            cancel: cancel.clone(),
        };
        let service = Self {
            coordinator,
            commands: rx,
            cancel,
        };
        let join = tokio::spawn(service.run());
        (handle, join)
    }

    async fn run(mut self) {
        let wakeup = self.coordinator.wakeup();
        info!("Sync service started");

        loop {
            self.coordinator.pump();
            let next_timer = self.coordinator.time_until_next_deadline();

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("Sync service cancelled");
                    break;
                }

                command = self.commands.recv() => match command {
                    Some(SyncCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },

                _ = wakeup.notified() => {}

                _ = wait_for(next_timer) => {}
            }
        }

        self.coordinator.shutdown();
        info!("Sync service stopped");
    }

    fn handle_command(&mut self, command: SyncCommand) {
        // A dropped reply receiver only means the caller stopped waiting.
        match command {
            SyncCommand::ManualSync { reply } => {
                let result = self.coordinator.manual_sync();
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            debug!(error = %e, "Manual sync request ignored");
                        }
                    }
                }
            }
            SyncCommand::PlayAll { reply } => {
                let _ = reply.send(self.coordinator.play_all());
            }
            SyncCommand::PauseAll { reply } => {
                let _ = reply.send(self.coordinator.pause_all());
            }
            SyncCommand::Retry { stream_id, reply } => {
                let _ = reply.send(self.coordinator.retry(&stream_id));
            }
            SyncCommand::ScheduleRetry { stream_id, reply } => {
                let _ = reply.send(self.coordinator.schedule_retry(&stream_id));
            }
            SyncCommand::Reload { stream_id, reply } => {
                let _ = reply.send(self.coordinator.reload(&stream_id));
            }
            SyncCommand::LoadStreams { descriptors, reply } => {
                let _ = reply.send(self.coordinator.load_streams(descriptors));
            }
            SyncCommand::ApplyFetch { result, reply } => {
                let _ = reply.send(self.coordinator.apply_fetch(result));
            }
            SyncCommand::Snapshots { reply } => {
                let _ = reply.send(self.coordinator.snapshots());
            }
            SyncCommand::Health { reply } => {
                let _ = reply.send(self.coordinator.health().snapshot());
            }
            SyncCommand::Shutdown => {}
        }
    }
}

async fn wait_for(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

/// Cloneable handle to a running [`SyncService`].
#[derive(Debug, Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<SyncCommand>,
    status: watch::Receiver<SyncStatus>,
    events: SyncEventBroadcaster,
    cancel: CancellationToken,
}

impl SyncHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> SyncCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| SyncError::ServiceClosed)?;
        rx.await.map_err(|_| SyncError::ServiceClosed)
    }

    /// Requests a manual resync without waiting for it.
    pub fn trigger_manual_sync(&self) {
        if let Err(e) = self.commands.try_send(SyncCommand::ManualSync { reply: None }) {
            warn!(error = %e, "Could not queue manual sync");
        }
    }

    pub async fn manual_sync(&self) -> Result<SyncReport> {
        self.request(|reply| SyncCommand::ManualSync { reply: Some(reply) })
            .await?
    }

    pub async fn play_all(&self) -> Result<TransportReport> {
        self.request(|reply| SyncCommand::PlayAll { reply }).await
    }

    pub async fn pause_all(&self) -> Result<TransportReport> {
        self.request(|reply| SyncCommand::PauseAll { reply }).await
    }

    pub async fn retry(&self, stream_id: impl Into<String>) -> Result<()> {
        let stream_id = stream_id.into();
        self.request(|reply| SyncCommand::Retry { stream_id, reply })
            .await?
    }

    pub async fn schedule_retry(&self, stream_id: impl Into<String>) -> Result<Duration> {
        let stream_id = stream_id.into();
        self.request(|reply| SyncCommand::ScheduleRetry { stream_id, reply })
            .await?
    }

    pub async fn reload(&self, stream_id: impl Into<String>) -> Result<()> {
        let stream_id = stream_id.into();
        self.request(|reply| SyncCommand::Reload { stream_id, reply })
            .await?
    }

    pub async fn load_streams(&self, descriptors: Vec<StreamDescriptor>) -> Result<()> {
        self.request(|reply| SyncCommand::LoadStreams { descriptors, reply })
            .await?
    }

    /// Fetches the stream list on the caller's task, then activates it.
    pub async fn refresh(&self, provider: &dyn StreamListProvider) -> Result<()> {
        let result = provider.fetch_stream_list().await;
        self.apply_fetch(result).await
    }

    /// Activates the outcome of a fetch done elsewhere. A failed fetch
    /// clears every stream.
    pub async fn apply_fetch(&self, result: Result<Vec<StreamDescriptor>>) -> Result<()> {
        self.request(|reply| SyncCommand::ApplyFetch { result, reply })
            .await?
    }

    pub async fn snapshots(&self) -> Result<Vec<SourceSnapshot>> {
        self.request(|reply| SyncCommand::Snapshots { reply }).await
    }

    pub async fn health(&self) -> Result<HashMap<String, StreamHealth>> {
        self.request(|reply| SyncCommand::Health { reply }).await
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Stops the service; every stream is torn down before the task exits.
    pub async fn shutdown(&self) {
        if self.commands.send(SyncCommand::Shutdown).await.is_err() {
            debug!("Sync service already stopped");
        }
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}
