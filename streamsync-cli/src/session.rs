//! The `run` and `fetch` commands.

use std::sync::Arc;
use std::time::Duration;

use streamsync::{
    HttpStreamListProvider, SimulatedSurfaceFactory, StaticStreamList, StreamDescriptor,
    StreamListProvider, SyncCoordinator, SyncEvent, SyncHandle, SyncService, SystemClock,
    install_rustls_provider,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{AppConfig, SimulationSettings};
use crate::error::{AppError, Result};
use crate::output;

/// Picks the stream list source: explicit URLs first, then the endpoint.
pub fn stream_list_provider(config: &AppConfig) -> Result<Box<dyn StreamListProvider>> {
    if !config.streams.is_empty() {
        return Ok(Box::new(StaticStreamList::from_urls(
            config.streams.iter().cloned(),
        )));
    }
    if let Some(endpoint) = &config.endpoint {
        install_rustls_provider();
        let provider = HttpStreamListProvider::new(endpoint, config.sync.max_streams)?;
        return Ok(Box::new(provider));
    }
    Err(AppError::InvalidInput(
        "no streams configured, pass --endpoint or --url".to_string(),
    ))
}

pub async fn fetch(config: &AppConfig) -> Result<()> {
    let provider = stream_list_provider(config)?;
    let descriptors = provider.fetch_stream_list().await?;
    println!("{}", serde_json::to_string_pretty(&descriptors)?);
    Ok(())
}

fn simulated_factory(
    settings: &SimulationSettings,
    descriptors: &[StreamDescriptor],
) -> SimulatedSurfaceFactory {
    descriptors.iter().enumerate().fold(
        SimulatedSurfaceFactory::new(settings.profile(0)),
        |factory, (index, descriptor)| {
            factory.with_profile(descriptor.id(), settings.profile(index))
        },
    )
}

pub struct RunOptions {
    /// `None` runs until cancelled.
    pub duration: Option<Duration>,
    pub json: bool,
}

/// Runs one session until `options.duration` elapses or `token` is cancelled.
pub async fn run(config: AppConfig, options: RunOptions, token: CancellationToken) -> Result<()> {
    let provider = stream_list_provider(&config)?;
    let fetched = provider.fetch_stream_list().await;
    let factory = match &fetched {
        Ok(descriptors) => simulated_factory(&config.simulation, descriptors),
        Err(_) => simulated_factory(&config.simulation, &[]),
    };

    let coordinator = SyncCoordinator::new(
        config.sync.clone(),
        Arc::new(factory),
        Arc::new(SystemClock),
    )?;
    // The service is stopped through its handle so streams are torn down
    // after the run loop exits, even when `token` fired first.
    let (handle, service) = SyncService::spawn(coordinator, CancellationToken::new());

    let printer_token = CancellationToken::new();
    let printer = spawn_event_printer(handle.subscribe_events(), options.json, printer_token.clone());

    let outcome = drive(&handle, fetched, &config, &options, &token).await;

    handle.shutdown().await;
    if let Err(e) = service.await {
        warn!(error = %e, "Sync service task failed");
    }
    printer_token.cancel();
    if let Err(e) = printer.await {
        warn!(error = %e, "Event printer task failed");
    }
    outcome
}

async fn drive(
    handle: &SyncHandle,
    fetched: streamsync::Result<Vec<StreamDescriptor>>,
    config: &AppConfig,
    options: &RunOptions,
    token: &CancellationToken,
) -> Result<()> {
    handle.apply_fetch(fetched).await?;

    // Streams still loading start on their own once ready.
    let report = handle.play_all().await?;
    for (stream_id, error) in &report.failed {
        warn!(stream_id = %stream_id, error = %error, "Could not start stream");
    }
    info!(
        started = report.succeeded.len(),
        pending = report.skipped.len(),
        "Play All requested"
    );

    let deadline = options.duration.map(|duration| Instant::now() + duration);
    let mut ticker = tokio::time::interval(config.status_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("Interrupted, stopping");
                break;
            }
            _ = sleep_until(deadline) => {
                info!("Run duration elapsed, stopping");
                break;
            }
            _ = ticker.tick() => {
                let snapshots = handle.snapshots().await?;
                println!("{}", output::status_line(&snapshots, &handle.status(), options.json)?);
            }
        }
    }
    Ok(())
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn spawn_event_printer(
    mut events: broadcast::Receiver<SyncEvent>,
    json: bool,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(event) => match output::event_line(&event, json) {
                    Ok(line) => println!("{line}"),
                    Err(e) => warn!(error = %e, "Could not render event"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event printer lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
