mod common;

use std::time::Duration;

use common::{FakeFactory, Harness, descriptors};
use proptest::prelude::*;
use streamsync::{
    ErrorKind, SessionPhase, SourceState, SurfaceEventKind, SyncError, SyncEvent, SyncTrigger,
};
use tokio::sync::broadcast::error::TryRecvError;

fn drain(rx: &mut tokio::sync::broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => return events,
        }
    }
}

#[test]
fn registry_head_becomes_master_and_drifting_followers_are_seeked() {
    let mut h = Harness::loaded(&["s1", "s2", "s3"]);
    assert_eq!(h.coordinator.session().master_stream_id(), Some("s1"));
    assert_eq!(h.coordinator.phase(), SessionPhase::Synced);

    h.report_time("s2", 4.7);
    h.report_time("s3", 4.7);
    h.report_time("s1", 5.0);

    assert_eq!(h.factory.seeks("s2"), vec![5.0]);
    assert_eq!(h.factory.seeks("s3"), vec![5.0]);
    assert!(h.factory.seeks("s1").is_empty());
    assert_eq!(h.coordinator.phase(), SessionPhase::Synced);
}

#[test]
fn drift_within_tolerance_issues_no_seek() {
    let mut h = Harness::loaded(&["s1", "s2", "s3"]);

    h.report_time("s2", 9.95);
    h.report_time("s3", 9.95);
    h.report_time("s1", 10.0);

    assert!(h.factory.seeks("s2").is_empty());
    assert!(h.factory.seeks("s3").is_empty());
}

#[test]
fn follower_ahead_of_master_is_pulled_back() {
    let mut h = Harness::loaded(&["s1", "s2"]);
    h.report_time("s2", 12.0);
    h.report_time("s1", 11.0);
    assert_eq!(h.factory.seeks("s2"), vec![11.0]);
}

#[test]
fn manual_sync_flags_syncing_until_settle_delay() {
    let mut h = Harness::loaded(&["s1", "s2", "s3"]);
    let status = h.coordinator.subscribe_status();
    for id in ["s2", "s3", "s1"] {
        h.report_time(id, 7.0);
    }
    assert!(!h.coordinator.status().is_syncing);

    let report = h.coordinator.manual_sync().unwrap();
    assert_eq!(report.trigger, SyncTrigger::Manual);
    assert_eq!(report.master_stream_id, "s1");
    assert_eq!(report.seeks.len(), 2);
    assert!(h.coordinator.status().is_syncing);
    assert!(status.borrow().is_syncing);
    assert!(h.coordinator.status().last_sync_timestamp.is_some());
    assert_eq!(h.coordinator.phase(), SessionPhase::Syncing);
    assert_eq!(h.factory.seeks("s2"), vec![7.0]);
    assert_eq!(h.factory.seeks("s3"), vec![7.0]);

    h.advance(Duration::from_millis(999));
    assert!(h.coordinator.status().is_syncing);

    h.advance(Duration::from_millis(1));
    assert!(!h.coordinator.status().is_syncing);
    assert!(!status.borrow().is_syncing);
    assert_eq!(h.coordinator.phase(), SessionPhase::Synced);
}

#[test]
fn manual_sync_while_settling_restarts_the_timer() {
    let mut h = Harness::loaded(&["s1", "s2"]);
    h.coordinator.manual_sync().unwrap();
    h.advance(Duration::from_millis(600));
    h.coordinator.manual_sync().unwrap();

    h.advance(Duration::from_millis(600));
    assert!(h.coordinator.status().is_syncing);

    h.advance(Duration::from_millis(400));
    assert!(!h.coordinator.status().is_syncing);
}

#[test]
fn manual_sync_seeks_regardless_of_drift() {
    let mut h = Harness::loaded(&["s1", "s2"]);
    h.report_time("s2", 3.0);
    h.report_time("s1", 3.0);
    assert!(h.factory.seeks("s2").is_empty());

    h.coordinator.manual_sync().unwrap();
    assert_eq!(h.factory.seeks("s2"), vec![3.0]);
}

#[test]
fn manual_sync_without_master_is_rejected() {
    let mut h = Harness::new(FakeFactory::native());
    h.coordinator.load_streams(descriptors(&["s1", "s2"])).unwrap();

    let err = h.coordinator.manual_sync().unwrap_err();
    assert!(matches!(err, SyncError::NoActiveSession));
    assert!(!h.coordinator.status().is_syncing);
    assert_eq!(h.coordinator.phase(), SessionPhase::Idle);
}

#[test]
fn failed_fetch_leaves_an_idle_empty_session() {
    let mut h = Harness::new(FakeFactory::native());
    let mut events = h.coordinator.subscribe_events();

    let err = h
        .coordinator
        .apply_fetch(Err(SyncError::transport("connection refused")))
        .unwrap_err();

    assert_eq!(err.kind(), Some(ErrorKind::TransportError));
    assert!(h.coordinator.registry().is_empty());
    assert_eq!(h.coordinator.phase(), SessionPhase::Idle);
    assert!(!h.coordinator.status().is_syncing);
    assert_eq!(h.coordinator.session().master_stream_id(), None);
    assert!(h.coordinator.snapshots().is_empty());
    assert!(
        drain(&mut events)
            .iter()
            .any(|event| matches!(event, SyncEvent::NoStreams { .. }))
    );

    // Still stable afterwards.
    assert_eq!(h.coordinator.pump(), 0);
    assert_eq!(h.coordinator.play_all().succeeded.len(), 0);
}

#[test]
fn failed_fetch_tears_down_the_previous_set() {
    let mut h = Harness::loaded(&["s1", "s2"]);
    assert_eq!(h.coordinator.health().len(), 2);
    h.coordinator
        .apply_fetch(Err(SyncError::transport("timeout")))
        .unwrap_err();

    assert!(h.coordinator.health().is_empty());
    assert!(h.factory.log("s1").released);
    assert!(h.factory.log("s2").released);
    assert_eq!(h.coordinator.session().master_stream_id(), None);
}

#[test]
fn pause_all_twice_leaves_everything_paused() {
    let mut h = Harness::loaded(&["s1", "s2", "s3"]);
    h.coordinator.play_all();

    let first = h.coordinator.pause_all();
    let second = h.coordinator.pause_all();

    assert_eq!(first.succeeded.len(), 3);
    assert!(second.is_complete());
    assert_eq!(second.succeeded.len(), 3);
    for snapshot in h.coordinator.snapshots() {
        assert_eq!(snapshot.state, SourceState::Paused);
        assert_eq!(h.factory.log(&snapshot.id).pauses, 1);
    }
}

#[test]
fn blocked_playback_does_not_stop_other_streams() {
    let mut h = Harness::loaded(&["s1", "s2", "s3"]);
    h.factory.block_play("s2");
    let mut events = h.coordinator.subscribe_events();

    let report = h.coordinator.play_all();

    assert_eq!(report.succeeded, vec!["s1", "s3"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "s2");
    assert_eq!(report.failed[0].1.kind(), Some(ErrorKind::PlaybackBlocked));

    let states: Vec<_> = h.coordinator.snapshots().into_iter().map(|s| s.state).collect();
    assert_eq!(
        states,
        vec![SourceState::Playing, SourceState::Ready, SourceState::Playing]
    );
    assert!(drain(&mut events).iter().any(|event| matches!(
        event,
        SyncEvent::PlaybackWarning { stream_id, .. } if stream_id == "s2"
    )));
}

#[test]
fn play_all_skips_streams_still_loading() {
    let mut h = Harness::new(FakeFactory::native());
    h.coordinator.load_streams(descriptors(&["s1", "s2"])).unwrap();
    h.emit("s1", SurfaceEventKind::CanPlay);

    let report = h.coordinator.play_all();
    assert_eq!(report.succeeded, vec!["s1"]);
    assert_eq!(report.skipped, vec!["s2"]);

    // Joins playback once ready.
    h.emit("s2", SurfaceEventKind::CanPlay);
    assert_eq!(
        h.coordinator.source("s2").unwrap().state(),
        SourceState::Playing
    );
}

#[test]
fn play_all_schedules_a_resync_that_pause_all_cancels() {
    let mut h = Harness::loaded(&["s1", "s2"]);
    let mut events = h.coordinator.subscribe_events();

    h.coordinator.play_all();
    assert!(h.coordinator.next_deadline().is_some());
    h.advance(Duration::from_secs(1));
    assert!(h.coordinator.status().is_syncing);
    assert!(drain(&mut events).iter().any(|event| matches!(
        event,
        SyncEvent::SyncStarted {
            trigger: SyncTrigger::PostPlay,
            ..
        }
    )));
    h.advance(Duration::from_secs(1));
    assert!(!h.coordinator.status().is_syncing);

    h.coordinator.play_all();
    h.coordinator.pause_all();
    assert!(h.coordinator.next_deadline().is_none());
    h.advance(Duration::from_secs(2));
    assert!(!h.coordinator.status().is_syncing);
}

#[test]
fn master_failure_degrades_without_reassignment() {
    let mut h = Harness::loaded(&["s1", "s2", "s3"]);
    let mut events = h.coordinator.subscribe_events();

    h.fail("s1", "segment 404");

    assert_eq!(h.coordinator.session().master_stream_id(), Some("s1"));
    assert!(h.coordinator.session().is_degraded());
    assert_eq!(h.masters(), vec!["s1"]);
    assert!(drain(&mut events).iter().any(|event| matches!(
        event,
        SyncEvent::DegradedSync { master_stream_id, .. } if master_stream_id == "s1"
    )));

    // Followers keep their place and no longer chase a dead master.
    h.report_time("s2", 1.0);
    h.report_time("s1", 9.0);
    assert!(h.factory.seeks("s2").is_empty());
    assert_eq!(
        h.coordinator.source("s2").unwrap().state(),
        SourceState::Ready
    );

    h.coordinator.retry("s1").unwrap();
    h.emit("s1", SurfaceEventKind::CanPlay);
    assert!(!h.coordinator.session().is_degraded());
    assert_eq!(h.masters(), vec!["s1"]);
}

#[test]
fn failed_follower_leaves_the_follower_pool() {
    let mut h = Harness::loaded(&["s1", "s2", "s3"]);
    h.fail("s3", "manifest 500");

    assert!(!h.coordinator.session().is_follower("s3"));
    let report = h.coordinator.manual_sync().unwrap();
    let seeked: Vec<_> = report.seeks.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(seeked, vec!["s2"]);
    assert!(h.factory.seeks("s3").is_empty());

    h.coordinator.retry("s3").unwrap();
    h.emit("s3", SurfaceEventKind::CanPlay);
    assert!(h.coordinator.session().is_follower("s3"));
}

#[test]
fn seek_discontinuity_is_not_treated_as_drift() {
    let mut h = Harness::loaded(&["s1", "s2"]);
    h.report_time("s2", 4.7);
    h.report_time("s1", 5.0);
    assert_eq!(h.factory.seeks("s2"), vec![5.0]);

    // A frame rendered before the seek landed.
    h.report_time("s2", 4.7);
    h.report_time("s1", 5.1);
    assert_eq!(h.factory.seeks("s2"), vec![5.0]);

    // Past the grace window the stale position counts again.
    h.advance(Duration::from_millis(500));
    h.report_time("s2", 4.7);
    h.report_time("s1", 5.1);
    assert_eq!(h.factory.seeks("s2"), vec![5.0, 5.1]);
}

#[test]
fn landed_seek_ends_the_grace_early() {
    let mut h = Harness::loaded(&["s1", "s2"]);
    h.report_time("s2", 4.0);
    h.report_time("s1", 5.0);
    h.report_time("s2", 5.05);

    h.report_time("s2", 3.0);
    h.report_time("s1", 5.2);
    assert_eq!(h.factory.seeks("s2"), vec![5.0, 5.2]);
}

#[test]
fn follower_position_is_extrapolated_while_playing() {
    let mut h = Harness::loaded(&["s1", "s2"]);
    h.coordinator.play_all();
    h.report_time("s2", 10.0);
    h.advance(Duration::from_millis(500));
    // s2 is estimated at 10.5: drift 0.1.
    h.report_time("s1", 10.6);
    assert!(h.factory.seeks("s2").is_empty());
}

#[test]
fn reloading_the_set_replaces_sources_and_drops_stale_events() {
    let mut h = Harness::loaded(&["s1", "s2"]);
    let stale = h.factory.sink("s2");

    h.coordinator.load_streams(descriptors(&["s2", "s3"])).unwrap();
    assert_eq!(h.coordinator.phase(), SessionPhase::Idle);
    assert_eq!(h.factory.surfaces_created("s2"), 2);

    stale.emit(SurfaceEventKind::CanPlay);
    h.coordinator.pump();
    assert_eq!(
        h.coordinator.source("s2").unwrap().state(),
        SourceState::Loading
    );
    assert_eq!(h.coordinator.session().master_stream_id(), None);

    // s2 heads the new registry, so a ready s3 waits for it.
    h.emit("s3", SurfaceEventKind::CanPlay);
    assert_eq!(h.coordinator.session().master_stream_id(), None);
    h.emit("s2", SurfaceEventKind::CanPlay);
    assert_eq!(h.coordinator.session().master_stream_id(), Some("s2"));
    assert!(h.coordinator.session().is_follower("s3"));
}

#[test]
fn master_follows_registry_order_not_arrival_order() {
    let mut h = Harness::new(FakeFactory::native());
    h.coordinator
        .load_streams(descriptors(&["s1", "s2", "s3"]))
        .unwrap();
    let mut events = h.coordinator.subscribe_events();

    h.emit("s3", SurfaceEventKind::CanPlay);
    h.emit("s2", SurfaceEventKind::CanPlay);
    assert_eq!(h.coordinator.session().master_stream_id(), None);
    assert_eq!(h.coordinator.phase(), SessionPhase::Idle);
    assert!(h.masters().is_empty());

    h.emit("s1", SurfaceEventKind::CanPlay);
    assert_eq!(h.coordinator.session().master_stream_id(), Some("s1"));
    assert_eq!(h.masters(), vec!["s1"]);
    let followers: Vec<&str> = h.coordinator.session().follower_stream_ids().collect();
    assert_eq!(followers, vec!["s2", "s3"]);

    let elected: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            SyncEvent::MasterElected { stream_id, .. } => Some(stream_id),
            _ => None,
        })
        .collect();
    assert_eq!(elected, vec!["s1"]);
}

#[test]
fn failed_registry_head_hands_election_to_the_next_ready_stream() {
    let mut h = Harness::new(FakeFactory::native());
    h.coordinator
        .load_streams(descriptors(&["s1", "s2", "s3"]))
        .unwrap();

    h.emit("s2", SurfaceEventKind::CanPlay);
    assert_eq!(h.coordinator.session().master_stream_id(), None);

    h.fail("s1", "manifest 404");
    assert_eq!(h.coordinator.session().master_stream_id(), Some("s2"));

    // Election is one-shot: the recovered head joins as a follower.
    h.coordinator.retry("s1").unwrap();
    h.emit("s1", SurfaceEventKind::CanPlay);
    assert_eq!(h.masters(), vec!["s2"]);
    assert!(h.coordinator.session().is_follower("s1"));
}

#[test]
fn reload_sends_a_follower_back_to_loading() {
    let mut h = Harness::loaded(&["s1", "s2"]);
    h.coordinator.play_all();

    h.coordinator.reload("s2").unwrap();
    assert_eq!(h.factory.log("s2").reloads, 1);
    assert_eq!(
        h.coordinator.source("s2").unwrap().state(),
        SourceState::Loading
    );
    assert!(!h.coordinator.session().is_follower("s2"));

    // Out of the pool while loading: no drift seeks.
    h.report_time("s2", 1.0);
    h.report_time("s1", 8.0);
    assert!(h.factory.seeks("s2").is_empty());

    // Ready again, it rejoins and resumes playback.
    h.emit("s2", SurfaceEventKind::CanPlay);
    assert!(h.coordinator.session().is_follower("s2"));
    assert_eq!(
        h.coordinator.source("s2").unwrap().state(),
        SourceState::Playing
    );
    assert_eq!(h.masters(), vec!["s1"]);
}

#[test]
fn reload_keeps_the_master_role() {
    let mut h = Harness::loaded(&["s1", "s2"]);
    h.coordinator.reload("s1").unwrap();
    assert_eq!(h.coordinator.session().master_stream_id(), Some("s1"));

    h.emit("s1", SurfaceEventKind::CanPlay);
    assert_eq!(h.masters(), vec!["s1"]);
    assert!(!h.coordinator.session().is_follower("s1"));
}

#[test]
fn reload_rejects_unknown_and_failed_streams() {
    let mut h = Harness::loaded(&["s1", "s2"]);
    assert!(matches!(
        h.coordinator.reload("s9"),
        Err(SyncError::UnknownStream { .. })
    ));

    h.fail("s2", "decode error");
    assert!(matches!(
        h.coordinator.reload("s2"),
        Err(SyncError::InvalidState { .. })
    ));
    assert_eq!(h.factory.log("s2").reloads, 0);
}

#[test]
fn invalid_stream_set_keeps_the_current_one() {
    let mut h = Harness::loaded(&["s1", "s2"]);
    let mut bad = descriptors(&["s3"]);
    bad.extend(descriptors(&["s3"]));

    let err = h.coordinator.load_streams(bad).unwrap_err();
    assert!(matches!(err, SyncError::InvalidDescriptor { .. }));
    assert_eq!(h.coordinator.session().master_stream_id(), Some("s1"));
    assert!(!h.factory.log("s1").released);
}

#[test]
fn stream_set_is_capped_at_max_streams() {
    let mut h = Harness::new(FakeFactory::native());
    h.coordinator
        .load_streams(descriptors(&["s1", "s2", "s3", "s4"]))
        .unwrap();
    assert_eq!(h.coordinator.registry().len(), 3);
    assert!(h.coordinator.source("s4").is_none());
}

#[test]
fn teardown_destroys_loader_before_releasing_surface() {
    let mut h = Harness::new(FakeFactory::adaptive());
    h.coordinator.load_streams(descriptors(&["s1"])).unwrap();
    h.factory.loader_sink("s1").emit(SurfaceEventKind::ManifestParsed);
    h.coordinator.pump();
    assert_eq!(h.coordinator.session().master_stream_id(), Some("s1"));

    h.coordinator.load_streams(Vec::new()).unwrap();
    let lifecycle = h.factory.lifecycle();
    let destroyed = lifecycle
        .iter()
        .position(|entry| entry == "loader_destroyed:s1")
        .unwrap();
    let released = lifecycle
        .iter()
        .position(|entry| entry == "surface_released:s1")
        .unwrap();
    assert!(destroyed < released);
    assert_eq!(h.factory.log("s1").assigned, vec!["blob:s1"]);
}

#[test]
fn loader_events_after_retry_come_only_from_the_new_loader() {
    let mut h = Harness::new(FakeFactory::adaptive());
    h.coordinator.load_streams(descriptors(&["s1"])).unwrap();
    let old_loader = h.factory.loader_sink("s1");
    old_loader.emit(SurfaceEventKind::LoaderError {
        fatal: true,
        reason: "manifest 404".to_string(),
    });
    h.coordinator.pump();
    assert_eq!(
        h.coordinator.source("s1").unwrap().state(),
        SourceState::Error
    );

    h.coordinator.retry("s1").unwrap();
    old_loader.emit(SurfaceEventKind::ManifestParsed);
    h.coordinator.pump();
    assert_eq!(
        h.coordinator.source("s1").unwrap().state(),
        SourceState::Loading
    );

    h.factory.loader_sink("s1").emit(SurfaceEventKind::ManifestParsed);
    h.coordinator.pump();
    assert_eq!(h.coordinator.source("s1").unwrap().state(), SourceState::Ready);
}

#[test]
fn non_fatal_loader_errors_are_only_warnings() {
    let mut h = Harness::new(FakeFactory::adaptive());
    h.coordinator.load_streams(descriptors(&["s1"])).unwrap();
    h.factory.loader_sink("s1").emit(SurfaceEventKind::ManifestParsed);
    h.factory.loader_sink("s1").emit(SurfaceEventKind::LoaderError {
        fatal: false,
        reason: "buffer stalled".to_string(),
    });
    h.coordinator.pump();

    assert_eq!(h.coordinator.source("s1").unwrap().state(), SourceState::Ready);
    assert_eq!(h.coordinator.health().health("s1").unwrap().warnings, 1);
}

#[test]
fn unsupported_environment_fails_streams_at_activation() {
    let mut h = Harness::new(FakeFactory::unsupported());
    h.coordinator.load_streams(descriptors(&["s1", "s2"])).unwrap();

    for snapshot in h.coordinator.snapshots() {
        assert_eq!(snapshot.state, SourceState::Error);
        assert_eq!(snapshot.last_error, Some(ErrorKind::LoadError));
    }
    assert_eq!(h.coordinator.phase(), SessionPhase::Idle);
}

#[test]
fn scheduled_retry_fires_after_backoff() {
    let mut h = Harness::loaded(&["s1", "s2"]);
    h.fail("s2", "segment timeout");

    let delay = h.coordinator.schedule_retry("s2").unwrap();
    assert_eq!(delay, Duration::from_millis(100));
    assert_eq!(h.factory.log("s2").assigned.len(), 1);

    h.advance(Duration::from_millis(99));
    assert_eq!(
        h.coordinator.source("s2").unwrap().state(),
        SourceState::Error
    );

    h.advance(Duration::from_millis(1));
    assert_eq!(
        h.coordinator.source("s2").unwrap().state(),
        SourceState::Loading
    );
    assert_eq!(h.factory.log("s2").assigned.len(), 2);
}

#[test]
fn scheduled_retry_is_cancelled_by_teardown() {
    let mut h = Harness::loaded(&["s1", "s2"]);
    h.fail("s2", "segment timeout");
    h.coordinator.schedule_retry("s2").unwrap();

    h.coordinator.load_streams(descriptors(&["s1", "s2"])).unwrap();
    assert!(h.coordinator.next_deadline().is_none());
}

#[test]
fn retry_of_a_healthy_stream_is_rejected() {
    let mut h = Harness::loaded(&["s1", "s2"]);
    assert!(matches!(
        h.coordinator.retry("s2"),
        Err(SyncError::InvalidState { .. })
    ));
    assert!(matches!(
        h.coordinator.schedule_retry("s2"),
        Err(SyncError::InvalidState { .. })
    ));
    assert!(matches!(
        h.coordinator.retry("nope"),
        Err(SyncError::UnknownStream { .. })
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn manual_sync_aligns_followers_for_any_drift(
        master in 0.0f64..3600.0,
        offsets in prop::collection::vec(-600.0f64..600.0, 2),
    ) {
        let mut h = Harness::loaded(&["s1", "s2", "s3"]);
        h.report_time("s2", (master + offsets[0]).max(0.0));
        h.report_time("s3", (master + offsets[1]).max(0.0));
        h.report_time("s1", master);

        h.coordinator.manual_sync().unwrap();
        h.advance(Duration::from_secs(1));
        prop_assert!(!h.coordinator.status().is_syncing);

        let now = streamsync::Clock::now(h.clock.as_ref());
        let tolerance = h.coordinator.config().drift_tolerance();
        for id in ["s2", "s3"] {
            let position = h.coordinator.source(id).unwrap().estimated_position(now);
            prop_assert!((position - master).abs() <= tolerance);
        }
    }
}
