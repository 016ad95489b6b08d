//! Console rendering of events and status lines.

use serde_json::json;
use streamsync::{SourceSnapshot, SourceState, SyncEvent, SyncStatus};

use crate::error::Result;

pub fn event_line(event: &SyncEvent, json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string(event)?);
    }
    Ok(format!(
        "{} {}",
        event.timestamp().format("%H:%M:%S%.3f"),
        event.description()
    ))
}

pub fn status_line(snapshots: &[SourceSnapshot], status: &SyncStatus, json: bool) -> Result<String> {
    if json {
        let line = json!({ "status": status, "streams": snapshots });
        return Ok(serde_json::to_string(&line)?);
    }

    let phase = if status.is_syncing { "syncing" } else { "idle" };
    if snapshots.is_empty() {
        return Ok(format!("[{phase}] no streams"));
    }

    let master_position = snapshots
        .iter()
        .find(|s| s.is_master)
        .map(|s| s.position_secs);

    let streams: Vec<String> = snapshots
        .iter()
        .map(|snapshot| stream_cell(snapshot, master_position))
        .collect();
    Ok(format!("[{phase}] {}", streams.join(" | ")))
}

fn stream_cell(snapshot: &SourceSnapshot, master_position: Option<f64>) -> String {
    let mut cell = format!("{} {}", snapshot.id, snapshot.state.as_str());
    if matches!(snapshot.state, SourceState::Playing | SourceState::Paused) {
        cell.push_str(&format!(" {:.2}s", snapshot.position_secs));
    }
    if snapshot.is_master {
        cell.push_str(" (master)");
    } else if let Some(master) = master_position {
        if snapshot.state == SourceState::Playing {
            cell.push_str(&format!(" drift {:+.3}s", master - snapshot.position_secs));
        }
    }
    if let Some(kind) = snapshot.last_error {
        cell.push_str(&format!(" [{kind}]"));
    }
    cell
}
