use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Deferred coordinator work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum TimerKey {
    /// End of a manual sync's settle window.
    Settle,
    /// Resync issued shortly after Play All.
    PostPlayResync,
    /// Scheduled retry of one stream.
    Retry(Arc<str>),
}

/// One-shot deadlines keyed by purpose. Scheduling an existing key moves
/// its deadline; timers never stack.
#[derive(Debug, Default)]
pub(crate) struct TimerSet {
    deadlines: HashMap<TimerKey, Instant>,
}

impl TimerSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns true when an earlier deadline for `key` was replaced.
    pub(crate) fn schedule(&mut self, key: TimerKey, deadline: Instant) -> bool {
        self.deadlines.insert(key, deadline).is_some()
    }

    pub(crate) fn cancel(&mut self, key: &TimerKey) -> bool {
        self.deadlines.remove(key).is_some()
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Removes and returns every timer due at `now`, earliest first.
    pub(crate) fn take_due(&mut self, now: Instant) -> Vec<TimerKey> {
        let mut due: Vec<(Instant, TimerKey)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, deadline)| (*deadline, key.clone()))
            .collect();
        due.sort_by_key(|(deadline, _)| *deadline);
        for (_, key) in &due {
            self.deadlines.remove(key);
        }
        due.into_iter().map(|(_, key)| key).collect()
    }

    pub(crate) fn clear(&mut self) {
        self.deadlines.clear();
    }
}
