//! Heartbeat Store: bounded sliding window of execution outcomes for one unit.
//!
//! Every write and every read prunes heartbeats whose `end_time` has fallen
//! out of the window, so memory stays proportional to the heartbeats produced
//! in the last `window`. The list and the window sit behind one mutex; no
//! reader ever sees a half-pruned list.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::trace;

use crate::clock::{to_chrono, Clock};
use crate::types::{CapturedError, Heartbeat, UnitKey};

#[derive(Debug)]
struct StoreInner {
    window: Duration,
    heartbeats: VecDeque<Heartbeat>,
}

impl StoreInner {
    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(to_chrono(self.window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Drop everything with `end_time <= cutoff`.
    fn prune(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.heartbeats.len();
        self.heartbeats.retain(|hb| hb.end_time > cutoff);
        before - self.heartbeats.len()
    }
}

/// Concurrency-safe record of recent heartbeats for one monitored unit.
#[derive(Debug)]
pub struct HeartbeatStore {
    key: UnitKey,
    clock: Arc<dyn Clock>,
    inner: Mutex<StoreInner>,
}

impl HeartbeatStore {
    pub fn new(key: UnitKey, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            key,
            clock,
            inner: Mutex::new(StoreInner {
                window,
                heartbeats: VecDeque::new(),
            }),
        }
    }

    pub fn key(&self) -> &UnitKey {
        &self.key
    }

    /// Current sliding-window length.
    pub fn window(&self) -> Duration {
        self.inner.lock().window
    }

    /// Change the window; applies from the next read or write.
    pub fn set_window(&self, window: Duration) {
        self.inner.lock().window = window;
    }

    /// Append a heartbeat and prune expired entries.
    pub fn register_heartbeat(&self, heartbeat: Heartbeat) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.heartbeats.push_back(heartbeat);
        let cutoff = inner.cutoff(now);
        let pruned = inner.prune(cutoff);
        trace!(
            unit = %self.key,
            retained = inner.heartbeats.len(),
            pruned,
            "Heartbeat registered"
        );
    }

    /// Most recent in-window heartbeat by `end_time`, if any.
    pub fn last_heartbeat(&self) -> Option<Heartbeat> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let cutoff = inner.cutoff(now);
        inner.prune(cutoff);
        inner
            .heartbeats
            .iter()
            .filter(|hb| hb.end_time > cutoff)
            .max_by_key(|hb| hb.end_time)
            .cloned()
    }

    /// Captured errors of all in-window heartbeats, oldest first.
    pub fn exceptions_in_window(&self) -> Vec<CapturedError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let cutoff = inner.cutoff(now);
        inner.prune(cutoff);

        let mut failed: Vec<&Heartbeat> = inner
            .heartbeats
            .iter()
            .filter(|hb| hb.end_time > cutoff && hb.error.is_some())
            .collect();
        failed.sort_by_key(|hb| hb.end_time);
        failed.into_iter().filter_map(|hb| hb.error.clone()).collect()
    }

    /// Number of heartbeats physically retained.
    pub fn len(&self) -> usize {
        self.inner.lock().heartbeats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
