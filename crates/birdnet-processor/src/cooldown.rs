//! Per-sink cooldown tracking.
//!
//! Suppresses repeat dispatches for the same key within a time window.
//! Each sink owns its own tracker so suppression in one sink never affects
//! another, and unrelated sinks never contend on the same lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use birdnet_core::events::{EventBus, PipelineEvent};
use chrono::{DateTime, Utc};

use crate::action::SinkKind;

/// Last successful dispatch time per key, for one sink.
///
/// `should_dispatch` and `record_dispatch` are separate calls because success
/// is only known after the side effect. Two concurrent dispatches may both
/// pass the check before either records; the guarantee is a full cooldown
/// window between *recorded* successes.
#[derive(Debug)]
pub struct CooldownTracker {
    cooldown: Duration,
    last_dispatch: Mutex<HashMap<String, DateTime<Utc>>>,
    observer: Option<(SinkKind, EventBus)>,
}

impl CooldownTracker {
    /// A zero duration disables suppression.
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_dispatch: Mutex::new(HashMap::new()),
            observer: None,
        }
    }

    /// Publish a `CooldownRecorded` event for every recorded dispatch.
    pub fn with_events(mut self, sink: SinkKind, events: EventBus) -> Self {
        self.observer = Some((sink, events));
        self
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn is_enabled(&self) -> bool {
        !self.cooldown.is_zero()
    }

    /// `true` if `key` was never recorded or its window has elapsed at `now`.
    pub fn should_dispatch(&self, key: &str, now: DateTime<Utc>) -> bool {
        if !self.is_enabled() {
            return true;
        }
        match self.lock().get(key) {
            None => true,
            Some(last) => now.signed_duration_since(*last) >= self.window(),
        }
    }

    /// Record a successful dispatch of `key` at `at`.
    pub fn record_dispatch(&self, key: &str, at: DateTime<Utc>) {
        self.lock().insert(key.to_string(), at);

        if let Some((sink, events)) = &self.observer {
            events.publish(PipelineEvent::CooldownRecorded {
                sink: sink.to_string(),
                key: key.to_string(),
                timestamp: at,
            });
        }
    }

    pub fn last_dispatch(&self, key: &str) -> Option<DateTime<Utc>> {
        self.lock().get(key).copied()
    }

    /// Time left before `key` may be dispatched again, if it is cooling down.
    pub fn remaining(&self, key: &str, now: DateTime<Utc>) -> Option<Duration> {
        if !self.is_enabled() {
            return None;
        }
        let last = self.last_dispatch(key)?;
        let elapsed = now.signed_duration_since(last);
        let remaining = self
            .window()
            .checked_sub(&elapsed)
            .unwrap_or(chrono::Duration::MAX);
        remaining.to_std().ok().filter(|d| !d.is_zero())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.cooldown).unwrap_or(chrono::Duration::MAX)
    }

    // A poisoned map still holds valid timestamps; keep serving it.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.last_dispatch
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One cooldown tracker per sink kind, fixed at construction.
#[derive(Debug, Clone, Default)]
pub struct CooldownRegistry {
    trackers: HashMap<SinkKind, Arc<CooldownTracker>>,
    events: Option<EventBus>,
}

impl CooldownRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trackers added after this call report recorded dispatches on `events`.
    pub fn observed_by(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_sink(mut self, sink: SinkKind, cooldown: Duration) -> Self {
        let mut tracker = CooldownTracker::new(cooldown);
        if let Some(events) = &self.events {
            tracker = tracker.with_events(sink, events.clone());
        }
        self.trackers.insert(sink, Arc::new(tracker));
        self
    }

    /// Tracker for `sink`, if that sink has a cooldown configured.
    pub fn tracker(&self, sink: SinkKind) -> Option<Arc<CooldownTracker>> {
        self.trackers.get(&sink).cloned()
    }
}
