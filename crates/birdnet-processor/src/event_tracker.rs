//! Generic time-windowed debounce cache.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Suppresses repeated events with the same key for a fixed window after
/// registration. Keys are opaque caller-supplied strings.
#[derive(Debug)]
pub struct EventTracker {
    window: Duration,
    registered: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl EventTracker {
    /// A zero window disables debouncing.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            registered: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// `true` if `key` was registered less than one window before `now`.
    pub fn is_debounced(&self, key: &str, now: DateTime<Utc>) -> bool {
        if self.window.is_zero() {
            return false;
        }
        self.lock()
            .get(key)
            .is_some_and(|registered| !self.expired(*registered, now))
    }

    /// Registering also drops expired entries, so the map only holds keys
    /// seen within the last window.
    pub fn register(&self, key: &str, now: DateTime<Utc>) {
        if self.window.is_zero() {
            return;
        }
        let mut registered = self.lock();
        registered.retain(|_, at| !self.expired(*at, now));
        registered.insert(key.to_string(), now);
    }

    /// Check and register in one step.
    ///
    /// Returns `true` if the event should be handled, in which case `key` is
    /// now registered.
    pub fn track(&self, key: &str, now: DateTime<Utc>) -> bool {
        if self.window.is_zero() {
            return true;
        }
        let mut registered = self.lock();
        match registered.get(key) {
            Some(at) if !self.expired(*at, now) => false,
            _ => {
                registered.retain(|_, at| !self.expired(*at, now));
                registered.insert(key.to_string(), now);
                true
            }
        }
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut registered = self.lock();
        let before = registered.len();
        registered.retain(|_, at| !self.expired(*at, now));
        before - registered.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn expired(&self, registered: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let window = chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(registered) >= window
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.registered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
