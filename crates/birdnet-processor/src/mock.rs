//! In-memory sinks for tests.
//!
//! Each mock captures successful calls and can be scripted to fail the next
//! N calls with a given [`SinkError`], or to stall for a fixed delay.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use birdnet_core::types::Note;

use crate::error::SinkError;
use crate::sink::{DetectionStore, NotificationMessage, Notifier, Publisher};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Scripted failures and delay shared by all mocks.
#[derive(Debug, Default)]
struct Script {
    failures: Mutex<VecDeque<SinkError>>,
    delay: Mutex<Duration>,
    attempts: AtomicU32,
}

impl Script {
    fn fail_next(&self, count: usize, err: SinkError) {
        let mut failures = lock(&self.failures);
        failures.extend(std::iter::repeat(err).take(count));
    }

    /// Count the attempt, stall, then pop the next scripted failure.
    async fn attempt(&self) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match lock(&self.failures).pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// A message captured by [`MockPublisher`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

#[derive(Debug, Default)]
pub struct MockPublisher {
    connected: AtomicBool,
    connect_calls: AtomicU32,
    connect_failure: Mutex<Option<SinkError>>,
    published: Mutex<Vec<PublishedMessage>>,
    script: Script,
}

impl MockPublisher {
    pub fn connected() -> Self {
        let publisher = Self::default();
        publisher.set_connected(true);
        publisher
    }

    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Make every `connect()` fail with `err` until cleared.
    pub fn fail_connect(&self, err: SinkError) {
        *lock(&self.connect_failure) = Some(err);
    }

    pub fn clear_connect_failure(&self) {
        *lock(&self.connect_failure) = None;
    }

    pub fn fail_next_publishes(&self, count: usize, err: SinkError) {
        self.script.fail_next(count, err);
    }

    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.script.delay) = delay;
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.published).clone()
    }

    pub fn publish_attempts(&self) -> u32 {
        self.script.attempts.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(), SinkError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.connect_failure).clone() {
            return Err(err);
        }
        self.set_connected(true);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), SinkError> {
        self.script.attempt().await?;
        lock(&self.published).push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
            retain,
        });
        Ok(())
    }
}

#[derive(Debug)]
pub struct MockStore {
    ready: AtomicBool,
    saved: Mutex<Vec<Note>>,
    script: Script,
}

impl Default for MockStore {
    fn default() -> Self {
        Self {
            ready: AtomicBool::new(true),
            saved: Mutex::new(Vec::new()),
            script: Script::default(),
        }
    }
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn fail_next_saves(&self, count: usize, err: SinkError) {
        self.script.fail_next(count, err);
    }

    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.script.delay) = delay;
    }

    pub fn saved(&self) -> Vec<Note> {
        lock(&self.saved).clone()
    }

    pub fn save_attempts(&self) -> u32 {
        self.script.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DetectionStore for MockStore {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn save(&self, note: &Note) -> Result<(), SinkError> {
        self.script.attempt().await?;
        lock(&self.saved).push(note.clone());
        Ok(())
    }
}

#[derive(Debug)]
pub struct MockNotifier {
    available: AtomicBool,
    sent: Mutex<Vec<NotificationMessage>>,
    script: Script,
}

impl Default for MockNotifier {
    fn default() -> Self {
        Self {
            available: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
            script: Script::default(),
        }
    }
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn fail_next_notifications(&self, count: usize, err: SinkError) {
        self.script.fail_next(count, err);
    }

    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.script.delay) = delay;
    }

    pub fn sent(&self) -> Vec<NotificationMessage> {
        lock(&self.sent).clone()
    }

    pub fn notify_attempts(&self) -> u32 {
        self.script.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn notify(&self, message: &NotificationMessage) -> Result<(), SinkError> {
        self.script.attempt().await?;
        lock(&self.sent).push(message.clone());
        Ok(())
    }
}
