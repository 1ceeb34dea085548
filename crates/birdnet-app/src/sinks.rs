//! Sinks wired in by the binary.
//!
//! The publisher and notifier only log what they would send. The store
//! appends one JSON note per line to a local file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use birdnet_core::types::Note;
use birdnet_processor::{DetectionStore, NotificationMessage, Notifier, Publisher, SinkError};

/// Publisher that logs each message instead of sending it to a broker.
#[derive(Debug)]
pub struct LogPublisher {
    broker: String,
    connected: AtomicBool,
}

impl LogPublisher {
    pub fn new(broker: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            connected: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Publisher for LogPublisher {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(), SinkError> {
        tracing::info!(broker = %self.broker, "Publisher connected (log only)");
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), SinkError> {
        tracing::info!(topic = %topic, retain, payload = %payload, "Publish");
        Ok(())
    }
}

/// Appends notes to a JSON-lines file.
#[derive(Debug)]
pub struct JsonLinesStore {
    path: PathBuf,
    // Serializes appends so lines from concurrent saves never interleave.
    write_lock: Mutex<()>,
}

impl JsonLinesStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DetectionStore for JsonLinesStore {
    async fn save(&self, note: &Note) -> Result<(), SinkError> {
        let mut line =
            serde_json::to_string(note).map_err(|e| SinkError::Rejected(e.to_string()))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| SinkError::Unavailable(format!("{}: {}", self.path.display(), e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

/// Notifier that logs notifications.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn is_available(&self) -> bool {
        true
    }

    async fn notify(&self, message: &NotificationMessage) -> Result<(), SinkError> {
        tracing::info!(title = %message.title, body = %message.body, "Notification");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use birdnet_core::types::{Detection, Source, SourceType, Species};
    use chrono::Utc;

    fn note(common: &str) -> Note {
        let detection = Detection {
            species: Species::new("Genus species", common),
            confidence: 0.9,
            clip_name: None,
            source: Source::new("test", SourceType::File),
            timestamp: Utc::now(),
        };
        Note::from_detection(&detection, 1.0, 2.0)
    }

    #[tokio::test]
    async fn test_store_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLinesStore::new(dir.path().join("notes.jsonl"));

        let first = note("Blue Jay");
        let second = note("Cardinal");
        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();

        let content = std::fs::read_to_string(store.path()).unwrap();
        let notes: Vec<Note> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].id, first.id);
        assert_eq!(notes[1].common_name(), "Cardinal");
    }

    #[tokio::test]
    async fn test_store_in_missing_directory_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLinesStore::new(dir.path().join("missing").join("notes.jsonl"));

        let err = store.save(&note("Blue Jay")).await.unwrap_err();
        assert!(matches!(err, SinkError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_log_publisher_connects() {
        let publisher = LogPublisher::new("tcp://localhost:1883");
        assert!(!publisher.is_connected());
        publisher.connect().await.unwrap();
        assert!(publisher.is_connected());
        publisher.publish("birdnet/detections", "{}", false).await.unwrap();
    }
}
