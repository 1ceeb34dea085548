//! Capabilities the actions need from external sinks.
//!
//! Transports, storage engines, and notification channels live outside this
//! crate; they are consumed only through these traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use birdnet_core::types::Note;

use crate::error::SinkError;

/// Message-broker client (e.g. MQTT).
#[async_trait]
pub trait Publisher: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn connect(&self) -> Result<(), SinkError>;

    async fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), SinkError>;
}

/// Long-term detection storage.
#[async_trait]
pub trait DetectionStore: Send + Sync {
    fn is_ready(&self) -> bool {
        true
    }

    async fn save(&self, note: &Note) -> Result<(), SinkError>;
}

/// A push notification about a detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub title: String,
    pub body: String,
    pub species: String,
    pub confidence: f32,
}

impl NotificationMessage {
    pub fn for_note(note: &Note) -> Self {
        let percent = (note.confidence * 100.0).round() as u32;
        Self {
            title: format!("{} detected", note.common_name()),
            body: format!(
                "{} ({}) heard on {} with {}% confidence",
                note.common_name(),
                note.scientific_name(),
                note.source.display_name,
                percent
            ),
            species: note.common_name().to_string(),
            confidence: note.confidence,
        }
    }
}

/// Notification delivery channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn is_available(&self) -> bool;

    async fn notify(&self, message: &NotificationMessage) -> Result<(), SinkError>;
}
