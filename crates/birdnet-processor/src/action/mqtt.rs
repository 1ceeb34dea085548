//! MQTT publish action.
//!
//! Publishes a JSON payload for each accepted detection to the configured
//! topic, at most once per species per cooldown window.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use birdnet_core::config::{MqttSettings, RetryConfig};
use birdnet_core::events::SuppressReason;
use birdnet_core::types::Note;

use crate::action::{run_side_effect, Action, ActionContext, ActionOutcome, SinkKind};
use crate::cooldown::CooldownTracker;
use crate::error::ActionError;
use crate::sink::Publisher;

/// Wire payload, derived only from the note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttPayload {
    pub note_id: String,
    pub common_name: String,
    pub scientific_name: String,
    pub confidence: f32,
    pub source: String,
    pub clip_name: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
}

impl MqttPayload {
    pub fn from_note(note: &Note) -> Self {
        Self {
            note_id: note.id.to_string(),
            common_name: note.common_name().to_string(),
            scientific_name: note.scientific_name().to_string(),
            confidence: note.confidence,
            source: note.source.id.clone(),
            clip_name: note.clip_name.clone(),
            detected_at: note.detected_at,
            latitude: note.latitude,
            longitude: note.longitude,
        }
    }
}

/// Publishes one note to the broker.
pub struct MqttAction {
    settings: MqttSettings,
    note: Note,
    client: Option<Arc<dyn Publisher>>,
    cooldown: Option<Arc<CooldownTracker>>,
    retry: RetryConfig,
}

impl MqttAction {
    pub fn new(
        settings: MqttSettings,
        note: Note,
        client: Option<Arc<dyn Publisher>>,
        cooldown: Option<Arc<CooldownTracker>>,
    ) -> Self {
        let retry = settings.retry.clone();
        Self {
            settings,
            note,
            client,
            cooldown,
            retry,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn cooldown_key(&self) -> &str {
        self.note.common_name()
    }
}

#[async_trait]
impl Action for MqttAction {
    fn sink(&self) -> SinkKind {
        SinkKind::Mqtt
    }

    fn note(&self) -> &Note {
        &self.note
    }

    fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    fn describe(&self) -> String {
        format!(
            "Publish {} to {}",
            self.note.common_name(),
            self.settings.topic
        )
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<ActionOutcome, ActionError> {
        let client = self
            .client
            .as_ref()
            .ok_or(ActionError::MissingDependency("mqtt client"))?;

        let topic = self.settings.topic.trim();
        if topic.is_empty() {
            return Err(ActionError::InvalidConfig(
                "MQTT topic must not be empty".to_string(),
            ));
        }

        let key = self.cooldown_key();
        if let Some(cooldown) = &self.cooldown {
            if !cooldown.should_dispatch(key, Utc::now()) {
                tracing::debug!(
                    species = %key,
                    cooldown_secs = cooldown.cooldown().as_secs(),
                    "MQTT publish suppressed by cooldown"
                );
                return Ok(ActionOutcome::Suppressed(SuppressReason::Cooldown));
            }
        }

        let timeout = Some(self.settings.publish_timeout()).filter(|t| !t.is_zero());

        if !client.is_connected() {
            tracing::warn!(broker = %self.settings.broker, "MQTT client not connected, reconnecting");
            run_side_effect(ctx, timeout, client.connect())
                .await
                .map_err(|e| match e {
                    ActionError::Timeout(_) | ActionError::SinkUnavailable(_) => {
                        ActionError::SinkUnavailable(format!("MQTT reconnect failed: {}", e))
                    }
                    other => other,
                })?;
        }

        let payload = serde_json::to_string(&MqttPayload::from_note(&self.note))?;

        run_side_effect(
            ctx,
            timeout,
            client.publish(topic, &payload, self.settings.retain),
        )
        .await?;

        if let Some(cooldown) = &self.cooldown {
            cooldown.record_dispatch(key, Utc::now());
        }

        tracing::info!(
            species = %key,
            topic = %topic,
            confidence = self.note.confidence,
            "Detection published to MQTT"
        );
        Ok(ActionOutcome::Dispatched)
    }
}
