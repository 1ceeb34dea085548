//! Persist action.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use birdnet_core::config::{DatabaseSettings, RetryConfig};
use birdnet_core::events::SuppressReason;
use birdnet_core::types::Note;

use crate::action::{run_side_effect, Action, ActionContext, ActionOutcome, SinkKind};
use crate::error::ActionError;
use crate::event_tracker::EventTracker;
use crate::sink::DetectionStore;

/// Saves one note to the detection store.
///
/// Repeat detections of the same species from the same source within the
/// debounce window are skipped. The window opens only once a save succeeds,
/// so a retried save is never debounced by its own failed attempt.
pub struct DatabaseAction {
    note: Note,
    store: Option<Arc<dyn DetectionStore>>,
    tracker: Option<Arc<EventTracker>>,
    retry: RetryConfig,
}

impl DatabaseAction {
    pub fn new(
        settings: &DatabaseSettings,
        note: Note,
        store: Option<Arc<dyn DetectionStore>>,
        tracker: Option<Arc<EventTracker>>,
    ) -> Self {
        Self {
            note,
            store,
            tracker,
            retry: settings.retry.clone(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn debounce_key(&self) -> String {
        format!("{}:{}", self.note.source.id, self.note.scientific_name())
    }
}

#[async_trait]
impl Action for DatabaseAction {
    fn sink(&self) -> SinkKind {
        SinkKind::Database
    }

    fn note(&self) -> &Note {
        &self.note
    }

    fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    fn describe(&self) -> String {
        format!("Save {} to database", self.note.common_name())
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<ActionOutcome, ActionError> {
        let store = self
            .store
            .as_ref()
            .ok_or(ActionError::MissingDependency("detection store"))?;

        let key = self.debounce_key();
        if let Some(tracker) = &self.tracker {
            if tracker.is_debounced(&key, Utc::now()) {
                tracing::debug!(key = %key, "Database save debounced");
                return Ok(ActionOutcome::Suppressed(SuppressReason::Debounced));
            }
        }

        if !store.is_ready() {
            return Err(ActionError::SinkUnavailable(
                "detection store is not ready".to_string(),
            ));
        }

        run_side_effect(ctx, None, store.save(&self.note)).await?;

        if let Some(tracker) = &self.tracker {
            tracker.register(&key, Utc::now());
        }

        tracing::info!(
            note_id = %self.note.id,
            species = %self.note.common_name(),
            "Detection saved"
        );
        Ok(ActionOutcome::Dispatched)
    }
}
