//! Push notification action.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use birdnet_core::config::{NotificationSettings, RetryConfig};
use birdnet_core::events::SuppressReason;
use birdnet_core::types::Note;

use crate::action::{run_side_effect, Action, ActionContext, ActionOutcome, SinkKind};
use crate::cooldown::CooldownTracker;
use crate::error::ActionError;
use crate::sink::{NotificationMessage, Notifier};

/// Sends one notification about a note, rate limited per species.
pub struct NotificationAction {
    note: Note,
    notifier: Option<Arc<dyn Notifier>>,
    cooldown: Option<Arc<CooldownTracker>>,
    retry: RetryConfig,
}

impl NotificationAction {
    pub fn new(
        settings: &NotificationSettings,
        note: Note,
        notifier: Option<Arc<dyn Notifier>>,
        cooldown: Option<Arc<CooldownTracker>>,
    ) -> Self {
        Self {
            note,
            notifier,
            cooldown,
            retry: settings.retry.clone(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl Action for NotificationAction {
    fn sink(&self) -> SinkKind {
        SinkKind::Notification
    }

    fn note(&self) -> &Note {
        &self.note
    }

    fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<ActionOutcome, ActionError> {
        let notifier = self
            .notifier
            .as_ref()
            .ok_or(ActionError::MissingDependency("notifier"))?;

        let key = self.note.common_name();
        if let Some(cooldown) = &self.cooldown {
            if !cooldown.should_dispatch(key, Utc::now()) {
                tracing::debug!(species = %key, "Notification suppressed by cooldown");
                return Ok(ActionOutcome::Suppressed(SuppressReason::Cooldown));
            }
        }

        if !notifier.is_available() {
            return Err(ActionError::SinkUnavailable(
                "notification channel unavailable".to_string(),
            ));
        }

        let message = NotificationMessage::for_note(&self.note);
        run_side_effect(ctx, None, notifier.notify(&message)).await?;

        if let Some(cooldown) = &self.cooldown {
            cooldown.record_dispatch(key, Utc::now());
        }

        tracing::info!(species = %key, title = %message.title, "Notification sent");
        Ok(ActionOutcome::Dispatched)
    }
}
