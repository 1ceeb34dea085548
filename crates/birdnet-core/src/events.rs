use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Why a detection or an action produced no side effect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
    /// Confidence below the configured threshold.
    BelowThreshold,
    /// Species is on the exclusion list.
    Excluded,
    /// Inclusion list is non-empty and does not name the species.
    NotIncluded,
    /// The sink dispatched this key within its cooldown window.
    Cooldown,
    /// An identical event was registered within the debounce window.
    Debounced,
}

impl std::fmt::Display for SuppressReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuppressReason::BelowThreshold => write!(f, "below_threshold"),
            SuppressReason::Excluded => write!(f, "excluded"),
            SuppressReason::NotIncluded => write!(f, "not_included"),
            SuppressReason::Cooldown => write!(f, "cooldown"),
            SuppressReason::Debounced => write!(f, "debounced"),
        }
    }
}

/// Observable side effects of the pipeline.
///
/// Emitted by the processor and the job queue, consumed by whoever
/// subscribes to the [`EventBus`] (metrics exporters, tests, UIs).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum PipelineEvent {
    /// A detection passed the species filter and became a note.
    DetectionAccepted {
        note_id: Uuid,
        species: String,
        source_id: String,
        confidence: f32,
        timestamp: DateTime<Utc>,
    },

    /// A detection was dropped by the species filter.
    DetectionSuppressed {
        species: String,
        source_id: String,
        reason: SuppressReason,
        timestamp: DateTime<Utc>,
    },

    /// An action completed as a no-op.
    ActionSuppressed {
        job_id: Uuid,
        sink: String,
        species: String,
        reason: SuppressReason,
        timestamp: DateTime<Utc>,
    },

    /// An action delivered its side effect.
    DispatchSucceeded {
        job_id: Uuid,
        sink: String,
        species: String,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },

    /// A cooldown tracker recorded a successful dispatch.
    CooldownRecorded {
        sink: String,
        key: String,
        timestamp: DateTime<Utc>,
    },

    /// A failed attempt will be retried after `delay_ms`.
    RetryScheduled {
        job_id: Uuid,
        sink: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// An action was abandoned.
    DispatchFailed {
        job_id: Uuid,
        sink: String,
        species: String,
        attempts: u32,
        error: String,
        retryable: bool,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Returns the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            PipelineEvent::DetectionAccepted { timestamp, .. }
            | PipelineEvent::DetectionSuppressed { timestamp, .. }
            | PipelineEvent::ActionSuppressed { timestamp, .. }
            | PipelineEvent::DispatchSucceeded { timestamp, .. }
            | PipelineEvent::CooldownRecorded { timestamp, .. }
            | PipelineEvent::RetryScheduled { timestamp, .. }
            | PipelineEvent::DispatchFailed { timestamp, .. } => *timestamp,
        }
    }

    /// Returns a stable event name for logging and metrics labels.
    pub fn event_name(&self) -> &'static str {
        match self {
            PipelineEvent::DetectionAccepted { .. } => "detection_accepted",
            PipelineEvent::DetectionSuppressed { .. } => "detection_suppressed",
            PipelineEvent::ActionSuppressed { .. } => "action_suppressed",
            PipelineEvent::DispatchSucceeded { .. } => "dispatch_succeeded",
            PipelineEvent::CooldownRecorded { .. } => "cooldown_recorded",
            PipelineEvent::RetryScheduled { .. } => "retry_scheduled",
            PipelineEvent::DispatchFailed { .. } => "dispatch_failed",
        }
    }
}

/// Broadcast channel for [`PipelineEvent`]s.
///
/// Cloning the bus shares the channel. Publishing never blocks and is a
/// no-op when nobody is subscribed; slow subscribers lose the oldest events.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: PipelineEvent) {
        // Err only means there are no receivers.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
