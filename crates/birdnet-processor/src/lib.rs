//! Detection processing and action dispatch.
//!
//! Filters detection batches by species and confidence, then dispatches each
//! accepted detection to the configured sinks through a retrying job queue,
//! with per-sink cooldowns suppressing repeat dispatches.

pub mod action;
pub mod cooldown;
pub mod error;
pub mod event_tracker;
pub mod filter;
pub mod jobqueue;
pub mod mock;
pub mod processor;
pub mod sink;

pub use action::{
    Action, ActionContext, ActionOutcome, DatabaseAction, MqttAction, MqttPayload,
    NotificationAction, SinkKind,
};
pub use cooldown::{CooldownRegistry, CooldownTracker};
pub use error::{ActionError, JobError, QueueError, SinkError};
pub use event_tracker::EventTracker;
pub use filter::{filter, FilterDecision, FilterPolicy, SpeciesFilter};
pub use jobqueue::{FailureSink, JobFailure, JobQueue, JobState, LogFailureSink, QueueStats};
pub use processor::{Processor, Sinks};
pub use sink::{DetectionStore, NotificationMessage, Notifier, Publisher};
