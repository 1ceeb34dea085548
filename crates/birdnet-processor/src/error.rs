//! Error types for the detection processor.

use birdnet_core::error::BirdNetError;

use crate::jobqueue::JobState;

/// Failures reported by a sink capability (publisher, store, notifier).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("Sink unavailable: {0}")]
    Unavailable(String),
    #[error("Sink operation timed out after {0} ms")]
    Timeout(u64),
    #[error("Sink rejected the request: {0}")]
    Rejected(String),
}

/// Errors from action execution.
///
/// The job queue decides retry-vs-surface solely from [`ActionError::is_retryable`].
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Sink unavailable: {0}")]
    SinkUnavailable(String),
    #[error("Action execution timed out after {0} ms")]
    Timeout(u64),
    #[error("Sink rejected the action: {0}")]
    Rejected(String),
    #[error("Invalid action configuration: {0}")]
    InvalidConfig(String),
    #[error("Missing required dependency: {0}")]
    MissingDependency(&'static str),
    #[error("Payload serialization failed: {0}")]
    Serialization(String),
    #[error("Action cancelled")]
    Cancelled,
}

impl ActionError {
    /// Transient sink failures are retried; everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ActionError::SinkUnavailable(_) | ActionError::Timeout(_))
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, ActionError::Cancelled)
    }
}

impl From<SinkError> for ActionError {
    fn from(err: SinkError) -> Self {
        match err {
            SinkError::Unavailable(msg) => ActionError::SinkUnavailable(msg),
            SinkError::Timeout(ms) => ActionError::Timeout(ms),
            SinkError::Rejected(msg) => ActionError::Rejected(msg),
        }
    }
}

impl From<serde_json::Error> for ActionError {
    fn from(err: serde_json::Error) -> Self {
        ActionError::Serialization(err.to_string())
    }
}

/// Errors from job submission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("Job queue is full ({capacity} jobs)")]
    Full { capacity: usize },
    #[error("Job queue is closed")]
    Closed,
}

impl From<QueueError> for BirdNetError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Full { capacity } => BirdNetError::QueueFull { capacity },
            QueueError::Closed => BirdNetError::ShuttingDown,
        }
    }
}

/// Errors from the job lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("Invalid job state transition from {0} to {1}")]
    InvalidTransition(JobState, JobState),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_error_display() {
        let err = ActionError::SinkUnavailable("not connected".to_string());
        assert_eq!(err.to_string(), "Sink unavailable: not connected");

        let err = ActionError::Timeout(500);
        assert_eq!(err.to_string(), "Action execution timed out after 500 ms");

        let err = ActionError::MissingDependency("mqtt client");
        assert_eq!(err.to_string(), "Missing required dependency: mqtt client");

        let err = ActionError::Cancelled;
        assert_eq!(err.to_string(), "Action cancelled");
    }

    #[test]
    fn test_only_transient_errors_are_retryable() {
        assert!(ActionError::SinkUnavailable("down".into()).is_retryable());
        assert!(ActionError::Timeout(5).is_retryable());

        assert!(!ActionError::Rejected("bad payload".into()).is_retryable());
        assert!(!ActionError::InvalidConfig("empty topic".into()).is_retryable());
        assert!(!ActionError::MissingDependency("store").is_retryable());
        assert!(!ActionError::Serialization("nan".into()).is_retryable());
        assert!(!ActionError::Cancelled.is_retryable());
    }

    #[test]
    fn test_cancellation_class() {
        assert!(ActionError::Cancelled.is_cancellation());
        assert!(!ActionError::Timeout(1).is_cancellation());
    }

    #[test]
    fn test_sink_error_conversion() {
        let err: ActionError = SinkError::Unavailable("offline".into()).into();
        assert!(matches!(err, ActionError::SinkUnavailable(ref m) if m == "offline"));

        let err: ActionError = SinkError::Timeout(3_000).into();
        assert!(matches!(err, ActionError::Timeout(3_000)));

        let err: ActionError = SinkError::Rejected("quota".into()).into();
        assert!(matches!(err, ActionError::Rejected(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_queue_error_into_birdnet_error() {
        let err: BirdNetError = QueueError::Full { capacity: 8 }.into();
        assert!(matches!(err, BirdNetError::QueueFull { capacity: 8 }));

        let err: BirdNetError = QueueError::Closed.into();
        assert!(matches!(err, BirdNetError::ShuttingDown));
    }

    #[test]
    fn test_job_error_display() {
        let err = JobError::InvalidTransition(JobState::Succeeded, JobState::Pending);
        assert_eq!(
            err.to_string(),
            "Invalid job state transition from succeeded to pending"
        );
    }
}
