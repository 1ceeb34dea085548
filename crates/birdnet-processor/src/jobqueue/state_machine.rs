//! Job state machine with validated transitions.
//!
//! Pending -> Dispatching -> Succeeded/Suppressed/Failed/Cancelled
//! Dispatching -> RetryWait -> Pending

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::JobError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Dispatching,
    Suppressed,
    Succeeded,
    RetryWait,
    Failed,
    Cancelled,
}

impl JobState {
    /// No further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Suppressed | JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Dispatching => write!(f, "dispatching"),
            JobState::Suppressed => write!(f, "suppressed"),
            JobState::Succeeded => write!(f, "succeeded"),
            JobState::RetryWait => write!(f, "retry_wait"),
            JobState::Failed => write!(f, "failed"),
            JobState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Validate that a state transition is allowed.
///
/// Valid transitions:
/// - Pending -> Dispatching
/// - Pending -> Cancelled (shutdown before a worker picked it up)
/// - Dispatching -> Succeeded
/// - Dispatching -> Suppressed
/// - Dispatching -> RetryWait
/// - Dispatching -> Failed
/// - Dispatching -> Cancelled
/// - RetryWait -> Pending
/// - RetryWait -> Cancelled
pub fn validate_transition(from: JobState, to: JobState) -> Result<(), JobError> {
    let valid = matches!(
        (from, to),
        (JobState::Pending, JobState::Dispatching)
            | (JobState::Pending, JobState::Cancelled)
            | (JobState::Dispatching, JobState::Succeeded)
            | (JobState::Dispatching, JobState::Suppressed)
            | (JobState::Dispatching, JobState::RetryWait)
            | (JobState::Dispatching, JobState::Failed)
            | (JobState::Dispatching, JobState::Cancelled)
            | (JobState::RetryWait, JobState::Pending)
            | (JobState::RetryWait, JobState::Cancelled)
    );

    if valid {
        Ok(())
    } else {
        Err(JobError::InvalidTransition(from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [JobState; 7] = [
        JobState::Pending,
        JobState::Dispatching,
        JobState::Suppressed,
        JobState::Succeeded,
        JobState::RetryWait,
        JobState::Failed,
        JobState::Cancelled,
    ];

    // =====================================================================
    // Valid transitions
    // =====================================================================

    #[test]
    fn test_pending_to_dispatching() {
        assert!(validate_transition(JobState::Pending, JobState::Dispatching).is_ok());
    }

    #[test]
    fn test_pending_to_cancelled() {
        assert!(validate_transition(JobState::Pending, JobState::Cancelled).is_ok());
    }

    #[test]
    fn test_dispatching_outcomes() {
        for to in [
            JobState::Succeeded,
            JobState::Suppressed,
            JobState::RetryWait,
            JobState::Failed,
            JobState::Cancelled,
        ] {
            assert!(validate_transition(JobState::Dispatching, to).is_ok(), "{}", to);
        }
    }

    #[test]
    fn test_retry_wait_to_pending() {
        assert!(validate_transition(JobState::RetryWait, JobState::Pending).is_ok());
    }

    #[test]
    fn test_retry_wait_to_cancelled() {
        assert!(validate_transition(JobState::RetryWait, JobState::Cancelled).is_ok());
    }

    // =====================================================================
    // Invalid transitions
    // =====================================================================

    #[test]
    fn test_pending_cannot_skip_dispatching() {
        assert!(validate_transition(JobState::Pending, JobState::Succeeded).is_err());
        assert!(validate_transition(JobState::Pending, JobState::Failed).is_err());
        assert!(validate_transition(JobState::Pending, JobState::RetryWait).is_err());
    }

    #[test]
    fn test_retry_wait_cannot_dispatch_directly() {
        assert!(validate_transition(JobState::RetryWait, JobState::Dispatching).is_err());
    }

    #[test]
    fn test_failed_is_not_resumable() {
        assert!(validate_transition(JobState::Failed, JobState::Pending).is_err());
        assert!(validate_transition(JobState::Failed, JobState::RetryWait).is_err());
    }

    #[test]
    fn test_self_transitions_invalid() {
        for state in ALL {
            assert!(validate_transition(state, state).is_err(), "{}", state);
        }
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in ALL.into_iter().filter(JobState::is_terminal) {
            for to in ALL {
                assert!(
                    validate_transition(from, to).is_err(),
                    "{} -> {} should be invalid",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_is_terminal() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Dispatching.is_terminal());
        assert!(!JobState::RetryWait.is_terminal());
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Suppressed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
    }

    #[test]
    fn test_display_matches_serde() {
        for state in ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state));
        }
    }
}
