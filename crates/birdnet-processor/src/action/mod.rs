//! Dispatchable actions.
//!
//! An action binds one accepted detection to one sink. All variants share
//! the [`Action`] trait; each keeps its own per-sink configuration.

pub mod database;
pub mod mqtt;
pub mod notification;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use birdnet_core::config::RetryConfig;
use birdnet_core::events::SuppressReason;
use birdnet_core::types::Note;

use crate::error::{ActionError, SinkError};

pub use database::DatabaseAction;
pub use mqtt::{MqttAction, MqttPayload};
pub use notification::NotificationAction;

/// Sink kinds an action can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    Mqtt,
    Database,
    Notification,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkKind::Mqtt => write!(f, "mqtt"),
            SinkKind::Database => write!(f, "database"),
            SinkKind::Notification => write!(f, "notification"),
        }
    }
}

impl std::str::FromStr for SinkKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mqtt" => Ok(SinkKind::Mqtt),
            "database" => Ok(SinkKind::Database),
            "notification" => Ok(SinkKind::Notification),
            _ => Err(format!("Unknown sink kind: {}", s)),
        }
    }
}

/// Successful result of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The side effect was delivered.
    Dispatched,
    /// Nothing was sent; this is not a failure.
    Suppressed(SuppressReason),
}

/// Per-attempt execution context handed to [`Action::execute`].
#[derive(Debug, Clone)]
pub struct ActionContext {
    cancel: CancellationToken,
    attempt: u32,
}

impl ActionContext {
    pub fn new(cancel: CancellationToken, attempt: u32) -> Self {
        Self { cancel, attempt }
    }

    /// A first attempt with its own, never-cancelled token.
    pub fn detached() -> Self {
        Self::new(CancellationToken::new(), 1)
    }

    /// 1-indexed attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A unit of dispatchable work bound to one note and one sink.
///
/// Implementations must be safe to execute concurrently for different notes
/// and must not hold locks across the sink call.
#[async_trait]
pub trait Action: Send + Sync {
    fn sink(&self) -> SinkKind;

    fn note(&self) -> &Note;

    fn retry_config(&self) -> &RetryConfig;

    /// Human-readable description for logs.
    fn describe(&self) -> String {
        format!("{} {}", self.sink(), self.note().common_name())
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<ActionOutcome, ActionError>;
}

/// Await a sink call, aborting promptly on cancellation and bounding it by
/// `timeout` when one is given.
pub(crate) async fn run_side_effect<F, T>(
    ctx: &ActionContext,
    timeout: Option<Duration>,
    call: F,
) -> Result<T, ActionError>
where
    F: Future<Output = Result<T, SinkError>>,
{
    if ctx.is_cancelled() {
        return Err(ActionError::Cancelled);
    }

    let bounded = async {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result.map_err(ActionError::from),
                Err(_) => Err(ActionError::Timeout(duration_ms(limit))),
            },
            None => call.await.map_err(ActionError::from),
        }
    };

    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(ActionError::Cancelled),
        result = bounded => result,
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
