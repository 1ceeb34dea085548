//! Shared domain types, settings, errors, and pipeline events for the BirdNET
//! detection pipeline.

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::{RetryConfig, Settings};
pub use error::{BirdNetError, Result};
pub use events::{EventBus, PipelineEvent, SuppressReason};
pub use types::*;
