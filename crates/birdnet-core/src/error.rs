use thiserror::Error;

/// Top-level error type for the BirdNET detection pipeline.
///
/// Subsystem crates define their own error types and convert into
/// `BirdNetError` where an error crosses a crate boundary, so that the `?`
/// operator works from the processor up to the binary.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BirdNetError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Job queue is full ({capacity} jobs)")]
    QueueFull { capacity: usize },

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl From<toml::de::Error> for BirdNetError {
    fn from(err: toml::de::Error) -> Self {
        BirdNetError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for BirdNetError {
    fn from(err: toml::ser::Error) -> Self {
        BirdNetError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for BirdNetError {
    fn from(err: serde_json::Error) -> Self {
        BirdNetError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for pipeline operations.
pub type Result<T> = std::result::Result<T, BirdNetError>;
