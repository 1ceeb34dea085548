use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{BirdNetError, Result};

/// Top-level settings for the detection pipeline.
///
/// Loaded from `~/.birdnet/config.toml` by default. The value is immutable
/// once handed to the processor; components receive the sections they need
/// at construction time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub birdnet: BirdNetSettings,
    #[serde(default)]
    pub realtime: RealtimeSettings,
}

impl Settings {
    /// Load settings from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        settings.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(settings)
    }

    /// Load settings from a TOML file, falling back to defaults if the file
    /// does not exist or is invalid.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current settings to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let threshold = self.birdnet.threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(BirdNetError::Config(format!(
                "birdnet.threshold must be within [0, 1], got {}",
                threshold
            )));
        }

        let queue = &self.realtime.job_queue;
        if queue.workers == 0 {
            return Err(BirdNetError::Config(
                "realtime.job_queue.workers must be greater than 0".to_string(),
            ));
        }
        if queue.capacity == 0 {
            return Err(BirdNetError::Config(
                "realtime.job_queue.capacity must be greater than 0".to_string(),
            ));
        }

        self.realtime.mqtt.retry.validate("realtime.mqtt.retry")?;
        self.realtime.database.retry.validate("realtime.database.retry")?;
        self.realtime
            .notification
            .retry
            .validate("realtime.notification.retry")?;

        if self.realtime.mqtt.enabled && self.realtime.mqtt.topic.trim().is_empty() {
            return Err(BirdNetError::Config(
                "realtime.mqtt.topic must not be empty when MQTT is enabled".to_string(),
            ));
        }

        Ok(())
    }
}

/// Classifier-side settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BirdNetSettings {
    /// Minimum confidence for a detection to be accepted.
    pub threshold: f32,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub range_filter: RangeFilterSettings,
}

impl Default for BirdNetSettings {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            latitude: 0.0,
            longitude: 0.0,
            range_filter: RangeFilterSettings::default(),
        }
    }
}

/// Species expected at the configured location.
///
/// An empty list means no regional restriction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeFilterSettings {
    pub species: Vec<String>,
}

/// Real-time processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeSettings {
    pub species: SpeciesSettings,
    pub mqtt: MqttSettings,
    pub database: DatabaseSettings,
    pub notification: NotificationSettings,
    pub job_queue: JobQueueSettings,
}

/// User species preferences.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeciesSettings {
    /// Species that are never reported, even when inside the range filter.
    pub exclude: Vec<String>,
}

/// MQTT publishing sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    pub enabled: bool,
    pub broker: String,
    pub topic: String,
    pub retain: bool,
    /// Minimum minutes between two publications for the same species.
    /// Zero disables the cooldown.
    pub cooldown_minutes: u64,
    /// Upper bound on one publish call. Zero waits indefinitely.
    pub publish_timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            broker: "tcp://localhost:1883".to_string(),
            topic: "birdnet/detections".to_string(),
            retain: false,
            cooldown_minutes: 0,
            publish_timeout_secs: 10,
            retry: RetryConfig::default(),
        }
    }
}

impl MqttSettings {
    pub fn cooldown(&self) -> Duration {
        cooldown_from_minutes(self.cooldown_minutes)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }
}

/// Detection persistence sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub enabled: bool,
    /// Repeated detections of one species within this window are saved once.
    /// Zero disables debouncing.
    pub debounce_secs: u64,
    pub retry: RetryConfig,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_secs: 15,
            retry: RetryConfig::default(),
        }
    }
}

impl DatabaseSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }
}

/// Push notification sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub enabled: bool,
    /// Minimum minutes between two notifications for the same species.
    pub cooldown_minutes: u64,
    pub retry: RetryConfig,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            cooldown_minutes: 60,
            retry: RetryConfig::default(),
        }
    }
}

impl NotificationSettings {
    pub fn cooldown(&self) -> Duration {
        cooldown_from_minutes(self.cooldown_minutes)
    }
}

/// Oversized values saturate to the longest representable window.
fn cooldown_from_minutes(minutes: u64) -> Duration {
    Duration::from_secs(minutes.saturating_mul(60))
}

/// Asynchronous action execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobQueueSettings {
    /// Number of concurrent workers executing actions.
    pub workers: usize,
    /// Maximum number of jobs waiting for a worker.
    pub capacity: usize,
}

impl Default for JobQueueSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            capacity: 1000,
        }
    }
}

/// Per-sink retry policy.
///
/// `max_retries` counts retries after the first attempt, so an action runs
/// at most `max_retries + 1` times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Total number of attempts allowed, including the first one.
    pub fn max_attempts(&self) -> u32 {
        if self.enabled {
            self.max_retries.saturating_add(1)
        } else {
            1
        }
    }

    /// Whether another attempt may follow the given (1-indexed) attempt.
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        self.enabled && attempt < self.max_attempts()
    }

    /// Backoff before the retry that follows `attempt` (1-indexed).
    ///
    /// `initial_delay * multiplier^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = if delay.is_finite() {
            delay.min(self.max_delay_ms as f64)
        } else {
            self.max_delay_ms as f64
        };
        Duration::from_millis(capped as u64)
    }

    fn validate(&self, section: &str) -> Result<()> {
        if !(self.backoff_multiplier >= 1.0) {
            return Err(BirdNetError::Config(format!(
                "{}.backoff_multiplier must be at least 1.0, got {}",
                section, self.backoff_multiplier
            )));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(BirdNetError::Config(format!(
                "{}.max_delay_ms ({}) must not be below initial_delay_ms ({})",
                section, self.max_delay_ms, self.initial_delay_ms
            )));
        }
        Ok(())
    }
}
