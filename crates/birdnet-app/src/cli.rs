//! CLI argument definitions for the `birdnet` binary.
//!
//! Priority resolution: CLI args > env vars > defaults.

use clap::Parser;
use std::path::PathBuf;

/// Filter recognition results and dispatch accepted detections to the
/// configured sinks.
#[derive(Parser, Debug)]
#[command(name = "birdnet", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Recognition results as JSON lines. Reads stdin when omitted.
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,

    /// JSON-lines file the database sink appends notes to.
    #[arg(short = 's', long = "store", default_value = "detections.jsonl")]
    pub store: PathBuf,

    /// Log level (trace, debug, info, warn, error). Overrides RUST_LOG.
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > BIRDNET_CONFIG env var > ~/.birdnet/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        resolve_config_path(self.config.as_ref(), std::env::var("BIRDNET_CONFIG").ok())
    }
}

fn resolve_config_path(flag: Option<&PathBuf>, env: Option<String>) -> PathBuf {
    if let Some(p) = flag {
        return p.clone();
    }
    if let Some(p) = env.filter(|p| !p.is_empty()) {
        return PathBuf::from(p);
    }
    default_config_path()
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".birdnet").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".birdnet").join("config.toml");
    }
    PathBuf::from("config.toml")
}
