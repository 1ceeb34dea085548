//! BirdNET detection pipeline binary - composition root.
//!
//! 1. Load settings from TOML
//! 2. Build the event bus, job queue and sinks
//! 3. Feed every recognition result from the input through the processor
//! 4. Wait for queued dispatches to finish, then shut the queue down

mod cli;
mod sinks;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use birdnet_core::config::Settings;
use birdnet_core::events::EventBus;
use birdnet_core::types::RecognitionResult;
use birdnet_processor::{JobQueue, Processor, Sinks};

use crate::cli::CliArgs;
use crate::sinks::{JsonLinesStore, LogNotifier, LogPublisher};

fn build_sinks(settings: &Settings, store_path: &Path) -> Sinks {
    let realtime = &settings.realtime;
    let mut sinks = Sinks::new();
    if realtime.mqtt.enabled {
        sinks = sinks.with_publisher(Arc::new(LogPublisher::new(&realtime.mqtt.broker)));
    }
    if realtime.database.enabled {
        tracing::info!(path = %store_path.display(), "Saving detections");
        sinks = sinks.with_store(Arc::new(JsonLinesStore::new(store_path)));
    }
    if realtime.notification.enabled {
        sinks = sinks.with_notifier(Arc::new(LogNotifier));
    }
    sinks
}

/// Log every pipeline event at debug level until the bus closes.
fn spawn_event_logger(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => tracing::debug!(event = event.event_name(), ?event, "Pipeline event"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event logger lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Process JSON lines of recognition results. Returns (batches, accepted).
///
/// Reading pauses while the job queue is full.
async fn process_input<R>(processor: &Processor, reader: R) -> std::io::Result<(usize, usize)>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_no = 0usize;
    let mut batches = 0usize;
    let mut accepted = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let result: RecognitionResult = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "Skipping malformed recognition result");
                continue;
            }
        };

        batches += 1;
        accepted += processor.process_wait(result.into_batch()).await.len();
    }

    Ok((batches, accepted))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Tracing.
    let filter = match &args.log_level {
        Some(level) => tracing_subscriber::EnvFilter::new(level),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Starting BirdNET pipeline v{}", env!("CARGO_PKG_VERSION"));

    // Config.
    let config_file = args.resolve_config_path();
    let settings = Settings::load_or_default(&config_file);
    tracing::info!(
        path = %config_file.display(),
        threshold = settings.birdnet.threshold,
        mqtt = settings.realtime.mqtt.enabled,
        database = settings.realtime.database.enabled,
        notification = settings.realtime.notification.enabled,
        "Settings ready"
    );

    // Pipeline.
    let events = EventBus::default();
    spawn_event_logger(&events);
    let queue = Arc::new(JobQueue::new(&settings.realtime.job_queue, events.clone()));
    let sinks = build_sinks(&settings, &args.store);
    let processor = Processor::new(settings, sinks, Arc::clone(&queue), events);

    // Input.
    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path).await.map_err(|e| {
                tracing::error!(path = %path.display(), error = %e, "Failed to open input");
                e
            })?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let (batches, accepted) = tokio::select! {
        result = process_input(&processor, reader) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, shutting down");
            queue.shutdown().await;
            return Ok(());
        }
    };
    tracing::info!(batches, accepted, "Input processed, waiting for dispatches");

    tokio::select! {
        _ = queue.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => tracing::warn!("Interrupted, cancelling pending dispatches"),
    }
    queue.shutdown().await;

    let stats = queue.stats();
    tracing::info!(
        submitted = stats.submitted,
        succeeded = stats.succeeded,
        suppressed = stats.suppressed,
        retried = stats.retried,
        failed = stats.failed,
        rejected = stats.rejected,
        "Done"
    );

    Ok(())
}
