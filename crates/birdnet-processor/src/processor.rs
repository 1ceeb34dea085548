//! Detection processor.
//!
//! Filters each incoming batch, turns survivors into notes and hands one
//! action per enabled sink to the job queue. `process` never waits on a
//! dispatch; results arrive later through the event bus.

use std::sync::Arc;

use chrono::Utc;

use birdnet_core::config::Settings;
use birdnet_core::events::{EventBus, PipelineEvent};
use birdnet_core::types::{Detection, DetectionBatch, Note};

use crate::action::{Action, DatabaseAction, MqttAction, NotificationAction, SinkKind};
use crate::cooldown::CooldownRegistry;
use crate::event_tracker::EventTracker;
use crate::filter::{FilterDecision, SpeciesFilter};
use crate::jobqueue::JobQueue;
use crate::sink::{DetectionStore, Notifier, Publisher};

/// External capabilities handed to actions. A sink that is enabled in the
/// settings but has no capability here fails its actions permanently.
#[derive(Clone, Default)]
pub struct Sinks {
    pub publisher: Option<Arc<dyn Publisher>>,
    pub store: Option<Arc<dyn DetectionStore>>,
    pub notifier: Option<Arc<dyn Notifier>>,
}

impl Sinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn DetectionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }
}

pub struct Processor {
    settings: Arc<Settings>,
    filter: SpeciesFilter,
    cooldowns: CooldownRegistry,
    debounce: Arc<EventTracker>,
    queue: Arc<JobQueue>,
    sinks: Sinks,
    events: EventBus,
}

impl Processor {
    pub fn new(settings: Settings, sinks: Sinks, queue: Arc<JobQueue>, events: EventBus) -> Self {
        let realtime = &settings.realtime;
        let cooldowns = CooldownRegistry::new()
            .observed_by(events.clone())
            .with_sink(SinkKind::Mqtt, realtime.mqtt.cooldown())
            .with_sink(SinkKind::Notification, realtime.notification.cooldown());
        let debounce = Arc::new(EventTracker::new(realtime.database.debounce()));

        Self {
            filter: SpeciesFilter::from_settings(&settings),
            settings: Arc::new(settings),
            cooldowns,
            debounce,
            queue,
            sinks,
            events,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn filter(&self) -> &SpeciesFilter {
        &self.filter
    }

    pub fn cooldowns(&self) -> &CooldownRegistry {
        &self.cooldowns
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Filter `batch` and submit actions for every accepted detection.
    ///
    /// Returns the accepted detections as notes, in batch order. Submission
    /// never waits; an action rejected by a full queue goes to the queue's
    /// failure sink and the rest of the batch continues.
    pub fn process(&self, batch: DetectionBatch) -> Vec<Note> {
        let mut accepted = Vec::new();
        for detection in &batch.detections {
            let Some(note) = self.accept(detection) else {
                continue;
            };
            for action in self.actions_for(&note) {
                if let Err(e) = self.queue.submit(action) {
                    tracing::debug!(error = %e, note_id = %note.id, "Action not enqueued");
                }
            }
            accepted.push(note);
        }
        accepted
    }

    /// Like [`process`](Self::process), but waits for queue capacity instead
    /// of rejecting actions. Suited to bulk input where the producer can be
    /// slowed down.
    pub async fn process_wait(&self, batch: DetectionBatch) -> Vec<Note> {
        let mut accepted = Vec::new();
        for detection in &batch.detections {
            let Some(note) = self.accept(detection) else {
                continue;
            };
            for action in self.actions_for(&note) {
                if let Err(e) = self.queue.submit_wait(action).await {
                    tracing::debug!(error = %e, note_id = %note.id, "Action not enqueued");
                }
            }
            accepted.push(note);
        }
        accepted
    }

    /// Run the filter and publish the decision. Returns the note to dispatch.
    fn accept(&self, detection: &Detection) -> Option<Note> {
        if let FilterDecision::Suppress(reason) = self.filter.evaluate(detection) {
            tracing::debug!(
                species = %detection.species,
                confidence = detection.confidence,
                reason = %reason,
                "Detection filtered"
            );
            self.events.publish(PipelineEvent::DetectionSuppressed {
                species: detection.species.common_name.clone(),
                source_id: detection.source.id.clone(),
                reason,
                timestamp: Utc::now(),
            });
            return None;
        }

        let birdnet = &self.settings.birdnet;
        let note = Note::from_detection(detection, birdnet.latitude, birdnet.longitude);
        tracing::info!(
            note_id = %note.id,
            species = %note.common_name(),
            confidence = note.confidence,
            source = %note.source.id,
            "Detection accepted"
        );
        self.events.publish(PipelineEvent::DetectionAccepted {
            note_id: note.id,
            species: note.common_name().to_string(),
            source_id: note.source.id.clone(),
            confidence: note.confidence,
            timestamp: Utc::now(),
        });
        Some(note)
    }

    /// One action per enabled sink, in a fixed sink order.
    fn actions_for(&self, note: &Note) -> Vec<Arc<dyn Action>> {
        let realtime = &self.settings.realtime;
        let mut actions: Vec<Arc<dyn Action>> = Vec::new();

        if realtime.database.enabled {
            actions.push(Arc::new(DatabaseAction::new(
                &realtime.database,
                note.clone(),
                self.sinks.store.clone(),
                Some(Arc::clone(&self.debounce)),
            )));
        }
        if realtime.mqtt.enabled {
            actions.push(Arc::new(MqttAction::new(
                realtime.mqtt.clone(),
                note.clone(),
                self.sinks.publisher.clone(),
                self.cooldowns.tracker(SinkKind::Mqtt),
            )));
        }
        if realtime.notification.enabled {
            actions.push(Arc::new(NotificationAction::new(
                &realtime.notification,
                note.clone(),
                self.sinks.notifier.clone(),
                self.cooldowns.tracker(SinkKind::Notification),
            )));
        }

        actions
    }
}
