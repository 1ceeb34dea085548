use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Kind of audio input that produced a detection batch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Local sound card capture.
    Microphone,
    /// Network audio stream (RTSP, HLS).
    Stream,
    /// Offline analysis of an audio file.
    File,
    #[default]
    Unknown,
}

// =============================================================================
// Domain Structs
// =============================================================================

/// Identity of a bird species.
///
/// Classifier labels have the form `"<Scientific name>_<Common name>"`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Species {
    pub scientific_name: String,
    pub common_name: String,
}

impl Species {
    pub fn new(scientific_name: impl Into<String>, common_name: impl Into<String>) -> Self {
        Self {
            scientific_name: scientific_name.into(),
            common_name: common_name.into(),
        }
    }

    /// Parse a classifier label.
    ///
    /// The label is split on the first `_`. A label without a separator is
    /// used verbatim for both names.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim();
        match label.split_once('_') {
            Some((scientific, common)) if !scientific.is_empty() && !common.is_empty() => {
                Self::new(scientific.trim(), common.trim())
            }
            _ => Self::new(label, label),
        }
    }

    /// The classifier label for this species.
    pub fn label(&self) -> String {
        if self.scientific_name == self.common_name {
            self.scientific_name.clone()
        } else {
            format!("{}_{}", self.scientific_name, self.common_name)
        }
    }

    /// Normalized names a configured list entry may use for this species:
    /// common name, scientific name, and full label.
    pub fn match_keys(&self) -> [String; 3] {
        [
            normalize_name(&self.common_name),
            normalize_name(&self.scientific_name),
            normalize_name(&self.label()),
        ]
    }
}

/// Canonical form used when comparing species names from configuration.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

impl std::fmt::Display for Species {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.common_name)
    }
}

/// The audio input a batch was recorded from.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub kind: SourceType,
}

impl Source {
    pub fn new(id: impl Into<String>, kind: SourceType) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            kind,
        }
    }
}

/// One scored species observation from the recognizer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub species: Species,
    /// Confidence score in [0.0, 1.0].
    pub confidence: f32,
    pub clip_name: Option<String>,
    pub source: Source,
    pub timestamp: DateTime<Utc>,
}

/// Raw recognizer output: one label with its score.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
}

/// Output of one recognition cycle, as handed over by the classifier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub source: Source,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub clip_name: Option<String>,
    pub predictions: Vec<Prediction>,
}

impl RecognitionResult {
    pub fn into_batch(self) -> DetectionBatch {
        DetectionBatch::from_predictions(
            self.source,
            self.start_time,
            self.clip_name,
            self.predictions,
        )
    }
}

/// Ordered detections from one source and one recognition cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionBatch {
    pub source: Source,
    pub start_time: DateTime<Utc>,
    pub detections: Vec<Detection>,
}

impl DetectionBatch {
    pub fn new(source: Source, start_time: DateTime<Utc>, detections: Vec<Detection>) -> Self {
        Self {
            source,
            start_time,
            detections,
        }
    }

    /// Build a batch from raw predictions, preserving their order.
    pub fn from_predictions(
        source: Source,
        start_time: DateTime<Utc>,
        clip_name: Option<String>,
        predictions: impl IntoIterator<Item = Prediction>,
    ) -> Self {
        let detections = predictions
            .into_iter()
            .map(|p| Detection {
                species: Species::from_label(&p.label),
                confidence: p.confidence,
                clip_name: clip_name.clone(),
                source: source.clone(),
                timestamp: start_time,
            })
            .collect();
        Self::new(source, start_time, detections)
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

/// Record produced for every accepted detection.
///
/// This is what sinks persist, publish, and notify about.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: Uuid,
    pub species: Species,
    pub confidence: f32,
    pub clip_name: Option<String>,
    pub source: Source,
    pub detected_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub created_at: DateTime<Utc>,
}

impl Note {
    pub fn from_detection(detection: &Detection, latitude: f64, longitude: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            species: detection.species.clone(),
            confidence: detection.confidence,
            clip_name: detection.clip_name.clone(),
            source: detection.source.clone(),
            detected_at: detection.timestamp,
            latitude,
            longitude,
            created_at: Utc::now(),
        }
    }

    pub fn common_name(&self) -> &str {
        &self.species.common_name
    }

    pub fn scientific_name(&self) -> &str {
        &self.species.scientific_name
    }
}
