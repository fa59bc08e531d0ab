use serde::{Deserialize, Serialize};

/// Confidence assigned to tags a user asserts by hand.
pub const CUSTOM_TAG_CONFIDENCE: f64 = 0.95;

/// Where a prediction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionSource {
    Model,
    Custom,
}

impl PredictionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionSource::Model => "model",
            PredictionSource::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "model" => Some(PredictionSource::Model),
            "custom" => Some(PredictionSource::Custom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub user_id: usize,
    pub title: String,
    /// Storage path of the uploaded audio.
    pub locator: String,
    pub created: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: usize,
    pub name: String,
}

/// A tag name with a confidence, as exchanged with the AI scripts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagScore {
    pub tag: String,
    pub confidence: f64,
}

impl TagScore {
    pub fn new<S: Into<String>>(tag: S, confidence: f64) -> Self {
        TagScore {
            tag: tag.into(),
            confidence,
        }
    }

    pub fn custom<S: Into<String>>(tag: S) -> Self {
        Self::new(tag, CUSTOM_TAG_CONFIDENCE)
    }

    pub fn has_valid_confidence(&self) -> bool {
        self.confidence.is_finite() && (0.0..=1.0).contains(&self.confidence)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredPrediction {
    pub tag_id: usize,
    pub tag: String,
    pub confidence: f64,
    pub source: PredictionSource,
    pub created: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackWithPredictions {
    #[serde(flatten)]
    pub track: Track,
    pub predictions: Vec<StoredPrediction>,
}

/// A track together with the tags that may be used as training ground truth.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingCandidate {
    pub track_id: String,
    pub locator: String,
    pub tags: Vec<TagScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagUsage {
    pub id: usize,
    pub name: String,
    pub prediction_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagDeletion {
    Deleted,
    NotFound,
    InUse(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagCount {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserStats {
    pub total_tracks: usize,
    pub total_predictions: usize,
    pub average_confidence: f64,
    pub top_tags: Vec<TagCount>,
}

/// Tags are keyed by their trimmed, lower-cased name. Returns `None` for blank names.
pub fn normalize_tag_name(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}
