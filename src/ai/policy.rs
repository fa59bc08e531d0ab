//! Rules deciding when a user may train and when a trained model is worth using.

use super::registry::ModelRecord;
use crate::library::{TagScore, TrainingCandidate};

/// Minimum number of tracks carrying a confident tag before training is allowed.
pub const MIN_TRAINING_TRACKS: usize = 5;

/// Tags at or above this confidence count as ground truth.
pub const CUSTOM_TAG_THRESHOLD: f64 = 0.9;

/// A model must be strictly more accurate than this to serve predictions.
pub const MIN_USABLE_ACCURACY: f64 = 0.3;

pub fn is_confident_tag(tag: &TagScore) -> bool {
    tag.confidence >= CUSTOM_TAG_THRESHOLD
}

pub fn is_eligible_track(track: &TrainingCandidate) -> bool {
    track.tags.iter().any(is_confident_tag)
}

pub fn count_eligible_tracks(tracks: &[TrainingCandidate]) -> usize {
    tracks.iter().filter(|t| is_eligible_track(t)).count()
}

pub fn is_eligible_for_training(tracks: &[TrainingCandidate]) -> bool {
    count_eligible_tracks(tracks) >= MIN_TRAINING_TRACKS
}

/// How many more tagged tracks are needed before training is allowed.
pub fn tracks_missing(eligible: usize) -> usize {
    MIN_TRAINING_TRACKS.saturating_sub(eligible)
}

pub fn is_model_usable(record: Option<&ModelRecord>) -> bool {
    record.is_some_and(|r| r.accuracy > MIN_USABLE_ACCURACY)
}
