use super::models::*;
use anyhow::Result;

/// Tracks, tags and predictions owned by users.
pub trait TrackStore: Send + Sync {
    fn create_track(&self, user_id: usize, title: &str, locator: &str) -> Result<Track>;

    fn get_track(&self, track_id: &str) -> Result<Option<Track>>;

    /// Newest first, each track's predictions by descending confidence.
    fn get_user_tracks(&self, user_id: usize) -> Result<Vec<TrackWithPredictions>>;

    /// Removes the track and, by cascade, its predictions. Returns false if the
    /// track did not exist.
    fn delete_track(&self, track_id: &str) -> Result<bool>;

    /// Upserts predictions for a track, creating tags as needed. A (track, tag)
    /// pair is stored once: custom assertions replace model predictions, model
    /// predictions never replace custom ones. Returns how many rows changed.
    fn add_predictions(
        &self,
        track_id: &str,
        tags: &[TagScore],
        source: PredictionSource,
    ) -> Result<usize>;

    /// Removes the track's prediction for the tag, whatever its source.
    /// Returns false if the track carries no such tag.
    fn remove_prediction(&self, track_id: &str, tag: &str) -> Result<bool>;

    /// The user's tracks with the hand-asserted tags usable as training labels.
    /// Tracks without any such tag are omitted.
    fn list_training_candidates(&self, user_id: usize) -> Result<Vec<TrainingCandidate>>;

    /// Returns `None` if a tag with the same normalized name already exists.
    fn create_tag(&self, name: &str) -> Result<Option<Tag>>;

    fn list_tags(&self) -> Result<Vec<TagUsage>>;

    fn delete_tag(&self, tag_id: usize) -> Result<TagDeletion>;

    fn get_user_stats(&self, user_id: usize) -> Result<UserStats>;
}

pub trait UserStore: Send + Sync {
    /// Creates a new user and returns its id.
    fn create_user(&self, user_handle: &str) -> Result<usize>;

    fn get_user_id(&self, user_handle: &str) -> Result<Option<usize>>;

    fn get_all_user_handles(&self) -> Result<Vec<String>>;

    /// Generates, stores and returns a fresh session token for the user.
    fn create_auth_token(&self, user_id: usize) -> Result<String>;

    fn get_user_id_for_token(&self, token: &str) -> Result<Option<usize>>;
}
