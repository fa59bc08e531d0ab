//! Track, tag and per-user statistics endpoints.

use super::session::Session;
use super::state::*;

use crate::ai::{PredictionPath, RoutedPrediction};
use crate::library::{
    normalize_tag_name, PredictionSource, TagDeletion, TagScore, Track, TrackStore,
};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    handler::Handler,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

const MAX_TITLE_LENGTH: usize = 255;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

pub(super) fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

fn message_response(message: impl Into<String>) -> Response {
    Json(MessageResponse {
        message: message.into(),
    })
    .into_response()
}

fn internal_error(context: &str, err: anyhow::Error) -> Response {
    error!("{}: {:#}", context, err);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    message: &'static str,
    track: Track,
    predictions: Vec<TagScore>,
    prediction_path: &'static str,
    personal_model_used: bool,
}

#[derive(Debug, Deserialize)]
struct AddTagsBody {
    tags: Vec<String>,
}

#[derive(Debug, Serialize)]
struct AddTagsResponse {
    message: &'static str,
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CreateTagBody {
    name: String,
}

/// Keeps the original name readable while making it safe as a single path component.
fn sanitize_file_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = sanitized.trim_start_matches('.');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}

fn title_from_file_name(file_name: &str) -> String {
    std::path::Path::new(file_name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| file_name.to_string())
}

struct UploadedAudio {
    file_name: String,
    bytes: axum::body::Bytes,
}

/// Looks up a track and checks it belongs to the caller. Someone else's track
/// is reported the same as a missing one.
fn owned_track(state: &ServerState, session: &Session, track_id: &str) -> Result<Track, Response> {
    match state.track_store.get_track(track_id) {
        Ok(Some(track)) if track.user_id == session.user_id => Ok(track),
        Ok(_) => Err(error_response(StatusCode::NOT_FOUND, "Track not found")),
        Err(e) => Err(internal_error("Failed to load track", e)),
    }
}

/// Saves the routed predictions on a freshly created track. A failure keeps the
/// upload and reports it as a fallback with nothing stored.
fn store_predictions(
    track_store: &dyn TrackStore,
    track: &Track,
    routed: RoutedPrediction,
) -> RoutedPrediction {
    if routed.predictions.is_empty() {
        return routed;
    }
    match track_store.add_predictions(&track.id, &routed.predictions, PredictionSource::Model) {
        Ok(_) => routed,
        Err(e) => {
            error!(
                "Failed to store {} predictions for track {}: {:?}",
                routed.path.as_str(),
                track.id,
                e
            );
            RoutedPrediction {
                path: PredictionPath::Fallback,
                predictions: Vec::new(),
            }
        }
    }
}

/// POST /v1/tracks - multipart with an `audio` file and an optional `title`
async fn upload_track(
    session: Session,
    State(state): State<ServerState>,
    mut multipart: Multipart,
) -> Response {
    let mut audio: Option<UploadedAudio> = None;
    let mut title: Option<String> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read multipart field: {}", e);
                return error_response(e.status(), e.body_text());
            }
        };

        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "audio" => {
                let is_audio = field
                    .content_type()
                    .map(|mime| mime.starts_with("audio/"))
                    .unwrap_or(false);
                if !is_audio {
                    return error_response(StatusCode::BAD_REQUEST, "Only audio files are allowed");
                }
                let file_name = field.file_name().unwrap_or("audio").to_string();
                match field.bytes().await {
                    Ok(bytes) => audio = Some(UploadedAudio { file_name, bytes }),
                    Err(e) => {
                        warn!("Failed to read audio data: {}", e);
                        return error_response(e.status(), "Failed to read audio file");
                    }
                }
            }
            "title" => match field.text().await {
                Ok(text) => title = Some(text),
                Err(e) => return error_response(e.status(), e.body_text()),
            },
            _ => {}
        }
    }

    let audio = match audio {
        Some(audio) if !audio.bytes.is_empty() => audio,
        _ => return error_response(StatusCode::BAD_REQUEST, "No audio file provided"),
    };

    let title = title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| title_from_file_name(&audio.file_name));
    if title.chars().count() > MAX_TITLE_LENGTH {
        return error_response(StatusCode::BAD_REQUEST, "Title is too long");
    }

    let uploads_dir = &state.config.uploads_dir;
    if let Err(e) = tokio::fs::create_dir_all(uploads_dir).await {
        return internal_error("Failed to create uploads directory", e.into());
    }
    let stored_name = format!(
        "{}_{}",
        chrono::Utc::now().timestamp_millis(),
        sanitize_file_name(&audio.file_name)
    );
    let audio_path: PathBuf = uploads_dir.join(stored_name);
    if let Err(e) = tokio::fs::write(&audio_path, &audio.bytes).await {
        return internal_error("Failed to store uploaded audio", e.into());
    }
    debug!(
        "User {} uploaded {} ({} bytes) to {:?}",
        session.user_id,
        audio.file_name,
        audio.bytes.len(),
        audio_path
    );

    let track = match state.track_store.create_track(
        session.user_id,
        &title,
        &audio_path.to_string_lossy(),
    ) {
        Ok(track) => track,
        Err(e) => {
            if let Err(remove_err) = tokio::fs::remove_file(&audio_path).await {
                warn!("Failed to remove orphaned upload {:?}: {}", audio_path, remove_err);
            }
            return internal_error("Failed to create track", e);
        }
    };

    let routed = state.prediction_router.route(&track).await;
    let routed = store_predictions(state.track_store.as_ref(), &track, routed);

    let personal_model_used = routed.path == PredictionPath::Personal;
    info!(
        "Track {} created for user {} ({} predictions, {} path)",
        track.id,
        session.user_id,
        routed.predictions.len(),
        routed.path.as_str()
    );

    let message = if personal_model_used {
        "Track uploaded with personal AI predictions!"
    } else {
        "Track uploaded successfully. Add custom tags to train your personal AI model!"
    };

    (
        StatusCode::CREATED,
        Json(UploadResponse {
            message,
            track,
            predictions: routed.predictions,
            prediction_path: routed.path.as_str(),
            personal_model_used,
        }),
    )
        .into_response()
}

/// GET /v1/tracks
async fn get_tracks(session: Session, State(track_store): State<GuardedTrackStore>) -> Response {
    match track_store.get_user_tracks(session.user_id) {
        Ok(tracks) => Json(serde_json::json!({ "tracks": tracks })).into_response(),
        Err(e) => internal_error("Failed to list tracks", e),
    }
}

/// DELETE /v1/tracks/{id}
async fn delete_track(
    session: Session,
    State(state): State<ServerState>,
    Path(track_id): Path<String>,
) -> Response {
    let track = match owned_track(&state, &session, &track_id) {
        Ok(track) => track,
        Err(response) => return response,
    };

    match state.track_store.delete_track(&track.id) {
        Ok(true) => {}
        Ok(false) => return error_response(StatusCode::NOT_FOUND, "Track not found"),
        Err(e) => return internal_error("Failed to delete track", e),
    }

    if let Err(e) = tokio::fs::remove_file(&track.locator).await {
        warn!("Could not remove audio file {}: {}", track.locator, e);
    }
    info!("Deleted track {} of user {}", track.id, session.user_id);
    message_response("Track deleted successfully")
}

/// POST /v1/tracks/{id}/tags - tags the user asserts by hand
async fn add_custom_tags(
    session: Session,
    State(state): State<ServerState>,
    Path(track_id): Path<String>,
    Json(body): Json<AddTagsBody>,
) -> Response {
    let track = match owned_track(&state, &session, &track_id) {
        Ok(track) => track,
        Err(response) => return response,
    };

    let mut names: Vec<String> = body
        .tags
        .iter()
        .filter_map(|tag| normalize_tag_name(tag))
        .collect();
    names.sort();
    names.dedup();
    if names.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "At least one tag is required");
    }

    let scores: Vec<TagScore> = names.iter().map(TagScore::custom).collect();
    match state
        .track_store
        .add_predictions(&track.id, &scores, PredictionSource::Custom)
    {
        Ok(_) => Json(AddTagsResponse {
            message: "Custom tags added successfully",
            tags: names,
        })
        .into_response(),
        Err(e) => internal_error("Failed to add custom tags", e),
    }
}

/// DELETE /v1/tracks/{id}/tags/{tag} - drops one tag from the track
async fn remove_track_tag(
    session: Session,
    State(state): State<ServerState>,
    Path((track_id, tag)): Path<(String, String)>,
) -> Response {
    let track = match owned_track(&state, &session, &track_id) {
        Ok(track) => track,
        Err(response) => return response,
    };

    match state.track_store.remove_prediction(&track.id, &tag) {
        Ok(true) => {
            info!("Removed tag {} from track {}", tag, track.id);
            message_response("Prediction deleted successfully")
        }
        Ok(false) => error_response(StatusCode::NOT_FOUND, "Prediction not found"),
        Err(e) => internal_error("Failed to delete prediction", e),
    }
}

/// GET /v1/tags
async fn get_tags(_session: Session, State(track_store): State<GuardedTrackStore>) -> Response {
    match track_store.list_tags() {
        Ok(tags) => Json(serde_json::json!({ "tags": tags })).into_response(),
        Err(e) => internal_error("Failed to list tags", e),
    }
}

/// POST /v1/tags
async fn create_tag(
    _session: Session,
    State(track_store): State<GuardedTrackStore>,
    Json(body): Json<CreateTagBody>,
) -> Response {
    if normalize_tag_name(&body.name).is_none() {
        return error_response(StatusCode::BAD_REQUEST, "Tag name is required");
    }
    match track_store.create_tag(&body.name) {
        Ok(Some(tag)) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "message": "Tag created successfully", "tag": tag })),
        )
            .into_response(),
        Ok(None) => error_response(StatusCode::BAD_REQUEST, "Tag already exists"),
        Err(e) => internal_error("Failed to create tag", e),
    }
}

/// DELETE /v1/tags/{id}
async fn delete_tag(
    _session: Session,
    State(track_store): State<GuardedTrackStore>,
    Path(tag_id): Path<usize>,
) -> Response {
    match track_store.delete_tag(tag_id) {
        Ok(TagDeletion::Deleted) => message_response("Tag deleted successfully"),
        Ok(TagDeletion::NotFound) => error_response(StatusCode::NOT_FOUND, "Tag not found"),
        Ok(TagDeletion::InUse(count)) => error_response(
            StatusCode::BAD_REQUEST,
            format!("Cannot delete tag that is used in {} predictions", count),
        ),
        Err(e) => internal_error("Failed to delete tag", e),
    }
}

/// GET /v1/user/stats
async fn get_user_stats(
    session: Session,
    State(track_store): State<GuardedTrackStore>,
) -> Response {
    match track_store.get_user_stats(session.user_id) {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => internal_error("Failed to compute user stats", e),
    }
}

/// Routes nested under /v1/tracks.
pub fn track_routes(max_upload_bytes: usize) -> Router<ServerState> {
    Router::new()
        .route(
            "/",
            get(get_tracks).post(upload_track.layer(DefaultBodyLimit::max(max_upload_bytes))),
        )
        .route("/{id}", delete(delete_track))
        .route("/{id}/tags", post(add_custom_tags))
        .route("/{id}/tags/{tag}", delete(remove_track_tag))
}

/// Routes nested under /v1/tags.
pub fn tag_routes() -> Router<ServerState> {
    Router::new()
        .route("/", get(get_tags).post(create_tag))
        .route("/{id}", delete(delete_tag))
}

/// Routes nested under /v1/user.
pub fn user_routes() -> Router<ServerState> {
    Router::new().route("/stats", get(get_user_stats))
}
