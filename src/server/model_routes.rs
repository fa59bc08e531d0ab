//! Personal model training and status endpoints.

use super::library_routes::error_response;
use super::session::Session;
use super::state::GuardedOrchestrator;

use crate::ai::{ModelRecord, TrainingError};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::error;

use super::state::ServerState;

#[derive(Debug, Serialize)]
struct TrainResponse {
    message: &'static str,
    model: ModelRecord,
}

#[derive(Debug, Serialize)]
struct InsufficientDataResponse {
    error: String,
    eligible_tracks: usize,
    required_tracks: usize,
}

fn training_error_response(err: TrainingError) -> Response {
    match err {
        TrainingError::InsufficientData { eligible, required } => (
            StatusCode::BAD_REQUEST,
            Json(InsufficientDataResponse {
                error: err.user_message(),
                eligible_tracks: eligible,
                required_tracks: required,
            }),
        )
            .into_response(),
        TrainingError::AlreadyInProgress => {
            error_response(StatusCode::CONFLICT, err.user_message())
        }
        TrainingError::SubprocessFailed(_) | TrainingError::Storage(_) => {
            error!("Training failed: {}", err);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.user_message())
        }
    }
}

/// POST /v1/model/train
async fn train_model(
    session: Session,
    State(orchestrator): State<GuardedOrchestrator>,
) -> Response {
    match orchestrator.train(session.user_id).await {
        Ok(model) => Json(TrainResponse {
            message: "Personal model trained and saved successfully!",
            model,
        })
        .into_response(),
        Err(err) => training_error_response(err),
    }
}

/// GET /v1/model
async fn get_model_status(
    session: Session,
    State(orchestrator): State<GuardedOrchestrator>,
) -> Response {
    match orchestrator.status(session.user_id) {
        Ok(status) => Json(status).into_response(),
        Err(err) => training_error_response(err),
    }
}

/// Routes nested under /v1/model.
pub fn model_routes() -> Router<ServerState> {
    Router::new()
        .route("/", get(get_model_status))
        .route("/train", post(train_model))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::RunnerError;
    use std::time::Duration;

    #[test]
    fn training_errors_map_to_statuses() {
        let insufficient = TrainingError::InsufficientData {
            eligible: 2,
            required: 5,
        };
        assert_eq!(
            training_error_response(insufficient).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            training_error_response(TrainingError::AlreadyInProgress).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            training_error_response(TrainingError::SubprocessFailed(RunnerError::Timeout(
                Duration::from_secs(1)
            )))
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
