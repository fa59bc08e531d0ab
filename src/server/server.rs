use anyhow::Result;
use std::time::{Duration, Instant};

use tower_http::services::ServeDir;
use tracing::{error, info};

use axum::{middleware, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;

use super::library_routes::{tag_routes, track_routes, user_routes};
use super::model_routes::model_routes;
use super::session::Session;
use super::{log_requests, state::*, ServerConfig};
use crate::metrics::encode_metrics;
use axum::extract::State;
use axum::http::StatusCode;

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub hash: String,
    pub session_token: Option<String>,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(session: Option<Session>, State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
        session_token: session.map(|s| s.token),
    };
    Json(stats)
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        user_store: GuardedUserStore,
        track_store: GuardedTrackStore,
        orchestrator: GuardedOrchestrator,
        prediction_router: GuardedPredictionRouter,
    ) -> ServerState {
        ServerState {
            config,
            start_time: Instant::now(),
            hash: env!("TAGTRAIN_GIT_HASH").to_string(),
            user_store,
            track_store,
            orchestrator,
            prediction_router,
        }
    }
}

/// Handler for the /metrics endpoint
async fn metrics_handler() -> impl IntoResponse {
    match encode_metrics() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

pub fn make_app(state: ServerState) -> Result<Router> {
    let config = state.config.clone();

    let track_routes: Router = track_routes(config.max_upload_bytes).with_state(state.clone());
    let tag_routes: Router = tag_routes().with_state(state.clone());
    let user_routes: Router = user_routes().with_state(state.clone());
    let model_routes: Router = model_routes().with_state(state.clone());

    let home_router: Router = match config.frontend_dir_path {
        Some(frontend_path) => {
            let static_files_service =
                ServeDir::new(frontend_path).append_index_html_on_directories(true);
            Router::new().fallback_service(static_files_service)
        }
        None => Router::new()
            .route("/", get(home))
            .with_state(state.clone()),
    };

    let app: Router = home_router
        .nest("/v1/tracks", track_routes)
        .nest("/v1/tags", tag_routes)
        .nest("/v1/user", user_routes)
        .nest("/v1/model", model_routes)
        .layer(middleware::from_fn_with_state(state.clone(), log_requests));

    Ok(app)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

pub async fn run_server(state: ServerState, metrics_port: u16) -> Result<()> {
    let port = state.config.port;
    let app = make_app(state)?;

    let metrics_app = Router::new().route("/metrics", get(metrics_handler));
    let metrics_listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", metrics_port)).await?;
    info!("Serving metrics on port {}", metrics_port);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, metrics_app).await {
            error!("Metrics server stopped: {}", e);
        }
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Listening on port {}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
