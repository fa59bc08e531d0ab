use axum::extract::FromRef;

use crate::ai::{PredictionRouter, TrainingOrchestrator};
use crate::library::{TrackStore, UserStore};
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedTrackStore = Arc<dyn TrackStore>;
pub type GuardedUserStore = Arc<dyn UserStore>;
pub type GuardedOrchestrator = Arc<TrainingOrchestrator>;
pub type GuardedPredictionRouter = Arc<PredictionRouter>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub hash: String,
    pub user_store: GuardedUserStore,
    pub track_store: GuardedTrackStore,
    pub orchestrator: GuardedOrchestrator,
    pub prediction_router: GuardedPredictionRouter,
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for GuardedUserStore {
    fn from_ref(input: &ServerState) -> Self {
        input.user_store.clone()
    }
}

impl FromRef<ServerState> for GuardedTrackStore {
    fn from_ref(input: &ServerState) -> Self {
        input.track_store.clone()
    }
}

impl FromRef<ServerState> for GuardedOrchestrator {
    fn from_ref(input: &ServerState) -> Self {
        input.orchestrator.clone()
    }
}

impl FromRef<ServerState> for GuardedPredictionRouter {
    fn from_ref(input: &ServerState) -> Self {
        input.prediction_router.clone()
    }
}
