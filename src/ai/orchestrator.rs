use super::guard::ConcurrencyGuard;
use super::policy;
use super::registry::{ModelRecord, ModelRegistry};
use super::runner::{
    AiTask, ProcessRunner, RunnerError, TaskKind, TrainingExample, TrainingTask,
};
use crate::library::{TrackStore, TrainingCandidate};
use crate::metrics;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("Need at least {required} tracks with custom tags. You have {eligible}.")]
    InsufficientData { eligible: usize, required: usize },

    #[error("Training already in progress")]
    AlreadyInProgress,

    #[error("Training process failed: {0}")]
    SubprocessFailed(#[from] RunnerError),

    #[error("Storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl TrainingError {
    /// Message safe to show to the user. Internal causes stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            TrainingError::InsufficientData { .. } | TrainingError::AlreadyInProgress => {
                self.to_string()
            }
            TrainingError::SubprocessFailed(_) | TrainingError::Storage(_) => {
                "Training failed".to_string()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingState {
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

/// One in-flight training run over a frozen snapshot of the user's labelled tracks.
#[derive(Debug)]
pub struct TrainingJob {
    pub user_id: usize,
    pub tracks: Vec<TrainingCandidate>,
    pub started: Instant,
    pub state: TrainingState,
}

impl TrainingJob {
    fn snapshot(user_id: usize, candidates: Vec<TrainingCandidate>) -> Self {
        let tracks = candidates
            .into_iter()
            .filter(policy::is_eligible_track)
            .map(|mut track| {
                track.tags.retain(policy::is_confident_tag);
                track
            })
            .collect();
        TrainingJob {
            user_id,
            tracks,
            started: Instant::now(),
            state: TrainingState::Running,
        }
    }

    fn task(&self) -> AiTask {
        AiTask::Train(TrainingTask {
            user_id: self.user_id,
            examples: self
                .tracks
                .iter()
                .map(|track| TrainingExample {
                    audio_path: track.locator.clone(),
                    tags: track.tags.clone(),
                })
                .collect(),
        })
    }

    fn finish(&mut self, state: TrainingState) {
        self.state = state;
        let outcome = match state {
            TrainingState::Running => return,
            TrainingState::Succeeded => "succeeded",
            TrainingState::Failed => "failed",
            TrainingState::TimedOut => "timed_out",
        };
        metrics::record_training_run(outcome, self.started.elapsed());
    }
}

/// What the user needs to know about their personal model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStatus {
    pub model: Option<ModelRecord>,
    pub usable: bool,
    pub eligible_tracks: usize,
    pub required_tracks: usize,
    pub training_in_progress: bool,
}

pub struct TrainingOrchestrator {
    tracks: Arc<dyn TrackStore>,
    registry: Arc<dyn ModelRegistry>,
    runner: Arc<dyn ProcessRunner>,
    guard: Arc<ConcurrencyGuard>,
    training_timeout: Duration,
}

impl TrainingOrchestrator {
    pub fn new(
        tracks: Arc<dyn TrackStore>,
        registry: Arc<dyn ModelRegistry>,
        runner: Arc<dyn ProcessRunner>,
        guard: Arc<ConcurrencyGuard>,
        training_timeout: Duration,
    ) -> Self {
        TrainingOrchestrator {
            tracks,
            registry,
            runner,
            guard,
            training_timeout,
        }
    }

    /// Trains the user's personal model and records the result.
    ///
    /// The model record is written before the user's training slot is
    /// released. On failure the previous record is left untouched.
    pub async fn train(&self, user_id: usize) -> Result<ModelRecord, TrainingError> {
        let candidates = self.tracks.list_training_candidates(user_id)?;
        if !policy::is_eligible_for_training(&candidates) {
            let eligible = policy::count_eligible_tracks(&candidates);
            info!(
                "User {} cannot train yet: {} of {} tagged tracks",
                user_id,
                eligible,
                policy::MIN_TRAINING_TRACKS
            );
            return Err(TrainingError::InsufficientData {
                eligible,
                required: policy::MIN_TRAINING_TRACKS,
            });
        }

        let slot = self
            .guard
            .try_acquire_training_slot(user_id)
            .ok_or(TrainingError::AlreadyInProgress)?;

        let mut job = TrainingJob::snapshot(user_id, candidates);
        info!(
            "Training model for user {} on {} tracks",
            user_id,
            job.tracks.len()
        );

        let output = match self.run_training(&job).await {
            Ok(output) => output,
            Err(e) => {
                job.finish(if matches!(e, RunnerError::Timeout(_)) {
                    TrainingState::TimedOut
                } else {
                    TrainingState::Failed
                });
                error!("Training for user {} failed: {}", user_id, e);
                return Err(TrainingError::SubprocessFailed(e));
            }
        };

        let record = ModelRecord {
            user_id,
            accuracy: output.accuracy,
            last_trained: Utc::now(),
            tracks_used: output.tracks_trained,
            unique_tags: output.unique_tags,
        };
        if let Err(e) = self.registry.put(user_id, &record) {
            job.finish(TrainingState::Failed);
            error!("Could not store model record for user {}: {:#}", user_id, e);
            return Err(TrainingError::Storage(e));
        }
        job.finish(TrainingState::Succeeded);
        drop(slot);

        info!(
            "Trained model for user {}: accuracy {:.3}, {} tracks, {} tags",
            user_id, record.accuracy, record.tracks_used, record.unique_tags
        );
        if !policy::is_model_usable(Some(&record)) {
            warn!(
                "Model for user {} is below the usable accuracy threshold",
                user_id
            );
        }
        Ok(record)
    }

    async fn run_training(
        &self,
        job: &TrainingJob,
    ) -> Result<super::runner::TrainingOutput, RunnerError> {
        let _permit = self.guard.acquire_process_permit().await?;
        let started = Instant::now();
        let result = self
            .runner
            .run(&job.task(), self.training_timeout)
            .await
            .and_then(|output| output.into_training());
        metrics::record_ai_process(
            TaskKind::Training.as_str(),
            result.as_ref().err().map_or("success", RunnerError::label),
            started.elapsed(),
        );
        result
    }

    pub fn status(&self, user_id: usize) -> Result<ModelStatus, TrainingError> {
        let candidates = self.tracks.list_training_candidates(user_id)?;
        let model = self.registry.get(user_id);
        Ok(ModelStatus {
            usable: policy::is_model_usable(model.as_ref()),
            model,
            eligible_tracks: policy::count_eligible_tracks(&candidates),
            required_tracks: policy::MIN_TRAINING_TRACKS,
            training_in_progress: self.guard.is_training(user_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::registry::FileModelRegistry;
    use crate::ai::router::{PredictionPath, PredictionRouter};
    use crate::ai::scripted::{ScriptedProcessRunner, ScriptedResponse};
    use crate::library::{PredictionSource, SqliteLibraryStore, TagScore, UserStore};
    use anyhow::Result;
    use chrono::TimeZone;
    use tempfile::TempDir;

    const SUCCESS: &str = r#"{"success":true,"accuracy":0.72,"tracks_trained":7,"unique_tags":4}"#;

    struct Fixture {
        _dir: TempDir,
        store: Arc<SqliteLibraryStore>,
        registry: Arc<FileModelRegistry>,
        runner: Arc<ScriptedProcessRunner>,
        guard: Arc<ConcurrencyGuard>,
        orchestrator: Arc<TrainingOrchestrator>,
        user_id: usize,
    }

    fn fixture(tagged_tracks: usize) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteLibraryStore::in_memory().unwrap());
        let registry = Arc::new(FileModelRegistry::new(dir.path()).unwrap());
        let runner = Arc::new(ScriptedProcessRunner::new());
        let guard = Arc::new(ConcurrencyGuard::new(2));
        let user_id = store.create_user("trainer").unwrap();
        for i in 0..tagged_tracks {
            let track = store
                .create_track(user_id, &format!("Track {}", i), &format!("/media/{}.mp3", i))
                .unwrap();
            store
                .add_predictions(
                    &track.id,
                    &[TagScore::custom(if i % 2 == 0 { "calm" } else { "loud" })],
                    PredictionSource::Custom,
                )
                .unwrap();
        }
        let orchestrator = Arc::new(TrainingOrchestrator::new(
            store.clone(),
            registry.clone(),
            runner.clone(),
            guard.clone(),
            Duration::from_secs(5),
        ));
        Fixture {
            _dir: dir,
            store,
            registry,
            runner,
            guard,
            orchestrator,
            user_id,
        }
    }

    fn old_record(user_id: usize) -> ModelRecord {
        ModelRecord {
            user_id,
            accuracy: 0.55,
            last_trained: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            tracks_used: 5,
            unique_tags: 2,
        }
    }

    /// Trains and predicts at the same time with one shared process limit,
    /// returning the highest number of AI tasks seen running together.
    async fn train_while_predicting(max_processes: usize) -> usize {
        let f = fixture(5);
        f.registry.put(f.user_id, &old_record(f.user_id)).unwrap();
        f.runner.set_latency(Duration::from_millis(200));
        f.runner
            .push_training(ScriptedResponse::Stdout(SUCCESS.to_string()))
            .push_inference(ScriptedResponse::Stdout(
                r#"{"success":true,"predictions":[{"tag":"calm","confidence":0.8}]}"#.to_string(),
            ));

        let guard = Arc::new(ConcurrencyGuard::new(max_processes));
        let orchestrator = TrainingOrchestrator::new(
            f.store.clone(),
            f.registry.clone(),
            f.runner.clone(),
            guard.clone(),
            Duration::from_secs(5),
        );
        let router = PredictionRouter::new(
            f.registry.clone(),
            f.runner.clone(),
            guard,
            Duration::from_secs(5),
        );
        let track = f.store.create_track(f.user_id, "New", "/media/new.mp3").unwrap();

        let (trained, routed) = tokio::join!(orchestrator.train(f.user_id), router.route(&track));
        assert!(trained.is_ok());
        assert_eq!(routed.path, PredictionPath::Personal);
        assert_eq!(f.runner.invocations().len(), 2);
        f.runner.max_in_flight()
    }

    #[tokio::test]
    async fn training_and_inference_share_the_process_limit() {
        assert_eq!(train_while_predicting(1).await, 1);
        assert_eq!(train_while_predicting(2).await, 2);
    }

    #[tokio::test]
    async fn insufficient_data_never_reaches_runner() {
        let f = fixture(4);
        let err = f.orchestrator.train(f.user_id).await.unwrap_err();

        assert!(matches!(
            err,
            TrainingError::InsufficientData {
                eligible: 4,
                required: 5
            }
        ));
        assert_eq!(
            err.user_message(),
            "Need at least 5 tracks with custom tags. You have 4."
        );
        assert_eq!(f.runner.invocation_count(TaskKind::Training), 0);
        assert!(!f.guard.is_training(f.user_id));
    }

    #[tokio::test]
    async fn model_predictions_do_not_make_a_user_eligible() {
        let f = fixture(4);
        let track = f.store.create_track(f.user_id, "Extra", "/media/x.mp3").unwrap();
        f.store
            .add_predictions(&track.id, &[TagScore::new("rock", 0.99)], PredictionSource::Model)
            .unwrap();

        assert!(matches!(
            f.orchestrator.train(f.user_id).await,
            Err(TrainingError::InsufficientData { eligible: 4, .. })
        ));
    }

    #[tokio::test]
    async fn successful_training_records_output() {
        let f = fixture(7);
        f.runner
            .push_training(ScriptedResponse::Stdout(SUCCESS.to_string()));

        let before = Utc::now();
        let record = f.orchestrator.train(f.user_id).await.unwrap();
        let after = Utc::now();

        assert_eq!(record.accuracy, 0.72);
        assert_eq!(record.tracks_used, 7);
        assert_eq!(record.unique_tags, 4);
        assert!(record.last_trained >= before && record.last_trained <= after);
        assert_eq!(f.registry.get(f.user_id), Some(record));
        assert!(!f.guard.is_training(f.user_id));
    }

    #[tokio::test]
    async fn payload_contains_snapshot_of_labelled_tracks() {
        let f = fixture(5);
        f.runner
            .push_training(ScriptedResponse::Stdout(SUCCESS.to_string()));
        f.orchestrator.train(f.user_id).await.unwrap();

        let invocations = f.runner.invocations();
        let AiTask::Train(task) = &invocations[0] else {
            panic!("expected a training task");
        };
        assert_eq!(task.user_id, f.user_id);
        assert_eq!(task.examples.len(), 5);
        assert!(task.examples.iter().all(|e| e.audio_path.starts_with("/media/")));
        assert!(task
            .examples
            .iter()
            .all(|e| e.tags.len() == 1 && e.tags[0].confidence >= 0.9));
    }

    #[tokio::test]
    async fn failed_training_keeps_previous_record() {
        let f = fixture(5);
        f.registry.put(f.user_id, &old_record(f.user_id)).unwrap();
        f.runner.push_training(ScriptedResponse::Exit {
            code: 1,
            stderr: "OOM".to_string(),
        });

        let err = f.orchestrator.train(f.user_id).await.unwrap_err();
        assert!(matches!(
            err,
            TrainingError::SubprocessFailed(RunnerError::TaskFailed { code: Some(1), ref stderr }) if stderr == "OOM"
        ));
        assert_eq!(err.user_message(), "Training failed");
        assert_eq!(f.registry.get(f.user_id), Some(old_record(f.user_id)));
        assert!(!f.guard.is_training(f.user_id));
    }

    #[tokio::test]
    async fn timed_out_training_releases_slot() {
        let f = fixture(5);
        f.runner.push_training(ScriptedResponse::Hang);
        let orchestrator = TrainingOrchestrator::new(
            f.store.clone(),
            f.registry.clone(),
            f.runner.clone(),
            f.guard.clone(),
            Duration::from_millis(30),
        );

        let err = orchestrator.train(f.user_id).await.unwrap_err();
        assert!(matches!(
            err,
            TrainingError::SubprocessFailed(RunnerError::Timeout(_))
        ));
        assert!(!f.guard.is_training(f.user_id));
        assert_eq!(f.registry.get(f.user_id), None);
    }

    #[tokio::test]
    async fn concurrent_training_for_same_user_is_rejected() {
        let f = fixture(5);
        f.runner.set_latency(Duration::from_millis(200));
        f.runner
            .push_training(ScriptedResponse::Stdout(SUCCESS.to_string()))
            .push_training(ScriptedResponse::Stdout(SUCCESS.to_string()));

        let (first, second) = tokio::join!(
            f.orchestrator.train(f.user_id),
            f.orchestrator.train(f.user_id)
        );

        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(TrainingError::AlreadyInProgress)))
                .count(),
            1
        );
        assert_eq!(f.runner.invocation_count(TaskKind::Training), 1);
    }

    struct SlotCheckingRegistry {
        inner: FileModelRegistry,
        guard: Arc<ConcurrencyGuard>,
        held_during_put: std::sync::Mutex<Option<bool>>,
    }

    impl ModelRegistry for SlotCheckingRegistry {
        fn get(&self, user_id: usize) -> Option<ModelRecord> {
            self.inner.get(user_id)
        }

        fn put(&self, user_id: usize, record: &ModelRecord) -> Result<()> {
            *self.held_during_put.lock().unwrap() = Some(self.guard.is_training(user_id));
            self.inner.put(user_id, record)
        }
    }

    #[tokio::test]
    async fn record_is_written_while_slot_is_held() {
        let f = fixture(5);
        f.runner
            .push_training(ScriptedResponse::Stdout(SUCCESS.to_string()));
        let registry = Arc::new(SlotCheckingRegistry {
            inner: FileModelRegistry::new(f._dir.path().join("checked")).unwrap(),
            guard: f.guard.clone(),
            held_during_put: std::sync::Mutex::new(None),
        });
        let orchestrator = TrainingOrchestrator::new(
            f.store.clone(),
            registry.clone(),
            f.runner.clone(),
            f.guard.clone(),
            Duration::from_secs(5),
        );

        orchestrator.train(f.user_id).await.unwrap();
        assert_eq!(*registry.held_during_put.lock().unwrap(), Some(true));
        assert!(!f.guard.is_training(f.user_id));
    }

    #[tokio::test]
    async fn status_reports_eligibility_and_model() {
        let f = fixture(3);
        let status = f.orchestrator.status(f.user_id).unwrap();
        assert_eq!(status.eligible_tracks, 3);
        assert_eq!(status.required_tracks, 5);
        assert!(status.model.is_none());
        assert!(!status.usable);

        f.registry.put(f.user_id, &old_record(f.user_id)).unwrap();
        let status = f.orchestrator.status(f.user_id).unwrap();
        assert!(status.usable);
        assert_eq!(status.model, Some(old_record(f.user_id)));
    }
}
