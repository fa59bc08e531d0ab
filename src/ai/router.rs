use super::guard::ConcurrencyGuard;
use super::policy;
use super::registry::ModelRegistry;
use super::runner::{AiTask, InferenceTask, ProcessRunner, RunnerError, TaskKind};
use crate::library::{normalize_tag_name, TagScore, Track};
use crate::metrics;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionPath {
    /// The user's own model produced the predictions.
    Personal,
    /// No usable personal model.
    Default,
    /// A usable model exists but inference failed.
    Fallback,
}

impl PredictionPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionPath::Personal => "personal",
            PredictionPath::Default => "default",
            PredictionPath::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoutedPrediction {
    pub path: PredictionPath,
    pub predictions: Vec<TagScore>,
}

impl RoutedPrediction {
    fn default_path(path: PredictionPath) -> Self {
        RoutedPrediction {
            path,
            predictions: Vec::new(),
        }
    }
}

/// Chooses between a user's personal model and the default (empty) prediction set.
pub struct PredictionRouter {
    registry: Arc<dyn ModelRegistry>,
    runner: Arc<dyn ProcessRunner>,
    guard: Arc<ConcurrencyGuard>,
    inference_timeout: Duration,
}

/// Drops entries the rest of the system cannot store and orders by confidence.
fn sanitize_predictions(user_id: usize, raw: Vec<TagScore>) -> Vec<TagScore> {
    let mut predictions: Vec<TagScore> = raw
        .into_iter()
        .filter_map(|prediction| {
            if !prediction.has_valid_confidence() {
                warn!(
                    "Dropping prediction {:?} for user {}: confidence {} out of range",
                    prediction.tag, user_id, prediction.confidence
                );
                return None;
            }
            let name = normalize_tag_name(&prediction.tag)?;
            Some(TagScore::new(name, prediction.confidence))
        })
        .collect();
    predictions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    predictions
}

impl PredictionRouter {
    pub fn new(
        registry: Arc<dyn ModelRegistry>,
        runner: Arc<dyn ProcessRunner>,
        guard: Arc<ConcurrencyGuard>,
        inference_timeout: Duration,
    ) -> Self {
        PredictionRouter {
            registry,
            runner,
            guard,
            inference_timeout,
        }
    }

    pub async fn predict(&self, track: &Track) -> Vec<TagScore> {
        self.route(track).await.predictions
    }

    /// Never fails: any problem with the personal path falls back to the
    /// default prediction set.
    pub async fn route(&self, track: &Track) -> RoutedPrediction {
        let record = self.registry.get(track.user_id);
        let routed = if !policy::is_model_usable(record.as_ref()) {
            debug!(
                "No usable model for user {}, using default predictions",
                track.user_id
            );
            RoutedPrediction::default_path(PredictionPath::Default)
        } else {
            match self.run_inference(track).await {
                Ok(raw) => RoutedPrediction {
                    path: PredictionPath::Personal,
                    predictions: sanitize_predictions(track.user_id, raw),
                },
                Err(e) => {
                    warn!(
                        "Personal inference for track {} of user {} failed, falling back: {}",
                        track.id, track.user_id, e
                    );
                    RoutedPrediction::default_path(PredictionPath::Fallback)
                }
            }
        };
        metrics::record_prediction_route(routed.path.as_str());
        routed
    }

    async fn run_inference(&self, track: &Track) -> Result<Vec<TagScore>, RunnerError> {
        let task = AiTask::Infer(InferenceTask {
            user_id: track.user_id,
            audio_path: PathBuf::from(&track.locator),
        });
        let _permit = self.guard.acquire_process_permit().await?;
        let started = Instant::now();
        let result = self
            .runner
            .run(&task, self.inference_timeout)
            .await
            .and_then(|output| output.into_inference());
        metrics::record_ai_process(
            TaskKind::Inference.as_str(),
            result.as_ref().err().map_or("success", RunnerError::label),
            started.elapsed(),
        );
        Ok(result?.predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::registry::{FileModelRegistry, ModelRecord};
    use crate::ai::scripted::{ScriptedProcessRunner, ScriptedResponse};
    use chrono::Utc;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        registry: Arc<FileModelRegistry>,
        runner: Arc<ScriptedProcessRunner>,
        router: PredictionRouter,
    }

    fn fixture(timeout: Duration) -> Fixture {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(FileModelRegistry::new(dir.path()).unwrap());
        let runner = Arc::new(ScriptedProcessRunner::new());
        let router = PredictionRouter::new(
            registry.clone(),
            runner.clone(),
            Arc::new(ConcurrencyGuard::new(2)),
            timeout,
        );
        Fixture {
            _dir: dir,
            registry,
            runner,
            router,
        }
    }

    fn track() -> Track {
        Track {
            id: "t1".to_string(),
            user_id: 4,
            title: "Song".to_string(),
            locator: "/media/uploads/song.mp3".to_string(),
            created: 0,
        }
    }

    fn store_model(f: &Fixture, accuracy: f64) {
        f.registry
            .put(
                4,
                &ModelRecord {
                    user_id: 4,
                    accuracy,
                    last_trained: Utc::now(),
                    tracks_used: 5,
                    unique_tags: 3,
                },
            )
            .unwrap();
    }

    #[tokio::test]
    async fn no_model_uses_default_path() {
        let f = fixture(Duration::from_secs(1));
        let routed = f.router.route(&track()).await;
        assert_eq!(routed, RoutedPrediction::default_path(PredictionPath::Default));
        assert_eq!(f.runner.invocation_count(TaskKind::Inference), 0);
    }

    #[tokio::test]
    async fn inaccurate_model_uses_default_path() {
        let f = fixture(Duration::from_secs(1));
        store_model(&f, 0.3);
        assert_eq!(f.router.route(&track()).await.path, PredictionPath::Default);
        assert_eq!(f.runner.invocation_count(TaskKind::Inference), 0);
    }

    #[tokio::test]
    async fn usable_model_predicts_personally() {
        let f = fixture(Duration::from_secs(1));
        store_model(&f, 0.8);
        f.runner.push_inference(ScriptedResponse::Stdout(
            r#"{"success":true,"predictions":[{"tag":"Calm","confidence":0.6},{"tag":"loud","confidence":0.3},{"tag":"bad","confidence":1.7}]}"#
                .to_string(),
        ));

        let routed = f.router.route(&track()).await;
        assert_eq!(routed.path, PredictionPath::Personal);
        assert_eq!(
            routed.predictions,
            vec![TagScore::new("calm", 0.6), TagScore::new("loud", 0.3)]
        );

        let invocations = f.runner.invocations();
        assert_eq!(
            invocations,
            vec![AiTask::Infer(InferenceTask {
                user_id: 4,
                audio_path: PathBuf::from("/media/uploads/song.mp3"),
            })]
        );
    }

    #[tokio::test]
    async fn slow_inference_falls_back_without_retry() {
        let f = fixture(Duration::from_millis(30));
        store_model(&f, 0.8);
        f.runner.push_inference(ScriptedResponse::Hang);

        let predictions = f.router.predict(&track()).await;
        assert!(predictions.is_empty());
        assert_eq!(f.runner.invocation_count(TaskKind::Inference), 1);
    }

    #[tokio::test]
    async fn failed_inference_falls_back() {
        let f = fixture(Duration::from_secs(1));
        store_model(&f, 0.8);
        f.runner.push_inference(ScriptedResponse::Stdout(
            r#"{"success":false,"error":"model file missing"}"#.to_string(),
        ));
        f.runner.push_inference(ScriptedResponse::Exit {
            code: 1,
            stderr: "Traceback".to_string(),
        });

        for _ in 0..2 {
            let routed = f.router.route(&track()).await;
            assert_eq!(routed.path, PredictionPath::Fallback);
            assert!(routed.predictions.is_empty());
        }
        assert_eq!(f.runner.invocation_count(TaskKind::Inference), 2);
    }

    #[test]
    fn sanitizing_drops_blank_and_invalid_entries() {
        let predictions = sanitize_predictions(
            1,
            vec![
                TagScore::new(" ", 0.5),
                TagScore::new("a", f64::NAN),
                TagScore::new("b", 0.1),
                TagScore::new("C", 0.9),
            ],
        );
        assert_eq!(
            predictions,
            vec![TagScore::new("c", 0.9), TagScore::new("b", 0.1)]
        );
    }
}
