//! Out-of-process AI tasks: what gets run, what comes back, and how it fails.

use crate::library::TagScore;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RunnerError {
    #[error("could not launch process: {0}")]
    LaunchFailed(String),

    #[error("process exited with code {code:?}: {stderr}")]
    TaskFailed { code: Option<i32>, stderr: String },

    #[error("process timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed process output ({reason}): {raw}")]
    MalformedOutput { reason: String, raw: String },

    #[error("task reported failure: {0}")]
    Rejected(String),

    #[error("process pool is shut down")]
    PoolClosed,
}

impl RunnerError {
    /// Short label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            RunnerError::LaunchFailed(_) => "launch_failed",
            RunnerError::TaskFailed { .. } => "task_failed",
            RunnerError::Timeout(_) => "timeout",
            RunnerError::MalformedOutput { .. } => "malformed_output",
            RunnerError::Rejected(_) => "rejected",
            RunnerError::PoolClosed => "pool_closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Training,
    Inference,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Training => "training",
            TaskKind::Inference => "inference",
        }
    }
}

/// One labelled track handed to the training script.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingExample {
    #[serde(rename = "audioPath")]
    pub audio_path: String,
    pub tags: Vec<TagScore>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingTask {
    pub user_id: usize,
    pub examples: Vec<TrainingExample>,
}

impl TrainingTask {
    /// JSON array passed to the training script as its last argument.
    pub fn payload_json(&self) -> Result<String, RunnerError> {
        serde_json::to_string(&self.examples)
            .map_err(|e| RunnerError::LaunchFailed(format!("could not encode payload: {}", e)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceTask {
    pub user_id: usize,
    pub audio_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AiTask {
    Train(TrainingTask),
    Infer(InferenceTask),
}

impl AiTask {
    pub fn kind(&self) -> TaskKind {
        match self {
            AiTask::Train(_) => TaskKind::Training,
            AiTask::Infer(_) => TaskKind::Inference,
        }
    }

    pub fn user_id(&self) -> usize {
        match self {
            AiTask::Train(task) => task.user_id,
            AiTask::Infer(task) => task.user_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingOutput {
    pub accuracy: f64,
    pub tracks_trained: usize,
    pub unique_tags: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOutput {
    pub predictions: Vec<TagScore>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutput {
    Trained(TrainingOutput),
    Predicted(InferenceOutput),
}

impl TaskOutput {
    pub fn into_training(self) -> Result<TrainingOutput, RunnerError> {
        match self {
            TaskOutput::Trained(output) => Ok(output),
            TaskOutput::Predicted(_) => Err(RunnerError::MalformedOutput {
                reason: "expected training output".to_string(),
                raw: String::new(),
            }),
        }
    }

    pub fn into_inference(self) -> Result<InferenceOutput, RunnerError> {
        match self {
            TaskOutput::Predicted(output) => Ok(output),
            TaskOutput::Trained(_) => Err(RunnerError::MalformedOutput {
                reason: "expected inference output".to_string(),
                raw: String::new(),
            }),
        }
    }
}

/// Runs AI tasks outside the server process.
///
/// Implementations never retry: a failed or timed out task is reported once.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, task: &AiTask, timeout: Duration) -> Result<TaskOutput, RunnerError>;
}

#[derive(Debug, Deserialize)]
struct RawTrainingOutput {
    success: bool,
    accuracy: Option<f64>,
    tracks_trained: Option<usize>,
    unique_tags: Option<usize>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawInferenceOutput {
    success: bool,
    #[serde(default)]
    predictions: Vec<TagScore>,
    error: Option<String>,
}

fn malformed(reason: impl Into<String>, raw: &str) -> RunnerError {
    RunnerError::MalformedOutput {
        reason: reason.into(),
        raw: raw.to_string(),
    }
}

/// Scripts may print diagnostics before their result, so when the whole
/// output is not a JSON document the last non-empty line is tried.
fn parse_json<T: DeserializeOwned>(stdout: &str) -> Result<T, RunnerError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(malformed("empty output", stdout));
    }
    match serde_json::from_str::<T>(trimmed) {
        Ok(value) => Ok(value),
        Err(whole_err) => trimmed
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .and_then(|line| serde_json::from_str::<T>(line.trim()).ok())
            .ok_or_else(|| malformed(whole_err.to_string(), stdout)),
    }
}

/// Interprets the stdout of a task that exited successfully.
pub fn parse_task_output(kind: TaskKind, stdout: &str) -> Result<TaskOutput, RunnerError> {
    match kind {
        TaskKind::Training => {
            let raw: RawTrainingOutput = parse_json(stdout)?;
            if !raw.success {
                return Err(RunnerError::Rejected(
                    raw.error.unwrap_or_else(|| "training failed".to_string()),
                ));
            }
            let accuracy = raw
                .accuracy
                .ok_or_else(|| malformed("missing accuracy", stdout))?;
            if !accuracy.is_finite() || !(0.0..=1.0).contains(&accuracy) {
                return Err(malformed(
                    format!("accuracy {} outside [0, 1]", accuracy),
                    stdout,
                ));
            }
            Ok(TaskOutput::Trained(TrainingOutput {
                accuracy,
                tracks_trained: raw
                    .tracks_trained
                    .ok_or_else(|| malformed("missing tracks_trained", stdout))?,
                unique_tags: raw
                    .unique_tags
                    .ok_or_else(|| malformed("missing unique_tags", stdout))?,
            }))
        }
        TaskKind::Inference => {
            let raw: RawInferenceOutput = parse_json(stdout)?;
            if !raw.success {
                return Err(RunnerError::Rejected(
                    raw.error.unwrap_or_else(|| "inference failed".to_string()),
                ));
            }
            Ok(TaskOutput::Predicted(InferenceOutput {
                predictions: raw.predictions,
            }))
        }
    }
}
