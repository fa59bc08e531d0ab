//! [`ProcessRunner`] backed by child processes running the AI scripts.

use super::runner::{parse_task_output, AiTask, ProcessRunner, RunnerError, TaskOutput};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Environment variable telling the scripts where model files live.
pub const MODELS_DIR_ENV: &str = "TAGTRAIN_MODELS_DIR";

/// Only the tail of stderr is kept in errors.
const MAX_STDERR_BYTES: usize = 4096;

#[derive(Debug, Clone)]
pub struct SubprocessRunnerConfig {
    /// Interpreter used to run the scripts, e.g. `python3`.
    pub executable: PathBuf,
    pub training_script: PathBuf,
    pub inference_script: PathBuf,
    pub models_dir: PathBuf,
}

pub struct SubprocessRunner {
    config: SubprocessRunnerConfig,
}

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        if let Err(e) = reader.read_to_end(&mut buf).await {
            debug!("Error reading child output: {}", e);
        }
    }
    buf
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= MAX_STDERR_BYTES {
        return text.to_string();
    }
    let mut start = text.len() - MAX_STDERR_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}

impl SubprocessRunner {
    pub fn new(config: SubprocessRunnerConfig) -> Self {
        SubprocessRunner { config }
    }

    fn command_args(&self, task: &AiTask) -> Result<Vec<OsString>, RunnerError> {
        Ok(match task {
            AiTask::Train(training) => vec![
                self.config.training_script.clone().into_os_string(),
                training.user_id.to_string().into(),
                training.payload_json()?.into(),
            ],
            AiTask::Infer(inference) => vec![
                self.config.inference_script.clone().into_os_string(),
                inference.audio_path.clone().into_os_string(),
                inference.user_id.to_string().into(),
            ],
        })
    }
}

#[async_trait]
impl ProcessRunner for SubprocessRunner {
    async fn run(&self, task: &AiTask, timeout: Duration) -> Result<TaskOutput, RunnerError> {
        let kind = task.kind();
        let args = self.command_args(task)?;
        let started = Instant::now();

        let mut child = Command::new(&self.config.executable)
            .args(&args)
            .env(MODELS_DIR_ENV, &self.config.models_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RunnerError::LaunchFailed(format!(
                    "{}: {}",
                    self.config.executable.display(),
                    e
                ))
            })?;

        debug!(
            "Started {} process for user {} (pid {:?})",
            kind.as_str(),
            task.user_id(),
            child.id()
        );

        let mut stdout_reader = tokio::spawn(drain(child.stdout.take()));
        let mut stderr_reader = tokio::spawn(drain(child.stderr.take()));
        let deadline = tokio::time::Instant::now() + timeout;

        let status = match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                stdout_reader.abort();
                stderr_reader.abort();
                return Err(RunnerError::LaunchFailed(format!(
                    "could not wait for process: {}",
                    e
                )));
            }
            Err(_) => {
                warn!(
                    "{} process for user {} exceeded {:?}, killing it",
                    kind.as_str(),
                    task.user_id(),
                    timeout
                );
                if let Err(e) = child.start_kill() {
                    warn!("Failed to kill timed out process: {}", e);
                }
                let _ = child.wait().await;
                stdout_reader.abort();
                stderr_reader.abort();
                return Err(RunnerError::Timeout(timeout));
            }
        };

        // Descendants may inherit the pipes and keep them open past the exit.
        let drained = tokio::time::timeout_at(deadline, async {
            let stdout = (&mut stdout_reader).await.unwrap_or_default();
            let stderr = (&mut stderr_reader).await.unwrap_or_default();
            (stdout, stderr)
        })
        .await;
        let (stdout, stderr) = match drained {
            Ok(output) => output,
            Err(_) => {
                warn!(
                    "{} process for user {} exited but its output stayed open past {:?}",
                    kind.as_str(),
                    task.user_id(),
                    timeout
                );
                stdout_reader.abort();
                stderr_reader.abort();
                return Err(RunnerError::Timeout(timeout));
            }
        };
        let elapsed = started.elapsed();

        if !status.success() {
            let stderr = stderr_tail(&stderr);
            warn!(
                "{} process for user {} failed with {:?} after {}ms: {}",
                kind.as_str(),
                task.user_id(),
                status.code(),
                elapsed.as_millis(),
                stderr
            );
            return Err(RunnerError::TaskFailed {
                code: status.code(),
                stderr,
            });
        }

        if !stderr.is_empty() {
            debug!(
                "{} process stderr: {}",
                kind.as_str(),
                String::from_utf8_lossy(&stderr).trim()
            );
        }
        info!(
            "{} process for user {} finished in {}ms",
            kind.as_str(),
            task.user_id(),
            elapsed.as_millis()
        );

        parse_task_output(kind, &String::from_utf8_lossy(&stdout))
    }
}
