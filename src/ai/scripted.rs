//! In-memory [`ProcessRunner`] replaying canned responses, for tests and
//! for running the server without the AI scripts installed.

use super::runner::{
    parse_task_output, AiTask, ProcessRunner, RunnerError, TaskKind, TaskOutput,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Behaves like a process that exited 0 after printing this.
    Stdout(String),
    /// Behaves like a process that exited with this code and stderr.
    Exit { code: i32, stderr: String },
    Error(RunnerError),
    /// Never finishes on its own.
    Hang,
}

#[derive(Default)]
pub struct ScriptedProcessRunner {
    training: Mutex<VecDeque<ScriptedResponse>>,
    inference: Mutex<VecDeque<ScriptedResponse>>,
    latency: Mutex<Duration>,
    invocations: Mutex<Vec<AiTask>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_training(&self, response: ScriptedResponse) -> &Self {
        self.training.lock().unwrap().push_back(response);
        self
    }

    pub fn push_inference(&self, response: ScriptedResponse) -> &Self {
        self.inference.lock().unwrap().push_back(response);
        self
    }

    /// Simulated run time applied to every task before it responds.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn invocations(&self) -> Vec<AiTask> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn invocation_count(&self, kind: TaskKind) -> usize {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .filter(|task| task.kind() == kind)
            .count()
    }

    /// Highest number of tasks that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_response(&self, kind: TaskKind) -> Option<ScriptedResponse> {
        let queue = match kind {
            TaskKind::Training => &self.training,
            TaskKind::Inference => &self.inference,
        };
        queue.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl ProcessRunner for ScriptedProcessRunner {
    async fn run(&self, task: &AiTask, timeout: Duration) -> Result<TaskOutput, RunnerError> {
        let kind = task.kind();
        self.invocations.lock().unwrap().push(task.clone());
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        let response = self.next_response(kind);
        let latency = *self.latency.lock().unwrap();

        if matches!(response, Some(ScriptedResponse::Hang)) || latency >= timeout {
            tokio::time::sleep(timeout).await;
            return Err(RunnerError::Timeout(timeout));
        }
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match response {
            None => Err(RunnerError::LaunchFailed(format!(
                "no scripted {} response",
                kind.as_str()
            ))),
            Some(ScriptedResponse::Stdout(stdout)) => parse_task_output(kind, &stdout),
            Some(ScriptedResponse::Exit { code, stderr }) => Err(RunnerError::TaskFailed {
                code: Some(code),
                stderr,
            }),
            Some(ScriptedResponse::Error(err)) => Err(err),
            Some(ScriptedResponse::Hang) => Err(RunnerError::Timeout(timeout)),
        }
    }
}
