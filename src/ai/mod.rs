//! Per-user model lifecycle: deciding when a user may train, running training
//! and inference out of process, recording trained models and routing
//! predictions to the right model.

pub mod guard;
pub mod orchestrator;
pub mod policy;
pub mod registry;
pub mod router;
pub mod runner;
pub mod scripted;
pub mod subprocess;

pub use guard::{ConcurrencyGuard, ProcessPermit, TrainingSlot};
pub use orchestrator::{ModelStatus, TrainingError, TrainingOrchestrator};
pub use registry::{FileModelRegistry, ModelRecord, ModelRegistry};
pub use router::{PredictionPath, PredictionRouter, RoutedPrediction};
pub use runner::{AiTask, ProcessRunner, RunnerError, TaskKind, TaskOutput};
pub use scripted::{ScriptedProcessRunner, ScriptedResponse};
pub use subprocess::{SubprocessRunner, SubprocessRunnerConfig};
