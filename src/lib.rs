//! Tagtrain Server Library
//!
//! Per-user audio tagging with personal models trained out of process.
//! This library exposes the internal modules for the binaries and for testing.

pub mod ai;
pub mod config;
pub mod library;
pub mod metrics;
pub mod server;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use ai::{
    ConcurrencyGuard, FileModelRegistry, PredictionRouter, ScriptedProcessRunner,
    SubprocessRunner, TrainingOrchestrator,
};
pub use library::{SqliteLibraryStore, TrackStore, UserStore};
pub use server::{make_app, run_server, RequestsLoggingLevel, ServerConfig, ServerState};
