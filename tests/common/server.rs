//! Test server lifecycle management
//!
//! This module manages spawning and shutting down test HTTP servers.
//! Each test gets an isolated server with its own database, uploads and
//! models directories, and a scripted AI runner the test can program.

use super::constants::*;
use std::sync::Arc;
use std::time::Duration;
use tagtrain_server::ai::{
    ConcurrencyGuard, FileModelRegistry, ModelRegistry, PredictionRouter, ScriptedProcessRunner,
    TrainingOrchestrator,
};
use tagtrain_server::library::{SqliteLibraryStore, UserStore};
use tagtrain_server::server::{make_app, RequestsLoggingLevel, ServerConfig, ServerState};
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Test server instance with an isolated library and models directory
///
/// When dropped, the server gracefully shuts down and temp resources are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// Library store for direct database access in tests
    pub store: SqliteLibraryStore,

    /// Model records written by training
    pub registry: Arc<FileModelRegistry>,

    /// Fake AI runner; queue script outputs on it before triggering work
    pub runner: Arc<ScriptedProcessRunner>,

    /// Session token of [`TEST_USER`]
    pub test_token: String,

    /// Session token of [`OTHER_USER`]
    pub other_token: String,

    // Private fields - keep resources alive until drop
    temp_dir: TempDir,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a new test server on a random port
    ///
    /// # Panics
    ///
    /// Panics if the database cannot be created, the port cannot be bound
    /// or the server does not become ready within the timeout.
    pub async fn spawn() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let store = SqliteLibraryStore::new(temp_dir.path().join("library.db"))
            .expect("Failed to open library store");
        let test_user_id = store.create_user(TEST_USER).expect("Failed to create user");
        let other_user_id = store
            .create_user(OTHER_USER)
            .expect("Failed to create user");
        let test_token = store
            .create_auth_token(test_user_id)
            .expect("Failed to create token");
        let other_token = store
            .create_auth_token(other_user_id)
            .expect("Failed to create token");

        let registry = Arc::new(
            FileModelRegistry::new(temp_dir.path().join("models"))
                .expect("Failed to create models dir"),
        );
        let runner = Arc::new(ScriptedProcessRunner::new());
        let guard = Arc::new(ConcurrencyGuard::new(2));
        let track_store = Arc::new(store.clone());

        let orchestrator = Arc::new(TrainingOrchestrator::new(
            track_store.clone(),
            registry.clone(),
            runner.clone(),
            guard.clone(),
            Duration::from_secs(5),
        ));
        let prediction_router = Arc::new(PredictionRouter::new(
            registry.clone(),
            runner.clone(),
            guard,
            Duration::from_secs(1),
        ));

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let config = ServerConfig {
            port,
            requests_logging_level: RequestsLoggingLevel::None,
            frontend_dir_path: None,
            uploads_dir: temp_dir.path().join("uploads"),
            max_upload_bytes: TEST_MAX_UPLOAD_BYTES,
        };
        let state = ServerState::new(
            config,
            Arc::new(store.clone()),
            track_store,
            orchestrator,
            prediction_router,
        );
        let app = make_app(state).expect("Failed to build app");

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        // Spawn server in background task with graceful shutdown
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            store,
            registry,
            runner,
            test_token,
            other_token,
            temp_dir,
            shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;

        server
    }

    /// Directory uploaded audio lands in
    pub fn uploads_dir(&self) -> std::path::PathBuf {
        self.temp_dir.path().join("uploads")
    }

    pub fn test_user_id(&self) -> usize {
        self.store
            .get_user_id(TEST_USER)
            .expect("Failed to query user")
            .expect("Test user missing")
    }

    pub fn has_model(&self, user_id: usize) -> bool {
        self.registry.get(user_id).is_some()
    }

    /// Waits for the server to become ready by polling the home endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        // TempDir will be cleaned up automatically
    }
}
