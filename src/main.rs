use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tagtrain_server::ai::{
    ConcurrencyGuard, FileModelRegistry, PredictionRouter, SubprocessRunner, TrainingOrchestrator,
};
use tagtrain_server::config::{AppConfig, CliConfig, FileConfig};
use tagtrain_server::library::SqliteLibraryStore;
use tagtrain_server::metrics;
use tagtrain_server::server::{run_server, RequestsLoggingLevel, ServerConfig, ServerState};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory holding the library database (and, by default, trained models).
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Directory uploaded audio is stored under. Defaults to the db directory.
    #[clap(long, value_parser = parse_path)]
    pub media_path: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Path to the frontend directory to be statically served.
    #[clap(long)]
    pub frontend_dir_path: Option<String>,

    /// Largest accepted audio upload, in megabytes.
    #[clap(long, default_value_t = 50)]
    pub max_upload_mb: u64,

    /// Interpreter used to run the training and inference scripts.
    #[clap(long)]
    pub python_executable: Option<String>,

    /// Directory containing the training and inference scripts.
    #[clap(long, value_parser = parse_path)]
    pub scripts_dir: Option<PathBuf>,

    /// Directory trained models and their records are written to.
    #[clap(long, value_parser = parse_path)]
    pub models_dir: Option<PathBuf>,

    /// Wall-clock limit for one training run, in seconds.
    #[clap(long, default_value_t = 300)]
    pub training_timeout_sec: u64,

    /// Wall-clock limit for one inference run, in seconds.
    #[clap(long, default_value_t = 30)]
    pub inference_timeout_sec: u64,

    /// Maximum number of AI processes running at the same time.
    #[clap(long, default_value_t = 2)]
    pub max_concurrent_subprocesses: usize,

    /// Path to a TOML config file. Its values override command line arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_dir: self.db_dir.clone(),
            media_path: self.media_path.clone(),
            port: self.port,
            metrics_port: self.metrics_port,
            logging_level: self.logging_level.clone(),
            frontend_dir_path: self.frontend_dir_path.clone(),
            max_upload_mb: self.max_upload_mb,
            python_executable: self.python_executable.clone(),
            scripts_dir: self.scripts_dir.clone(),
            models_dir: self.models_dir.clone(),
            training_timeout_sec: self.training_timeout_sec,
            inference_timeout_sec: self.inference_timeout_sec,
            max_concurrent_subprocesses: self.max_concurrent_subprocesses,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config file {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let app_config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!("Initializing metrics...");
    metrics::init_metrics();

    let db_path = app_config.library_db_path();
    info!("Opening SQLite library database at {:?}...", db_path);
    let store = SqliteLibraryStore::new(&db_path)?;

    let ai = &app_config.ai;
    info!(
        "AI scripts: {:?} with {:?} (train) and {:?} (infer), at most {} processes",
        ai.executable,
        ai.training_script_path(),
        ai.inference_script_path(),
        ai.max_concurrent_subprocesses
    );
    let registry = Arc::new(FileModelRegistry::new(&ai.models_dir)?);
    let runner = Arc::new(SubprocessRunner::new(ai.runner_config()));
    let guard = Arc::new(ConcurrencyGuard::new(ai.max_concurrent_subprocesses));
    let track_store = Arc::new(store.clone());

    let orchestrator = Arc::new(TrainingOrchestrator::new(
        track_store.clone(),
        registry.clone(),
        runner.clone(),
        guard.clone(),
        ai.training_timeout,
    ));
    let prediction_router = Arc::new(PredictionRouter::new(
        registry,
        runner,
        guard,
        ai.inference_timeout,
    ));

    let uploads_dir = app_config.uploads_dir();
    std::fs::create_dir_all(&uploads_dir)
        .with_context(|| format!("Failed to create uploads directory {:?}", uploads_dir))?;

    let server_config = ServerConfig {
        requests_logging_level: app_config.logging_level.clone(),
        port: app_config.port,
        frontend_dir_path: app_config.frontend_dir_path.clone(),
        uploads_dir,
        max_upload_bytes: app_config.max_upload_bytes(),
    };
    let state = ServerState::new(
        server_config,
        Arc::new(store),
        track_store,
        orchestrator,
        prediction_router,
    );

    info!("Ready to serve at port {}!", app_config.port);
    run_server(state, app_config.metrics_port).await
}
