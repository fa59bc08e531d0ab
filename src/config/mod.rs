mod file_config;

pub use file_config::{AiConfig, FileConfig};

use crate::ai::SubprocessRunnerConfig;
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_TRAINING_SCRIPT: &str = "train_personal_model.py";
pub const DEFAULT_INFERENCE_SCRIPT: &str = "predict_personal_from_file.py";

/// CLI arguments that take part in config resolution.
/// TOML values override these where present.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub media_path: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub frontend_dir_path: Option<String>,
    pub max_upload_mb: u64,
    pub python_executable: Option<String>,
    pub scripts_dir: Option<PathBuf>,
    pub models_dir: Option<PathBuf>,
    pub training_timeout_sec: u64,
    pub inference_timeout_sec: u64,
    pub max_concurrent_subprocesses: usize,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub media_path: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub frontend_dir_path: Option<String>,
    pub max_upload_mb: u64,

    pub ai: AiSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AiSettings {
    pub executable: PathBuf,
    pub scripts_dir: PathBuf,
    pub training_script: String,
    pub inference_script: String,
    pub models_dir: PathBuf,
    pub training_timeout: Duration,
    pub inference_timeout: Duration,
    pub max_concurrent_subprocesses: usize,
}

impl AiSettings {
    pub fn training_script_path(&self) -> PathBuf {
        self.scripts_dir.join(&self.training_script)
    }

    pub fn inference_script_path(&self) -> PathBuf {
        self.scripts_dir.join(&self.inference_script)
    }

    pub fn runner_config(&self) -> SubprocessRunnerConfig {
        SubprocessRunnerConfig {
            executable: self.executable.clone(),
            training_script: self.training_script_path(),
            inference_script: self.inference_script_path(),
            models_dir: self.models_dir.clone(),
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let media_path = file
            .media_path
            .map(PathBuf::from)
            .or_else(|| cli.media_path.clone())
            .unwrap_or_else(|| db_dir.clone());

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let frontend_dir_path = file
            .frontend_dir_path
            .or_else(|| cli.frontend_dir_path.clone());

        let max_upload_mb = file.max_upload_mb.unwrap_or(cli.max_upload_mb);
        if max_upload_mb == 0 {
            bail!("max_upload_mb must be greater than 0");
        }

        let ai_file = file.ai.unwrap_or_default();
        let training_timeout_sec = ai_file
            .training_timeout_sec
            .unwrap_or(cli.training_timeout_sec);
        let inference_timeout_sec = ai_file
            .inference_timeout_sec
            .unwrap_or(cli.inference_timeout_sec);
        if training_timeout_sec == 0 || inference_timeout_sec == 0 {
            bail!("AI timeouts must be greater than 0 seconds");
        }
        let max_concurrent_subprocesses = ai_file
            .max_concurrent_subprocesses
            .unwrap_or(cli.max_concurrent_subprocesses);
        if max_concurrent_subprocesses == 0 {
            bail!("max_concurrent_subprocesses must be at least 1");
        }

        let ai = AiSettings {
            executable: ai_file
                .executable
                .or_else(|| cli.python_executable.clone())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("python3")),
            scripts_dir: ai_file
                .scripts_dir
                .map(PathBuf::from)
                .or_else(|| cli.scripts_dir.clone())
                .unwrap_or_else(|| PathBuf::from("python")),
            training_script: ai_file
                .training_script
                .unwrap_or_else(|| DEFAULT_TRAINING_SCRIPT.to_string()),
            inference_script: ai_file
                .inference_script
                .unwrap_or_else(|| DEFAULT_INFERENCE_SCRIPT.to_string()),
            models_dir: ai_file
                .models_dir
                .map(PathBuf::from)
                .or_else(|| cli.models_dir.clone())
                .unwrap_or_else(|| db_dir.join("models")),
            training_timeout: Duration::from_secs(training_timeout_sec),
            inference_timeout: Duration::from_secs(inference_timeout_sec),
            max_concurrent_subprocesses,
        };

        Ok(Self {
            db_dir,
            media_path,
            port,
            metrics_port,
            logging_level,
            frontend_dir_path,
            max_upload_mb,
            ai,
        })
    }

    pub fn library_db_path(&self) -> PathBuf {
        self.db_dir.join("library.db")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.media_path.join("uploads")
    }

    pub fn max_upload_bytes(&self) -> usize {
        (self.max_upload_mb * 1024 * 1024) as usize
    }
}

fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
