use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub media_path: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,
    pub frontend_dir_path: Option<String>,
    pub max_upload_mb: Option<u64>,

    pub ai: Option<AiConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AiConfig {
    /// Interpreter the scripts are run with, e.g. "python3"
    pub executable: Option<String>,
    pub scripts_dir: Option<String>,
    pub training_script: Option<String>,
    pub inference_script: Option<String>,
    pub models_dir: Option<String>,
    pub training_timeout_sec: Option<u64>,
    pub inference_timeout_sec: Option<u64>,
    pub max_concurrent_subprocesses: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
