use super::RequestsLoggingLevel;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub requests_logging_level: RequestsLoggingLevel,
    pub port: u16,
    pub frontend_dir_path: Option<String>,
    /// Where uploaded audio files are written.
    pub uploads_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            requests_logging_level: RequestsLoggingLevel::Path,
            port: 3001,
            frontend_dir_path: None,
            uploads_dir: PathBuf::from("uploads"),
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}
