use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Metadata of a user's most recent successful training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRecord {
    pub user_id: usize,
    pub accuracy: f64,
    pub last_trained: DateTime<Utc>,
    pub tracks_used: usize,
    pub unique_tags: usize,
}

/// Durable store of one [`ModelRecord`] per user.
pub trait ModelRegistry: Send + Sync {
    /// Missing or unreadable records are reported as `None`.
    fn get(&self, user_id: usize) -> Option<ModelRecord>;

    /// Replaces the user's record. Readers see either the old or the new
    /// record, never a partial one.
    fn put(&self, user_id: usize, record: &ModelRecord) -> Result<()>;
}

/// Keeps each record in `user_{id}_info.json` inside the models directory,
/// next to the model files written by the training script.
pub struct FileModelRegistry {
    models_dir: PathBuf,
}

impl FileModelRegistry {
    pub fn new<P: AsRef<Path>>(models_dir: P) -> Result<Self> {
        let models_dir = models_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create models directory {:?}", models_dir))?;
        Ok(FileModelRegistry { models_dir })
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn record_path(&self, user_id: usize) -> PathBuf {
        self.models_dir.join(format!("user_{}_info.json", user_id))
    }
}

/// Makes a rename inside `dir` durable.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

impl ModelRegistry for FileModelRegistry {
    fn get(&self, user_id: usize) -> Option<ModelRecord> {
        let path = self.record_path(user_id);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No model record for user {}", user_id);
                return None;
            }
            Err(e) => {
                warn!("Could not read model record {:?}: {}", path, e);
                return None;
            }
        };
        match serde_json::from_str::<ModelRecord>(&content) {
            Ok(record) if record.user_id == user_id => Some(record),
            Ok(record) => {
                warn!(
                    "Ignoring model record {:?}: it belongs to user {}",
                    path, record.user_id
                );
                None
            }
            Err(e) => {
                warn!("Ignoring corrupt model record {:?}: {}", path, e);
                None
            }
        }
    }

    fn put(&self, user_id: usize, record: &ModelRecord) -> Result<()> {
        if record.user_id != user_id {
            bail!(
                "Model record of user {} cannot be stored for user {}",
                record.user_id,
                user_id
            );
        }
        let path = self.record_path(user_id);
        let json = serde_json::to_vec_pretty(record)?;

        // Write next to the target and rename over it.
        let mut tmp = tempfile::NamedTempFile::new_in(&self.models_dir)
            .with_context(|| format!("Failed to create temp file in {:?}", self.models_dir))?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path)
            .with_context(|| format!("Failed to persist model record {:?}", path))?;
        sync_dir(&self.models_dir)
            .with_context(|| format!("Failed to sync models directory {:?}", self.models_dir))?;

        debug!(
            "Stored model record for user {} (accuracy {:.3})",
            user_id, record.accuracy
        );
        Ok(())
    }
}
