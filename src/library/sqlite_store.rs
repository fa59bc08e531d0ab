use super::models::*;
use super::schema::VERSIONED_SCHEMAS;
use super::store::{TrackStore, UserStore};
use crate::sqlite_persistence::{open_in_memory_db, open_versioned_db};
use anyhow::{bail, Context, Result};
use rand::Rng;
use rand_distr::Alphanumeric;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

const AUTH_TOKEN_LENGTH: usize = 64;
const TOP_TAGS_LIMIT: usize = 5;

#[derive(Clone)]
pub struct SqliteLibraryStore {
    conn: Arc<Mutex<Connection>>,
}

fn generate_auth_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(AUTH_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

fn track_from_row(row: &Row) -> rusqlite::Result<Track> {
    Ok(Track {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        locator: row.get(3)?,
        created: row.get(4)?,
    })
}

fn source_from_text(s: String) -> PredictionSource {
    // Unknown provenance is never treated as ground truth.
    PredictionSource::parse(&s).unwrap_or(PredictionSource::Model)
}

impl SqliteLibraryStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned_db(db_path, VERSIONED_SCHEMAS)?;
        Ok(SqliteLibraryStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = open_in_memory_db(VERSIONED_SCHEMAS)?;
        Ok(SqliteLibraryStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn get_or_create_tag_id(conn: &Connection, name: &str) -> Result<usize> {
        conn.execute("INSERT OR IGNORE INTO tag (name) VALUES (?1)", params![name])?;
        conn.query_row("SELECT id FROM tag WHERE name = ?1", params![name], |row| {
            row.get(0)
        })
        .with_context(|| format!("Failed to resolve tag {}", name))
    }
}

impl TrackStore for SqliteLibraryStore {
    fn create_track(&self, user_id: usize, title: &str, locator: &str) -> Result<Track> {
        let track = Track {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            title: title.to_string(),
            locator: locator.to_string(),
            created: now_secs(),
        };
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO track (id, user_id, title, locator, created) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![track.id, track.user_id, track.title, track.locator, track.created],
        )
        .with_context(|| format!("Failed to create track for user {}", user_id))?;
        Ok(track)
    }

    fn get_track(&self, track_id: &str) -> Result<Option<Track>> {
        let conn = self.conn.lock().unwrap();
        let track = conn
            .query_row(
                "SELECT id, user_id, title, locator, created FROM track WHERE id = ?1",
                params![track_id],
                track_from_row,
            )
            .optional()?;
        Ok(track)
    }

    fn get_user_tracks(&self, user_id: usize) -> Result<Vec<TrackWithPredictions>> {
        let conn = self.conn.lock().unwrap();
        let mut tracks_stmt = conn.prepare(
            "SELECT id, user_id, title, locator, created FROM track
             WHERE user_id = ?1 ORDER BY created DESC, rowid DESC",
        )?;
        let tracks = tracks_stmt
            .query_map(params![user_id], track_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut predictions_stmt = conn.prepare(
            "SELECT p.tag_id, g.name, p.confidence, p.source, p.created
             FROM prediction p JOIN tag g ON g.id = p.tag_id
             WHERE p.track_id = ?1 ORDER BY p.confidence DESC, g.name ASC",
        )?;
        let mut result = Vec::with_capacity(tracks.len());
        for track in tracks {
            let predictions = predictions_stmt
                .query_map(params![track.id], |row| {
                    Ok(StoredPrediction {
                        tag_id: row.get(0)?,
                        tag: row.get(1)?,
                        confidence: row.get(2)?,
                        source: source_from_text(row.get(3)?),
                        created: row.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            result.push(TrackWithPredictions { track, predictions });
        }
        Ok(result)
    }

    fn delete_track(&self, track_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM track WHERE id = ?1", params![track_id])?;
        Ok(deleted > 0)
    }

    fn add_predictions(
        &self,
        track_id: &str,
        tags: &[TagScore],
        source: PredictionSource,
    ) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = now_secs();
        let mut changed = 0;
        for tag in tags {
            let Some(name) = normalize_tag_name(&tag.tag) else {
                debug!("Skipping blank tag name for track {}", track_id);
                continue;
            };
            if !tag.has_valid_confidence() {
                bail!(
                    "Confidence {} for tag {} is outside [0, 1]",
                    tag.confidence,
                    name
                );
            }
            let tag_id = Self::get_or_create_tag_id(&tx, &name)?;
            changed += tx
                .execute(
                    "INSERT INTO prediction (track_id, tag_id, confidence, source, created)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(track_id, tag_id) DO UPDATE SET
                        confidence = excluded.confidence,
                        source = excluded.source,
                        created = excluded.created
                     WHERE excluded.source = 'custom' OR prediction.source = 'model'",
                    params![track_id, tag_id, tag.confidence, source.as_str(), now],
                )
                .with_context(|| format!("Failed to store prediction {} for {}", name, track_id))?;
        }
        tx.commit()?;
        Ok(changed)
    }

    fn remove_prediction(&self, track_id: &str, tag: &str) -> Result<bool> {
        let Some(name) = normalize_tag_name(tag) else {
            return Ok(false);
        };
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM prediction
             WHERE track_id = ?1 AND tag_id = (SELECT id FROM tag WHERE name = ?2)",
            params![track_id, name],
        )?;
        Ok(deleted > 0)
    }

    fn list_training_candidates(&self, user_id: usize) -> Result<Vec<TrainingCandidate>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT t.id, t.locator, g.name, p.confidence
             FROM track t
             JOIN prediction p ON p.track_id = t.id
             JOIN tag g ON g.id = p.tag_id
             WHERE t.user_id = ?1 AND p.source = ?2
             ORDER BY t.created ASC, t.id ASC, g.name ASC",
        )?;
        let rows = stmt
            .query_map(params![user_id, PredictionSource::Custom.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    TagScore::new(row.get::<_, String>(2)?, row.get(3)?),
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut candidates: Vec<TrainingCandidate> = Vec::new();
        for (track_id, locator, tag) in rows {
            match candidates.last_mut() {
                Some(last) if last.track_id == track_id => last.tags.push(tag),
                _ => candidates.push(TrainingCandidate {
                    track_id,
                    locator,
                    tags: vec![tag],
                }),
            }
        }
        Ok(candidates)
    }

    fn create_tag(&self, name: &str) -> Result<Option<Tag>> {
        let Some(name) = normalize_tag_name(name) else {
            bail!("Tag name must not be blank");
        };
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute("INSERT OR IGNORE INTO tag (name) VALUES (?1)", params![name])?;
        if inserted == 0 {
            return Ok(None);
        }
        Ok(Some(Tag {
            id: conn.last_insert_rowid() as usize,
            name,
        }))
    }

    fn list_tags(&self) -> Result<Vec<TagUsage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT g.id, g.name, COUNT(p.id) FROM tag g
             LEFT JOIN prediction p ON p.tag_id = g.id
             GROUP BY g.id ORDER BY g.name ASC",
        )?;
        let tags = stmt
            .query_map([], |row| {
                Ok(TagUsage {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    prediction_count: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    fn delete_tag(&self, tag_id: usize) -> Result<TagDeletion> {
        let conn = self.conn.lock().unwrap();
        let exists = conn
            .query_row("SELECT 1 FROM tag WHERE id = ?1", params![tag_id], |_| Ok(()))
            .optional()?
            .is_some();
        if !exists {
            return Ok(TagDeletion::NotFound);
        }
        let in_use: usize = conn.query_row(
            "SELECT COUNT(*) FROM prediction WHERE tag_id = ?1",
            params![tag_id],
            |row| row.get(0),
        )?;
        if in_use > 0 {
            return Ok(TagDeletion::InUse(in_use));
        }
        conn.execute("DELETE FROM tag WHERE id = ?1", params![tag_id])?;
        Ok(TagDeletion::Deleted)
    }

    fn get_user_stats(&self, user_id: usize) -> Result<UserStats> {
        let conn = self.conn.lock().unwrap();
        let total_tracks: usize = conn.query_row(
            "SELECT COUNT(*) FROM track WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        let (total_predictions, average_confidence): (usize, Option<f64>) = conn.query_row(
            "SELECT COUNT(p.id), AVG(p.confidence) FROM prediction p
             JOIN track t ON t.id = p.track_id WHERE t.user_id = ?1",
            params![user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let mut stmt = conn.prepare(
            "SELECT g.name, COUNT(*) AS uses FROM prediction p
             JOIN track t ON t.id = p.track_id
             JOIN tag g ON g.id = p.tag_id
             WHERE t.user_id = ?1
             GROUP BY g.id ORDER BY uses DESC, g.name ASC LIMIT ?2",
        )?;
        let top_tags = stmt
            .query_map(params![user_id, TOP_TAGS_LIMIT], |row| {
                Ok(TagCount {
                    name: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(UserStats {
            total_tracks,
            total_predictions,
            average_confidence: average_confidence
                .map(|avg| (avg * 100.0).round() / 100.0)
                .unwrap_or(0.0),
            top_tags,
        })
    }
}

impl UserStore for SqliteLibraryStore {
    fn create_user(&self, user_handle: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        conn.execute("INSERT INTO user (handle) VALUES (?1)", params![user_handle])
            .with_context(|| format!("Failed to create user {}", user_handle))?;
        Ok(conn.last_insert_rowid() as usize)
    }

    fn get_user_id(&self, user_handle: &str) -> Result<Option<usize>> {
        let conn = self.conn.lock().unwrap();
        let id = conn
            .query_row(
                "SELECT id FROM user WHERE handle = ?1",
                params![user_handle],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn get_all_user_handles(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT handle FROM user ORDER BY handle")?;
        let handles = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(handles)
    }

    fn create_auth_token(&self, user_id: usize) -> Result<String> {
        let token = generate_auth_token();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO auth_token (user_id, value) VALUES (?1, ?2)",
            params![user_id, token],
        )
        .with_context(|| format!("Failed to store auth token for user {}", user_id))?;
        Ok(token)
    }

    fn get_user_id_for_token(&self, token: &str) -> Result<Option<usize>> {
        let conn = self.conn.lock().unwrap();
        let id = conn
            .query_row(
                "SELECT user_id FROM auth_token WHERE value = ?1",
                params![token],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }
}
