//! SQLite-backed event store.
//!
//! Two tables: `audio` holds encoded clip blobs, `birds` holds sessions with
//! a JSON clip-id list. Secondary indexes cover the name and time lookups.
//! Each session update is one SQL statement, so per-session atomicity comes
//! for free.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::info;

use crate::error::{AriaError, Result};
use crate::store::{ClipId, EncodedClip, EventStore, NewSession, SessionKey, SessionRecord};

pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

fn store_err<E: std::fmt::Display>(e: E) -> AriaError {
    AriaError::Store(e.to_string())
}

impl SqliteStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&db_path).map_err(store_err)?;
        Self::init_schema(&conn)?;
        info!(path = %db_path.display(), "opened session store");
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: None,
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS audio (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              bytes BLOB NOT NULL,
              mime TEXT NOT NULL,
              sample_rate INTEGER NOT NULL,
              bitrate INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS birds (
              key INTEGER PRIMARY KEY AUTOINCREMENT,
              name TEXT NOT NULL,
              name_localized TEXT NOT NULL,
              score REAL NOT NULL,
              geo_prior REAL,
              time INTEGER NOT NULL,
              last_seen INTEGER NOT NULL,
              clip_ids TEXT NOT NULL DEFAULT '[]'
            );

            CREATE INDEX IF NOT EXISTS idx_birds_name ON birds(name);
            CREATE INDEX IF NOT EXISTS idx_birds_time ON birds(time);
            "#,
        )
        .map_err(store_err)
    }

    /// Number of persisted audio clips.
    pub fn clip_count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM audio", [], |row| row.get::<_, i64>(0))
            .map(|n| n as usize)
            .map_err(store_err)
    }

    /// Read one clip back, mostly for inspection tools.
    pub fn get_audio_clip(&self, id: ClipId) -> Result<Option<EncodedClip>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT bytes, mime, sample_rate, bitrate FROM audio WHERE id = ?1")
            .map_err(store_err)?;
        let mut rows = stmt
            .query_map(params![id], |row| {
                Ok(EncodedClip {
                    bytes: row.get(0)?,
                    mime: row.get(1)?,
                    sample_rate: row.get::<_, i64>(2)? as u32,
                    bitrate: row.get::<_, i64>(3)? as u32,
                })
            })
            .map_err(store_err)?;
        match rows.next() {
            Some(clip) => Ok(Some(clip.map_err(store_err)?)),
            None => Ok(None),
        }
    }

    fn query_sessions(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<SessionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql).map_err(store_err)?;
        let rows = stmt
            .query_map(params, |row| {
                Ok(RawSession {
                    key: row.get(0)?,
                    name: row.get(1)?,
                    name_localized: row.get(2)?,
                    score: row.get(3)?,
                    geo_prior: row.get(4)?,
                    time_ms: row.get(5)?,
                    last_seen_ms: row.get(6)?,
                    clip_ids_json: row.get(7)?,
                })
            })
            .map_err(store_err)?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row.map_err(store_err)?.into_record()?);
        }
        Ok(sessions)
    }
}

const SESSION_COLUMNS: &str =
    "key, name, name_localized, score, geo_prior, time, last_seen, clip_ids";

struct RawSession {
    key: SessionKey,
    name: String,
    name_localized: String,
    score: f32,
    geo_prior: Option<f32>,
    time_ms: i64,
    last_seen_ms: i64,
    clip_ids_json: String,
}

impl RawSession {
    fn into_record(self) -> Result<SessionRecord> {
        let clip_ids: Vec<ClipId> =
            serde_json::from_str(&self.clip_ids_json).map_err(store_err)?;
        let started_at = DateTime::from_timestamp_millis(self.time_ms)
            .ok_or_else(|| AriaError::Store(format!("invalid start time {}", self.time_ms)))?;
        let last_seen_at = DateTime::from_timestamp_millis(self.last_seen_ms).ok_or_else(|| {
            AriaError::Store(format!("invalid last-seen time {}", self.last_seen_ms))
        })?;
        Ok(SessionRecord {
            key: self.key,
            name: self.name,
            name_localized: self.name_localized,
            score: self.score,
            geo_prior: self.geo_prior,
            started_at,
            last_seen_at,
            clip_ids,
        })
    }
}

impl EventStore for SqliteStore {
    fn put_audio_clip(&self, clip: &EncodedClip) -> Result<ClipId> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO audio (bytes, mime, sample_rate, bitrate) VALUES (?1, ?2, ?3, ?4)",
            params![clip.bytes, clip.mime, clip.sample_rate, clip.bitrate],
        )
        .map_err(store_err)?;
        Ok(conn.last_insert_rowid())
    }

    fn create_session(&self, session: &NewSession) -> Result<SessionKey> {
        let clip_ids_json = serde_json::to_string(&session.clip_ids).map_err(store_err)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO birds (name, name_localized, score, geo_prior, time, last_seen, clip_ids)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6)",
            params![
                session.name,
                session.name_localized,
                session.score,
                session.geo_prior,
                session.started_at.timestamp_millis(),
                clip_ids_json,
            ],
        )
        .map_err(store_err)?;
        Ok(conn.last_insert_rowid())
    }

    fn append_clip_to_session(
        &self,
        key: SessionKey,
        clip: ClipId,
        score: f32,
        seen_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn
            .execute(
                "UPDATE birds SET
                   clip_ids = json_insert(clip_ids, '$[#]', ?2),
                   score = MAX(score, ?3),
                   last_seen = ?4
                 WHERE key = ?1",
                params![key, clip, score, seen_at.timestamp_millis()],
            )
            .map_err(store_err)?;
        if updated == 0 {
            return Err(AriaError::Store(format!("session {key} not found")));
        }
        Ok(())
    }

    fn get_session(&self, key: SessionKey) -> Result<Option<SessionRecord>> {
        let sessions = self.query_sessions(
            &format!("SELECT {SESSION_COLUMNS} FROM birds WHERE key = ?1"),
            &[&key],
        )?;
        Ok(sessions.into_iter().next())
    }

    fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        self.query_sessions(
            &format!("SELECT {SESSION_COLUMNS} FROM birds ORDER BY time DESC, key DESC"),
            &[],
        )
    }

    fn find_sessions_by_name(&self, name: &str) -> Result<Vec<SessionRecord>> {
        self.query_sessions(
            &format!(
                "SELECT {SESSION_COLUMNS} FROM birds WHERE name = ?1 ORDER BY time DESC, key DESC"
            ),
            &[&name],
        )
    }

    fn sessions_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SessionRecord>> {
        self.query_sessions(
            &format!(
                "SELECT {SESSION_COLUMNS} FROM birds
                 WHERE time >= ?1 AND time < ?2 ORDER BY time ASC, key ASC"
            ),
            &[&from.timestamp_millis(), &to.timestamp_millis()],
        )
    }
}
