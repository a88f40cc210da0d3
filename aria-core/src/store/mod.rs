//! Event store contract — sessions and the audio clips backing them.
//!
//! The pipeline only depends on this trait; `SqliteStore` is the shipped
//! implementation. All writes for one session update go through a single
//! call so each update is logically atomic per session (cross-session
//! atomicity is not required).

pub mod sqlite;

pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Auto-incrementing id of a persisted audio clip.
pub type ClipId = i64;

/// Auto-incrementing key of a persisted session.
pub type SessionKey = i64;

/// An immutable encoded audio blob plus its codec metadata.
#[derive(Debug, Clone)]
pub struct EncodedClip {
    pub bytes: Vec<u8>,
    /// MIME type, e.g. `"audio/wav"` or `"audio/ogg; codecs=opus"`.
    pub mime: String,
    pub sample_rate: u32,
    /// Encoded bitrate in bits per second.
    pub bitrate: u32,
}

/// Fields for a session being opened.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub name: String,
    pub name_localized: String,
    pub score: f32,
    pub geo_prior: Option<f32>,
    pub started_at: DateTime<Utc>,
    /// Initial clip list; may include the previous frame's clip so the call
    /// onset is not clipped.
    pub clip_ids: Vec<ClipId>,
}

/// A persisted session as read back from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub key: SessionKey,
    pub name: String,
    pub name_localized: String,
    /// Peak score across all frames that extended the session.
    pub score: f32,
    pub geo_prior: Option<f32>,
    pub started_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub clip_ids: Vec<ClipId>,
}

pub trait EventStore: Send + Sync {
    /// Persist one encoded clip and return its id.
    fn put_audio_clip(&self, clip: &EncodedClip) -> Result<ClipId>;

    /// Open a new session and return its key.
    fn create_session(&self, session: &NewSession) -> Result<SessionKey>;

    /// Append a clip to an open session, updating the peak score and
    /// last-seen time in the same logical update.
    fn append_clip_to_session(
        &self,
        key: SessionKey,
        clip: ClipId,
        score: f32,
        seen_at: DateTime<Utc>,
    ) -> Result<()>;

    fn get_session(&self, key: SessionKey) -> Result<Option<SessionRecord>>;

    /// All sessions, most recent first.
    fn list_sessions(&self) -> Result<Vec<SessionRecord>>;

    /// Sessions for one scientific name, most recent first.
    fn find_sessions_by_name(&self, name: &str) -> Result<Vec<SessionRecord>>;

    /// Sessions started within `[from, to)`, oldest first.
    fn sessions_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SessionRecord>>;
}
