//! Event types broadcast to UI collaborators.
//!
//! ## Channels
//!
//! | Event | Purpose |
//! |-------|---------|
//! | `DetectionEvent` | accepted detections for one analysis frame |
//! | `EngineStatusEvent` | lifecycle state changes |
//! | `AudioActivityEvent` | per-chunk input level for the live meter |

use serde::{Deserialize, Serialize};

use crate::store::SessionKey;

// ---------------------------------------------------------------------------
// Detection events
// ---------------------------------------------------------------------------

/// Emitted once per analysis frame that produced at least one committed detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Detections committed to the store for this frame.
    pub detections: Vec<DetectionSummary>,
}

/// One accepted detection, with the session it was merged into.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionSummary {
    /// Scientific name from the label table.
    pub name: String,
    /// Localized display name.
    pub name_localized: String,
    /// Classifier score in [0.0, 1.0].
    pub score: f32,
    /// Geo-prior for the label, if a prior table was supplied.
    pub geo_prior: Option<f32>,
    /// Store key of the session this detection extended or opened.
    pub session_key: SessionKey,
    /// `true` when this detection opened a new session.
    pub new_session: bool,
}

// ---------------------------------------------------------------------------
// Audio activity events
// ---------------------------------------------------------------------------

/// Emitted for each drained audio chunk, for the UI level strip.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioActivityEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Root-mean-square level of the chunk in [0.0, 1.0].
    pub rms: f32,
}

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

/// Emitted when the engine state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of the Aria engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Engine created but `start()` not yet called.
    Idle,
    /// Warming up the classifier (loading weights, dummy inference).
    WarmingUp,
    /// Actively capturing audio and classifying frames.
    Listening,
    /// Capture stopped; engine may be restarted.
    Stopped,
    /// Unrecoverable error — restart required.
    Error,
}
