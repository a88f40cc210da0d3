//! Session merging — groups consecutive frames' detections of one label into
//! a single call session.
//!
//! The tracker is an explicit value owned by one pipeline run; it is created
//! at listening start and dropped at stop, never ambient state. The open map
//! is rebuilt each frame from that frame's detections only: a label that
//! skips even one frame closes its session, and a later reappearance opens a
//! brand-new one. That restart-on-gap policy is deliberate and kept for
//! behavioral compatibility.

use std::collections::HashMap;

use tracing::warn;

use crate::classify::gate::Detection;
use crate::store::{ClipId, EventStore, NewSession, SessionKey};

/// One detection after merging, with the session it landed in.
#[derive(Debug, Clone)]
pub struct CommittedDetection {
    pub detection: Detection,
    pub session_key: SessionKey,
    /// `true` when this detection opened the session.
    pub new_session: bool,
}

#[derive(Debug, Default)]
pub struct SessionTracker {
    /// Scientific name → open session key, rebuilt every frame.
    open: HashMap<String, SessionKey>,
    /// Clip persisted for the immediately preceding frame, if any. Attached
    /// to newly opened sessions so the call onset is not clipped.
    prev_frame_clip: Option<ClipId>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions currently open.
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Commit one frame's accepted detections against the store.
    ///
    /// `clip` is the clip persisted for this frame (`None` when the frame had
    /// no accepted detections, or when persisting the clip itself failed).
    /// A store failure loses that one session update: the error is logged,
    /// the label is treated as closed, and a future detection opens a fresh
    /// session. The pipeline is never halted from here.
    pub fn commit_frame(
        &mut self,
        detections: &[Detection],
        clip: Option<ClipId>,
        store: &dyn EventStore,
    ) -> Vec<CommittedDetection> {
        let mut next: HashMap<String, SessionKey> = HashMap::new();
        let mut committed = Vec::new();

        for detection in detections {
            let Some(clip_id) = clip else {
                // detections without a backing clip cannot extend anything
                break;
            };

            match self.open.get(&detection.name).copied() {
                Some(key) => {
                    match store.append_clip_to_session(
                        key,
                        clip_id,
                        detection.score,
                        detection.detected_at,
                    ) {
                        Ok(()) => {
                            next.insert(detection.name.clone(), key);
                            committed.push(CommittedDetection {
                                detection: detection.clone(),
                                session_key: key,
                                new_session: false,
                            });
                        }
                        Err(e) => {
                            warn!(
                                name = %detection.name,
                                session_key = key,
                                error = %e,
                                "session update lost; treating session as closed"
                            );
                        }
                    }
                }
                None => {
                    let mut clip_ids = Vec::with_capacity(2);
                    if let Some(prev) = self.prev_frame_clip {
                        clip_ids.push(prev);
                    }
                    clip_ids.push(clip_id);

                    let new_session = NewSession {
                        name: detection.name.clone(),
                        name_localized: detection.name_localized.clone(),
                        score: detection.score,
                        geo_prior: detection.geo_prior,
                        started_at: detection.detected_at,
                        clip_ids,
                    };
                    match store.create_session(&new_session) {
                        Ok(key) => {
                            next.insert(detection.name.clone(), key);
                            committed.push(CommittedDetection {
                                detection: detection.clone(),
                                session_key: key,
                                new_session: true,
                            });
                        }
                        Err(e) => {
                            warn!(
                                name = %detection.name,
                                error = %e,
                                "failed to open session; detection dropped"
                            );
                        }
                    }
                }
            }
        }

        self.open = next;
        self.prev_frame_clip = clip;
        committed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{DateTime, TimeZone, Utc};
    use parking_lot::Mutex;

    use crate::error::{AriaError, Result};
    use crate::store::{EncodedClip, SessionRecord};

    #[derive(Default)]
    struct MemoryStore {
        sessions: Mutex<Vec<SessionRecord>>,
        fail_writes: std::sync::atomic::AtomicBool,
    }

    impl MemoryStore {
        fn fail_next_writes(&self, fail: bool) {
            self.fail_writes
                .store(fail, std::sync::atomic::Ordering::SeqCst);
        }

        fn failing(&self) -> bool {
            self.fail_writes.load(std::sync::atomic::Ordering::SeqCst)
        }

        fn snapshot(&self) -> Vec<SessionRecord> {
            self.sessions.lock().clone()
        }
    }

    impl EventStore for MemoryStore {
        fn put_audio_clip(&self, _clip: &EncodedClip) -> Result<ClipId> {
            unimplemented!("tracker tests persist clips elsewhere")
        }

        fn create_session(&self, session: &NewSession) -> Result<SessionKey> {
            if self.failing() {
                return Err(AriaError::Store("write failed".into()));
            }
            let mut sessions = self.sessions.lock();
            let key = sessions.len() as SessionKey + 1;
            sessions.push(SessionRecord {
                key,
                name: session.name.clone(),
                name_localized: session.name_localized.clone(),
                score: session.score,
                geo_prior: session.geo_prior,
                started_at: session.started_at,
                last_seen_at: session.started_at,
                clip_ids: session.clip_ids.clone(),
            });
            Ok(key)
        }

        fn append_clip_to_session(
            &self,
            key: SessionKey,
            clip: ClipId,
            score: f32,
            seen_at: DateTime<Utc>,
        ) -> Result<()> {
            if self.failing() {
                return Err(AriaError::Store("write failed".into()));
            }
            let mut sessions = self.sessions.lock();
            let session = sessions
                .iter_mut()
                .find(|s| s.key == key)
                .ok_or_else(|| AriaError::Store(format!("session {key} not found")))?;
            session.clip_ids.push(clip);
            session.score = session.score.max(score);
            session.last_seen_at = seen_at;
            Ok(())
        }

        fn get_session(&self, key: SessionKey) -> Result<Option<SessionRecord>> {
            Ok(self.sessions.lock().iter().find(|s| s.key == key).cloned())
        }

        fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
            Ok(self.snapshot())
        }

        fn find_sessions_by_name(&self, name: &str) -> Result<Vec<SessionRecord>> {
            Ok(self
                .snapshot()
                .into_iter()
                .filter(|s| s.name == name)
                .collect())
        }

        fn sessions_between(
            &self,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<Vec<SessionRecord>> {
            Ok(self
                .snapshot()
                .into_iter()
                .filter(|s| s.started_at >= from && s.started_at < to)
                .collect())
        }
    }

    fn detection(name: &str, score: f32, secs: i64) -> Detection {
        Detection {
            label_index: 0,
            name: name.into(),
            name_localized: format!("{name} (en)"),
            score,
            geo_prior: Some(0.5),
            detected_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn one_frame_gap_starts_a_new_session() {
        let store = MemoryStore::default();
        let mut tracker = SessionTracker::new();

        // frames 1, 2, 3: "X" detected; frame 4 and 5: nothing; frame 6: "X" again
        tracker.commit_frame(&[detection("X", 0.9, 1)], Some(101), &store);
        tracker.commit_frame(&[detection("X", 0.95, 2)], Some(102), &store);
        tracker.commit_frame(&[detection("X", 0.8, 3)], Some(103), &store);
        tracker.commit_frame(&[], None, &store);
        tracker.commit_frame(&[], None, &store);
        let committed = tracker.commit_frame(&[detection("X", 0.7, 6)], Some(106), &store);

        let sessions = store.find_sessions_by_name("X").unwrap();
        assert_eq!(sessions.len(), 2, "exactly two sessions for X");

        let first = &sessions[0];
        assert_eq!(first.clip_ids, vec![101, 102, 103]);
        assert_eq!(first.score, 0.95); // peak across frames 1-3
        assert_eq!(first.last_seen_at, Utc.timestamp_opt(3, 0).unwrap());

        let second = &sessions[1];
        assert_eq!(second.clip_ids, vec![106]); // frame 5 persisted no clip
        assert!(committed[0].new_session);
        assert_ne!(first.key, second.key);
    }

    #[test]
    fn new_session_attaches_previous_frame_clip() {
        let store = MemoryStore::default();
        let mut tracker = SessionTracker::new();

        // frame 1 detects only "X"; frame 2 adds "Y" — Y's session should
        // start with frame 1's clip attached before its own
        tracker.commit_frame(&[detection("X", 0.9, 1)], Some(11), &store);
        tracker.commit_frame(
            &[detection("X", 0.9, 2), detection("Y", 0.8, 2)],
            Some(12),
            &store,
        );

        let y_sessions = store.find_sessions_by_name("Y").unwrap();
        assert_eq!(y_sessions.len(), 1);
        assert_eq!(y_sessions[0].clip_ids, vec![11, 12]);

        let x_sessions = store.find_sessions_by_name("X").unwrap();
        assert_eq!(x_sessions[0].clip_ids, vec![11, 12]);
    }

    #[test]
    fn first_session_of_a_run_has_no_onset_clip() {
        let store = MemoryStore::default();
        let mut tracker = SessionTracker::new();
        tracker.commit_frame(&[detection("X", 0.9, 1)], Some(7), &store);

        let sessions = store.list_sessions().unwrap();
        assert_eq!(sessions[0].clip_ids, vec![7]);
    }

    #[test]
    fn store_failure_loses_update_and_treats_session_as_closed() {
        let store = MemoryStore::default();
        let mut tracker = SessionTracker::new();

        tracker.commit_frame(&[detection("X", 0.9, 1)], Some(21), &store);
        assert_eq!(tracker.open_count(), 1);

        store.fail_next_writes(true);
        let committed = tracker.commit_frame(&[detection("X", 0.9, 2)], Some(22), &store);
        assert!(committed.is_empty());
        assert_eq!(tracker.open_count(), 0, "failed update closes the session");

        store.fail_next_writes(false);
        tracker.commit_frame(&[detection("X", 0.9, 3)], Some(23), &store);

        let sessions = store.find_sessions_by_name("X").unwrap();
        assert_eq!(sessions.len(), 2, "a fresh session opens after the failure");
        // the second session still carries the previous frame's clip
        assert_eq!(sessions[1].clip_ids, vec![22, 23]);
    }

    #[test]
    fn multiple_labels_tracked_independently() {
        let store = MemoryStore::default();
        let mut tracker = SessionTracker::new();

        tracker.commit_frame(
            &[detection("X", 0.9, 1), detection("Y", 0.6, 1)],
            Some(1),
            &store,
        );
        // Y drops out, X continues
        let committed = tracker.commit_frame(&[detection("X", 0.5, 2)], Some(2), &store);
        assert_eq!(committed.len(), 1);
        assert!(!committed[0].new_session);
        assert_eq!(tracker.open_count(), 1);

        // Y returns: new session
        let committed = tracker.commit_frame(
            &[detection("X", 0.5, 3), detection("Y", 0.7, 3)],
            Some(3),
            &store,
        );
        assert_eq!(committed.len(), 2);
        assert!(committed.iter().any(|c| c.new_session));
        assert_eq!(store.find_sessions_by_name("Y").unwrap().len(), 2);
    }
}
