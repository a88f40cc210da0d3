//! # aria-core
//!
//! Always-on bird-call listening engine: continuous microphone capture,
//! spectral feature extraction, classification, and detection-session
//! persistence, with live events broadcast to UI collaborators.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   cpal callback    ┌──────────────────┐
//! │ Microphone │ ─────────────────► │ SPSC ring buffer │
//! └────────────┘  (wait-free push)  └────────┬─────────┘
//!                                            │ drain thread
//!                                            ▼
//!                                   ┌─────────────────┐
//!                                   │ FrameAssembler  │  3 s analysis frames
//!                                   └────────┬────────┘
//!                                            │ bounded(1), blocking send
//!                                            ▼
//!                 ┌──────────────────────────────────────────────┐
//!                 │ frame worker                                 │
//!                 │  extract → classify → gate → merge → persist │
//!                 └──────────────────────┬───────────────────────┘
//!                                        │ broadcast
//!                                        ▼
//!                         DetectionEvent / AudioActivityEvent
//! ```
//!
//! The frame worker is single-threaded on purpose: frames finish strictly in
//! order, which is what the session merger's consecutive-frame semantics
//! require. Backpressure is the depth-1 queue plus the ~87 s ring buffer;
//! no audio is dropped until the ring itself overflows.
//!
//! ## Collaborators
//!
//! The engine core is UI-agnostic. A desktop shell, CLI, or service wraps
//! [`AriaEngine`], supplies a [`BirdClassifier`] backend and an [`EventStore`],
//! and subscribes to the broadcast channels.

#![deny(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod classify;
pub mod clip;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod events;
pub mod session;
pub mod store;

pub use classify::{gate::GateConfig, BirdClassifier, ClassifierHandle, LabelTable};
pub use engine::{AriaEngine, ListenerConfig};
pub use error::{AriaError, Result};
pub use events::{
    AudioActivityEvent, DetectionEvent, DetectionSummary, EngineStatus, EngineStatusEvent,
};
pub use store::{EventStore, SessionRecord, SqliteStore};
