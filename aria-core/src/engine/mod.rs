//! `AriaEngine` — the listening engine facade.
//!
//! Owns the configuration, the classifier handle, the label table, and the
//! event store; starting a listening session wires them into one blocking
//! pipeline running on a `spawn_blocking` thread. The cpal stream is opened
//! on that same thread because `cpal::Stream` is not `Send`.

pub mod pipeline;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::{
    audio::AudioCapture,
    buffering::create_audio_ring,
    classify::{gate::GateConfig, ClassifierHandle, LabelTable},
    clip::{negotiate_encoder, ClipCodec, DEFAULT_CODEC_PREFERENCE},
    dsp::{CpuBackend, SpectralExtractor, SpectrogramConfig},
    error::{AriaError, Result},
    events::{AudioActivityEvent, DetectionEvent, EngineStatus, EngineStatusEvent},
    store::EventStore,
};

use pipeline::{DiagnosticsSnapshot, PipelineContext, PipelineDiagnostics};

/// Broadcast channel capacity for engine events.
const BROADCAST_CAP: usize = 256;

/// Everything a listening session needs decided up front.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Capture sample rate in Hz. The device must support it exactly.
    pub sample_rate: u32,
    /// Analysis frame length in seconds of audio.
    pub frame_seconds: u32,
    /// Detection gate thresholds.
    pub gate: GateConfig,
    /// Clip codecs in preference order; the first supported one wins.
    pub codec_preference: Vec<ClipCodec>,
    /// Target bitrate for compressed clip codecs, in bits per second.
    pub clip_bitrate: u32,
    /// Spectral frontend shape. Must match what the classifier was trained on.
    pub spectrogram: SpectrogramConfig,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        let sample_rate = 48_000;
        Self {
            sample_rate,
            frame_seconds: 3,
            gate: GateConfig::default(),
            codec_preference: DEFAULT_CODEC_PREFERENCE.to_vec(),
            clip_bitrate: 96_000,
            spectrogram: SpectrogramConfig::birdnet_default(sample_rate),
        }
    }
}

impl ListenerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(AriaError::Config("sample_rate must be non-zero".into()));
        }
        if self.frame_seconds == 0 {
            return Err(AriaError::Config("frame_seconds must be non-zero".into()));
        }
        self.spectrogram.validate()?;
        let frame_len = self.frame_seconds as usize * self.sample_rate as usize;
        if frame_len < self.spectrogram.frame_length {
            return Err(AriaError::Config(format!(
                "analysis frame of {frame_len} samples is shorter than the \
                 spectral frame_length {}",
                self.spectrogram.frame_length
            )));
        }
        Ok(())
    }
}

pub struct AriaEngine {
    config: ListenerConfig,
    classifier: ClassifierHandle,
    labels: Arc<LabelTable>,
    store: Arc<dyn EventStore>,
    running: Arc<AtomicBool>,
    status: Arc<Mutex<EngineStatus>>,
    detection_tx: broadcast::Sender<DetectionEvent>,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    activity_tx: broadcast::Sender<AudioActivityEvent>,
    seq: Arc<AtomicU64>,
    diagnostics: Arc<PipelineDiagnostics>,
}

impl AriaEngine {
    pub fn new(
        config: ListenerConfig,
        classifier: ClassifierHandle,
        labels: Arc<LabelTable>,
        store: Arc<dyn EventStore>,
    ) -> Self {
        let (detection_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (activity_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            config,
            classifier,
            labels,
            store,
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(EngineStatus::Idle)),
            detection_tx,
            status_tx,
            activity_tx,
            seq: Arc::new(AtomicU64::new(0)),
            diagnostics: Arc::new(PipelineDiagnostics::default()),
        }
    }

    /// One-time classifier warm-up. Call before `start` so the first real
    /// frame is not delayed by model loading.
    pub fn warm_up(&self) -> Result<()> {
        self.set_status(EngineStatus::WarmingUp, None);
        let result = self.classifier.0.lock().warm_up();
        match &result {
            Ok(()) => self.set_status(EngineStatus::Idle, None),
            Err(e) => self.set_status(EngineStatus::Error, Some(e.to_string())),
        }
        result
    }

    /// Start listening on the default input device.
    pub async fn start(&self) -> Result<()> {
        self.start_with_device(None).await
    }

    /// Start listening, optionally on a named input device.
    ///
    /// Returns once the capture stream is confirmed open (or failed to open);
    /// from then on the pipeline runs on a blocking thread until [`stop`].
    ///
    /// [`stop`]: AriaEngine::stop
    pub async fn start_with_device(&self, device_name: Option<String>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AriaError::AlreadyRunning);
        }
        self.config.validate().inspect_err(|_| {
            self.running.store(false, Ordering::SeqCst);
        })?;

        // Fail synchronously on config-level problems before any thread spawns.
        let extractor =
            match SpectralExtractor::new(self.config.spectrogram.clone(), Box::new(CpuBackend)) {
                Ok(e) => e,
                Err(e) => {
                    self.running.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            };
        let encoder =
            match negotiate_encoder(&self.config.codec_preference, self.config.clip_bitrate) {
                Ok(e) => e,
                Err(e) => {
                    self.running.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            };

        self.diagnostics.reset();
        let (producer, consumer) = create_audio_ring();

        let ctx = PipelineContext {
            config: self.config.clone(),
            extractor,
            encoder,
            classifier: self.classifier.clone(),
            labels: Arc::clone(&self.labels),
            store: Arc::clone(&self.store),
            consumer,
            running: Arc::clone(&self.running),
            detection_tx: self.detection_tx.clone(),
            activity_tx: self.activity_tx.clone(),
            seq: Arc::clone(&self.seq),
            capture_sample_rate: self.config.sample_rate,
            diagnostics: Arc::clone(&self.diagnostics),
        };

        // The pipeline thread confirms (or refuses) the capture open through
        // this one-shot channel before settling into its drain loop.
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();
        let running = Arc::clone(&self.running);
        let requested_rate = self.config.sample_rate;

        tokio::task::spawn_blocking(move || {
            // cpal::Stream is !Send, so open and drop it on this thread
            let capture = match AudioCapture::open_with_preference(
                producer,
                Arc::clone(&running),
                requested_rate,
                device_name.as_deref(),
            ) {
                Ok(capture) => {
                    let _ = open_tx.send(Ok(capture.sample_rate));
                    capture
                }
                Err(e) => {
                    running.store(false, Ordering::SeqCst);
                    let _ = open_tx.send(Err(e));
                    return;
                }
            };

            pipeline::run(ctx);

            capture.stop();
            drop(capture);
            info!("capture stream closed");
        });

        match open_rx.recv() {
            Ok(Ok(rate)) => {
                info!(sample_rate = rate, "listening started");
                self.set_status(EngineStatus::Listening, None);
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(error = %e, "failed to open capture stream");
                self.set_status(EngineStatus::Error, Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                error!("pipeline task died before confirming capture open");
                self.set_status(EngineStatus::Error, None);
                Err(AriaError::Other(anyhow::anyhow!(
                    "pipeline task died unexpectedly"
                )))
            }
        }
    }

    /// Stop listening. The pipeline finishes its in-flight frame; audio still
    /// buffered but not yet framed is discarded.
    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(AriaError::NotRunning);
        }
        self.set_status(EngineStatus::Stopped, None);
        info!("stop requested");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    pub fn subscribe_detections(&self) -> broadcast::Receiver<DetectionEvent> {
        self.detection_tx.subscribe()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_activity(&self) -> broadcast::Receiver<AudioActivityEvent> {
        self.activity_tx.subscribe()
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn pipeline_diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    fn set_status(&self, status: EngineStatus, detail: Option<String>) {
        *self.status.lock() = status;
        let _ = self.status_tx.send(EngineStatusEvent { status, detail });
    }
}
