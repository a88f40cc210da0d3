//! Audio capture via cpal backend.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It **must not**:
//! - Allocate heap memory
//! - Block on a mutex or condvar
//! - Perform I/O
//!
//! This module satisfies that contract by writing directly into an SPSC ring
//! buffer producer whose `push_slice` is lock-free and allocation-free.
//!
//! # Sample-rate policy
//!
//! The analysis frame length and the classifier frontend are both derived
//! from the configured sample rate, so capture must happen at exactly that
//! rate. A device that cannot honor it fails with
//! `AriaError::UnsupportedSampleRate` — never silent resampling.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). `AudioCapture` therefore must be created and dropped on the same
//! thread. The engine accomplishes this by opening it inside `spawn_blocking`.

pub mod device;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};

#[cfg(feature = "audio-cpal")]
use crate::buffering::Producer;
use crate::{
    buffering::AudioProducer,
    error::{AriaError, Result},
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

/// Handle to an active audio capture stream.
///
/// **Not `Send`** — `cpal::Stream` is bound to its creation thread on
/// Windows/macOS. Create and drop this type on the same OS thread.
pub struct AudioCapture {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Shared flag — set to `false` to signal the callback to no-op.
    running: Arc<AtomicBool>,
    /// Capture sample rate (Hz); always the requested rate.
    pub sample_rate: u32,
}

impl AudioCapture {
    /// Open an input device by preferred name (falling back to the default
    /// input device) at exactly `requested_sample_rate`.
    ///
    /// # Errors
    /// - `AriaError::NoDefaultInputDevice` when no microphone is available.
    /// - `AriaError::UnsupportedSampleRate` when the device cannot capture
    ///   at the requested rate.
    /// - `AriaError::AudioStream` if cpal fails to build or play the stream.
    #[cfg(feature = "audio-cpal")]
    pub fn open_with_preference(
        mut producer: AudioProducer,
        running: Arc<AtomicBool>,
        requested_sample_rate: u32,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();
        let mut selected_device = None;

        if let Some(preferred_name) = preferred_device_name {
            match host.input_devices() {
                Ok(mut devices) => {
                    selected_device = devices.find(|device| {
                        device
                            .name()
                            .map(|name| name == preferred_name)
                            .unwrap_or(false)
                    });
                    if selected_device.is_none() {
                        warn!(
                            "preferred input device '{}' not found, falling back",
                            preferred_name
                        );
                    }
                }
                Err(e) => {
                    warn!("failed to list input devices while resolving preference: {e}");
                }
            }
        }

        let device = match selected_device.or_else(|| host.default_input_device()) {
            Some(device) => device,
            None => return Err(AriaError::NoDefaultInputDevice),
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            requested_sample_rate, "opening input device"
        );

        // Only configs that span the requested rate qualify; no resampling.
        let mut ranges = device
            .supported_input_configs()
            .map_err(|e| AriaError::AudioDevice(e.to_string()))?;
        let range = ranges
            .find(|r| {
                r.min_sample_rate().0 <= requested_sample_rate
                    && requested_sample_rate <= r.max_sample_rate().0
                    && matches!(r.sample_format(), SampleFormat::F32 | SampleFormat::I16)
            })
            .ok_or(AriaError::UnsupportedSampleRate {
                requested: requested_sample_rate,
            })?;

        let supported = range.with_sample_rate(SampleRate(requested_sample_rate));
        let channels = supported.channels();
        let sample_format = supported.sample_format();

        info!(
            sample_rate = requested_sample_rate,
            channels,
            ?sample_format,
            "audio config selected"
        );

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(requested_sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let running_f32 = Arc::clone(&running);
        let running_i16 = Arc::clone(&running);

        let stream = match sample_format {
            SampleFormat::F32 => {
                let ch = channels as usize;
                let mut mix_buf: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _info| {
                        if !running_f32.load(Ordering::Relaxed) {
                            return;
                        }
                        if ch == 1 {
                            let written = producer.push_slice(data);
                            if written < data.len() {
                                warn!(
                                    "ring buffer full: dropped {} f32 frames",
                                    data.len() - written
                                );
                            }
                            return;
                        }

                        let frames = data.len() / ch;
                        mix_buf.resize(frames, 0.0);
                        for f in 0..frames {
                            let mut sum = 0f32;
                            let base = f * ch;
                            for c in 0..ch {
                                sum += data[base + c];
                            }
                            mix_buf[f] = sum / ch as f32;
                        }
                        let written = producer.push_slice(&mix_buf);
                        if written < mix_buf.len() {
                            warn!(
                                "ring buffer full: dropped {} f32 frames",
                                mix_buf.len() - written
                            );
                        }
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }

            SampleFormat::I16 => {
                let ch = channels as usize;
                let mut mix_buf: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _info| {
                        if !running_i16.load(Ordering::Relaxed) {
                            return;
                        }
                        let frames = data.len() / ch;
                        mix_buf.resize(frames, 0.0);
                        if ch == 1 {
                            for (idx, sample) in data.iter().take(frames).enumerate() {
                                mix_buf[idx] = *sample as f32 / 32768.0;
                            }
                        } else {
                            for f in 0..frames {
                                let mut sum = 0f32;
                                let base = f * ch;
                                for c in 0..ch {
                                    sum += data[base + c] as f32 / 32768.0;
                                }
                                mix_buf[f] = sum / ch as f32;
                            }
                        }
                        let written = producer.push_slice(&mix_buf);
                        if written < mix_buf.len() {
                            warn!(
                                "ring buffer full: dropped {} i16 frames",
                                mix_buf.len() - written
                            );
                        }
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }

            fmt => {
                return Err(AriaError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| AriaError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AriaError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate: requested_sample_rate,
        })
    }

    /// Open the system default microphone at exactly `requested_sample_rate`.
    ///
    /// Must be called from the thread that will also drop this value, i.e.
    /// inside `tokio::task::spawn_blocking`.
    #[cfg(feature = "audio-cpal")]
    pub fn open_default(
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        requested_sample_rate: u32,
    ) -> Result<Self> {
        Self::open_with_preference(producer, running, requested_sample_rate, None)
    }

    /// Stop: signal the callback to no-op on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioCapture {
    pub fn open_with_preference(
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
        _requested_sample_rate: u32,
        _preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        Err(AriaError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    pub fn open_default(
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        requested_sample_rate: u32,
    ) -> Result<Self> {
        Self::open_with_preference(producer, running, requested_sample_rate, None)
    }
}
