//! Spectral feature extraction.
//!
//! One `AudioFrame` becomes one compressed mel spectrogram:
//!
//! ```text
//! normalize → frame → Hann window → real FFT → mel projection
//!           → power-law compression → orientation fix-up
//! ```
//!
//! The three heavy primitives go through [`ComputeBackend`]; everything else
//! is cheap per-element work done here.

pub mod backend;
pub mod fft;
pub mod mel;

pub use backend::{ComputeBackend, CpuBackend};
pub use fft::RealFft;
pub use mel::build_mel_filterbank;

use ndarray::{s, Array2};

use crate::buffering::frame::AudioFrame;
use crate::error::{AriaError, Result};

/// Compressed mel spectrogram, `[mel_bins × time_frames]`.
#[derive(Debug, Clone)]
pub struct Spectrogram {
    pub mel: Array2<f32>,
}

impl Spectrogram {
    pub fn mel_bins(&self) -> usize {
        self.mel.nrows()
    }

    pub fn time_frames(&self) -> usize {
        self.mel.ncols()
    }
}

/// Feature extractor configuration. The filterbank and the compression
/// scalar come from the classifier's training setup and are supplied, not
/// derived.
#[derive(Debug, Clone)]
pub struct SpectrogramConfig {
    /// Sub-frame length in samples. Must be a power of two.
    pub frame_length: usize,
    /// Hop between sub-frames in samples.
    pub frame_step: usize,
    /// `[frame_length/2 + 1 × mel_bins]` projection matrix.
    pub mel_filterbank: Array2<f32>,
    /// Learned compression scalar; the effective exponent is
    /// `1 / (1 + exp(magnitude_scaling))`.
    pub magnitude_scaling: f32,
}

impl SpectrogramConfig {
    /// Shape used by the published BirdNET frontend: 2048-sample sub-frames,
    /// hop 278, 96 Slaney mel bands over 0 Hz–15 kHz.
    pub fn birdnet_default(sample_rate: u32) -> Self {
        Self {
            frame_length: 2048,
            frame_step: 278,
            mel_filterbank: build_mel_filterbank(1025, 96, 0.0, 15_000.0, sample_rate),
            magnitude_scaling: 1.23,
        }
    }

    /// Fail fast on shapes the pipeline cannot process.
    pub fn validate(&self) -> Result<()> {
        if self.frame_length < 4 || !self.frame_length.is_power_of_two() {
            return Err(AriaError::Config(format!(
                "frame_length must be a power of two >= 4, got {}",
                self.frame_length
            )));
        }
        if self.frame_step == 0 {
            return Err(AriaError::Config("frame_step must be non-zero".into()));
        }
        let half_bins = self.frame_length / 2 + 1;
        if self.mel_filterbank.nrows() != half_bins {
            return Err(AriaError::Config(format!(
                "mel filterbank has {} rows, expected {} for frame_length {}",
                self.mel_filterbank.nrows(),
                half_bins,
                self.frame_length
            )));
        }
        if self.mel_filterbank.ncols() == 0 {
            return Err(AriaError::Config(
                "mel filterbank must have at least one band".into(),
            ));
        }
        Ok(())
    }
}

pub struct SpectralExtractor {
    config: SpectrogramConfig,
    backend: Box<dyn ComputeBackend>,
    window: Vec<f32>,
    /// Precomputed `1 / (1 + exp(magnitude_scaling))`.
    compression: f32,
}

impl SpectralExtractor {
    pub fn new(config: SpectrogramConfig, backend: Box<dyn ComputeBackend>) -> Result<Self> {
        config.validate()?;
        let window = build_hann_window(config.frame_length);
        let compression = 1.0 / (1.0 + config.magnitude_scaling.exp());
        Ok(Self {
            config,
            backend,
            window,
            compression,
        })
    }

    pub fn config(&self) -> &SpectrogramConfig {
        &self.config
    }

    /// Turn one analysis frame into a `[mel_bins × time_frames]` spectrogram.
    pub fn extract(&self, frame: &AudioFrame) -> Result<Spectrogram> {
        if frame.len() < self.config.frame_length {
            return Err(AriaError::Config(format!(
                "analysis frame of {} samples is shorter than frame_length {}",
                frame.len(),
                self.config.frame_length
            )));
        }

        let normalized = normalize(&frame.samples);

        let mut framed =
            self.backend
                .frame(&normalized, self.config.frame_length, self.config.frame_step);
        for mut row in framed.rows_mut() {
            for (x, w) in row.iter_mut().zip(&self.window) {
                *x *= w;
            }
        }

        let spectra = self.backend.real_fft(&framed)?;
        let mut mel = self
            .backend
            .mel_project(&spectra, &self.config.mel_filterbank);

        for x in mel.iter_mut() {
            *x = (*x * *x).powf(self.compression);
        }

        // reverse the mel axis, then transpose to [mel_bins × time_frames]
        let oriented = mel.slice(s![.., ..;-1]).t().to_owned();
        Ok(Spectrogram { mel: oriented })
    }
}

/// Min/max normalize to [-1, 1]: `((x - min) / (max - min + 1e-6) - 0.5) * 2`.
/// A constant frame maps to all -1 (the epsilon keeps the division finite).
pub fn normalize(samples: &[f32]) -> Vec<f32> {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &s in samples {
        min = min.min(s);
        max = max.max(s);
    }
    let span = (max - min) + 1e-6;
    samples
        .iter()
        .map(|&s| ((s - min) / span - 0.5) * 2.0)
        .collect()
}

/// Hann window of length `n`: `0.5 - 0.5 * cos(2π i / n)`.
pub fn build_hann_window(n: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n as f32).cos()))
        .collect()
}
