//! Pluggable compute backend for the spectral primitives.
//!
//! The extractor depends only on this interface; `CpuBackend` is the
//! portable single-threaded implementation. An accelerated backend would
//! implement the same three primitives.

use ndarray::{Array2, ArrayView1};

use crate::dsp::fft::RealFft;
use crate::error::Result;

pub trait ComputeBackend: Send {
    /// Slice `signal` into overlapping sub-frames: row `b`, column `i` maps
    /// to `signal[b * frame_step + i]`. Yields
    /// `(len - frame_length + frame_step) / frame_step` rows.
    ///
    /// Precondition: `signal.len() >= frame_length` (validated by the caller).
    fn frame(&self, signal: &[f32], frame_length: usize, frame_step: usize) -> Array2<f32>;

    /// Real half-spectrum per row: `frame_length / 2 + 1` outputs each.
    ///
    /// # Errors
    /// `AriaError::Config` when the row length is not a power of two.
    fn real_fft(&self, frames: &Array2<f32>) -> Result<Array2<f32>>;

    /// Project `[time × half_bins]` spectra through a `[half_bins × mel_bins]`
    /// filterbank.
    fn mel_project(&self, spectra: &Array2<f32>, filterbank: &Array2<f32>) -> Array2<f32>;
}

/// Portable single-threaded backend.
#[derive(Debug, Default)]
pub struct CpuBackend;

impl ComputeBackend for CpuBackend {
    fn frame(&self, signal: &[f32], frame_length: usize, frame_step: usize) -> Array2<f32> {
        debug_assert!(signal.len() >= frame_length);
        let count = (signal.len() - frame_length + frame_step) / frame_step;
        let mut out = Array2::<f32>::zeros((count, frame_length));
        for b in 0..count {
            let start = b * frame_step;
            out.row_mut(b)
                .assign(&ArrayView1::from(&signal[start..start + frame_length]));
        }
        out
    }

    fn real_fft(&self, frames: &Array2<f32>) -> Result<Array2<f32>> {
        let frame_length = frames.ncols();
        let mut fft = RealFft::new(frame_length)?;
        let mut out = Array2::<f32>::zeros((frames.nrows(), fft.output_len()));
        let mut spectrum = vec![0f32; fft.output_len()];
        for (row, mut dst) in frames.rows().into_iter().zip(out.rows_mut()) {
            match row.as_slice() {
                Some(input) => fft.process(input, &mut spectrum),
                None => fft.process(&row.to_vec(), &mut spectrum),
            }
            dst.assign(&ArrayView1::from(&spectrum[..]));
        }
        Ok(out)
    }

    fn mel_project(&self, spectra: &Array2<f32>, filterbank: &Array2<f32>) -> Array2<f32> {
        spectra.dot(filterbank)
    }
}
