//! Radix-2 real FFT via the packed half-size complex transform.
//!
//! The windowed real sub-frame of length `N` is packed into a complex signal
//! of length `N/2` (even samples → real parts, odd samples → imaginary
//! parts), transformed with an iterative decimation-in-time FFT, then the
//! standard odd/even recombination recovers the real components of the
//! non-redundant half-spectrum (`N/2 + 1` outputs). No library FFT primitive
//! is used; `rustfft` appears only as a dev-dependency reference in tests.

use std::f32::consts::PI;

use crate::error::{AriaError, Result};

pub struct RealFft {
    frame_length: usize,
    /// `frame_length / 2` — length of the packed complex transform.
    inner_dim: usize,
    /// Bit-reversed index permutation over `log2(inner_dim)` bits.
    bit_rev: Vec<usize>,
    re: Vec<f32>,
    im: Vec<f32>,
}

impl RealFft {
    /// # Errors
    /// `AriaError::Config` when `frame_length` is not a power of two >= 4
    /// (the packed transform needs a power-of-two inner dimension).
    pub fn new(frame_length: usize) -> Result<Self> {
        if frame_length < 4 || !frame_length.is_power_of_two() {
            return Err(AriaError::Config(format!(
                "FFT frame length must be a power of two >= 4, got {frame_length}"
            )));
        }
        let inner_dim = frame_length / 2;
        let bits = inner_dim.trailing_zeros();
        let bit_rev = (0..inner_dim)
            .map(|p| {
                let mut k = 0usize;
                for i in 0..bits {
                    if p & (1 << i) != 0 {
                        k |= 1 << (bits - 1 - i);
                    }
                }
                k
            })
            .collect();

        Ok(Self {
            frame_length,
            inner_dim,
            bit_rev,
            re: vec![0.0; inner_dim],
            im: vec![0.0; inner_dim],
        })
    }

    pub fn frame_length(&self) -> usize {
        self.frame_length
    }

    /// Number of half-spectrum outputs: `frame_length / 2 + 1`.
    pub fn output_len(&self) -> usize {
        self.inner_dim + 1
    }

    /// Transform one windowed sub-frame of `frame_length` real samples into
    /// the real components of its half-spectrum.
    ///
    /// `out` must have length `output_len()`.
    pub fn process(&mut self, input: &[f32], out: &mut [f32]) {
        debug_assert_eq!(input.len(), self.frame_length);
        debug_assert_eq!(out.len(), self.inner_dim + 1);

        let n = self.inner_dim;

        // Stage 0: pack even/odd samples as a complex signal, bit-reversed.
        for (p, &src) in self.bit_rev.iter().enumerate() {
            self.re[p] = input[2 * src];
            self.im[p] = input[2 * src + 1];
        }

        // Iterative DIT butterflies on the packed complex signal.
        let mut len = 1;
        while len < n {
            let mut base = 0;
            while base < n {
                for j in 0..len {
                    let t = PI * j as f32 / len as f32;
                    let (a, b) = (t.cos(), -t.sin());
                    let lo = base + j;
                    let hi = lo + len;
                    let tr = self.re[hi] * a - self.im[hi] * b;
                    let ti = self.re[hi] * b + self.im[hi] * a;
                    self.re[hi] = self.re[lo] - tr;
                    self.im[hi] = self.im[lo] - ti;
                    self.re[lo] += tr;
                    self.im[lo] += ti;
                }
                base += 2 * len;
            }
            len *= 2;
        }

        // Odd/even recombination: out[k] = Re X[k] of the full real FFT.
        for (k, slot) in out.iter_mut().enumerate() {
            let zi = k % n;
            let ci = (n - k) % n;
            let t = -PI * k as f32 / n as f32;
            *slot = 0.5
                * (self.re[zi]
                    + self.re[ci]
                    + t.cos() * (self.im[zi] + self.im[ci])
                    + t.sin() * (self.re[zi] - self.re[ci]));
        }
    }
}
