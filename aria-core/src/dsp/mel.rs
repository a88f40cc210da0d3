//! Slaney-scale mel filterbank builder.
//!
//! The filterbank is always *supplied* to the extractor as configuration;
//! this helper builds the matrix the published BirdNET frontend uses
//! (triangular filters on the Slaney mel scale, area-normalized).

use ndarray::Array2;

/// Build a `[half_bins × mel_bins]` triangular filterbank.
///
/// `half_bins` must be `fft_size / 2 + 1` for the FFT the spectra come from;
/// `fmin`/`fmax` bound the covered band in Hz.
pub fn build_mel_filterbank(
    half_bins: usize,
    mel_bins: usize,
    fmin: f32,
    fmax: f32,
    sample_rate: u32,
) -> Array2<f32> {
    let fft_size = (half_bins - 1) * 2;
    let mel_min = hz_to_mel_slaney(fmin);
    let mel_max = hz_to_mel_slaney(fmax);

    let hz_pts: Vec<f32> = (0..=(mel_bins + 1))
        .map(|i| mel_min + (mel_max - mel_min) * i as f32 / (mel_bins + 1) as f32)
        .map(mel_to_hz_slaney)
        .collect();

    let fft_freqs: Vec<f32> = (0..half_bins)
        .map(|k| k as f32 * sample_rate as f32 / fft_size as f32)
        .collect();

    let mut filters = Array2::<f32>::zeros((half_bins, mel_bins));
    for m in 0..mel_bins {
        let lower = hz_pts[m];
        let center = hz_pts[m + 1];
        let upper = hz_pts[m + 2];
        let down_denom = (center - lower).max(1e-10);
        let up_denom = (upper - center).max(1e-10);
        let enorm = 2.0 / (upper - lower).max(1e-10);

        for (k, &freq) in fft_freqs.iter().enumerate() {
            let w = if freq >= lower && freq <= center {
                (freq - lower) / down_denom
            } else if freq > center && freq <= upper {
                (upper - freq) / up_denom
            } else {
                0.0
            };
            filters[[k, m]] = (w * enorm).max(0.0);
        }
    }
    filters
}

fn hz_to_mel_slaney(hz: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1_000.0;
    let min_log_mel = min_log_hz / f_sp; // 15
    let logstep = (6.4_f32).ln() / 27.0;
    if hz >= min_log_hz {
        min_log_mel + (hz / min_log_hz).ln() / logstep
    } else {
        hz / f_sp
    }
}

fn mel_to_hz_slaney(mel: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1_000.0;
    let min_log_mel = min_log_hz / f_sp; // 15
    let logstep = (6.4_f32).ln() / 27.0;
    if mel >= min_log_mel {
        min_log_hz * (logstep * (mel - min_log_mel)).exp()
    } else {
        mel * f_sp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mel_scale_round_trips() {
        use approx::assert_abs_diff_eq;

        for hz in [0.0f32, 120.0, 999.0, 1_000.0, 4_500.0, 15_000.0] {
            let back = mel_to_hz_slaney(hz_to_mel_slaney(hz));
            assert_abs_diff_eq!(back, hz, epsilon = 0.5);
        }
    }

    #[test]
    fn filterbank_has_expected_shape_and_coverage() {
        let fb = build_mel_filterbank(1025, 96, 0.0, 15_000.0, 48_000);
        assert_eq!(fb.dim(), (1025, 96));
        assert!(fb.iter().all(|&w| w >= 0.0));
        // every mel band has at least one contributing FFT bin
        for m in 0..96 {
            let col_sum: f32 = fb.column(m).sum();
            assert!(col_sum > 0.0, "mel band {m} is empty");
        }
        // bins above fmax contribute nothing
        let nyquist_row: f32 = fb.row(1024).sum();
        assert_eq!(nyquist_row, 0.0);
    }
}
