//! `StubClassifier` — scriptable backend for tests and the fieldtest binary.

use tracing::debug;

use crate::classify::BirdClassifier;
use crate::dsp::Spectrogram;
use crate::error::Result;

/// Plays back a fixed sequence of score vectors, one per `predict` call;
/// after the script runs out it keeps returning all-zero scores.
pub struct StubClassifier {
    label_count: usize,
    script: Vec<Vec<f32>>,
    calls: usize,
}

impl StubClassifier {
    /// A classifier that never detects anything.
    pub fn silent(label_count: usize) -> Self {
        Self {
            label_count,
            script: Vec::new(),
            calls: 0,
        }
    }

    /// Play back `script` in call order. Each entry must have one score per
    /// label; shorter entries are zero-padded.
    pub fn scripted(label_count: usize, script: Vec<Vec<f32>>) -> Self {
        Self {
            label_count,
            script,
            calls: 0,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl BirdClassifier for StubClassifier {
    fn warm_up(&mut self) -> Result<()> {
        debug!("StubClassifier::warm_up — no-op");
        Ok(())
    }

    fn predict(&mut self, spectrogram: &Spectrogram) -> Result<Vec<f32>> {
        debug!(
            mel_bins = spectrogram.mel_bins(),
            time_frames = spectrogram.time_frames(),
            call = self.calls,
            "StubClassifier::predict"
        );
        let mut scores = self
            .script
            .get(self.calls)
            .cloned()
            .unwrap_or_default();
        scores.resize(self.label_count, 0.0);
        self.calls += 1;
        Ok(scores)
    }
}
