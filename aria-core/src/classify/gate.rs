//! Detection gate — turns raw classifier scores into accepted detections.

use chrono::{DateTime, Utc};

use crate::classify::LabelTable;
use crate::error::{AriaError, Result};

/// Gate thresholds. Both comparisons are strict (`>`).
#[derive(Debug, Clone, Copy)]
pub struct GateConfig {
    /// Minimum classifier score. Default: 0.3.
    pub score_threshold: f32,
    /// Minimum geo-prior; labels without a prior are never geo-filtered.
    /// Default: 0.0.
    pub geo_threshold: f32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.3,
            geo_threshold: 0.0,
        }
    }
}

/// One accepted detection for a single analysis frame.
#[derive(Debug, Clone)]
pub struct Detection {
    pub label_index: usize,
    /// Scientific name from the label table.
    pub name: String,
    /// Localized display name.
    pub name_localized: String,
    pub score: f32,
    pub geo_prior: Option<f32>,
    pub detected_at: DateTime<Utc>,
}

pub struct DetectionGate {
    config: GateConfig,
}

impl DetectionGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    /// Accept label `i` iff `scores[i] > score_threshold` and its geo-prior
    /// (1.0 when absent) `> geo_threshold`. Multiple labels may be accepted
    /// per frame.
    ///
    /// # Errors
    /// `AriaError::Classifier` on a score/label count mismatch — a
    /// frame-local failure, the pipeline continues with the next frame.
    pub fn gate(
        &self,
        scores: &[f32],
        labels: &LabelTable,
        now: DateTime<Utc>,
    ) -> Result<Vec<Detection>> {
        if scores.len() != labels.len() {
            return Err(AriaError::Classifier(format!(
                "classifier returned {} scores for {} labels",
                scores.len(),
                labels.len()
            )));
        }

        let mut detections = Vec::new();
        for (i, &score) in scores.iter().enumerate() {
            if score <= self.config.score_threshold {
                continue;
            }
            let entry = match labels.get(i) {
                Some(e) => e,
                None => continue,
            };
            let geo = entry.geo_prior.unwrap_or(1.0);
            if geo <= self.config.geo_threshold {
                continue;
            }
            detections.push(Detection {
                label_index: i,
                name: entry.name.clone(),
                name_localized: entry.name_localized.clone(),
                score,
                geo_prior: entry.geo_prior,
                detected_at: now,
            });
        }
        Ok(detections)
    }
}
