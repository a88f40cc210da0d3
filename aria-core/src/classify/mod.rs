//! Classifier gateway.
//!
//! The `BirdClassifier` trait decouples the pipeline from any specific model
//! backend. The core never owns weights or topology; it only relies on the
//! shape contract (one score per label-table entry) and that calls are
//! referentially independent.
//!
//! `&mut self` on `predict` expresses that backends may manage internal
//! caches; all mutation is serialised through `ClassifierHandle`'s
//! `parking_lot::Mutex`.

pub mod gate;
pub mod stub;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::dsp::Spectrogram;
use crate::error::{AriaError, Result};

/// Contract for classifier backends.
pub trait BirdClassifier: Send + 'static {
    /// One-time warm-up: load weights, run a dummy inference. Called once at
    /// engine startup.
    ///
    /// # Errors
    /// Returns an error if model files are missing or corrupt.
    fn warm_up(&mut self) -> Result<()>;

    /// Score one spectrogram: one value in [0, 1] per label-table entry, in
    /// table order.
    fn predict(&mut self, spectrogram: &Spectrogram) -> Result<Vec<f32>>;
}

/// Thread-safe reference-counted handle to any `BirdClassifier` implementor.
#[derive(Clone)]
pub struct ClassifierHandle(pub Arc<Mutex<dyn BirdClassifier>>);

impl ClassifierHandle {
    pub fn new<C: BirdClassifier>(classifier: C) -> Self {
        Self(Arc::new(Mutex::new(classifier)))
    }
}

impl std::fmt::Debug for ClassifierHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifierHandle").finish_non_exhaustive()
    }
}

/// One known label with its optional geo-prior.
#[derive(Debug, Clone)]
pub struct LabelEntry {
    /// Scientific name (stable key across localizations).
    pub name: String,
    /// Localized display name.
    pub name_localized: String,
    /// Plausibility prior for the current location/date, if available.
    /// `None` disables geo filtering for the label.
    pub geo_prior: Option<f32>,
}

/// Fixed table of labels the classifier scores against, in score order.
#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    entries: Vec<LabelEntry>,
}

impl LabelTable {
    pub fn new(entries: Vec<LabelEntry>) -> Self {
        Self { entries }
    }

    /// Parse a BirdNET-style label file: one `Scientific name_Common Name`
    /// per line. No geo-priors are attached.
    pub fn from_label_lines(text: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((name, localized)) = line.split_once('_') else {
                return Err(AriaError::Config(format!(
                    "label line {} has no '_' separator: {line:?}",
                    line_no + 1
                )));
            };
            entries.push(LabelEntry {
                name: name.to_string(),
                name_localized: localized.to_string(),
                geo_prior: None,
            });
        }
        if entries.is_empty() {
            return Err(AriaError::Config("label file contains no labels".into()));
        }
        Ok(Self { entries })
    }

    /// Attach one geo-prior per label, in table order.
    pub fn with_geo_priors(mut self, priors: &[f32]) -> Result<Self> {
        if priors.len() != self.entries.len() {
            return Err(AriaError::Config(format!(
                "{} geo-priors supplied for {} labels",
                priors.len(),
                self.entries.len()
            )));
        }
        for (entry, &prior) in self.entries.iter_mut().zip(priors) {
            entry.geo_prior = Some(prior);
        }
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&LabelEntry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LabelEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scientific_common_label_lines() {
        let text = "Cyanistes caeruleus_Eurasian Blue Tit\nParus major_Great Tit\n\n";
        let table = LabelTable::from_label_lines(text).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0).unwrap().name, "Cyanistes caeruleus");
        assert_eq!(table.get(1).unwrap().name_localized, "Great Tit");
        assert_eq!(table.get(0).unwrap().geo_prior, None);
    }

    #[test]
    fn rejects_lines_without_separator() {
        assert!(LabelTable::from_label_lines("no separator here").is_err());
        assert!(LabelTable::from_label_lines("").is_err());
    }

    #[test]
    fn attaches_geo_priors_in_order() {
        let table = LabelTable::from_label_lines("A_a\nB_b").unwrap();
        let table = table.with_geo_priors(&[0.7, 0.0]).unwrap();
        assert_eq!(table.get(0).unwrap().geo_prior, Some(0.7));
        assert_eq!(table.get(1).unwrap().geo_prior, Some(0.0));
    }

    #[test]
    fn geo_prior_length_mismatch_is_a_config_error() {
        let table = LabelTable::from_label_lines("A_a\nB_b").unwrap();
        assert!(table.with_geo_priors(&[0.5]).is_err());
    }
}
