//! Anchor candidates and their running evaluation statistics (the bandit's arm state).

use parking_lot::Mutex;
use std::collections::BTreeSet;

use crate::{Error, Result};

/// Snapshot of a candidate's sample counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EvaluationCounts {
    /// Samples drawn so far.
    pub samples: u64,
    /// Samples whose prediction matched the explained label.
    pub positives: u64,
}

impl EvaluationCounts {
    /// Empirical precision; `0.0` before the first sample.
    pub fn precision(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.positives as f64 / self.samples as f64
        }
    }
}

/// Append-only, linearizable sample counters.
///
/// Both counters of one batch are applied under a single lock, so concurrent
/// readers never observe `positives > samples` and no update is lost.
#[derive(Debug, Default)]
pub struct EvaluationState {
    counts: Mutex<EvaluationCounts>,
}

impl EvaluationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> EvaluationCounts {
        *self.counts.lock()
    }

    /// Add one batch of `samples` outcomes, `positives` of them matching.
    pub fn record(&self, samples: u64, positives: u64) -> Result<EvaluationCounts> {
        if positives > samples {
            return Err(Error::InvalidBatch { samples, positives });
        }
        let mut c = self.counts.lock();
        c.samples = c.samples.saturating_add(samples);
        c.positives = c.positives.saturating_add(positives);
        Ok(*c)
    }
}

impl Clone for EvaluationState {
    fn clone(&self) -> Self {
        Self {
            counts: Mutex::new(self.snapshot()),
        }
    }
}

/// A set of feature indices held fixed, plus its evaluation state.
///
/// The canonical set drives sampling; the ordered list remembers in which order
/// candidate generation added features, which is what explanations report.
#[derive(Debug, Clone)]
pub struct AnchorCandidate {
    ordered: Vec<usize>,
    canonical: BTreeSet<usize>,
    state: EvaluationState,
    coverage: Option<f64>,
}

impl AnchorCandidate {
    /// Create a candidate. Duplicate indices are kept once, first occurrence wins.
    pub fn new(features: impl IntoIterator<Item = usize>) -> Result<Self> {
        let mut canonical = BTreeSet::new();
        let mut ordered = Vec::new();
        for f in features {
            if canonical.insert(f) {
                ordered.push(f);
            }
        }
        if canonical.is_empty() {
            return Err(Error::EmptyCandidate);
        }
        Ok(Self {
            ordered,
            canonical,
            state: EvaluationState::new(),
            coverage: None,
        })
    }

    /// Like [`new`](Self::new), additionally checking every index is `< feature_count`.
    pub fn for_instance(
        features: impl IntoIterator<Item = usize>,
        feature_count: usize,
    ) -> Result<Self> {
        let c = Self::new(features)?;
        if let Some(&feature) = c.canonical.iter().find(|&&f| f >= feature_count) {
            return Err(Error::FeatureOutOfRange {
                feature,
                feature_count,
            });
        }
        Ok(c)
    }

    /// Child candidate with one more fixed feature and fresh statistics.
    ///
    /// Adding a feature the candidate already fixes yields an equal feature set.
    pub fn extend(&self, feature: usize) -> Self {
        let mut ordered = self.ordered.clone();
        let mut canonical = self.canonical.clone();
        if canonical.insert(feature) {
            ordered.push(feature);
        }
        Self {
            ordered,
            canonical,
            state: EvaluationState::new(),
            coverage: None,
        }
    }

    pub fn canonical_features(&self) -> &BTreeSet<usize> {
        &self.canonical
    }

    pub fn ordered_features(&self) -> &[usize] {
        &self.ordered
    }

    pub fn state(&self) -> &EvaluationState {
        &self.state
    }

    pub fn counts(&self) -> EvaluationCounts {
        self.state.snapshot()
    }

    pub fn precision(&self) -> f64 {
        self.counts().precision()
    }

    pub fn has_been_sampled(&self) -> bool {
        self.counts().samples > 0
    }

    pub fn coverage(&self) -> Option<f64> {
        self.coverage
    }

    /// Store the coverage estimate; values are clamped into `[0, 1]`, non-finite become 0.
    pub fn set_coverage(&mut self, coverage: f64) {
        self.coverage = Some(if coverage.is_finite() {
            coverage.clamp(0.0, 1.0)
        } else {
            0.0
        });
    }
}
