//! Deterministic sessions for unit tests.

use std::collections::BTreeSet;

use crate::{AnchorCandidate, Error, Label, Result, SampleBatch, SamplingSession};

/// Produces exactly `round(precision * n)` positives over any prefix of `n` samples,
/// where the precision is a function of the candidate's features.
pub(crate) struct ExactSession<F> {
    pub(crate) precision_of: F,
}

impl<F> SamplingSession for ExactSession<F>
where
    F: Fn(&BTreeSet<usize>) -> f64 + Sync,
{
    fn explained_label(&self) -> Label {
        1
    }

    fn sample(&self, candidate: &AnchorCandidate, count: usize) -> Result<SampleBatch> {
        if count == 0 {
            return Err(Error::NonPositiveCount);
        }
        let p = (self.precision_of)(candidate.canonical_features());
        let before = candidate.counts().samples;
        let after = before + count as u64;
        let hits = |n: u64| (p * n as f64).floor() as u64;
        let positives = (hits(after) - hits(before)) as usize;
        let outcomes = (0..count).map(|i| i < positives).collect();
        candidate
            .state()
            .record(count as u64, positives as u64)?;
        Ok(SampleBatch::from_outcomes(outcomes))
    }
}

/// Fails every call with a collaborator error.
pub(crate) struct BrokenSession;

impl SamplingSession for BrokenSession {
    fn explained_label(&self) -> Label {
        0
    }

    fn sample(&self, _candidate: &AnchorCandidate, _count: usize) -> Result<SampleBatch> {
        Err(Error::perturbation("provider offline"))
    }
}

pub(crate) fn singletons(n: usize) -> Vec<AnchorCandidate> {
    (0..n)
        .map(|f| AnchorCandidate::new([f]).expect("non-empty"))
        .collect()
}
