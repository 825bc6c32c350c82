//! Coverage: estimating how much of the perturbation space an anchor applies to, and
//! greedily picking a small, non-redundant set of explanations across many instances.
//!
//! The picker is deterministic: highest coverage first, ties to the earliest input,
//! and after each pick every remaining result that anchors on the same
//! `(feature, value)` pair is dropped. With `stratify_by_label`, only results explaining
//! the same label are considered redundant.

use rand::rngs::StdRng;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    ensure_positive_count, AnchorCandidate, Error, EvaluationCounts, FeatureValues, Label,
    PerturbationProvider, Result,
};

/// Finalized explanation of one instance.
#[derive(Debug)]
pub struct AnchorResult<T> {
    ordered: Vec<usize>,
    canonical: BTreeSet<usize>,
    counts: EvaluationCounts,
    coverage: f64,
    is_anchor: bool,
    instance: Arc<T>,
    label: Label,
}

impl<T> Clone for AnchorResult<T> {
    fn clone(&self) -> Self {
        Self {
            ordered: self.ordered.clone(),
            canonical: self.canonical.clone(),
            counts: self.counts,
            coverage: self.coverage,
            is_anchor: self.is_anchor,
            instance: Arc::clone(&self.instance),
            label: self.label,
        }
    }
}

impl<T> AnchorResult<T> {
    /// Freeze a candidate. Its current counts and coverage (0 if never estimated) are copied.
    pub fn new(
        candidate: &AnchorCandidate,
        instance: Arc<T>,
        label: Label,
        is_anchor: bool,
    ) -> Self {
        Self {
            ordered: candidate.ordered_features().to_vec(),
            canonical: candidate.canonical_features().clone(),
            counts: candidate.counts(),
            coverage: candidate.coverage().unwrap_or(0.0),
            is_anchor,
            instance,
            label,
        }
    }

    pub fn canonical_features(&self) -> &BTreeSet<usize> {
        &self.canonical
    }

    /// Features in the order they were added.
    pub fn ordered_features(&self) -> &[usize] {
        &self.ordered
    }

    pub fn precision(&self) -> f64 {
        self.counts.precision()
    }

    pub fn counts(&self) -> EvaluationCounts {
        self.counts
    }

    pub fn coverage(&self) -> f64 {
        self.coverage
    }

    /// Whether the precision threshold was met (as opposed to a best-effort result).
    pub fn is_anchor(&self) -> bool {
        self.is_anchor
    }

    pub fn instance(&self) -> &Arc<T> {
        &self.instance
    }

    pub fn label(&self) -> Label {
        self.label
    }
}

impl<T: FeatureValues> AnchorResult<T> {
    /// Does `other` anchor on one of our features with the same instance value?
    fn shares_anchor_value(&self, other: &Self) -> bool {
        self.canonical.iter().any(|&f| {
            other.canonical.contains(&f)
                && match (self.instance.value(f), other.instance.value(f)) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
        })
    }
}

/// Coverage-pick configuration.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CoveragePickConfig {
    /// Only treat results with the same explained label as redundant, and report per label.
    pub stratify_by_label: bool,
}

/// Total coverage of a pick.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CoverageSummary {
    PerLabel(BTreeMap<Label, f64>),
    Aggregate(f64),
}

impl CoverageSummary {
    /// Sum over all labels.
    pub fn total(&self) -> f64 {
        match self {
            Self::PerLabel(m) => m.values().sum(),
            Self::Aggregate(x) => *x,
        }
    }
}

/// Output of [`coverage_pick`].
#[derive(Debug, Clone)]
pub struct CoveragePick<T> {
    /// Picked results, in pick order.
    pub picked: Vec<AnchorResult<T>>,
    pub summary: CoverageSummary,
}

/// Greedily pick up to `desired` results maximizing coverage without redundant anchors.
pub fn coverage_pick<T: FeatureValues>(
    results: Vec<AnchorResult<T>>,
    desired: usize,
    cfg: CoveragePickConfig,
) -> CoveragePick<T> {
    let offered = results.len();
    let mut survivors = results;
    let mut picked = Vec::with_capacity(desired.min(survivors.len()));

    while picked.len() < desired && !survivors.is_empty() {
        let mut best = 0;
        for (i, r) in survivors.iter().enumerate().skip(1) {
            if r.coverage > survivors[best].coverage {
                best = i;
            }
        }
        let pick = survivors.remove(best);
        let before = survivors.len();
        survivors.retain(|r| {
            let comparable = !cfg.stratify_by_label || r.label == pick.label;
            !(comparable && pick.shares_anchor_value(r))
        });
        debug!(
            coverage = pick.coverage,
            label = pick.label,
            features = ?pick.ordered,
            removed = before - survivors.len(),
            "coverage pick"
        );
        picked.push(pick);
    }

    let summary = if cfg.stratify_by_label {
        let mut per_label = BTreeMap::new();
        for r in &picked {
            *per_label.entry(r.label).or_insert(0.0) += r.coverage;
        }
        CoverageSummary::PerLabel(per_label)
    } else {
        CoverageSummary::Aggregate(picked.iter().map(|r| r.coverage).sum())
    };
    info!(offered, picked = picked.len(), ?summary, "coverage pick finished");

    CoveragePick { picked, summary }
}

/// Estimates anchor coverage from one reference sample drawn with no feature fixed.
///
/// Coverage of a feature set is the fraction of reference rows in which none of those
/// features changed.
#[derive(Debug, Clone, Default)]
pub struct CoverageEstimator {
    changed: Vec<Vec<bool>>,
}

impl CoverageEstimator {
    pub fn from_provider<P: PerturbationProvider>(
        provider: &P,
        n: usize,
        rng: &mut StdRng,
    ) -> Result<Self> {
        ensure_positive_count(n)?;
        let sample = provider.perturb(&BTreeSet::new(), n, rng)?;
        if sample.len() != n {
            return Err(Error::PerturbationCountMismatch {
                requested: n,
                returned: sample.len(),
            });
        }
        let (_, changed) = sample.into_parts();
        Ok(Self { changed })
    }

    /// Use an existing change matrix (rows = perturbations, columns = features).
    pub fn from_changed(changed: Vec<Vec<bool>>) -> Self {
        Self { changed }
    }

    pub fn len(&self) -> usize {
        self.changed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    pub fn coverage(&self, features: &BTreeSet<usize>) -> f64 {
        if self.changed.is_empty() {
            return 0.0;
        }
        let kept = self
            .changed
            .iter()
            .filter(|row| {
                !features
                    .iter()
                    .any(|&f| row.get(f).copied().unwrap_or(false))
            })
            .count();
        kept as f64 / self.changed.len() as f64
    }

    /// Estimate and store the coverage of `candidate`.
    pub fn assign(&self, candidate: &mut AnchorCandidate) -> f64 {
        let c = self.coverage(candidate.canonical_features());
        candidate.set_coverage(c);
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn result(
        features: &[usize],
        coverage: f64,
        instance: &Arc<Vec<u8>>,
        label: Label,
    ) -> AnchorResult<Vec<u8>> {
        let mut c = AnchorCandidate::new(features.iter().copied()).unwrap();
        c.set_coverage(coverage);
        AnchorResult::new(&c, Arc::clone(instance), label, true)
    }

    #[test]
    fn empty_input_gives_empty_output() {
        let pick = coverage_pick(Vec::<AnchorResult<Vec<u8>>>::new(), 3, CoveragePickConfig::default());
        assert!(pick.picked.is_empty());
        assert_eq!(pick.summary, CoverageSummary::Aggregate(0.0));
    }

    #[test]
    fn shared_anchor_value_is_dropped() {
        let a = Arc::new(vec![1u8, 2, 3]);
        let b = Arc::new(vec![1u8, 9, 9]);
        let c = Arc::new(vec![5u8, 2, 7]);
        let results = vec![
            result(&[0], 0.6, &a, 1),
            result(&[0, 1], 0.3, &b, 1), // same value on feature 0
            result(&[0], 0.5, &c, 1),    // different value on feature 0
        ];
        let pick = coverage_pick(results, 3, CoveragePickConfig::default());
        let covs: Vec<f64> = pick.picked.iter().map(|r| r.coverage()).collect();
        assert_eq!(covs, vec![0.6, 0.5]);
        assert!((pick.summary.total() - 1.1).abs() < 1e-12);
    }

    #[test]
    fn ties_go_to_the_first_result() {
        let a = Arc::new(vec![0u8, 0]);
        let b = Arc::new(vec![1u8, 1]);
        let results = vec![result(&[1], 0.4, &b, 0), result(&[0], 0.4, &a, 0)];
        let pick = coverage_pick(results, 1, CoveragePickConfig::default());
        assert_eq!(pick.picked[0].ordered_features(), &[1]);
    }

    #[test]
    fn stratified_pick_keeps_other_labels() {
        let a = Arc::new(vec![4u8]);
        let results = vec![result(&[0], 0.7, &a, 0), result(&[0], 0.2, &a, 1)];

        let flat = coverage_pick(results.clone(), 5, CoveragePickConfig::default());
        assert_eq!(flat.picked.len(), 1);

        let cfg = CoveragePickConfig {
            stratify_by_label: true,
        };
        let strat = coverage_pick(results, 5, cfg);
        assert_eq!(strat.picked.len(), 2);
        match strat.summary {
            CoverageSummary::PerLabel(m) => {
                assert_eq!(m.get(&0), Some(&0.7));
                assert_eq!(m.get(&1), Some(&0.2));
            }
            other => panic!("expected per-label summary, got {other:?}"),
        }
    }

    #[test]
    fn estimator_counts_untouched_rows() {
        let est = CoverageEstimator::from_changed(vec![
            vec![false, false],
            vec![true, false],
            vec![false, true],
            vec![false, false],
        ]);
        assert_eq!(est.coverage(&BTreeSet::from([0])), 0.75);
        assert_eq!(est.coverage(&BTreeSet::from([0, 1])), 0.5);
        let mut c = AnchorCandidate::new([1]).unwrap();
        assert_eq!(est.assign(&mut c), 0.75);
        assert_eq!(c.coverage(), Some(0.75));
        assert_eq!(CoverageEstimator::default().coverage(&BTreeSet::from([0])), 0.0);
    }

    proptest! {
        #[test]
        fn picks_never_share_an_anchor_value(
            rows in prop::collection::vec(
                (prop::collection::vec(0u8..3, 3), prop::collection::btree_set(0usize..3, 1..3), 0.0f64..1.0),
                0..20,
            ),
            desired in 0usize..8,
        ) {
            let results: Vec<_> = rows
                .iter()
                .map(|(values, feats, cov)| {
                    let inst = Arc::new(values.clone());
                    let f: Vec<usize> = feats.iter().copied().collect();
                    result(&f, *cov, &inst, 0)
                })
                .collect();
            let pick = coverage_pick(results, desired, CoveragePickConfig::default());
            prop_assert!(pick.picked.len() <= desired);
            for (i, a) in pick.picked.iter().enumerate() {
                for b in &pick.picked[i + 1..] {
                    prop_assert!(!a.shares_anchor_value(b));
                }
            }
            let sum: f64 = pick.picked.iter().map(|r| r.coverage()).sum();
            prop_assert!((pick.summary.total() - sum).abs() < 1e-9);
            prop_assert!(pick.picked.windows(2).all(|w| w[0].coverage() >= w[1].coverage()));
        }
    }
}
