use anchorage::{
    coverage_pick, AnchorCandidate, AnchorResult, BestCandidateIdentifier, Budget,
    CoveragePickConfig, CoverageSummary, Error, FeatureValues, KlLucb, KlLucbConfig, Label,
    PerturbationResult, Result, SampleBatch, SamplingSession,
};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Candidate `f` yields exactly `floor(p[f] * n)` positives over its first `n` samples.
struct Deterministic {
    precision: Vec<f64>,
}

impl SamplingSession for Deterministic {
    fn explained_label(&self) -> Label {
        1
    }

    fn sample(&self, candidate: &AnchorCandidate, count: usize) -> Result<SampleBatch> {
        if count == 0 {
            return Err(Error::NonPositiveCount);
        }
        let f = candidate.ordered_features()[0];
        let p = self.precision[f];
        let before = candidate.counts().samples;
        let hits = |n: u64| (p * n as f64).floor() as u64;
        let positives = (hits(before + count as u64) - hits(before)) as usize;
        candidate
            .state()
            .record(count as u64, positives as u64)?;
        Ok(SampleBatch::from_outcomes(
            (0..count).map(|i| i < positives).collect(),
        ))
    }
}

fn singletons(n: usize) -> Vec<AnchorCandidate> {
    (0..n).map(|f| AnchorCandidate::new([f]).unwrap()).collect()
}

fn samples_at(delta: f64, p: (f64, f64)) -> u64 {
    let session = Deterministic {
        precision: vec![p.0, p.1],
    };
    let kl = KlLucb::new(KlLucbConfig {
        batch_size: 25,
        initial_samples: 25,
        epsilon: 0.05,
        budget: Budget::samples(20_000),
    })
    .unwrap();
    kl.identify(singletons(2), &session, delta, 1)
        .unwrap()
        .samples_drawn
}

#[test]
fn perturbation_result_rejects_ragged_shape() {
    let err = PerturbationResult::new(vec![1u8, 2, 3], vec![vec![false]; 2]).unwrap_err();
    assert!(matches!(err, Error::PerturbationShape { raw: 3, changed: 2 }));
    assert!(PerturbationResult::new(vec![1u8, 2], vec![vec![true]; 2]).is_ok());
}

#[test]
fn separated_pair_needs_fewer_samples_at_larger_delta() {
    assert!(samples_at(0.3, (0.9, 0.3)) <= samples_at(0.05, (0.9, 0.3)));
}

#[test]
fn repeated_runs_are_identical() {
    let run = || {
        let session = Deterministic {
            precision: vec![0.2, 0.5, 0.8, 0.55],
        };
        let id = KlLucb::new(KlLucbConfig::default())
            .unwrap()
            .identify(singletons(4), &session, 0.1, 2)
            .unwrap();
        (id.selected, id.samples_drawn, id.rounds)
    };
    let first = run();
    assert_eq!(first.0, vec![2, 3]);
    assert_eq!(first, run());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn larger_delta_never_costs_more(
        p1 in 0.05f64..0.95,
        p2 in 0.05f64..0.95,
        d1 in 0.01f64..0.5,
        d2 in 0.01f64..0.5,
    ) {
        let (small, large) = if d1 <= d2 { (d1, d2) } else { (d2, d1) };
        prop_assert!(samples_at(large, (p1, p2)) <= samples_at(small, (p1, p2)));
    }

    #[test]
    fn counters_stay_consistent_under_concurrency(
        batches in prop::collection::vec((1u64..50, 0u64..50), 1..40),
    ) {
        let c = AnchorCandidate::new([0]).unwrap();
        let mut expected = (0u64, 0u64);
        for &(n, k) in &batches {
            expected.0 += n;
            expected.1 += k.min(n);
        }
        std::thread::scope(|s| {
            for chunk in batches.chunks(5) {
                let c = &c;
                s.spawn(move || {
                    for &(n, k) in chunk {
                        c.state().record(n, k.min(n)).unwrap();
                    }
                });
            }
            s.spawn(|| {
                let mut last = c.counts();
                for _ in 0..200 {
                    let now = c.counts();
                    assert!(now.positives <= now.samples);
                    assert!(now.samples >= last.samples && now.positives >= last.positives);
                    last = now;
                }
            });
        });
        let end = c.counts();
        prop_assert_eq!((end.samples, end.positives), expected);
    }

    #[test]
    fn stratified_pick_respects_labels(
        rows in prop::collection::vec(
            (prop::collection::vec(0u8..2, 2), 0usize..2, 0.0f64..1.0, 0u32..3),
            0..24,
        ),
        desired in 0usize..10,
    ) {
        let results: Vec<_> = rows
            .iter()
            .map(|(values, f, cov, label)| {
                let mut c = AnchorCandidate::new([*f]).unwrap();
                c.set_coverage(*cov);
                AnchorResult::new(&c, Arc::new(values.clone()), *label, false)
            })
            .collect();
        let cfg = CoveragePickConfig { stratify_by_label: true };
        let pick = coverage_pick(results, desired, cfg);
        prop_assert!(pick.picked.len() <= desired);

        for (i, a) in pick.picked.iter().enumerate() {
            for b in &pick.picked[i + 1..] {
                if a.label() != b.label() {
                    continue;
                }
                let clash = a.canonical_features().iter().any(|&f| {
                    b.canonical_features().contains(&f)
                        && a.instance().value(f) == b.instance().value(f)
                });
                prop_assert!(!clash);
            }
        }

        let mut expected: BTreeMap<Label, f64> = BTreeMap::new();
        for r in &pick.picked {
            *expected.entry(r.label()).or_insert(0.0) += r.coverage();
        }
        match pick.summary {
            CoverageSummary::PerLabel(m) => {
                prop_assert_eq!(m.len(), expected.len());
                for (label, sum) in expected {
                    prop_assert!((m[&label] - sum).abs() < 1e-9);
                }
            }
            CoverageSummary::Aggregate(_) => prop_assert!(false, "stratified pick must report per label"),
        }
    }
}
