//! `anchorage`: anchor explanations for opaque classifiers.
//!
//! An **anchor** is a small set of feature constraints that, held fixed, keeps a
//! classifier's prediction stable with high probability over a perturbation
//! distribution. Its **precision** is that probability; its **coverage** is the share of
//! the perturbation space where the constraints apply.
//!
//! The crate covers three coupled pieces:
//!
//! - **Best-candidate identification** (pure-exploration bandits): among candidate
//!   feature sets, find the `k` with the highest precision using as few model calls as
//!   possible. [`KlLucb`] stops on KL confidence bounds with a `1 - delta` guarantee;
//!   [`BatchSar`] spends a fixed budget through successive accepts and rejects. Both sit
//!   behind [`BestCandidateIdentifier`] and are chosen via [`IdentifierConfig`].
//! - **Sampling**: a [`SamplingService`] hands out label-bound [`SamplingSession`]s that
//!   turn `(candidate, count)` into evaluated outcomes. [`PooledSamplingService`] runs
//!   rounds on a rayon pool, gates model parallelism, and seeds every request from a
//!   stable hash so results do not depend on thread scheduling.
//! - **Global coverage pick**: [`coverage_pick`] greedily turns many per-instance
//!   [`AnchorResult`]s into a small explanation set with no redundant
//!   `(feature, value)` anchors. [`CoverageEstimator`] supplies coverage estimates.
//!
//! Domain-specific perturbation ([`PerturbationProvider`]), candidate generation, and
//! model inference ([`Classifier`]) are supplied by the caller.
//!
//! **Goals:**
//! - **Deterministic by default**: same seed, same candidates, same result, for any
//!   thread count.
//! - **No lost updates**: each recorded batch moves a candidate's `(samples, positives)`
//!   pair atomically.
//! - **Budgets are outcomes, not errors**: running out of samples or time returns the
//!   current best estimate tagged with [`StopReason::BudgetExhausted`].
//!
//! **Non-goals:**
//! - A globally optimal anchor, or a minimum-cardinality covering set.
//! - Persistence, CLI, or a built-in perturbation scheme.
//!
//! Logging goes through `tracing`; install a subscriber to see per-round events.
//!
//! # References
//!
//! - Ribeiro, Singh & Guestrin (2018), "Anchors: High-Precision Model-Agnostic
//!   Explanations", AAAI.
//! - Kaufmann & Kalyanakrishnan (2013), "Information Complexity in Bandit Subset
//!   Selection", COLT.
//! - Bubeck, Wang & Viswanathan (2013), "Multiple Identifications in Multi-Armed
//!   Bandits", ICML (successive accepts and rejects).

#![forbid(unsafe_code)]

mod error;
pub use error::*;

mod stable_hash;
pub use stable_hash::*;

mod perturb;
pub use perturb::*;

mod model;
pub use model::{Classifier, Label};

mod candidate;
pub use candidate::*;

pub mod bounds;
pub use bounds::{
    bernoulli_kl, exploration_rate, kl_lower_bound, kl_upper_bound, ConfidenceBounds,
};

mod sampling;
pub use sampling::*;

mod identify;
pub use identify::{
    BestCandidateIdentifier, Budget, BudgetKind, Identification, IdentifierConfig, StopReason,
};

mod kl_lucb;
pub use kl_lucb::*;

mod batch_sar;
pub use batch_sar::*;

mod coverage;
pub use coverage::*;

#[cfg(test)]
mod testing;

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::Rng;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    /// Binary instances; a feature that is not fixed is flipped with probability 1/2.
    #[derive(Clone)]
    struct Flipper {
        base: Vec<u8>,
    }

    impl PerturbationProvider for Flipper {
        type Instance = Vec<u8>;

        fn for_instance(&self, instance: &Vec<u8>) -> Self {
            Self {
                base: instance.clone(),
            }
        }

        fn perturb(
            &self,
            fixed: &BTreeSet<usize>,
            count: usize,
            rng: &mut StdRng,
        ) -> Result<PerturbationResult<Vec<u8>>> {
            ensure_positive_count(count)?;
            let mut raw = Vec::with_capacity(count);
            let mut changed = Vec::with_capacity(count);
            for _ in 0..count {
                let mut row = self.base.clone();
                let mut mask = vec![false; row.len()];
                for (f, v) in row.iter_mut().enumerate() {
                    if !fixed.contains(&f) && rng.random_bool(0.5) {
                        *v ^= 1;
                        mask[f] = true;
                    }
                }
                raw.push(row);
                changed.push(mask);
            }
            PerturbationResult::new(raw, changed)
        }
    }

    fn first_bit(x: &Vec<u8>) -> Label {
        Label::from(x[0])
    }

    #[test]
    fn explain_then_pick() {
        let pool = Arc::new(
            rayon::ThreadPoolBuilder::new()
                .num_threads(2)
                .build()
                .unwrap(),
        );
        let reference = Flipper { base: vec![0; 4] };
        let mut rng = <StdRng as rand::SeedableRng>::seed_from_u64(11);
        let estimator = CoverageEstimator::from_provider(&reference, 500, &mut rng).unwrap();

        let mut results = Vec::new();
        for base in [vec![1u8, 0, 0, 0], vec![1u8, 1, 0, 0], vec![0u8, 1, 1, 0]] {
            let label = first_bit(&base);
            let service = PooledSamplingService::new(
                reference.for_instance(&base),
                first_bit as fn(&Vec<u8>) -> Label,
                Executor::shared(Arc::clone(&pool)),
                SamplingConfig::default(),
            )
            .unwrap();
            let session = service.create_session(label);
            let candidates: Vec<_> = (0..4)
                .map(|f| AnchorCandidate::for_instance([f], base.len()).unwrap())
                .collect();

            let id = IdentifierConfig::default()
                .build()
                .unwrap()
                .identify(candidates, &session, 0.1, 1)
                .unwrap();
            assert!(id.stop.is_certified());
            assert_eq!(id.best().next().unwrap().ordered_features(), &[0]);
            assert!(service.time_spent_sampling() > std::time::Duration::ZERO);

            let mut best = id.into_selected().remove(0);
            estimator.assign(&mut best);
            results.push(AnchorResult::new(&best, Arc::new(base), label, true));
        }

        // The two label-1 instances share the anchor `x0 = 1`.
        let pick = coverage_pick(results, 3, CoveragePickConfig::default());
        assert_eq!(pick.picked.len(), 2);
        assert_eq!(Arc::strong_count(&pool), 1);
    }
}
