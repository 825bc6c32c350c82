//! KL-LUCB: pure-exploration top-k identification with KL confidence bounds.
//!
//! Each round ranks candidates by empirical precision, takes the top `k` as `J`, and
//! compares the weakest lower bound inside `J` (`lt`) with the strongest upper bound
//! outside it (`ut`). The run stops once `ub(ut) - lb(lt) <= epsilon`; with
//! `epsilon = 0` that is strict separation of the two groups. Otherwise `ut` and `lt`
//! each receive one more batch.
//!
//! Tie-breaks: ranking ties go to the lower index; among equal bounds the candidate
//! ranked first is chosen for `ut` and `lt`.
//!
//! Reference: Kaufmann & Kalyanakrishnan, "Information Complexity in Bandit Subset
//! Selection", COLT 2013. See [`crate::bounds`] for the exact exploration rate.

use tracing::{debug, info, warn};

use crate::identify::{check_delta, ranked, BudgetClock};
use crate::{
    exploration_rate, AnchorCandidate, BestCandidateIdentifier, Budget, ConfidenceBounds, Error,
    Identification, Result, SampleRequest, SamplingSession, StopReason,
};

/// Configuration for [`KlLucb`].
///
/// The default `epsilon` of 0.1 needs roughly 15k-25k samples to stop on ten
/// candidates of equal precision (δ = 0.1). To certify such a field within a
/// 10k-sample budget, use `epsilon: 0.3` with `batch_size` and `initial_samples`
/// of 50; with the defaults a 10k budget ends in
/// [`BudgetExhausted(Samples)`](crate::StopReason::BudgetExhausted).
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KlLucbConfig {
    /// Samples per `ut` / `lt` pull.
    pub batch_size: usize,
    /// Samples given to each not-yet-sampled candidate before the first round.
    pub initial_samples: usize,
    /// Stopping tolerance on `ub(ut) - lb(lt)`, in `[0, 1)`.
    pub epsilon: f64,
    pub budget: Budget,
}

impl Default for KlLucbConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            initial_samples: 100,
            epsilon: 0.1,
            budget: Budget::unlimited(),
        }
    }
}

impl KlLucbConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.initial_samples == 0 {
            return Err(Error::InvalidConfig(
                "batch_size and initial_samples must be positive".to_string(),
            ));
        }
        if !(self.epsilon.is_finite() && (0.0..1.0).contains(&self.epsilon)) {
            return Err(Error::InvalidConfig(format!(
                "epsilon must lie in [0, 1), got {}",
                self.epsilon
            )));
        }
        // Equal candidates never separate strictly.
        if self.epsilon == 0.0 && self.budget == Budget::unlimited() {
            return Err(Error::InvalidConfig(
                "epsilon = 0 requires a sample or time budget".to_string(),
            ));
        }
        Ok(())
    }
}

/// KL-LUCB identifier.
#[derive(Debug, Clone)]
pub struct KlLucb {
    cfg: KlLucbConfig,
}

impl KlLucb {
    pub fn new(cfg: KlLucbConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self { cfg })
    }

    pub fn config(&self) -> &KlLucbConfig {
        &self.cfg
    }
}

impl BestCandidateIdentifier for KlLucb {
    fn identify(
        &self,
        candidates: Vec<AnchorCandidate>,
        session: &dyn SamplingSession,
        delta: f64,
        k: usize,
    ) -> Result<Identification> {
        check_delta(delta)?;
        let clock = BudgetClock::start(self.cfg.budget);
        let n = candidates.len();
        if n == 0 || k == 0 || k >= n {
            return Ok(Identification::trivial(candidates, k, clock.started()));
        }

        let baseline = total_samples(&candidates);
        let drawn = |cands: &[AnchorCandidate]| total_samples(cands).saturating_sub(baseline);

        let init: Vec<SampleRequest<'_>> = candidates
            .iter()
            .filter(|c| !c.has_been_sampled())
            .map(|c| SampleRequest {
                candidate: c,
                count: self.cfg.initial_samples,
            })
            .collect();
        if !init.is_empty() {
            let init = fit_to_budget(init, clock.samples_left(0));
            session.evaluate(&init, clock.deadline())?;
        }

        let mut t: u64 = 1;
        let mut rounds: u64 = 0;
        let stop = loop {
            let order = ranked(&candidates, (0..n).collect());
            let (top, rest) = order.split_at(k);
            let beta = exploration_rate(n, t, delta);
            let bound = |i: usize| {
                let c = candidates[i].counts();
                ConfidenceBounds::from_counts(c.positives, c.samples, beta)
            };

            let (ut, ub) = rest
                .iter()
                .map(|&i| (i, bound(i).upper))
                .fold(None, |best: Option<(usize, f64)>, (i, u)| match best {
                    Some((_, bu)) if bu >= u => best,
                    _ => Some((i, u)),
                })
                .unwrap_or((rest[0], 1.0));
            let (lt, lb) = top
                .iter()
                .map(|&i| (i, bound(i).lower))
                .fold(None, |best: Option<(usize, f64)>, (i, l)| match best {
                    Some((_, bl)) if bl <= l => best,
                    _ => Some((i, l)),
                })
                .unwrap_or((top[0], 0.0));

            let gap = ub - lb;
            debug!(t, ut, lt, ub, lb, gap, beta, "kl-lucb round");
            if gap <= self.cfg.epsilon {
                break StopReason::Certified;
            }
            let so_far = drawn(&candidates);
            if let Some(kind) = clock.exhausted(so_far) {
                break StopReason::BudgetExhausted(kind);
            }

            let pulls = vec![
                SampleRequest {
                    candidate: &candidates[ut],
                    count: self.cfg.batch_size,
                },
                SampleRequest {
                    candidate: &candidates[lt],
                    count: self.cfg.batch_size,
                },
            ];
            let pulls = fit_to_budget(pulls, clock.samples_left(so_far));
            let report = session.evaluate(&pulls, clock.deadline())?;
            rounds += 1;
            t += 1;
            if report.cut_short() {
                break StopReason::BudgetExhausted(crate::BudgetKind::Time);
            }
        };

        let order = ranked(&candidates, (0..n).collect());
        let selected = order[..k].to_vec();
        let beta = exploration_rate(n, t, delta);
        let bounds = candidates
            .iter()
            .map(|c| {
                let s = c.counts();
                ConfidenceBounds::from_counts(s.positives, s.samples, beta)
            })
            .collect();
        let samples_drawn = drawn(&candidates);

        if stop.is_budget_exhausted() {
            warn!(
                ?stop,
                rounds, samples_drawn, "kl-lucb stopped on budget, returning best-effort selection"
            );
        } else {
            info!(rounds, samples_drawn, ?selected, "kl-lucb certified selection");
        }

        Ok(Identification {
            candidates,
            selected,
            stop,
            rounds,
            samples_drawn,
            elapsed: clock.started().elapsed(),
            bounds,
        })
    }
}

fn total_samples(candidates: &[AnchorCandidate]) -> u64 {
    candidates.iter().map(|c| c.counts().samples).sum()
}

/// Shrink requests so their sum stays within `left`, dropping those that get nothing.
pub(crate) fn fit_to_budget<'a>(
    requests: Vec<SampleRequest<'a>>,
    left: Option<u64>,
) -> Vec<SampleRequest<'a>> {
    let Some(mut left) = left else {
        return requests;
    };
    let mut out = Vec::with_capacity(requests.len());
    for mut r in requests {
        let take = (r.count as u64).min(left);
        if take == 0 {
            break;
        }
        left -= take;
        r.count = take as usize;
        out.push(r);
    }
    out
}
