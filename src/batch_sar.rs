//! BatchSAR: fixed-budget successive accepts and rejects, pulled in batches.
//!
//! The round schedule is fixed up front from `(n, k, elimination_fraction)`:
//! starting from `n` active candidates, each round retires
//! `max(1, floor(fraction * (active - k)))` of them until `k` remain. The total budget
//! is split equally across rounds, and each round's share equally across the candidates
//! still active.
//!
//! After a round the active set is ranked by empirical precision. With `s` open slots,
//! the leader is accepted when its lead over rank `s` exceeds the gap between rank
//! `s - 1` and the last candidate; then the weakest candidates are rejected. Once the
//! active set fits into the open slots, all of it is accepted.
//!
//! `delta` is validated and used only for the reported confidence bounds; the stopping
//! rule is the schedule itself.

use tracing::{debug, info, warn};

use crate::identify::{check_delta, ranked, ranking_mean, BudgetClock};
use crate::kl_lucb::fit_to_budget;
use crate::{
    exploration_rate, AnchorCandidate, BestCandidateIdentifier, Budget, BudgetKind,
    ConfidenceBounds, Error, Identification, Result, SampleRequest, SamplingSession, StopReason,
};

/// Configuration for [`BatchSar`].
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BatchSarConfig {
    /// Samples spread across the whole schedule.
    pub total_samples: u64,
    /// Share of the surplus `active - k` retired per round, in `(0, 1]`.
    pub elimination_fraction: f64,
    /// Floor on the per-candidate samples of a round.
    pub min_samples_per_round: usize,
    pub budget: Budget,
}

impl Default for BatchSarConfig {
    fn default() -> Self {
        Self {
            total_samples: 10_000,
            elimination_fraction: 0.5,
            min_samples_per_round: 1,
            budget: Budget::unlimited(),
        }
    }
}

impl BatchSarConfig {
    pub fn validate(&self) -> Result<()> {
        if self.total_samples == 0 {
            return Err(Error::InvalidConfig(
                "total_samples must be positive".to_string(),
            ));
        }
        let f = self.elimination_fraction;
        if !(f.is_finite() && f > 0.0 && f <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "elimination_fraction must lie in (0, 1], got {f}"
            )));
        }
        if self.min_samples_per_round == 0 {
            return Err(Error::InvalidConfig(
                "min_samples_per_round must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Number of candidates retired from `active` when `k` must survive.
fn retire_count(active: usize, k: usize, fraction: f64) -> usize {
    let surplus = active.saturating_sub(k);
    let drop = (fraction * surplus as f64).floor() as usize;
    drop.max(1).min(surplus)
}

/// Active-set size at the start of every scheduled round.
pub fn sar_schedule(n: usize, k: usize, fraction: f64) -> Vec<usize> {
    let mut rounds = Vec::new();
    let mut active = n;
    while active > k {
        rounds.push(active);
        active -= retire_count(active, k, fraction);
    }
    rounds
}

/// BatchSAR identifier.
#[derive(Debug, Clone)]
pub struct BatchSar {
    cfg: BatchSarConfig,
}

impl BatchSar {
    pub fn new(cfg: BatchSarConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self { cfg })
    }

    pub fn config(&self) -> &BatchSarConfig {
        &self.cfg
    }
}

impl BestCandidateIdentifier for BatchSar {
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

        let schedule = sar_schedule(n, k, self.cfg.elimination_fraction);
        let per_round = self.cfg.total_samples / schedule.len() as u64;
        debug!(rounds = schedule.len(), per_round, "batch-sar schedule");

        let mut active: Vec<usize> = (0..n).collect();
        let mut accepted: Vec<usize> = Vec::with_capacity(k);
        let mut drawn: u64 = 0;
        let mut rounds: u64 = 0;
        let mut stop = StopReason::ScheduleComplete;

        for _ in &schedule {
            let slots = k - accepted.len();
            if slots == 0 || active.len() <= slots {
                break;
            }
            if let Some(kind) = clock.exhausted(drawn) {
                stop = StopReason::BudgetExhausted(kind);
                break;
            }

            let per_candidate = usize::try_from(per_round / active.len() as u64)
                .unwrap_or(usize::MAX)
                .max(self.cfg.min_samples_per_round);
            let requests: Vec<SampleRequest<'_>> = active
                .iter()
                .map(|&i| SampleRequest {
                    candidate: &candidates[i],
                    count: per_candidate,
                })
                .collect();
            let requests = fit_to_budget(requests, clock.samples_left(drawn));
            let report = session.evaluate(&requests, clock.deadline())?;
            drawn += report.samples;
            rounds += 1;
            if report.cut_short() {
                stop = StopReason::BudgetExhausted(BudgetKind::Time);
                break;
            }

            let mut order = ranked(&candidates, std::mem::take(&mut active));
            let mut slots = slots;
            let mean = |i: usize| ranking_mean(&candidates[i]);
            if order.len() > slots {
                let gap_accept = mean(order[0]) - mean(order[slots]);
                let gap_reject = mean(order[slots - 1]) - mean(order[order.len() - 1]);
                if gap_accept > gap_reject {
                    let leader = order.remove(0);
                    debug!(round = rounds, leader, gap_accept, gap_reject, "batch-sar accept");
                    accepted.push(leader);
                    slots -= 1;
                }
            }
            if slots == 0 {
                break;
            }
            let retire = retire_count(order.len(), slots, self.cfg.elimination_fraction);
            order.truncate(order.len() - retire);
            debug!(round = rounds, retired = retire, remaining = order.len(), "batch-sar reject");
            active = order;
            if active.len() <= slots {
                accepted.append(&mut active);
                break;
            }
        }

        // Fill open slots from whatever is still active, best first.
        let open = k.saturating_sub(accepted.len());
        accepted.extend(ranked(&candidates, active).into_iter().take(open));
        let selected = ranked(&candidates, accepted);

        let beta = exploration_rate(n, rounds.max(1), delta);
        let bounds = candidates
            .iter()
            .map(|c| {
                let s = c.counts();
                ConfidenceBounds::from_counts(s.positives, s.samples, beta)
            })
            .collect();

        if stop.is_budget_exhausted() {
            warn!(?stop, rounds, samples_drawn = drawn, "batch-sar stopped on budget");
        } else {
            info!(rounds, samples_drawn = drawn, ?selected, "batch-sar schedule complete");
        }

        Ok(Identification {
            candidates,
            selected,
            stop,
            rounds,
            samples_drawn: drawn,
            elapsed: clock.started().elapsed(),
            bounds,
        })
    }
}
