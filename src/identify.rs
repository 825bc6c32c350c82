//! The best-candidate identification contract shared by all bandit strategies.
//!
//! Strategies are chosen at construction time ([`IdentifierConfig::build`]) and used
//! through the [`BestCandidateIdentifier`] trait object.
//!
//! The candidate vector is moved into [`BestCandidateIdentifier::identify`]. On success
//! it comes back inside the [`Identification`]; on failure it is dropped together with
//! whatever statistics the failed run accumulated, so an under-sampled pool cannot be
//! mistaken for a finished one.

use std::cmp::Ordering;
use std::time::{Duration, Instant};

use crate::{
    AnchorCandidate, BatchSar, BatchSarConfig, ConfidenceBounds, Error, KlLucb, KlLucbConfig,
    Result, SamplingSession,
};

/// Sample / wall-clock budget for one identification run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Budget {
    /// Max samples drawn by the run (initial samples included).
    pub max_samples: Option<u64>,
    /// Max wall-clock time of the run.
    pub max_duration: Option<Duration>,
}

impl Budget {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn samples(max: u64) -> Self {
        Self {
            max_samples: Some(max),
            max_duration: None,
        }
    }

    pub fn duration(max: Duration) -> Self {
        Self {
            max_samples: None,
            max_duration: Some(max),
        }
    }
}

/// Which limit ended a run early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BudgetKind {
    Samples,
    Time,
}

/// Why an identification run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StopReason {
    /// Nothing to decide: no candidates, `k == 0`, or `k >= n`.
    Trivial,
    /// The confidence-bound stopping rule fired.
    Certified,
    /// A fixed-budget schedule ran to completion.
    ScheduleComplete,
    /// A budget ran out; the selection is a best-effort estimate.
    BudgetExhausted(BudgetKind),
}

impl StopReason {
    /// Whether the result carries the `1 - delta` guarantee.
    pub fn is_certified(&self) -> bool {
        matches!(self, Self::Certified)
    }

    pub fn is_budget_exhausted(&self) -> bool {
        matches!(self, Self::BudgetExhausted(_))
    }
}

/// Outcome of an identification run.
#[derive(Debug, Clone)]
pub struct Identification {
    /// All candidates, with statistics updated by the run.
    pub candidates: Vec<AnchorCandidate>,
    /// Indices into `candidates`, best empirical precision first.
    pub selected: Vec<usize>,
    pub stop: StopReason,
    /// Bandit rounds executed after initialization.
    pub rounds: u64,
    /// Samples drawn during this run.
    pub samples_drawn: u64,
    pub elapsed: Duration,
    /// Final confidence bounds, aligned with `candidates` (empty for strategies without bounds).
    pub bounds: Vec<ConfidenceBounds>,
}

impl Identification {
    pub(crate) fn trivial(candidates: Vec<AnchorCandidate>, k: usize, started: Instant) -> Self {
        let selected = if k == 0 {
            Vec::new()
        } else {
            ranked(&candidates, (0..candidates.len()).collect())
        };
        Self {
            candidates,
            selected,
            stop: StopReason::Trivial,
            rounds: 0,
            samples_drawn: 0,
            elapsed: started.elapsed(),
            bounds: Vec::new(),
        }
    }

    /// The selected candidates, best first.
    pub fn best(&self) -> impl Iterator<Item = &AnchorCandidate> + '_ {
        self.selected.iter().map(move |&i| &self.candidates[i])
    }

    /// Consume the result, keeping only the selected candidates (best first).
    pub fn into_selected(self) -> Vec<AnchorCandidate> {
        let mut slots: Vec<Option<AnchorCandidate>> =
            self.candidates.into_iter().map(Some).collect();
        self.selected
            .iter()
            .filter_map(|&i| slots.get_mut(i).and_then(Option::take))
            .collect()
    }
}

/// Pure-exploration bandit over anchor candidates.
pub trait BestCandidateIdentifier: Send + Sync {
    /// Identify the `k` candidates most likely to have the highest precision.
    ///
    /// The caller's absolute precision threshold is not enforced here.
    ///
    /// `session` is bound to the explained label. A time budget is measured from the
    /// start of this call, not from the service's
    /// [`time_spent_sampling`](crate::SamplingService::time_spent_sampling) total,
    /// which spans every session.
    fn identify(
        &self,
        candidates: Vec<AnchorCandidate>,
        session: &dyn SamplingSession,
        delta: f64,
        k: usize,
    ) -> Result<Identification>;
}

/// Strategy selection.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IdentifierConfig {
    KlLucb(KlLucbConfig),
    BatchSar(BatchSarConfig),
}

impl Default for IdentifierConfig {
    fn default() -> Self {
        Self::KlLucb(KlLucbConfig::default())
    }
}

impl IdentifierConfig {
    pub fn build(self) -> Result<Box<dyn BestCandidateIdentifier>> {
        Ok(match self {
            Self::KlLucb(cfg) => Box::new(KlLucb::new(cfg)?),
            Self::BatchSar(cfg) => Box::new(BatchSar::new(cfg)?),
        })
    }
}

pub(crate) fn check_delta(delta: f64) -> Result<()> {
    if delta.is_finite() && delta > 0.0 && delta < 1.0 {
        Ok(())
    } else {
        Err(Error::InvalidDelta(delta))
    }
}

/// Mean used for ranking; unsampled candidates rank below every sampled one.
pub(crate) fn ranking_mean(c: &AnchorCandidate) -> f64 {
    let counts = c.counts();
    if counts.samples == 0 {
        -1.0
    } else {
        counts.precision()
    }
}

/// Sort indices by empirical precision, descending; ties keep the lower index first.
pub(crate) fn ranked(candidates: &[AnchorCandidate], mut idx: Vec<usize>) -> Vec<usize> {
    let means: Vec<f64> = idx.iter().map(|&i| ranking_mean(&candidates[i])).collect();
    let mut pairs: Vec<(usize, f64)> = idx.drain(..).zip(means).collect();
    pairs.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    pairs.into_iter().map(|(i, _)| i).collect()
}

/// Tracks a run's budget against its start.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BudgetClock {
    budget: Budget,
    started: Instant,
}

impl BudgetClock {
    pub(crate) fn start(budget: Budget) -> Self {
        Self {
            budget,
            started: Instant::now(),
        }
    }

    pub(crate) fn started(&self) -> Instant {
        self.started
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.budget.max_duration.map(|d| self.started + d)
    }

    /// Samples still allowed (`None` = unlimited).
    pub(crate) fn samples_left(&self, drawn: u64) -> Option<u64> {
        self.budget.max_samples.map(|m| m.saturating_sub(drawn))
    }

    pub(crate) fn exhausted(&self, drawn: u64) -> Option<BudgetKind> {
        if self.samples_left(drawn) == Some(0) {
            return Some(BudgetKind::Samples);
        }
        if self.deadline().is_some_and(|d| Instant::now() >= d) {
            return Some(BudgetKind::Time);
        }
        None
    }
}
