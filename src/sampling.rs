//! Sampling substrate: sessions that turn "keep these features fixed" into
//! evaluated outcomes, and the service that owns the worker pool.
//!
//! Concurrency comes in two layers:
//! - candidate level: [`SamplingSession::evaluate`] dispatches a round of requests across
//!   the pool and blocks until every started request has finished;
//! - sample level: inside one request, model predictions are split into chunks that run in
//!   parallel, each chunk holding one permit of the model gate.
//!
//! Every request gets its own `StdRng`, seeded from a stable hash of
//! `(service seed, session ordinal, label, request sequence)`. A round reserves its
//! sequence numbers before dispatch, so the drawn samples do not depend on thread
//! scheduling.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

use crate::model::ModelGate;
use crate::{
    ensure_positive_count, stream_seed, AnchorCandidate, Classifier, Error, Label,
    PerturbationProvider, PerturbationResult, Result,
};

/// Outcomes of one sampling call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleBatch {
    /// Per perturbation: did the model reproduce the explained label?
    pub outcomes: Vec<bool>,
    /// Number of `true` entries in `outcomes`.
    pub positives: usize,
}

impl SampleBatch {
    pub fn from_outcomes(outcomes: Vec<bool>) -> Self {
        let positives = outcomes.iter().filter(|&&o| o).count();
        Self {
            outcomes,
            positives,
        }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// One entry of a sampling round.
#[derive(Debug, Clone, Copy)]
pub struct SampleRequest<'a> {
    pub candidate: &'a AnchorCandidate,
    pub count: usize,
}

/// What happened to a round of requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EvaluationReport {
    /// Requests that ran to completion and were recorded.
    pub completed: usize,
    /// Requests not started because the deadline had passed.
    pub skipped: usize,
    /// Samples recorded across completed requests.
    pub samples: u64,
}

impl EvaluationReport {
    pub fn cut_short(&self) -> bool {
        self.skipped > 0
    }
}

/// A sampling context bound to one explained-instance label.
pub trait SamplingSession: Sync {
    /// The label every outcome is compared against.
    fn explained_label(&self) -> Label;

    /// Draw `count` perturbations keeping the candidate's features fixed, evaluate them,
    /// and record the batch into the candidate's state.
    fn sample(&self, candidate: &AnchorCandidate, count: usize) -> Result<SampleBatch>;

    /// Run a round of requests and block until it is done.
    ///
    /// Requests not yet started once `deadline` has passed are skipped; finished ones stay
    /// recorded. The default runs requests in order on the calling thread.
    fn evaluate(
        &self,
        requests: &[SampleRequest<'_>],
        deadline: Option<Instant>,
    ) -> Result<EvaluationReport> {
        let mut report = EvaluationReport::default();
        for r in requests {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                report.skipped += 1;
                continue;
            }
            let batch = self.sample(r.candidate, r.count)?;
            report.completed += 1;
            report.samples += batch.len() as u64;
        }
        Ok(report)
    }
}

/// Process-wide façade creating [`SamplingSession`]s.
pub trait SamplingService: Sync {
    type Session<'a>: SamplingSession
    where
        Self: 'a;

    fn create_session(&self, explained_label: Label) -> Self::Session<'_>;

    /// Cumulative wall-clock time spent inside sampling calls of all sessions.
    fn time_spent_sampling(&self) -> Duration;
}

/// Where sampling work runs.
///
/// The service drops only pools it built itself ([`Executor::with_threads`]);
/// a [`Shared`](Executor::Shared) pool stays owned by the caller.
#[derive(Debug)]
pub enum Executor {
    /// Everything on the calling thread (worker count 1).
    CurrentThread,
    /// A pool built for, and dropped with, the service.
    Owned(rayon::ThreadPool),
    /// A caller-owned pool.
    Shared(Arc<rayon::ThreadPool>),
}

impl Executor {
    /// `threads <= 1` yields [`Executor::CurrentThread`].
    pub fn with_threads(threads: usize) -> Result<Self> {
        if threads <= 1 {
            return Ok(Self::CurrentThread);
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("anchorage-sampler-{i}"))
            .build()?;
        Ok(Self::Owned(pool))
    }

    pub fn shared(pool: Arc<rayon::ThreadPool>) -> Self {
        Self::Shared(pool)
    }

    fn pool(&self) -> Option<&rayon::ThreadPool> {
        match self {
            Self::CurrentThread => None,
            Self::Owned(p) => Some(p),
            Self::Shared(p) => Some(p.as_ref()),
        }
    }

    pub fn threads(&self) -> usize {
        self.pool().map_or(1, |p| p.current_num_threads())
    }

    pub fn is_parallel(&self) -> bool {
        self.pool().is_some()
    }
}

/// Configuration for [`PooledSamplingService`].
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SamplingConfig {
    /// Root seed of every per-request sampling stream.
    pub seed: u64,
    /// Max concurrent model calls (`None` = unbounded). Ignored for non-reentrant models,
    /// which are always serialized.
    pub model_parallelism: Option<usize>,
    /// Perturbed instances per model call; chunks of one request run in parallel.
    pub model_chunk_size: usize,
    /// Retries applied to a failing perturbation or model call before the error propagates.
    pub collaborator_retries: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            model_parallelism: None,
            model_chunk_size: 256,
            collaborator_retries: 0,
        }
    }
}

impl SamplingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model_chunk_size == 0 {
            return Err(Error::InvalidConfig(
                "model_chunk_size must be positive".to_string(),
            ));
        }
        if self.model_parallelism == Some(0) {
            return Err(Error::InvalidConfig(
                "model_parallelism must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// [`SamplingService`] backed by a perturbation provider, a classifier and an [`Executor`].
#[derive(Debug)]
pub struct PooledSamplingService<P, M> {
    provider: P,
    model: M,
    executor: Executor,
    gate: ModelGate,
    cfg: SamplingConfig,
    time_spent_nanos: AtomicU64,
    sessions: AtomicU64,
}

impl<P, M> PooledSamplingService<P, M>
where
    P: PerturbationProvider,
    M: Classifier<P::Instance>,
{
    pub fn new(provider: P, model: M, executor: Executor, cfg: SamplingConfig) -> Result<Self> {
        cfg.validate()?;
        let gate = ModelGate::new(cfg.model_parallelism, model.is_reentrant());
        Ok(Self {
            provider,
            model,
            executor,
            gate,
            cfg,
            time_spent_nanos: AtomicU64::new(0),
            sessions: AtomicU64::new(0),
        })
    }

    /// Single-threaded service with default configuration.
    pub fn current_thread(provider: P, model: M) -> Result<Self> {
        Self::new(provider, model, Executor::CurrentThread, SamplingConfig::default())
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn config(&self) -> &SamplingConfig {
        &self.cfg
    }

    /// Effective bound on concurrent model calls (`None` = unbounded).
    pub fn model_permits(&self) -> Option<usize> {
        self.gate.permits()
    }

    /// Give back the collaborators; an owned pool is dropped here.
    pub fn into_parts(self) -> (P, M) {
        (self.provider, self.model)
    }

    fn add_time(&self, d: Duration) {
        let nanos = u64::try_from(d.as_nanos()).unwrap_or(u64::MAX);
        self.time_spent_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    fn with_retries<R>(&self, mut f: impl FnMut() -> Result<R>) -> Result<R> {
        let mut attempt = 0u32;
        loop {
            match f() {
                Err(e) if e.is_retryable() && attempt < self.cfg.collaborator_retries => {
                    attempt += 1;
                    warn!(attempt, error = %e, "collaborator call failed, retrying");
                }
                other => return other,
            }
        }
    }

    fn predict(&self, instances: &[P::Instance]) -> Result<Vec<Label>> {
        let labels = self.with_retries(|| self.gate.run(|| self.model.predict_batch(instances)))?;
        if labels.len() != instances.len() {
            return Err(Error::PredictionCountMismatch {
                requested: instances.len(),
                returned: labels.len(),
            });
        }
        Ok(labels)
    }

    fn run_request(
        &self,
        label: Label,
        stream: u64,
        candidate: &AnchorCandidate,
        count: usize,
    ) -> Result<SampleBatch> {
        ensure_positive_count(count)?;
        let started = Instant::now();
        let outcome = self.draw(label, stream, candidate, count);
        self.add_time(started.elapsed());
        let batch = outcome?;
        candidate
            .state()
            .record(batch.len() as u64, batch.positives as u64)?;
        Ok(batch)
    }

    fn draw(
        &self,
        label: Label,
        stream: u64,
        candidate: &AnchorCandidate,
        count: usize,
    ) -> Result<SampleBatch> {
        let fixed = candidate.canonical_features();
        let perturbed: PerturbationResult<P::Instance> = self.with_retries(|| {
            let mut rng = StdRng::seed_from_u64(stream);
            self.provider.perturb(fixed, count, &mut rng)
        })?;
        if perturbed.len() != count {
            return Err(Error::PerturbationCountMismatch {
                requested: count,
                returned: perturbed.len(),
            });
        }

        let raw = perturbed.raw();
        let chunk = self.cfg.model_chunk_size;
        let labels: Vec<Label> = match self.executor.pool() {
            Some(pool) if raw.len() > chunk => {
                let parts: Vec<Vec<Label>> = pool.install(|| {
                    raw.par_chunks(chunk)
                        .map(|c| self.predict(c))
                        .collect::<Result<_>>()
                })?;
                parts.into_iter().flatten().collect()
            }
            _ => {
                let mut out = Vec::with_capacity(raw.len());
                for c in raw.chunks(chunk) {
                    out.extend(self.predict(c)?);
                }
                out
            }
        };

        let outcomes = labels.into_iter().map(|l| l == label).collect();
        Ok(SampleBatch::from_outcomes(outcomes))
    }
}

impl<P, M> SamplingService for PooledSamplingService<P, M>
where
    P: PerturbationProvider,
    M: Classifier<P::Instance>,
{
    type Session<'a>
        = PooledSession<'a, P, M>
    where
        Self: 'a;

    fn create_session(&self, explained_label: Label) -> PooledSession<'_, P, M> {
        let ordinal = self.sessions.fetch_add(1, Ordering::Relaxed);
        PooledSession {
            service: self,
            label: explained_label,
            seed: stream_seed(self.cfg.seed, &[ordinal, u64::from(explained_label)]),
            next_request: AtomicU64::new(0),
        }
    }

    fn time_spent_sampling(&self) -> Duration {
        Duration::from_nanos(self.time_spent_nanos.load(Ordering::Relaxed))
    }
}

/// Session created by [`PooledSamplingService`].
#[derive(Debug)]
pub struct PooledSession<'a, P, M> {
    service: &'a PooledSamplingService<P, M>,
    label: Label,
    seed: u64,
    next_request: AtomicU64,
}

impl<P, M> PooledSession<'_, P, M> {
    fn reserve(&self, n: usize) -> u64 {
        self.next_request.fetch_add(n as u64, Ordering::Relaxed)
    }

    fn stream(&self, request: u64) -> u64 {
        stream_seed(self.seed, &[request])
    }
}

impl<P, M> SamplingSession for PooledSession<'_, P, M>
where
    P: PerturbationProvider,
    M: Classifier<P::Instance>,
{
    fn explained_label(&self) -> Label {
        self.label
    }

    fn sample(&self, candidate: &AnchorCandidate, count: usize) -> Result<SampleBatch> {
        let request = self.reserve(1);
        self.service
            .run_request(self.label, self.stream(request), candidate, count)
    }

    fn evaluate(
        &self,
        requests: &[SampleRequest<'_>],
        deadline: Option<Instant>,
    ) -> Result<EvaluationReport> {
        let base = self.reserve(requests.len());
        let run = |(i, r): (usize, &SampleRequest<'_>)| -> Result<Option<u64>> {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(None);
            }
            let stream = self.stream(base + i as u64);
            let batch = self
                .service
                .run_request(self.label, stream, r.candidate, r.count)?;
            Ok(Some(batch.len() as u64))
        };

        let done: Vec<Option<u64>> = match self.service.executor.pool() {
            Some(pool) => pool.install(|| {
                requests
                    .par_iter()
                    .enumerate()
                    .map(run)
                    .collect::<Result<Vec<_>>>()
            })?,
            None => requests
                .iter()
                .enumerate()
                .map(run)
                .collect::<Result<Vec<_>>>()?,
        };

        let mut report = EvaluationReport::default();
        for d in done {
            match d {
                Some(n) => {
                    report.completed += 1;
                    report.samples += n;
                }
                None => report.skipped += 1,
            }
        }
        trace!(
            label = self.label,
            completed = report.completed,
            skipped = report.skipped,
            "sampling round finished"
        );
        Ok(report)
    }
}
