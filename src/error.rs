//! Crate error type.
//!
//! Three failure families exist:
//! - configuration errors (bad shapes, non-positive counts, out-of-range parameters),
//!   raised where they are detected and never coerced;
//! - collaborator errors (perturbation or model failures), fatal for the enclosing
//!   identification run after the configured retries;
//! - executor errors (worker pool construction).
//!
//! Budget exhaustion is not an error: see [`StopReason`](crate::StopReason).

use std::fmt;

/// Which external collaborator produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Collaborator {
    /// The [`PerturbationProvider`](crate::PerturbationProvider).
    Perturbation,
    /// The [`Classifier`](crate::Classifier).
    Model,
}

impl fmt::Display for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Perturbation => f.write_str("perturbation provider"),
            Self::Model => f.write_str("model"),
        }
    }
}

/// Unified error type for sampling, identification and picking.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A perturbation result was built with mismatched instance / mask lengths.
    #[error("perturbation result has {raw} instances but {changed} feature-change rows")]
    PerturbationShape { raw: usize, changed: usize },

    /// A provider returned a different number of perturbations than requested.
    #[error("requested {requested} perturbations, provider returned {returned}")]
    PerturbationCountMismatch { requested: usize, returned: usize },

    /// A model returned a different number of labels than instances it was given.
    #[error("model returned {returned} labels for {requested} instances")]
    PredictionCountMismatch { requested: usize, returned: usize },

    /// A sample or perturbation count of zero was requested.
    #[error("sample count must be positive")]
    NonPositiveCount,

    /// A candidate must hold at least one feature fixed.
    #[error("anchor candidate must fix at least one feature")]
    EmptyCandidate,

    /// A candidate references a feature the instance does not have.
    #[error("feature index {feature} out of range for an instance with {feature_count} features")]
    FeatureOutOfRange { feature: usize, feature_count: usize },

    /// A sample batch reported more positives than samples.
    #[error("batch reports {positives} positives out of {samples} samples")]
    InvalidBatch { samples: u64, positives: u64 },

    /// The confidence parameter was outside `(0, 1)`.
    #[error("delta must lie in (0, 1), got {0}")]
    InvalidDelta(f64),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An external collaborator failed.
    #[error("{kind} failed: {source}")]
    Collaborator {
        kind: Collaborator,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Building a worker pool failed.
    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl Error {
    /// Wrap a perturbation provider failure.
    pub fn perturbation(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Collaborator {
            kind: Collaborator::Perturbation,
            source: source.into(),
        }
    }

    /// Wrap a model failure.
    pub fn model(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Collaborator {
            kind: Collaborator::Model,
            source: source.into(),
        }
    }

    /// Whether a retry policy may re-run the failing call.
    ///
    /// Only collaborator failures qualify; shape and configuration errors are
    /// deterministic and would fail again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Collaborator { .. })
    }
}

/// Crate result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;
