//! Instance access and the perturbation capability.
//!
//! How an instance is perturbed is domain-specific (tabular row masking, token
//! replacement, superpixel occlusion); this module only fixes the contract.

use rand::rngs::StdRng;
use std::collections::BTreeSet;

use crate::{Error, Result};

/// Read access to an instance's feature values.
///
/// Two values are compared with `PartialEq` when deciding whether two anchors
/// constrain the same feature to the same value.
pub trait FeatureValues {
    type Value: PartialEq;

    /// Number of features the instance exposes.
    fn feature_count(&self) -> usize;

    /// Value of `feature`, or `None` if out of range.
    fn value(&self, feature: usize) -> Option<&Self::Value>;
}

impl<V: PartialEq> FeatureValues for Vec<V> {
    type Value = V;

    fn feature_count(&self) -> usize {
        self.len()
    }

    fn value(&self, feature: usize) -> Option<&V> {
        self.get(feature)
    }
}

impl<V: PartialEq, const N: usize> FeatureValues for [V; N] {
    type Value = V;

    fn feature_count(&self) -> usize {
        N
    }

    fn value(&self, feature: usize) -> Option<&V> {
        self.get(feature)
    }
}

/// Perturbed instances plus, per instance and feature, whether that feature
/// differs from the original.
#[derive(Debug, Clone, PartialEq)]
pub struct PerturbationResult<T> {
    raw: Vec<T>,
    feature_changed: Vec<Vec<bool>>,
}

impl<T> PerturbationResult<T> {
    /// Build a result; fails if `raw` and `feature_changed` differ in length.
    pub fn new(raw: Vec<T>, feature_changed: Vec<Vec<bool>>) -> Result<Self> {
        if raw.len() != feature_changed.len() {
            return Err(Error::PerturbationShape {
                raw: raw.len(),
                changed: feature_changed.len(),
            });
        }
        Ok(Self {
            raw,
            feature_changed,
        })
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// The perturbed instances.
    pub fn raw(&self) -> &[T] {
        &self.raw
    }

    /// Per-instance change masks, aligned with [`raw`](Self::raw).
    pub fn feature_changed(&self) -> &[Vec<bool>] {
        &self.feature_changed
    }

    /// Whether `feature` changed in perturbation `row`; missing cells count as unchanged.
    pub fn changed(&self, row: usize, feature: usize) -> bool {
        self.feature_changed
            .get(row)
            .and_then(|mask| mask.get(feature))
            .copied()
            .unwrap_or(false)
    }

    pub fn into_parts(self) -> (Vec<T>, Vec<Vec<bool>>) {
        (self.raw, self.feature_changed)
    }
}

/// Produces perturbed variants of one reference instance.
///
/// Randomness comes from the `rng` argument only, so the sampling layer can hand
/// every request its own reproducible stream regardless of thread scheduling.
pub trait PerturbationProvider: Send + Sync {
    type Instance: Send + Sync;

    /// Rebind to a new reference instance. Stateless providers may return a clone of themselves.
    fn for_instance(&self, instance: &Self::Instance) -> Self
    where
        Self: Sized;

    /// Create `count` perturbations keeping `fixed` features at their original values.
    ///
    /// Implementations must reject `count == 0` (see [`ensure_positive_count`]).
    fn perturb(
        &self,
        fixed: &BTreeSet<usize>,
        count: usize,
        rng: &mut StdRng,
    ) -> Result<PerturbationResult<Self::Instance>>;
}

/// Argument check shared by providers and sessions.
pub fn ensure_positive_count(count: usize) -> Result<()> {
    if count == 0 {
        Err(Error::NonPositiveCount)
    } else {
        Ok(())
    }
}
