//! The model oracle and the gate that bounds concurrent calls into it.

use parking_lot::{Condvar, Mutex};

use crate::Result;

/// Predicted class label.
pub type Label = u32;

/// An opaque classifier, assumed deterministic for a fixed instance.
pub trait Classifier<T>: Send + Sync {
    fn predict(&self, instance: &T) -> Result<Label>;

    /// Batched prediction. The default maps [`predict`](Self::predict); override
    /// when the model has a real batch path.
    fn predict_batch(&self, instances: &[T]) -> Result<Vec<Label>> {
        instances.iter().map(|x| self.predict(x)).collect()
    }

    /// `false` if the model must never be called from two threads at once.
    fn is_reentrant(&self) -> bool {
        true
    }
}

impl<T, F> Classifier<T> for F
where
    F: Fn(&T) -> Label + Send + Sync,
{
    fn predict(&self, instance: &T) -> Result<Label> {
        Ok(self(instance))
    }
}

/// Counting semaphore around model invocation.
///
/// `None` permits means unbounded. A non-reentrant model gets exactly one permit,
/// which serializes every call.
#[derive(Debug)]
pub(crate) struct ModelGate {
    permits: Option<usize>,
    in_use: Mutex<usize>,
    released: Condvar,
}

impl ModelGate {
    pub(crate) fn new(max_parallelism: Option<usize>, reentrant: bool) -> Self {
        let permits = if reentrant {
            max_parallelism.map(|p| p.max(1))
        } else {
            Some(1)
        };
        Self {
            permits,
            in_use: Mutex::new(0),
            released: Condvar::new(),
        }
    }

    pub(crate) fn permits(&self) -> Option<usize> {
        self.permits
    }

    /// Run `f` while holding one permit.
    pub(crate) fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let Some(limit) = self.permits else {
            return f();
        };
        {
            let mut in_use = self.in_use.lock();
            while *in_use >= limit {
                self.released.wait(&mut in_use);
            }
            *in_use += 1;
        }
        let _permit = Permit(self);
        f()
    }
}

/// Returns its permit on drop, including when `f` panics.
struct Permit<'a>(&'a ModelGate);

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let mut in_use = self.0.in_use.lock();
        *in_use = in_use.saturating_sub(1);
        self.0.released.notify_one();
    }
}
