//! Observer records: the payload shapes a [`crate::future::Future`] can be
//! asked to notify on completion, plus the [`Outcome`] handed to `onFinished`.
//!
//! Every payload is handed to observers as an `Arc` rather than a borrow:
//! a single completion is typically read by several observers (a combinator's
//! continuation, a collector slot, a user's own `on_resolved`), and `Arc`
//! lets every one of them get an owned, cheaply-cloned handle without
//! requiring `T: Clone` or threading lifetimes through boxed closures.

use std::sync::Arc;

use crate::error::ComputationFailure;

/// The terminal state of a future, as handed to an `onFinished` observer or
/// returned by a collector's bookkeeping.
pub enum Outcome<T> {
    /// The future resolved with this value.
    Resolved(Arc<T>),
    /// The future failed with this cause.
    Failed(Arc<ComputationFailure>),
    /// The future was cancelled.
    Cancelled,
}

// Hand-written rather than `#[derive(Clone)]`: the fields are all `Arc`, so
// this should be `Clone` regardless of whether `T` is, but the derive macro
// would add a spurious `T: Clone` bound.
impl<T> Clone for Outcome<T> {
    fn clone(&self) -> Self {
        match self {
            Outcome::Resolved(v) => Outcome::Resolved(v.clone()),
            Outcome::Failed(e) => Outcome::Failed(e.clone()),
            Outcome::Cancelled => Outcome::Cancelled,
        }
    }
}

impl<T> Outcome<T> {
    /// True if this outcome is `Resolved`.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Outcome::Resolved(_))
    }

    /// True if this outcome is `Failed`.
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    /// True if this outcome is `Cancelled`.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }
}

/// One pending observer, tagged by which completion kind it wants to hear
/// about. Stored in a future's observer list while `Running`; drained and
/// invoked (through a `Caller`) the moment the future leaves `Running`.
pub(crate) enum ObserverRecord<T> {
    Resolved(Box<dyn FnOnce(Arc<T>) + Send>),
    Failed(Box<dyn FnOnce(Arc<ComputationFailure>) + Send>),
    Cancelled(Box<dyn FnOnce() + Send>),
    Finished(Box<dyn FnOnce(Outcome<T>) + Send>),
}

impl<T> ObserverRecord<T> {
    /// Invokes this observer against a known terminal outcome, if its
    /// subscription matches. Matching `onFinished` observers run regardless
    /// of which terminal outcome occurred.
    pub(crate) fn fire(self, outcome: &Outcome<T>) {
        match (self, outcome) {
            (ObserverRecord::Resolved(f), Outcome::Resolved(v)) => f(v.clone()),
            (ObserverRecord::Failed(f), Outcome::Failed(e)) => f(e.clone()),
            (ObserverRecord::Cancelled(f), Outcome::Cancelled) => f(),
            (ObserverRecord::Finished(f), outcome) => f(outcome.clone()),
            _ => {}
        }
    }
}
