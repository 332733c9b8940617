//! The [`Future`] handle itself: the Resolvable Future primitive (§4.2), the
//! Immediate Future variants (§4.3 intro), and the shared observer-list
//! machinery every combinator and collector builds on.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::caller::{Caller, DirectCaller};
use crate::error::{ComputationFailure, FutureError};
use crate::observer::{ObserverRecord, Outcome};

/// A pending link from a downstream future to an upstream one: firing it
/// cancels the upstream. Stored on the downstream only, so there is no
/// reference cycle between upstream and downstream (§9 design notes).
type CancelLink = Box<dyn FnOnce() + Send>;

enum State<T> {
    Running {
        observers: Vec<ObserverRecord<T>>,
        cancel_links: Vec<CancelLink>,
    },
    Terminal(Outcome<T>),
}

impl<T> State<T> {
    fn running() -> Self {
        State::Running { observers: Vec::new(), cancel_links: Vec::new() }
    }
}

struct Resolvable<T> {
    state: Mutex<State<T>>,
    condvar: Condvar,
    caller: Arc<dyn Caller>,
}

impl<T: Send + Sync + 'static> Resolvable<T> {
    fn new(caller: Arc<dyn Caller>) -> Arc<Self> {
        Arc::new(Resolvable { state: Mutex::new(State::running()), condvar: Condvar::new(), caller })
    }

    /// Attempts the Running→Terminal transition. Returns `false` (no-op) if
    /// the future had already left `Running`. On success, detaches the
    /// observer list and cancel links, releases the lock, then dispatches
    /// everyone outside the lock (§4.2 algorithm sketch; "no in-lock user
    /// code" invariant in §3).
    fn complete(&self, outcome: Outcome<T>) -> bool {
        let (observers, links) = {
            let mut guard = self.state.lock();
            match &*guard {
                State::Terminal(_) => return false,
                State::Running { .. } => {}
            }
            let previous = std::mem::replace(&mut *guard, State::Terminal(outcome.clone()));
            self.condvar.notify_all();
            match previous {
                State::Running { observers, cancel_links } => (observers, cancel_links),
                State::Terminal(_) => unreachable!("checked above"),
            }
        };

        // Cancellation only ever completes with `Outcome::Cancelled`; the
        // propagate-upstream links only make sense for that terminal state.
        if matches!(outcome, Outcome::Cancelled) {
            for link in links {
                link();
            }
        }

        for observer in observers {
            dispatch(self.caller.as_ref(), context_for(&observer), observer, outcome.clone());
        }
        true
    }

}

fn context_for<T>(record: &ObserverRecord<T>) -> &'static str {
    match record {
        ObserverRecord::Resolved(_) => "on_resolved",
        ObserverRecord::Failed(_) => "on_failed",
        ObserverRecord::Cancelled(_) => "on_cancelled",
        ObserverRecord::Finished(_) => "on_finished",
    }
}

fn dispatch<T: Send + Sync + 'static>(
    caller: &dyn Caller,
    context: &'static str,
    record: ObserverRecord<T>,
    outcome: Outcome<T>,
) {
    caller.invoke(context, Box::new(move || record.fire(&outcome)));
}

enum Repr<T> {
    Resolvable(Arc<Resolvable<T>>),
    Resolved(Arc<T>, Arc<dyn Caller>),
    Failed(Arc<ComputationFailure>, Arc<dyn Caller>),
    Cancelled(Arc<dyn Caller>),
}

/// A thread-safe handle to an eventually-completed value.
///
/// Cheap to clone (an `Arc`-backed enum): every clone refers to the same
/// underlying completion cell, so registering observers or calling
/// `resolve`/`fail`/`cancel` from any clone has the same effect as calling it
/// on any other. Resolved/failed payloads are handed to observers and to
/// `join`/`joinNow` as `Arc<T>` / `Arc<ComputationFailure>` rather than by
/// value, so a single result can be read by many observers without requiring
/// `T: Clone`.
pub struct Future<T: Send + Sync + 'static>(Repr<T>);

impl<T: Send + Sync + 'static> Clone for Future<T> {
    fn clone(&self) -> Self {
        match &self.0 {
            Repr::Resolvable(r) => Future(Repr::Resolvable(r.clone())),
            Repr::Resolved(v, c) => Future(Repr::Resolved(v.clone(), c.clone())),
            Repr::Failed(e, c) => Future(Repr::Failed(e.clone(), c.clone())),
            Repr::Cancelled(c) => Future(Repr::Cancelled(c.clone())),
        }
    }
}

impl<T: Send + Sync + 'static> Future<T> {
    /// Creates a fresh Resolvable Future: born `Running`, with an empty
    /// observer list, using a default direct [`Caller`].
    pub fn resolvable() -> Self {
        Self::resolvable_with_caller(Arc::new(DirectCaller::default()))
    }

    /// Creates a fresh Resolvable Future that dispatches observers through
    /// `caller`.
    pub fn resolvable_with_caller(caller: Arc<dyn Caller>) -> Self {
        Future(Repr::Resolvable(Resolvable::new(caller)))
    }

    /// An Immediate Future, already `Resolved`.
    pub fn resolved(value: T) -> Self {
        Self::resolved_with_caller(value, Arc::new(DirectCaller::default()))
    }

    /// An Immediate Future, already `Resolved`, dispatching through `caller`.
    pub fn resolved_with_caller(value: T, caller: Arc<dyn Caller>) -> Self {
        Future(Repr::Resolved(Arc::new(value), caller))
    }

    /// An Immediate Future, already `Failed`.
    pub fn failed(cause: ComputationFailure) -> Self {
        Self::failed_with_caller(cause, Arc::new(DirectCaller::default()))
    }

    /// An Immediate Future, already `Failed`, dispatching through `caller`.
    pub fn failed_with_caller(cause: ComputationFailure, caller: Arc<dyn Caller>) -> Self {
        Future(Repr::Failed(Arc::new(cause), caller))
    }

    /// An Immediate Future, already `Cancelled`.
    pub fn cancelled() -> Self {
        Self::cancelled_with_caller(Arc::new(DirectCaller::default()))
    }

    /// An Immediate Future, already `Cancelled`, dispatching through `caller`.
    pub fn cancelled_with_caller(caller: Arc<dyn Caller>) -> Self {
        Future(Repr::Cancelled(caller))
    }

    /// The `Caller` this future dispatches observer invocations through.
    /// Combinators reuse this so a downstream future inherits its upstream's
    /// dispatch policy unless told otherwise.
    pub fn caller(&self) -> Arc<dyn Caller> {
        match &self.0 {
            Repr::Resolvable(r) => r.caller.clone(),
            Repr::Resolved(_, c) | Repr::Failed(_, c) | Repr::Cancelled(c) => c.clone(),
        }
    }

    /// Attempts the Running→Resolved transition. Returns `true` iff this call
    /// performed it.
    pub fn resolve(&self, value: T) -> bool {
        let ok = self.complete_with(Outcome::Resolved(Arc::new(value)));
        if ok {
            tracing::trace!("future resolved");
        }
        ok
    }

    /// Like [`resolve`](Future::resolve), but takes an already-shared value.
    /// Used internally to pass an upstream's result straight through without
    /// requiring `T: Clone`.
    pub(crate) fn resolve_arc(&self, value: Arc<T>) -> bool {
        self.complete_with(Outcome::Resolved(value))
    }

    /// Like [`fail`](Future::fail), but takes an already-shared cause. Used
    /// internally to pass an upstream's failure straight through.
    pub(crate) fn fail_arc(&self, cause: Arc<ComputationFailure>) -> bool {
        self.complete_with(Outcome::Failed(cause))
    }

    /// Attempts the Running→Failed transition. Returns `true` iff this call
    /// performed it.
    pub fn fail(&self, cause: ComputationFailure) -> bool {
        let ok = self.complete_with(Outcome::Failed(Arc::new(cause)));
        if ok {
            tracing::trace!("future failed");
        }
        ok
    }

    /// Attempts the Running→Cancelled transition. Returns `true` iff this
    /// call performed it. On success, every upstream linked via [`bind`] is
    /// cancelled in turn.
    ///
    /// [`bind`]: Future::bind
    pub fn cancel(&self) -> bool {
        let ok = self.complete_with(Outcome::Cancelled);
        if ok {
            tracing::trace!("future cancelled");
        }
        ok
    }

    /// Completes this future with an already-terminal [`Outcome`], reusing a
    /// borrowed value rather than requiring an owned `T`. Used internally by
    /// combinators/collectors to pass an upstream's `Arc<T>`/`Arc<ComputationFailure>`
    /// straight through to a downstream without needing `T: Clone`.
    pub(crate) fn complete_with(&self, outcome: Outcome<T>) -> bool {
        match &self.0 {
            Repr::Resolvable(r) => r.complete(outcome),
            _ => false,
        }
    }

    /// Snapshot: true once the future has left `Running`.
    pub fn is_done(&self) -> bool {
        match &self.0 {
            Repr::Resolvable(r) => matches!(&*r.state.lock(), State::Terminal(_)),
            _ => true,
        }
    }

    /// Snapshot: true iff the future is `Resolved`.
    pub fn is_resolved(&self) -> bool {
        self.snapshot_outcome().is_some_and(|o| o.is_resolved())
    }

    /// Snapshot: true iff the future is `Failed`.
    pub fn is_failed(&self) -> bool {
        self.snapshot_outcome().is_some_and(|o| o.is_failed())
    }

    /// Snapshot: true iff the future is `Cancelled`.
    pub fn is_cancelled(&self) -> bool {
        self.snapshot_outcome().is_some_and(|o| o.is_cancelled())
    }

    fn snapshot_outcome(&self) -> Option<Outcome<T>> {
        match &self.0 {
            Repr::Resolvable(r) => match &*r.state.lock() {
                State::Terminal(outcome) => Some(outcome.clone()),
                State::Running { .. } => None,
            },
            Repr::Resolved(v, _) => Some(Outcome::Resolved(v.clone())),
            Repr::Failed(e, _) => Some(Outcome::Failed(e.clone())),
            Repr::Cancelled(_) => Some(Outcome::Cancelled),
        }
    }

    /// Blocks until terminal, then returns the value or propagates the
    /// failure cause / cancellation marker.
    pub fn join(&self) -> Result<Arc<T>, FutureError> {
        let outcome = match &self.0 {
            Repr::Resolvable(r) => {
                let mut guard = r.state.lock();
                loop {
                    match &*guard {
                        State::Terminal(outcome) => break outcome.clone(),
                        State::Running { .. } => r.condvar.wait(&mut guard),
                    }
                }
            }
            Repr::Resolved(v, _) => Outcome::Resolved(v.clone()),
            Repr::Failed(e, _) => Outcome::Failed(e.clone()),
            Repr::Cancelled(_) => Outcome::Cancelled,
        };
        outcome_to_result(outcome)
    }

    /// Returns immediately: the value if `Resolved`, [`FutureError::NotReady`]
    /// if still `Running`, or the propagated cause/cancellation otherwise.
    pub fn join_now(&self) -> Result<Arc<T>, FutureError> {
        match self.snapshot_outcome() {
            Some(outcome) => outcome_to_result(outcome),
            None => Err(FutureError::NotReady),
        }
    }

    /// Registers `observer` to run when this future resolves. If already
    /// `Resolved`, schedules the invocation now via this future's `Caller`.
    pub fn on_resolved(&self, observer: impl FnOnce(Arc<T>) + Send + 'static) {
        self.notify_or_register(ObserverRecord::Resolved(Box::new(observer)));
    }

    /// Registers `observer` to run when this future fails. If already
    /// `Failed`, schedules the invocation now via this future's `Caller`.
    pub fn on_failed(&self, observer: impl FnOnce(Arc<ComputationFailure>) + Send + 'static) {
        self.notify_or_register(ObserverRecord::Failed(Box::new(observer)));
    }

    /// Registers `observer` to run when this future is cancelled. If already
    /// `Cancelled`, schedules the invocation now via this future's `Caller`.
    pub fn on_cancelled(&self, observer: impl FnOnce() + Send + 'static) {
        self.notify_or_register(ObserverRecord::Cancelled(Box::new(observer)));
    }

    /// Registers `observer` to run once this future reaches any terminal
    /// state. If already terminal, schedules the invocation now via this
    /// future's `Caller`.
    pub fn on_finished(&self, observer: impl FnOnce(Outcome<T>) + Send + 'static) {
        self.notify_or_register(ObserverRecord::Finished(Box::new(observer)));
    }

    fn notify_or_register(&self, record: ObserverRecord<T>) {
        let context = context_for(&record);
        match &self.0 {
            Repr::Resolvable(r) => {
                let mut guard = r.state.lock();
                match &mut *guard {
                    State::Running { observers, .. } => {
                        observers.push(record);
                    }
                    State::Terminal(outcome) => {
                        let outcome = outcome.clone();
                        drop(guard);
                        dispatch(r.caller.as_ref(), context, record, outcome);
                    }
                }
            }
            Repr::Resolved(v, c) => dispatch(c.as_ref(), context, record, Outcome::Resolved(v.clone())),
            Repr::Failed(e, c) => dispatch(c.as_ref(), context, record, Outcome::Failed(e.clone())),
            Repr::Cancelled(c) => dispatch(c.as_ref(), context, record, Outcome::Cancelled),
        }
    }

    /// Links `self` to `upstream`: cancelling `self` while it is `Running`
    /// also cancels `upstream`. This is the "downstream cancels upstream"
    /// link every combinator establishes between the future it returns and
    /// the future(s) it was built from.
    pub fn bind<U: Send + Sync + 'static>(&self, upstream: Future<U>) {
        if let Repr::Resolvable(r) = &self.0 {
            let mut guard = r.state.lock();
            if let State::Running { cancel_links, .. } = &mut *guard {
                cancel_links.push(Box::new(move || {
                    upstream.cancel();
                }));
                return;
            }
        }
        // Already terminal (or an Immediate future): if we raced a
        // cancellation, propagate immediately; otherwise there is nothing
        // left to link.
        if self.is_cancelled() {
            upstream.cancel();
        }
    }
}

fn outcome_to_result<T>(outcome: Outcome<T>) -> Result<Arc<T>, FutureError> {
    match outcome {
        Outcome::Resolved(v) => Ok(v),
        Outcome::Failed(e) => Err(FutureError::Failed((*e).clone())),
        Outcome::Cancelled => Err(FutureError::Cancelled),
    }
}
