//! Delayed Collect Coordinator (§4.6): a bounded-parallelism lazy collector.
//! Given N factories and a parallelism bound P, keeps at most P futures in
//! flight at once, feeding results into a [`StreamCollector`] and aborting
//! (cancelling the rest) on the first failure or cancellation.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::collect::StreamCollector;
use crate::error::ComputationFailure;
use crate::future::Future;
use crate::observer::Outcome;

/// A factory invoked lazily by the coordinator to produce the next future to
/// run. A factory that panics synchronously is treated exactly like one that
/// returned an already-failed future (§9 Open Question (b)).
pub type Factory<T> = Box<dyn Fn() -> Future<T> + Send + Sync>;

struct Coordinator<T: Send + Sync + 'static, R: Send + Sync + 'static> {
    factories: Vec<Factory<T>>,
    collector: Arc<dyn StreamCollector<T, R>>,
    destination: Future<R>,
    state: Mutex<CoordinatorState<T>>,
}

struct CoordinatorState<T: Send + Sync + 'static> {
    next_index: usize,
    pending: usize,
    started: usize,
    resolved: usize,
    failed: usize,
    cancelled: usize,
    aborted: bool,
    finished: bool,
    /// Handles to futures currently in flight, keyed by slot index, so
    /// `abort` has something to cancel (§4.6 steps 3 and 5).
    inflight: HashMap<usize, Future<T>>,
}

/// Runs `factories` with at most `parallelism` futures in flight at once,
/// streaming every result into `collector`, and returns a future of the
/// collector's final `end(..)` reduction.
///
/// Cancelling the returned future before it completes cancels every inflight
/// upstream and aborts invocation of any factory not yet started; uninvoked
/// factories count as cancelled in the final tally (§4.6 step 4).
pub fn eventually_collect<T, R>(
    factories: Vec<Factory<T>>,
    collector: Arc<dyn StreamCollector<T, R>>,
    parallelism: usize,
    caller: Arc<dyn crate::caller::Caller>,
) -> Future<R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    assert!(parallelism >= 1, "parallelism bound must be at least 1");

    let total = factories.len();
    let destination = Future::resolvable_with_caller(caller);

    if total == 0 {
        let result = collector.end(0, 0, 0);
        destination.resolve(result);
        return destination;
    }

    let coordinator = Arc::new(Coordinator {
        factories,
        collector,
        destination: destination.clone(),
        state: Mutex::new(CoordinatorState {
            next_index: 0,
            pending: 0,
            started: 0,
            resolved: 0,
            failed: 0,
            cancelled: 0,
            aborted: false,
            finished: false,
            inflight: HashMap::new(),
        }),
    });

    {
        let coordinator = coordinator.clone();
        destination.on_cancelled(move || {
            abort(&coordinator);
        });
    }

    let to_start = parallelism.min(total);
    for _ in 0..to_start {
        start_next(&coordinator);
    }

    destination
}

fn start_next<T, R>(coordinator: &Arc<Coordinator<T, R>>)
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    let index = {
        let mut state = coordinator.state.lock();
        if state.aborted || state.next_index >= coordinator.factories.len() {
            return;
        }
        let index = state.next_index;
        state.next_index += 1;
        state.pending += 1;
        state.started += 1;
        index
    };

    tracing::trace!(index, "delayed collect: starting factory");

    let produced =
        panic::catch_unwind(AssertUnwindSafe(|| (coordinator.factories[index])())).unwrap_or_else(|payload| {
            Future::failed_with_caller(ComputationFailure::from_panic(payload), coordinator.destination.caller())
        });

    // An abort may have landed between reserving this slot and getting here;
    // in that case don't register it as inflight (nothing will ever drain
    // it from the map), just cancel it directly.
    let aborted_after_start = {
        let mut state = coordinator.state.lock();
        if state.aborted {
            true
        } else {
            state.inflight.insert(index, produced.clone());
            false
        }
    };

    let coordinator_clone = coordinator.clone();
    produced.on_finished(move |outcome| on_slot_finished(&coordinator_clone, index, outcome));

    if aborted_after_start {
        produced.cancel();
    }
}

fn on_slot_finished<T, R>(coordinator: &Arc<Coordinator<T, R>>, index: usize, outcome: Outcome<T>)
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    match &outcome {
        Outcome::Resolved(v) => coordinator.collector.resolved(v.clone()),
        Outcome::Failed(e) => coordinator.collector.failed(e.clone()),
        Outcome::Cancelled => coordinator.collector.cancelled(),
    }

    let should_abort = matches!(outcome, Outcome::Failed(_) | Outcome::Cancelled);

    let should_finish = {
        let mut state = coordinator.state.lock();
        state.inflight.remove(&index);
        state.pending -= 1;
        match &outcome {
            Outcome::Resolved(_) => state.resolved += 1,
            Outcome::Failed(_) => state.failed += 1,
            Outcome::Cancelled => state.cancelled += 1,
        }
        // `abort` (called below when `should_abort`) is the sole setter of
        // `aborted`; anticipate it here so `no_more_to_start` is accurate
        // even though the flag itself flips a moment later.
        let will_be_aborted = state.aborted || should_abort;
        let no_more_to_start = will_be_aborted || state.next_index >= coordinator.factories.len();
        no_more_to_start && state.pending == 0
    };

    if should_abort {
        abort(coordinator);
    } else {
        start_next(coordinator);
    }

    if should_finish {
        finish(coordinator);
    }
}

/// Stops invoking further factories and cancels every currently-inflight
/// upstream (§4.6 steps 3 and 5). Each cancelled upstream reports back
/// through its own `on_finished` observer, draining `pending` the same way a
/// natural completion would, which is what lets `finish` eventually run.
fn abort<T, R>(coordinator: &Arc<Coordinator<T, R>>)
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    let inflight: Vec<Future<T>> = {
        let mut state = coordinator.state.lock();
        let was_aborted = state.aborted;
        state.aborted = true;
        if was_aborted {
            Vec::new()
        } else {
            state.inflight.drain().map(|(_, future)| future).collect()
        }
    };

    if !inflight.is_empty() {
        tracing::debug!(count = inflight.len(), "delayed collect: aborting, cancelling inflight slots");
    }

    for future in inflight {
        future.cancel();
    }
}

fn finish<T, R>(coordinator: &Arc<Coordinator<T, R>>)
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    let already_finished = {
        let mut state = coordinator.state.lock();
        if state.finished {
            true
        } else {
            state.finished = true;
            false
        }
    };
    if already_finished {
        return;
    }

    let (resolved, failed, cancelled, uninvoked) = {
        let state = coordinator.state.lock();
        let uninvoked = coordinator.factories.len() - state.started;
        (state.resolved, state.failed, state.cancelled + uninvoked, uninvoked)
    };

    if uninvoked > 0 {
        tracing::debug!(uninvoked, "delayed collect: factories never invoked count as cancelled");
        // Each uninvoked factory gets its own `cancelled` notification, the
        // same as a slot that was started and then cancelled (§4.6 step 4).
        for _ in 0..uninvoked {
            coordinator.collector.cancelled();
        }
    }

    match panic::catch_unwind(AssertUnwindSafe(|| coordinator.collector.end(resolved, failed, cancelled))) {
        Ok(result) => {
            coordinator.destination.resolve(result);
        }
        Err(payload) => {
            coordinator.destination.fail(ComputationFailure::from_panic(payload));
        }
    }
}
