//! Collectors (§4.4, §4.5): `collect` (buffered), `collect_with_collector`,
//! `collect_with_stream_collector`, `collect_and_discard`. Each reduces N
//! futures into one, honoring the **failed > cancelled > resolved** outcome
//! priority and cancelling every upstream when the downstream is cancelled.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::caller::Caller;
use crate::error::ComputationFailure;
use crate::future::Future;

/// A user-supplied reduce step for [`collect_with_collector`], invoked once,
/// on the successful-results path only, when every input has resolved.
pub trait Collector<T, R>: Send + Sync {
    /// Reduces the ordered, successful results into `R`. A panic here fails
    /// the aggregate future the same way a panicking `transform` does.
    fn collect(&self, results: Vec<Arc<T>>) -> R;
}

/// A user-supplied streaming reduce step (§4.5): per-result callbacks plus a
/// final `end` reducer, so memory use is O(1) beyond whatever the collector
/// itself chooses to retain.
pub trait StreamCollector<T, R>: Send + Sync {
    /// Called once per resolved upstream, in completion order.
    fn resolved(&self, value: Arc<T>);
    /// Called once per failed upstream, in completion order.
    fn failed(&self, cause: Arc<ComputationFailure>);
    /// Called once per cancelled upstream (including factories an
    /// [`crate::delayed_collect`] coordinator never got to invoke).
    fn cancelled(&self);
    /// Called exactly once, after every upstream has reported, with the
    /// final tally. Its return value becomes the aggregate future's result.
    fn end(&self, resolved: usize, failed: usize, cancelled: usize) -> R;
}

fn new_downstream<T, R>(futures: &[Future<T>], caller: Option<Arc<dyn Caller>>) -> Future<R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    let caller = caller.unwrap_or_else(|| {
        futures.first().map(Future::caller).unwrap_or_else(|| Arc::new(crate::caller::DirectCaller::default()))
    });
    Future::resolvable_with_caller(caller)
}

fn bind_cancellation<T: Send + Sync + 'static, R: Send + Sync + 'static>(
    downstream: &Future<R>,
    futures: &[Future<T>],
) {
    for upstream in futures {
        downstream.bind(upstream.clone());
    }
}

/// `collect`: aggregates N futures into one future of their ordered results
/// (§4.4). Empty input resolves immediately with an empty `Vec`.
pub fn collect<T: Send + Sync + 'static>(futures: Vec<Future<T>>) -> Future<Vec<Arc<T>>> {
    if futures.is_empty() {
        return Future::resolved(Vec::new());
    }

    let downstream: Future<Vec<Arc<T>>> = new_downstream(&futures, None);
    bind_cancellation(&downstream, &futures);

    let n = futures.len();
    let slots: Arc<Mutex<Vec<Option<Arc<T>>>>> = Arc::new(Mutex::new(vec![None; n]));
    let countdown = Arc::new(AtomicUsize::new(n));
    let failed_count = Arc::new(AtomicUsize::new(0));
    let cancelled_count = Arc::new(AtomicUsize::new(0));
    let first_failure: Arc<Mutex<Option<Arc<ComputationFailure>>>> = Arc::new(Mutex::new(None));

    for (index, upstream) in futures.into_iter().enumerate() {
        let d = downstream.clone();
        let slots = slots.clone();
        let countdown = countdown.clone();
        let failed_count = failed_count.clone();
        let cancelled_count = cancelled_count.clone();
        let first_failure = first_failure.clone();

        upstream.on_finished(move |outcome| {
            use crate::observer::Outcome;
            match outcome {
                Outcome::Resolved(v) => {
                    slots.lock()[index] = Some(v);
                }
                Outcome::Failed(e) => {
                    failed_count.fetch_add(1, Ordering::SeqCst);
                    first_failure.lock().get_or_insert(e);
                }
                Outcome::Cancelled => {
                    cancelled_count.fetch_add(1, Ordering::SeqCst);
                }
            }

            if countdown.fetch_sub(1, Ordering::SeqCst) == 1 {
                finish_buffered(&d, &slots, &failed_count, &cancelled_count, &first_failure);
            }
        });
    }

    downstream
}

fn finish_buffered<T: Send + Sync + 'static>(
    downstream: &Future<Vec<Arc<T>>>,
    slots: &Mutex<Vec<Option<Arc<T>>>>,
    failed_count: &AtomicUsize,
    cancelled_count: &AtomicUsize,
    first_failure: &Mutex<Option<Arc<ComputationFailure>>>,
) {
    if failed_count.load(Ordering::SeqCst) > 0 {
        let cause = first_failure.lock().clone().expect("failed_count > 0 implies a captured cause");
        downstream.fail_arc(cause);
    } else if cancelled_count.load(Ordering::SeqCst) > 0 {
        downstream.cancel();
    } else {
        let values: Vec<Arc<T>> = slots.lock().iter_mut().map(|slot| slot.take().expect("all slots filled")).collect();
        downstream.resolve(values);
    }
}

/// `collect-with-collector`: like [`collect`], but the ordered successful
/// results are reduced once, through `collector`, instead of being returned
/// verbatim. The reduce step runs on the failed/cancelled bypass path never.
pub fn collect_with_collector<T, R>(futures: Vec<Future<T>>, collector: Arc<dyn Collector<T, R>>) -> Future<R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    combinators_transform_collect(collect(futures), collector)
}

fn combinators_transform_collect<T, R>(results: Future<Vec<Arc<T>>>, collector: Arc<dyn Collector<T, R>>) -> Future<R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    crate::combinators::transform(results, move |values| collector.collect(values.clone()))
}

/// `collect-with-stream-collector` (§4.5): forwards each upstream's outcome
/// into `collector` as it happens, then calls `collector.end(..)` once all N
/// have reported. Per-result memory is O(1) beyond what `collector` retains.
pub fn collect_with_stream_collector<T, R>(
    futures: Vec<Future<T>>,
    collector: Arc<dyn StreamCollector<T, R>>,
) -> Future<R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    if futures.is_empty() {
        return Future::resolved(collector.end(0, 0, 0));
    }

    let downstream: Future<R> = new_downstream(&futures, None);
    bind_cancellation(&downstream, &futures);

    let n = futures.len();
    let countdown = Arc::new(AtomicUsize::new(n));
    let resolved_count = Arc::new(AtomicUsize::new(0));
    let failed_count = Arc::new(AtomicUsize::new(0));
    let cancelled_count = Arc::new(AtomicUsize::new(0));

    for upstream in futures {
        let d = downstream.clone();
        let collector = collector.clone();
        let countdown = countdown.clone();
        let resolved_count = resolved_count.clone();
        let failed_count = failed_count.clone();
        let cancelled_count = cancelled_count.clone();

        upstream.on_finished(move |outcome| {
            use crate::observer::Outcome;
            match outcome {
                Outcome::Resolved(v) => {
                    collector.resolved(v);
                    resolved_count.fetch_add(1, Ordering::SeqCst);
                }
                Outcome::Failed(e) => {
                    collector.failed(e);
                    failed_count.fetch_add(1, Ordering::SeqCst);
                }
                Outcome::Cancelled => {
                    collector.cancelled();
                    cancelled_count.fetch_add(1, Ordering::SeqCst);
                }
            }

            if countdown.fetch_sub(1, Ordering::SeqCst) == 1 {
                let r = resolved_count.load(Ordering::SeqCst);
                let f = failed_count.load(Ordering::SeqCst);
                let c = cancelled_count.load(Ordering::SeqCst);
                match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| collector.end(r, f, c))) {
                    Ok(result) => {
                        d.resolve(result);
                    }
                    Err(payload) => {
                        d.fail(ComputationFailure::from_panic(payload));
                    }
                }
            }
        });
    }

    downstream
}

/// The built-in stream collector backing [`collect_and_discard`]: every
/// resolved value is dropped, only the first failure cause and whether any
/// upstream cancelled are retained.
struct DiscardCollector {
    first_failure: Mutex<Option<Arc<ComputationFailure>>>,
    cancelled: AtomicUsize,
}

impl StreamCollector<(), DiscardOutcome> for DiscardCollector {
    fn resolved(&self, _value: Arc<()>) {}

    fn failed(&self, cause: Arc<ComputationFailure>) {
        self.first_failure.lock().get_or_insert(cause);
    }

    fn cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
    }

    fn end(&self, _resolved: usize, _failed: usize, _cancelled: usize) -> DiscardOutcome {
        // failed > cancelled > resolved, mirroring the buffered collector
        // (§4.5, §9 Open Question (a)).
        if let Some(cause) = self.first_failure.lock().clone() {
            DiscardOutcome::Failed(cause)
        } else if self.cancelled.load(Ordering::SeqCst) > 0 {
            DiscardOutcome::Cancelled
        } else {
            DiscardOutcome::Resolved
        }
    }
}

enum DiscardOutcome {
    Resolved,
    Failed(Arc<ComputationFailure>),
    Cancelled,
}

/// `collectAndDiscard`: a [`StreamCollector`] specialization over futures of
/// `()` that propagates the first failure, else cancellation if any upstream
/// cancelled, else resolves `()` — mirroring the buffered collector's
/// **failed > cancelled > resolved** priority (§9 Open Question (a)).
pub fn collect_and_discard(futures: Vec<Future<()>>) -> Future<()> {
    let collector = Arc::new(DiscardCollector { first_failure: Mutex::new(None), cancelled: AtomicUsize::new(0) });
    let tallied = collect_with_stream_collector(futures, collector);

    let result = Future::resolvable_with_caller(tallied.caller());
    result.bind(tallied.clone());
    let r = result.clone();
    tallied.on_resolved(move |outcome| match &*outcome {
        DiscardOutcome::Resolved => {
            r.resolve(());
        }
        DiscardOutcome::Failed(cause) => {
            r.fail_arc(cause.clone());
        }
        DiscardOutcome::Cancelled => {
            r.cancel();
        }
    });
    let r = result.clone();
    tallied.on_failed(move |cause| {
        r.fail_arc(cause);
    });
    let r = result.clone();
    tallied.on_cancelled(move || {
        r.cancel();
    });

    result
}
