//! Thread-safe, callback-driven futures.
//!
//! A [`Future`] here is not [`std::future::Future`]: it is a handle to an
//! eventually-completed value that is produced, observed, transformed and
//! aggregated without polling. Completion is one of three terminal states —
//! resolved, failed, or cancelled — reached through `resolve`/`fail`/`cancel`
//! and observed through `on_resolved`/`on_failed`/`on_cancelled`/`on_finished`
//! or the blocking [`Future::join`].
//!
//! Combinators (`transform`, `catch_failed`, ...) and collectors (`collect`,
//! `collect_and_discard`, ...) build on that primitive; the [`retry`] and
//! [`managed`] modules build on the combinators and collectors in turn.
//! [`Framework`] bundles the four collaborators (caller, executor, clock
//! source, error sink) every layer is built against, so callers can inject
//! the bundle once rather than threading each collaborator through every
//! call.

mod caller;
mod clock;
mod collect;
mod combinators;
mod delayed_collect;
mod error;
mod executor;
mod framework;
mod future;
mod managed;
mod observer;
mod retry;

pub use caller::{Caller, DirectCaller, ErrorSink, ThreadedCaller, TracingErrorSink};
pub use clock::{ClockSource, ManualClock, SystemClock};
pub use collect::{collect, collect_and_discard, collect_with_collector, collect_with_stream_collector, Collector, StreamCollector};
pub use combinators::{
    catch_cancelled, catch_failed, lazy_catch_cancelled, lazy_catch_failed, lazy_transform, transform,
};
pub use delayed_collect::{eventually_collect, Factory};
pub use error::{ComputationFailure, FutureError, ManagedError, RetryExhausted};
pub use executor::{Executor, SpawnPerTaskExecutor};
pub use framework::Framework;
pub use future::Future;
pub use managed::{Borrowed, Managed, ReloadableManaged};
pub use observer::Outcome;
pub use retry::{retry_until_resolved, ExponentialBackoff, FixedDelay, RetryDecision, RetryPolicy, RetryResult};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    // E1: Basic aggregate.
    #[test]
    fn e1_basic_aggregate() {
        struct Count {
            resolved: AtomicUsize,
            failed: AtomicUsize,
            cancelled: AtomicUsize,
        }
        impl StreamCollector<i32, (usize, usize, usize)> for Count {
            fn resolved(&self, _value: Arc<i32>) {
                self.resolved.fetch_add(1, Ordering::SeqCst);
            }
            fn failed(&self, _cause: Arc<ComputationFailure>) {
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
            fn cancelled(&self) {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
            }
            fn end(&self, resolved: usize, failed: usize, cancelled: usize) -> (usize, usize, usize) {
                (resolved, failed, cancelled)
            }
        }

        let futures = vec![Future::resolved(42), Future::resolved(42)];
        let collector = Arc::new(Count {
            resolved: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
        });
        let result = collect_with_stream_collector(futures, collector).join().unwrap();
        assert_eq!(*result, (2, 0, 0));
    }

    // E2: Cancellation abort in a bounded-parallelism collect. Four
    // factories, parallelism 1; cancelling D right after the first resolves
    // must leave the other three factories uninvoked, report three
    // `cancelled` notifications for them, and tally `end(1, 0, 3)`.
    #[test]
    fn e2_cancellation_abort() {
        struct Tally {
            resolved: AtomicUsize,
            cancelled: AtomicUsize,
            ended: Mutex<Option<(usize, usize, usize)>>,
            destination: Mutex<Option<Future<(usize, usize, usize)>>>,
        }
        impl StreamCollector<i32, (usize, usize, usize)> for Tally {
            fn resolved(&self, _value: Arc<i32>) {
                self.resolved.fetch_add(1, Ordering::SeqCst);
                // Cancel D from inside the notification for the first
                // result, before the coordinator gets a chance to start
                // factory 1 — "after the first resolves with X, cancel D".
                if let Some(destination) = self.destination.lock().unwrap().as_ref() {
                    destination.cancel();
                }
            }
            fn failed(&self, _cause: Arc<ComputationFailure>) {}
            fn cancelled(&self) {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
            }
            fn end(&self, resolved: usize, failed: usize, cancelled: usize) -> (usize, usize, usize) {
                *self.ended.lock().unwrap() = Some((resolved, failed, cancelled));
                (resolved, failed, cancelled)
            }
        }

        // factory 0 resolves under the test's control; factories 1-3 would
        // increment `later_invocations` if the coordinator ever started them.
        let later_invocations = Arc::new(AtomicUsize::new(0));
        let first: Future<i32> = Future::resolvable();
        let mut factories: Vec<Factory<i32>> = vec![{
            let first = first.clone();
            Box::new(move || first.clone())
        }];
        for _ in 0..3 {
            let later_invocations = later_invocations.clone();
            factories.push(Box::new(move || {
                later_invocations.fetch_add(1, Ordering::SeqCst);
                Future::resolved(1)
            }));
        }

        let collector = Arc::new(Tally {
            resolved: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
            ended: Mutex::new(None),
            destination: Mutex::new(None),
        });
        let destination = eventually_collect(factories, collector.clone(), 1, Arc::new(DirectCaller::default()));
        *collector.destination.lock().unwrap() = Some(destination.clone());

        first.resolve(7);

        assert!(destination.is_cancelled());
        assert_eq!(later_invocations.load(Ordering::SeqCst), 0);
        assert_eq!(collector.resolved.load(Ordering::SeqCst), 1);
        assert_eq!(collector.cancelled.load(Ordering::SeqCst), 3);
        assert_eq!(*collector.ended.lock().unwrap(), Some((1, 0, 3)));
    }

    // E3: First failure wins in a buffered collect.
    #[test]
    fn e3_first_failure_wins() {
        let futures = vec![
            Future::resolved(1),
            Future::failed(ComputationFailure::from_message("boom")),
            Future::resolved(3),
        ];
        let err = collect(futures).join().unwrap_err();
        match err {
            FutureError::Failed(cause) => assert_eq!(cause.to_string(), "boom"),
            FutureError::Cancelled => panic!("expected Failed, got Cancelled"),
            FutureError::NotReady => panic!("expected Failed, got NotReady"),
        }
    }

    // E4: Retry succeeds on the third attempt.
    #[test]
    fn e4_retry_success_on_third() {
        let attempt = Arc::new(AtomicUsize::new(0));
        let clock = Arc::new(ManualClock::new());
        let attempt_clone = attempt.clone();
        let factory = move || {
            let n = attempt_clone.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Future::failed(ComputationFailure::from_message(format!("attempt {n} failed")))
            } else {
                Future::resolved(99)
            }
        };
        let policy = Arc::new(FixedDelay { max_attempts: 5, delay: Duration::from_millis(10) });
        let destination = retry_until_resolved(factory, policy, clock.clone());

        for _ in 0..2 {
            clock.advance(Duration::from_millis(10));
        }

        let result = destination.join().unwrap();
        assert_eq!(*result.value, 99);
        assert_eq!(result.errors.len(), 2);
    }

    // E5: A panicking transform fails the downstream, leaves upstream intact.
    #[test]
    fn e5_transform_panics() {
        let upstream = Future::resolved(10);
        let downstream = transform(upstream.clone(), |_v| -> i32 { panic!("kaboom") });
        assert!(downstream.join().unwrap_err().to_string().contains("kaboom"));
        assert_eq!(*upstream.join().unwrap(), 10);
    }

    // E6: Cancelling a combinator's downstream cancels its upstream.
    #[test]
    fn e6_downstream_cancel_cancels_upstream() {
        let upstream: Future<i32> = Future::resolvable();
        let invoked = Arc::new(AtomicUsize::new(0));
        let invoked_clone = invoked.clone();
        let downstream = transform(upstream.clone(), move |v| {
            invoked_clone.fetch_add(1, Ordering::SeqCst);
            *v
        });

        downstream.cancel();
        assert!(upstream.is_cancelled());
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn framework_with_defaults_round_trips_transform() {
        let framework = Framework::with_defaults();
        let upstream = framework.resolvable::<i32>();
        let downstream = framework.transform(upstream.clone(), |v| v + 1);
        upstream.resolve(41);
        assert_eq!(*downstream.join().unwrap(), 42);
    }
}
