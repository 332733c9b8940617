//! Property tests for the nine universal invariants governing futures,
//! combinators and collectors.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use proptest::prelude::*;

use resolvent::{catch_failed, collect, transform, ComputationFailure, DirectCaller, Future, FutureError};

#[derive(Debug, Clone, Copy)]
enum Completion {
    Resolve,
    Fail,
    Cancel,
}

fn completion_strategy() -> impl Strategy<Value = Completion> {
    prop_oneof![Just(Completion::Resolve), Just(Completion::Fail), Just(Completion::Cancel)]
}

fn apply(future: &Future<i32>, completion: Completion) -> bool {
    match completion {
        Completion::Resolve => future.resolve(1),
        Completion::Fail => future.fail(ComputationFailure::from_message("boom")),
        Completion::Cancel => future.cancel(),
    }
}

proptest! {
    // Invariant 1: monotonic completion.
    #[test]
    fn monotonic_completion(completions in prop::collection::vec(completion_strategy(), 1..8)) {
        let future: Future<i32> = Future::resolvable();
        let successes = completions.iter().filter(|c| apply(&future, **c)).count();
        prop_assert_eq!(successes, 1);
        prop_assert!(future.is_done());
    }

    // Invariant 2: exactly-once delivery, matching the terminal state.
    #[test]
    fn exactly_once_delivery(completion in completion_strategy()) {
        let future: Future<i32> = Future::resolvable();
        let resolved_hits = Arc::new(AtomicUsize::new(0));
        let failed_hits = Arc::new(AtomicUsize::new(0));
        let cancelled_hits = Arc::new(AtomicUsize::new(0));

        let r = resolved_hits.clone();
        future.on_resolved(move |_v| { r.fetch_add(1, Ordering::SeqCst); });
        let f = failed_hits.clone();
        future.on_failed(move |_e| { f.fetch_add(1, Ordering::SeqCst); });
        let c = cancelled_hits.clone();
        future.on_cancelled(move || { c.fetch_add(1, Ordering::SeqCst); });

        apply(&future, completion);

        let (expect_resolved, expect_failed, expect_cancelled) = match completion {
            Completion::Resolve => (1, 0, 0),
            Completion::Fail => (0, 1, 0),
            Completion::Cancel => (0, 0, 1),
        };
        prop_assert_eq!(resolved_hits.load(Ordering::SeqCst), expect_resolved);
        prop_assert_eq!(failed_hits.load(Ordering::SeqCst), expect_failed);
        prop_assert_eq!(cancelled_hits.load(Ordering::SeqCst), expect_cancelled);
    }

    // Invariant 3: registering on an already-terminal future dispatches before
    // the registration call returns (DirectCaller makes this observable
    // synchronously).
    #[test]
    fn observer_after_complete_runs_synchronously(completion in completion_strategy()) {
        let future: Future<i32> = Future::resolvable();
        apply(&future, completion);

        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();
        future.on_finished(move |_outcome| { ran_clone.fetch_add(1, Ordering::SeqCst); });
        prop_assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    // Invariant 4: transform round-trip.
    #[test]
    fn transform_round_trip(completion in completion_strategy(), value in any::<i32>()) {
        let upstream: Future<i32> = Future::resolvable();
        match completion {
            Completion::Resolve => { upstream.resolve(value); },
            Completion::Fail => { upstream.fail(ComputationFailure::from_message("boom")); },
            Completion::Cancel => { upstream.cancel(); },
        };
        let downstream = transform(upstream, |v| *v);
        match completion {
            Completion::Resolve => prop_assert_eq!(*downstream.join().unwrap(), value),
            Completion::Fail => prop_assert!(matches!(downstream.join(), Err(FutureError::Failed(_)))),
            Completion::Cancel => prop_assert!(matches!(downstream.join(), Err(FutureError::Cancelled))),
        }
    }

    // Invariant 5: catch-failed symmetry.
    #[test]
    fn catch_failed_symmetry(completion in prop_oneof![Just(Completion::Resolve), Just(Completion::Fail)], value in any::<i32>()) {
        let upstream: Future<i32> = Future::resolvable();
        match completion {
            Completion::Resolve => { upstream.resolve(value); },
            Completion::Fail => { upstream.fail(ComputationFailure::from_message("boom")); },
            Completion::Cancel => unreachable!(),
        };
        let downstream = catch_failed(upstream, |_cause| -1);
        match completion {
            Completion::Resolve => prop_assert_eq!(*downstream.join().unwrap(), value),
            Completion::Fail => prop_assert_eq!(*downstream.join().unwrap(), -1),
            Completion::Cancel => unreachable!(),
        }
    }

    // Invariant 6: cancelling a combinator's downstream cancels its upstream.
    #[test]
    fn downstream_cancel_cancels_upstream(_seed in 0..4u8) {
        let upstream: Future<i32> = Future::resolvable();
        let downstream = transform(upstream.clone(), |v| *v);
        downstream.cancel();
        prop_assert!(upstream.is_cancelled());
    }

    // Invariant 7: collect outcome priority (failed > cancelled > resolved).
    #[test]
    fn collect_outcome_priority(completions in prop::collection::vec(completion_strategy(), 1..6)) {
        let futures: Vec<Future<i32>> = completions.iter().map(|c| {
            let f: Future<i32> = Future::resolvable();
            apply(&f, *c);
            f
        }).collect();

        let any_failed = completions.iter().any(|c| matches!(c, Completion::Fail));
        let any_cancelled = completions.iter().any(|c| matches!(c, Completion::Cancel));

        let result = collect(futures).join();
        if any_failed {
            prop_assert!(matches!(result, Err(FutureError::Failed(_))));
        } else if any_cancelled {
            prop_assert!(matches!(result, Err(FutureError::Cancelled)));
        } else {
            prop_assert!(result.is_ok());
        }
    }

    // Invariant 9: the factory is invoked exactly 1 + (number of Retry decisions).
    #[test]
    fn retry_policy_contract(retry_count in 0usize..5) {
        use resolvent::{retry_until_resolved, ManualClock, RetryDecision, RetryPolicy};
        use std::time::Duration;

        struct CountedRetries(usize);
        impl RetryPolicy for CountedRetries {
            fn decide(&self, attempt: usize, _elapsed: Duration, _cause: &ComputationFailure) -> RetryDecision {
                if attempt <= self.0 {
                    RetryDecision::Retry(Duration::from_millis(1))
                } else {
                    RetryDecision::Abort
                }
            }
        }

        let invocations = Arc::new(AtomicUsize::new(0));
        let invocations_clone = invocations.clone();
        let factory = move || {
            invocations_clone.fetch_add(1, Ordering::SeqCst);
            Future::<i32>::failed_with_caller(ComputationFailure::from_message("always fails"), Arc::new(DirectCaller::default()))
        };

        let clock = Arc::new(ManualClock::new());
        let policy = Arc::new(CountedRetries(retry_count));
        let destination = retry_until_resolved(factory, policy, clock.clone());

        for _ in 0..retry_count {
            clock.advance(Duration::from_millis(1));
        }

        let _ = destination.join();
        prop_assert_eq!(invocations.load(Ordering::SeqCst), 1 + retry_count);
    }
}

// Invariant 8 (bounded parallelism) is exercised as a concrete scenario test
// rather than a property test: it requires observing an inflight count at
// every instant, which needs deterministic synchronization points rather
// than a randomized strategy.
#[test]
fn bounded_parallelism_never_exceeds_limit() {
    use resolvent::{eventually_collect, Factory, StreamCollector};

    struct MaxInflight {
        inflight: AtomicUsize,
        observed_max: std::sync::Mutex<usize>,
    }
    impl StreamCollector<(), usize> for MaxInflight {
        fn resolved(&self, _value: Arc<()>) {
            self.inflight.fetch_sub(1, Ordering::SeqCst);
        }
        fn failed(&self, _cause: Arc<ComputationFailure>) {
            self.inflight.fetch_sub(1, Ordering::SeqCst);
        }
        fn cancelled(&self) {}
        fn end(&self, _resolved: usize, _failed: usize, _cancelled: usize) -> usize {
            *self.observed_max.lock().unwrap()
        }
    }

    let parallelism = 2;
    let collector = Arc::new(MaxInflight { inflight: AtomicUsize::new(0), observed_max: std::sync::Mutex::new(0) });
    let collector_for_factories = collector.clone();

    let factories: Vec<Factory<()>> = (0..6)
        .map(|_| {
            let collector = collector_for_factories.clone();
            Box::new(move || {
                let inflight = collector.inflight.fetch_add(1, Ordering::SeqCst) + 1;
                let mut observed = collector.observed_max.lock().unwrap();
                if inflight > *observed {
                    *observed = inflight;
                }
                Future::resolved(())
            }) as Factory<()>
        })
        .collect();

    let result = eventually_collect(factories, collector, parallelism, Arc::new(DirectCaller::default())).join().unwrap();
    assert!(*result <= parallelism);
}
