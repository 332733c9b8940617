//! Retry Driver (§4.7): retries a future-producing factory against a policy,
//! scheduling backoff through a [`ClockSource`] rather than blocking a thread.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::ClockSource;
use crate::error::{ComputationFailure, RetryExhausted};
use crate::future::Future;

/// What a [`RetryPolicy`] decides to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Give up; the retry driver fails its downstream with a [`RetryExhausted`].
    Abort,
    /// Try again after `Duration` has elapsed, via the driver's [`ClockSource`].
    Retry(Duration),
}

/// Decides, after each failed attempt, whether to retry and with how much
/// delay. `attempt` is the 1-based count of attempts made so far (including
/// the one that just failed); `elapsed` is the time since the first attempt
/// began. Implementations may use either, neither, or both.
pub trait RetryPolicy: Send + Sync {
    /// Returns the decision for the attempt that just failed with `cause`.
    fn decide(&self, attempt: usize, elapsed: Duration, cause: &ComputationFailure) -> RetryDecision;
}

/// A policy retrying up to `max_attempts` times with a fixed delay between
/// attempts.
pub struct FixedDelay {
    pub max_attempts: usize,
    pub delay: Duration,
}

impl RetryPolicy for FixedDelay {
    fn decide(&self, attempt: usize, _elapsed: Duration, _cause: &ComputationFailure) -> RetryDecision {
        if attempt >= self.max_attempts {
            RetryDecision::Abort
        } else {
            RetryDecision::Retry(self.delay)
        }
    }
}

/// A policy retrying up to `max_attempts` times with the delay doubling after
/// every failure, capped at `max_delay`.
pub struct ExponentialBackoff {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy for ExponentialBackoff {
    fn decide(&self, attempt: usize, _elapsed: Duration, _cause: &ComputationFailure) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::Abort;
        }
        let scale = 1u32.checked_shl((attempt - 1) as u32).unwrap_or(u32::MAX);
        let delay = self.initial_delay.saturating_mul(scale).min(self.max_delay);
        RetryDecision::Retry(delay)
    }
}

/// The successful result of a retry loop: the eventual value plus every
/// failure cause encountered along the way (§4.7).
pub struct RetryResult<T> {
    pub value: Arc<T>,
    pub errors: Vec<ComputationFailure>,
}

/// Retries `factory` against `policy`, using `clock` to schedule backoff
/// between attempts, until it resolves, is cancelled, or the policy aborts.
///
/// Cancelling the returned future cancels whichever attempt is currently in
/// flight and prevents any further attempt from starting.
pub fn retry_until_resolved<T, F>(
    factory: F,
    policy: Arc<dyn RetryPolicy>,
    clock: Arc<dyn ClockSource>,
) -> Future<RetryResult<T>>
where
    T: Send + Sync + 'static,
    F: Fn() -> Future<T> + Send + Sync + 'static,
{
    let destination: Future<RetryResult<T>> = Future::resolvable();
    let driver = Arc::new(Driver {
        factory: Box::new(factory),
        policy,
        clock,
        destination: destination.clone(),
        started_at: Mutex::new(None),
        errors: Mutex::new(Vec::new()),
    });

    attempt(driver.clone(), 1);
    destination
}

struct Driver<T: Send + Sync + 'static> {
    factory: Box<dyn Fn() -> Future<T> + Send + Sync>,
    policy: Arc<dyn RetryPolicy>,
    clock: Arc<dyn ClockSource>,
    destination: Future<RetryResult<T>>,
    started_at: Mutex<Option<std::time::Instant>>,
    errors: Mutex<Vec<ComputationFailure>>,
}

fn attempt<T: Send + Sync + 'static>(driver: Arc<Driver<T>>, attempt_number: usize) {
    {
        let mut started_at = driver.started_at.lock();
        if started_at.is_none() {
            *started_at = Some(driver.clock.now());
        }
    }

    tracing::debug!(attempt_number, "retry driver: attempting");

    let f = (driver.factory)();
    driver.destination.bind(f.clone());

    let d = driver.destination.clone();
    let driver_clone = driver.clone();
    f.on_resolved(move |value| {
        let errors = std::mem::take(&mut *driver_clone.errors.lock());
        d.resolve(RetryResult { value, errors });
    });

    let d = driver.destination.clone();
    f.on_cancelled(move || {
        d.cancel();
    });

    let driver_clone = driver.clone();
    f.on_failed(move |cause| on_attempt_failed(driver_clone, attempt_number, cause));
}

fn on_attempt_failed<T: Send + Sync + 'static>(
    driver: Arc<Driver<T>>,
    attempt_number: usize,
    cause: Arc<ComputationFailure>,
) {
    let cause = (*cause).clone();
    driver.errors.lock().push(cause.clone());

    if driver.destination.is_cancelled() {
        return;
    }

    let elapsed = {
        let started_at = *driver.started_at.lock();
        started_at.map(|t| driver.clock.now().duration_since(t)).unwrap_or(Duration::ZERO)
    };

    match driver.policy.decide(attempt_number, elapsed, &cause) {
        RetryDecision::Abort => {
            tracing::debug!(attempt_number, "retry driver: policy aborted");
            let errors = driver.errors.lock().clone();
            driver.destination.fail(ComputationFailure::new(RetryExhausted {
                attempts: attempt_number,
                causes: errors,
                last: cause,
            }));
        }
        RetryDecision::Retry(delay) => {
            tracing::debug!(attempt_number, ?delay, "retry driver: scheduling next attempt");
            let driver_clone = driver.clone();
            driver.clock.schedule(
                delay,
                Box::new(move || {
                    if !driver_clone.destination.is_cancelled() {
                        attempt(driver_clone, attempt_number + 1);
                    }
                }),
            );
        }
    }
}
