//! The injected bundle of collaborators (§4.9, §6): every constructor and
//! combinator in this crate is a free function taking its collaborators
//! explicitly or defaulting them; `Framework` exists purely so a call site
//! can inject the bundle once instead of threading four `Arc`s everywhere.
//!
//! `Framework` has no behavior beyond owning its four fields and forwarding
//! to the free functions elsewhere in the crate — it is not itself part of
//! the completion state machine or any combinator's logic.

use std::sync::Arc;

use crate::caller::{Caller, DirectCaller, ErrorSink, TracingErrorSink};
use crate::clock::{ClockSource, SystemClock};
use crate::collect::{Collector, StreamCollector};
use crate::delayed_collect::Factory;
use crate::executor::{Executor, SpawnPerTaskExecutor};
use crate::future::Future;
use crate::managed::{Managed, ReloadableManaged};
use crate::retry::{RetryPolicy, RetryResult};

/// Bundles the four collaborators every core constructor is built against:
/// [`Caller`], [`Executor`], [`ClockSource`], [`ErrorSink`]. Not a singleton —
/// construct as many as needed, inject them explicitly.
pub struct Framework {
    caller: Arc<dyn Caller>,
    executor: Arc<dyn Executor>,
    clock: Arc<dyn ClockSource>,
    error_sink: Arc<dyn ErrorSink>,
}

impl Framework {
    /// Builds a framework from explicit collaborators.
    pub fn new(
        caller: Arc<dyn Caller>,
        executor: Arc<dyn Executor>,
        clock: Arc<dyn ClockSource>,
        error_sink: Arc<dyn ErrorSink>,
    ) -> Self {
        Framework { caller, executor, clock, error_sink }
    }

    /// Wires the minimal stand-ins from §1: a spawn-per-task executor, the
    /// real wall clock, a `tracing`-based error sink, and a direct caller
    /// reporting through that sink. Suitable for tests and small programs;
    /// production code should inject its own pool/scheduler instead.
    pub fn with_defaults() -> Self {
        let error_sink: Arc<dyn ErrorSink> = Arc::new(TracingErrorSink);
        Framework {
            caller: Arc::new(DirectCaller::new(error_sink.clone())),
            executor: Arc::new(SpawnPerTaskExecutor),
            clock: Arc::new(SystemClock),
            error_sink,
        }
    }

    /// The `Caller` this framework dispatches observer invocations through.
    pub fn caller(&self) -> Arc<dyn Caller> {
        self.caller.clone()
    }

    /// The `Executor` backing [`Framework::call`].
    pub fn executor(&self) -> Arc<dyn Executor> {
        self.executor.clone()
    }

    /// The `ClockSource` backing [`Framework::retry_until_resolved`].
    pub fn clock(&self) -> Arc<dyn ClockSource> {
        self.clock.clone()
    }

    /// The `ErrorSink` every `Caller` built from this framework reports to.
    pub fn error_sink(&self) -> Arc<dyn ErrorSink> {
        self.error_sink.clone()
    }

    /// A fresh Resolvable Future dispatching through this framework's caller.
    pub fn resolvable<T: Send + Sync + 'static>(&self) -> Future<T> {
        Future::resolvable_with_caller(self.caller())
    }

    /// `transform`; the returned future inherits `upstream`'s caller, not this
    /// framework's, matching every other combinator in [`crate::combinators`].
    pub fn transform<T, U, F>(&self, upstream: Future<T>, f: F) -> Future<U>
    where
        T: Send + Sync + 'static,
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> U + Send + 'static,
    {
        crate::combinators::transform(upstream, f)
    }

    /// `lazyTransform`, see [`crate::combinators::lazy_transform`].
    pub fn lazy_transform<T, U, F>(&self, upstream: Future<T>, f: F) -> Future<U>
    where
        T: Send + Sync + 'static,
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> Future<U> + Send + 'static,
    {
        crate::combinators::lazy_transform(upstream, f)
    }

    /// `catchFailed`, see [`crate::combinators::catch_failed`].
    pub fn catch_failed<T, F>(&self, upstream: Future<T>, f: F) -> Future<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&crate::error::ComputationFailure) -> T + Send + 'static,
    {
        crate::combinators::catch_failed(upstream, f)
    }

    /// `catchCancelled`, see [`crate::combinators::catch_cancelled`].
    pub fn catch_cancelled<T, F>(&self, upstream: Future<T>, f: F) -> Future<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        crate::combinators::catch_cancelled(upstream, f)
    }

    /// `collect`, see [`crate::collect::collect`].
    pub fn collect<T: Send + Sync + 'static>(&self, futures: Vec<Future<T>>) -> Future<Vec<Arc<T>>> {
        crate::collect::collect(futures)
    }

    /// `collect(collector)`, see [`crate::collect::collect_with_collector`].
    pub fn collect_with_collector<T, R>(&self, futures: Vec<Future<T>>, collector: Arc<dyn Collector<T, R>>) -> Future<R>
    where
        T: Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        crate::collect::collect_with_collector(futures, collector)
    }

    /// `collect(streamCollector)`, see [`crate::collect::collect_with_stream_collector`].
    pub fn collect_with_stream_collector<T, R>(
        &self,
        futures: Vec<Future<T>>,
        collector: Arc<dyn StreamCollector<T, R>>,
    ) -> Future<R>
    where
        T: Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        crate::collect::collect_with_stream_collector(futures, collector)
    }

    /// `collectAndDiscard`, see [`crate::collect::collect_and_discard`].
    pub fn collect_and_discard(&self, futures: Vec<Future<()>>) -> Future<()> {
        crate::collect::collect_and_discard(futures)
    }

    /// `eventuallyCollect(callables, streamCollector, parallelism)`, see
    /// [`crate::delayed_collect::eventually_collect`].
    pub fn eventually_collect<T, R>(
        &self,
        factories: Vec<Factory<T>>,
        collector: Arc<dyn StreamCollector<T, R>>,
        parallelism: usize,
    ) -> Future<R>
    where
        T: Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        crate::delayed_collect::eventually_collect(factories, collector, parallelism, self.caller())
    }

    /// `call(callable)`: submits `action` to this framework's executor and
    /// returns a future of its result.
    pub fn call<T, F>(&self, action: F) -> Future<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let destination: Future<T> = self.resolvable();
        let d = destination.clone();
        self.executor.submit(Box::new(move || {
            match std::panic::catch_unwind(std::panic::AssertUnwindSafe(action)) {
                Ok(value) => {
                    d.resolve(value);
                }
                Err(payload) => {
                    d.fail(crate::error::ComputationFailure::from_panic(payload));
                }
            }
        }));
        destination
    }

    /// `lazyCall`: like [`Framework::call`], but `action` is only invoked if
    /// it is actually needed — here, since there is no laziness to add over
    /// an already-eager executor submission, this submits immediately and
    /// exists to keep the Framework contract's named surface complete.
    pub fn lazy_call<T, F>(&self, action: F) -> Future<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.call(action)
    }

    /// `managed(setup)`, see [`crate::managed::Managed::start`].
    pub fn managed<T, S>(&self, setup: Future<T>, teardown: S) -> Managed<T>
    where
        T: Send + Sync + 'static,
        S: Fn(Arc<T>) -> Future<()> + Send + Sync + 'static,
    {
        Managed::start(setup, teardown)
    }

    /// `reloadableManaged(setup)`, see [`crate::managed::ReloadableManaged::start`].
    pub fn reloadable_managed<T, S>(&self, setup: Future<T>, teardown: S) -> ReloadableManaged<T>
    where
        T: Send + Sync + 'static,
        S: Fn(Arc<T>) -> Future<()> + Send + Sync + 'static,
    {
        ReloadableManaged::start(setup, teardown)
    }

    /// `retryUntilResolved(factory, policy[, clockSource])`, using this
    /// framework's clock source.
    pub fn retry_until_resolved<T, F>(&self, factory: F, policy: Arc<dyn RetryPolicy>) -> Future<RetryResult<T>>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Future<T> + Send + Sync + 'static,
    {
        crate::retry::retry_until_resolved(factory, policy, self.clock())
    }
}

impl Default for Framework {
    fn default() -> Self {
        Self::with_defaults()
    }
}
