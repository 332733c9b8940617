//! The [`Caller`] abstraction: invokes a user observer callback while isolating
//! whatever it panics with, so a faulty observer never corrupts a future's state
//! machine or skips its siblings.
//!
//! The original design names one operation per completion-kind / payload shape
//! (`resolve(observer, value)`, `fail(observer, cause)`, `cancel(observer)`, ...).
//! Rust has no checked-exception hierarchy to preserve per call site, so all of
//! those collapse here into one exception-isolating primitive, [`Caller::invoke`],
//! which every call site names with its own `context` string instead.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::ComputationFailure;
use crate::executor::Executor;

/// Receives panics caught while invoking observer callbacks.
///
/// This is the `uncaught(context, throwable)` contract from the external
/// interfaces: the core never decides *how* an uncaught observer panic is
/// reported, only *that* it is reported and does not propagate.
pub trait ErrorSink: Send + Sync {
    /// Reports an observer panic, named by the call site (`context`) that
    /// triggered it.
    fn uncaught(&self, context: &str, error: &ComputationFailure);
}

/// Reports observer panics through `tracing::error!`.
///
/// This is the default sink wired by [`crate::framework::Framework::with_defaults`].
/// A production deployment is expected to inject its own sink (forwarding to a
/// crash-reporting service, metrics, etc); that backend is out of scope here.
#[derive(Debug, Default)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn uncaught(&self, context: &str, error: &ComputationFailure) {
        tracing::error!(context, %error, "observer panicked; isolated by Caller");
    }
}

/// Invokes user observer callbacks, isolating panics from the caller's state
/// machine. See the module docs for why this is a single primitive rather
/// than one method per payload shape.
pub trait Caller: Send + Sync {
    /// Runs `action`, which must never be allowed to unwind past this call.
    /// `context` names the call site for error reporting (e.g. `"on_resolved"`).
    fn invoke(&self, context: &'static str, action: Box<dyn FnOnce() + Send>);
}

fn run_isolated(context: &str, error_sink: &dyn ErrorSink, action: Box<dyn FnOnce() + Send>) {
    let result = panic::catch_unwind(AssertUnwindSafe(action));
    if let Err(payload) = result {
        error_sink.uncaught(context, &ComputationFailure::from_panic(payload));
    }
}

/// Invokes observers inline, on whichever thread completes the future or
/// registers the observer. Cheapest option; matches the "direct" flavor in §4.1.
pub struct DirectCaller {
    error_sink: Arc<dyn ErrorSink>,
}

impl DirectCaller {
    /// Builds a direct caller reporting uncaught panics to `error_sink`.
    pub fn new(error_sink: Arc<dyn ErrorSink>) -> Self {
        DirectCaller { error_sink }
    }
}

impl Default for DirectCaller {
    fn default() -> Self {
        DirectCaller::new(Arc::new(TracingErrorSink))
    }
}

impl Caller for DirectCaller {
    fn invoke(&self, context: &'static str, action: Box<dyn FnOnce() + Send>) {
        run_isolated(context, self.error_sink.as_ref(), action);
    }
}

/// Hands observer invocation off to an [`Executor`], matching the "threaded"
/// flavor in §4.1. Useful when observers do non-trivial work and the
/// completing thread (e.g. an I/O reactor thread) must not block on it.
pub struct ThreadedCaller {
    executor: Arc<dyn Executor>,
    error_sink: Arc<dyn ErrorSink>,
}

impl ThreadedCaller {
    /// Builds a threaded caller that submits every invocation to `executor`
    /// and reports uncaught panics to `error_sink`.
    pub fn new(executor: Arc<dyn Executor>, error_sink: Arc<dyn ErrorSink>) -> Self {
        ThreadedCaller { executor, error_sink }
    }
}

impl Caller for ThreadedCaller {
    fn invoke(&self, context: &'static str, action: Box<dyn FnOnce() + Send>) {
        let error_sink = self.error_sink.clone();
        let context_owned = context.to_string();
        self.executor.submit(Box::new(move || {
            run_isolated(&context_owned, error_sink.as_ref(), action);
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink(Arc<AtomicUsize>);
    impl ErrorSink for CountingSink {
        fn uncaught(&self, _context: &str, _error: &ComputationFailure) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn direct_caller_isolates_panics() {
        let count = Arc::new(AtomicUsize::new(0));
        let caller = DirectCaller::new(Arc::new(CountingSink(count.clone())));
        caller.invoke("test", Box::new(|| panic!("boom")));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn direct_caller_runs_non_panicking_actions() {
        let ran = Arc::new(AtomicUsize::new(0));
        let caller = DirectCaller::default();
        let ran2 = ran.clone();
        caller.invoke("test", Box::new(move || { ran2.fetch_add(1, Ordering::SeqCst); }));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
