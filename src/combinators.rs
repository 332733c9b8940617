//! Transform combinators (§4.3): `transform`, `lazyTransform`, `catchFailed`,
//! `catchCancelled` and their lazy variants. Each attaches observers to an
//! upstream future and drives a fresh downstream resolvable, establishing the
//! downstream-cancels-upstream link every combinator must provide.

use std::panic::{self, AssertUnwindSafe};

use crate::error::ComputationFailure;
use crate::future::Future;

fn passthrough_failed_and_cancelled<T, U>(upstream: &Future<T>, downstream: Future<U>)
where
    T: Send + Sync + 'static,
    U: Send + Sync + 'static,
{
    let d = downstream.clone();
    upstream.on_failed(move |cause| {
        d.fail_arc(cause);
    });
    let d = downstream.clone();
    upstream.on_cancelled(move || {
        d.cancel();
    });
}

/// Forwards `source`'s eventual completion into `destination` verbatim
/// (resolved/failed/cancelled alike). Used by the lazy combinators once `f`
/// has produced the continuation future, and by `lazyTransform`-style
/// forwarding in general.
fn forward<T: Send + Sync + 'static>(source: &Future<T>, destination: Future<T>) {
    let d = destination.clone();
    source.on_resolved(move |value| {
        d.resolve_arc(value);
    });
    let d = destination.clone();
    source.on_failed(move |cause| {
        d.fail_arc(cause);
    });
    source.on_cancelled(move || {
        destination.cancel();
    });
}

/// `transform(U, f)`: maps a resolved value through `f`. Failures and
/// cancellations of `U` pass through unchanged. A panic inside `f` fails the
/// downstream with a [`ComputationFailure`] describing it.
pub fn transform<T, U, F>(upstream: Future<T>, f: F) -> Future<U>
where
    T: Send + Sync + 'static,
    U: Send + Sync + 'static,
    F: FnOnce(&T) -> U + Send + 'static,
{
    let downstream = Future::resolvable_with_caller(upstream.caller());
    downstream.bind(upstream.clone());

    passthrough_failed_and_cancelled(&upstream, downstream.clone());

    let d = downstream.clone();
    upstream.on_resolved(move |value| match panic::catch_unwind(AssertUnwindSafe(|| f(&value))) {
        Ok(mapped) => {
            d.resolve(mapped);
        }
        Err(payload) => {
            d.fail(ComputationFailure::from_panic(payload));
        }
    });

    downstream
}

/// `lazyTransform(U, f)`: on `U` resolved, invokes `f` to produce a new future
/// `F` and binds the downstream to it (forwarding `F`'s eventual completion;
/// cancelling the downstream cancels `F`). Failures and cancellations of `U`
/// pass through unchanged, as does a panic raised by `f` itself.
pub fn lazy_transform<T, U, F>(upstream: Future<T>, f: F) -> Future<U>
where
    T: Send + Sync + 'static,
    U: Send + Sync + 'static,
    F: FnOnce(&T) -> Future<U> + Send + 'static,
{
    let downstream = Future::resolvable_with_caller(upstream.caller());
    downstream.bind(upstream.clone());

    passthrough_failed_and_cancelled(&upstream, downstream.clone());

    let d = downstream.clone();
    upstream.on_resolved(move |value| match panic::catch_unwind(AssertUnwindSafe(|| f(&value))) {
        Ok(produced) => {
            d.bind(produced.clone());
            forward(&produced, d);
        }
        Err(payload) => {
            d.fail(ComputationFailure::from_panic(payload));
        }
    });

    downstream
}

/// `catchFailed(U, f)`: on `U` failed, invokes `f` with the cause to produce
/// a recovery value and resolves the downstream with it. Resolved/cancelled
/// outcomes of `U` pass through unchanged.
pub fn catch_failed<T, F>(upstream: Future<T>, f: F) -> Future<T>
where
    T: Send + Sync + 'static,
    F: FnOnce(&ComputationFailure) -> T + Send + 'static,
{
    let downstream = Future::resolvable_with_caller(upstream.caller());
    downstream.bind(upstream.clone());

    let d = downstream.clone();
    upstream.on_resolved(move |value| {
        d.resolve_arc(value);
    });
    let d = downstream.clone();
    upstream.on_cancelled(move || {
        d.cancel();
    });

    let d = downstream.clone();
    upstream.on_failed(move |cause| match panic::catch_unwind(AssertUnwindSafe(|| f(&cause))) {
        Ok(recovered) => {
            d.resolve(recovered);
        }
        Err(payload) => {
            d.fail(ComputationFailure::from_panic(payload));
        }
    });

    downstream
}

/// `lazyCatchFailed(U, f)`: on `U` failed, invokes `f` with the cause to
/// produce a new future and binds the downstream to it. Resolved/cancelled
/// outcomes of `U` pass through unchanged.
pub fn lazy_catch_failed<T, F>(upstream: Future<T>, f: F) -> Future<T>
where
    T: Send + Sync + 'static,
    F: FnOnce(&ComputationFailure) -> Future<T> + Send + 'static,
{
    let downstream = Future::resolvable_with_caller(upstream.caller());
    downstream.bind(upstream.clone());

    let d = downstream.clone();
    upstream.on_resolved(move |value| {
        d.resolve_arc(value);
    });
    let d = downstream.clone();
    upstream.on_cancelled(move || {
        d.cancel();
    });

    let d = downstream.clone();
    upstream.on_failed(move |cause| match panic::catch_unwind(AssertUnwindSafe(|| f(&cause))) {
        Ok(produced) => {
            d.bind(produced.clone());
            forward(&produced, d);
        }
        Err(payload) => {
            d.fail(ComputationFailure::from_panic(payload));
        }
    });

    downstream
}

/// `catchCancelled(U, f)`: on `U` cancelled, invokes `f` to produce a
/// recovery value and resolves the downstream with it. Resolved/failed
/// outcomes of `U` pass through unchanged.
pub fn catch_cancelled<T, F>(upstream: Future<T>, f: F) -> Future<T>
where
    T: Send + Sync + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let downstream = Future::resolvable_with_caller(upstream.caller());
    downstream.bind(upstream.clone());

    let d = downstream.clone();
    upstream.on_resolved(move |value| {
        d.resolve_arc(value);
    });
    let d = downstream.clone();
    upstream.on_failed(move |cause| {
        d.fail_arc(cause);
    });

    let d = downstream.clone();
    upstream.on_cancelled(move || match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(recovered) => {
            d.resolve(recovered);
        }
        Err(payload) => {
            d.fail(ComputationFailure::from_panic(payload));
        }
    });

    downstream
}

/// `lazyCatchCancelled(U, f)`: on `U` cancelled, invokes `f` to produce a new
/// future and binds the downstream to it. Resolved/failed outcomes of `U`
/// pass through unchanged.
pub fn lazy_catch_cancelled<T, F>(upstream: Future<T>, f: F) -> Future<T>
where
    T: Send + Sync + 'static,
    F: FnOnce() -> Future<T> + Send + 'static,
{
    let downstream = Future::resolvable_with_caller(upstream.caller());
    downstream.bind(upstream.clone());

    let d = downstream.clone();
    upstream.on_resolved(move |value| {
        d.resolve_arc(value);
    });
    let d = downstream.clone();
    upstream.on_failed(move |cause| {
        d.fail_arc(cause);
    });

    let d = downstream.clone();
    upstream.on_cancelled(move || match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(produced) => {
            d.bind(produced.clone());
            forward(&produced, d);
        }
        Err(payload) => {
            d.fail(ComputationFailure::from_panic(payload));
        }
    });

    downstream
}
