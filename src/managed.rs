//! Managed Reference (§4.8): a refcounted value with asynchronous setup and
//! teardown, plus a reloadable variant that atomically swaps in a new value.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{ComputationFailure, ManagedError};
use crate::future::Future;
use crate::observer::Outcome;

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
enum Phase {
    Starting,
    Started,
    Stopping,
    Stopped,
}

struct Inner<T: Send + Sync + 'static> {
    setup: Future<T>,
    phase: Mutex<Phase>,
    value: Mutex<Option<Arc<T>>>,
    refcount: AtomicUsize,
    stopped: Future<()>,
    teardown: Box<dyn Fn(Arc<T>) -> Future<()> + Send + Sync>,
}

/// A borrowed handle to a managed value. Dropping it releases the borrow,
/// allowing a pending `stop` to proceed once the refcount reaches zero.
pub struct Borrowed<T: Send + Sync + 'static> {
    value: Arc<T>,
    inner: Arc<Inner<T>>,
}

impl<T: Send + Sync + 'static> Borrowed<T> {
    /// The borrowed value.
    pub fn value(&self) -> &Arc<T> {
        &self.value
    }
}

impl<T: Send + Sync + 'static> Drop for Borrowed<T> {
    fn drop(&mut self) {
        release(&self.inner);
    }
}

/// A refcounted reference with asynchronous setup and teardown (§4.8).
///
/// States: `Starting` (setup future pending) → `Started` (value available,
/// borrows allowed) → `Stopping` (no new borrows; waiting for refcount to
/// reach zero) → `Stopped` (teardown complete).
pub struct Managed<T: Send + Sync + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + Sync + 'static> Clone for Managed<T> {
    fn clone(&self) -> Self {
        Managed { inner: self.inner.clone() }
    }
}

impl<T: Send + Sync + 'static> Managed<T> {
    /// Starts a managed reference: `setup` produces the value, `teardown`
    /// consumes it (as an `Arc`, since a still-outstanding `Borrowed` may hold
    /// its own clone) when the reference is stopped.
    pub fn start<S>(setup: Future<T>, teardown: S) -> Self
    where
        S: Fn(Arc<T>) -> Future<()> + Send + Sync + 'static,
    {
        let inner = Arc::new(Inner {
            setup: setup.clone(),
            phase: Mutex::new(Phase::Starting),
            value: Mutex::new(None),
            refcount: AtomicUsize::new(0),
            stopped: Future::resolvable(),
            teardown: Box::new(teardown),
        });

        let inner_clone = inner.clone();
        setup.on_finished(move |outcome| on_setup_finished(inner_clone, outcome));

        Managed { inner }
    }

    /// Borrows the current value, incrementing the refcount. Fails with
    /// [`ManagedError::Stopped`] once `stop` has been called, and stays
    /// pending until setup resolves if still `Starting`.
    ///
    /// Since borrowing must wait for an in-flight setup, this returns a
    /// future of the borrow rather than the borrow itself.
    pub fn borrow(&self) -> Future<Borrowed<T>> {
        let result: Future<Borrowed<T>> = Future::resolvable();
        let inner = self.inner.clone();
        let r = result.clone();

        self.inner.setup.clone().on_finished(move |_outcome| {
            complete_borrow(inner, r);
        });

        result
    }

    /// Marks this reference `Stopping`: no further borrows succeed, and
    /// teardown runs as soon as the refcount reaches zero. The returned
    /// future completes when teardown has.
    pub fn stop(&self) -> Future<()> {
        request_stop(&self.inner);
        self.inner.stopped.clone()
    }
}

fn on_setup_finished<T: Send + Sync + 'static>(inner: Arc<Inner<T>>, outcome: Outcome<T>) {
    match outcome {
        Outcome::Resolved(value) => {
            *inner.value.lock() = Some(value);
            let mut phase = inner.phase.lock();
            if *phase == Phase::Starting {
                *phase = Phase::Started;
            } else if *phase == Phase::Stopping && inner.refcount.load(Ordering::SeqCst) == 0 {
                let value = inner.value.lock().clone().expect("value just stored");
                drop(phase);
                begin_teardown(inner, value);
            }
        }
        Outcome::Failed(_) | Outcome::Cancelled => {
            *inner.phase.lock() = Phase::Stopped;
            inner.stopped.resolve(());
        }
    }
}

/// Called once `setup` has reached a terminal state, for every pending
/// `borrow()` call. Fails borrows issued after `stop` took effect, or whose
/// setup never resolved.
fn complete_borrow<T: Send + Sync + 'static>(inner: Arc<Inner<T>>, result: Future<Borrowed<T>>) {
    let phase = *inner.phase.lock();
    match phase {
        Phase::Started => {
            let value = inner.value.lock().clone().expect("Started implies a value is set");
            inner.refcount.fetch_add(1, Ordering::SeqCst);
            result.resolve(Borrowed { value, inner });
        }
        Phase::Starting => {
            // setup reached a terminal state but didn't resolve (failed or
            // was cancelled); `on_setup_finished` will have moved phase past
            // `Starting` by the time observers run, so this arm only covers
            // the degenerate case where `setup` itself never completed.
            result.fail(ComputationFailure::new(ManagedError::Stopped));
        }
        Phase::Stopping | Phase::Stopped => {
            result.fail(ComputationFailure::new(ManagedError::Stopped));
        }
    }
}

fn request_stop<T: Send + Sync + 'static>(inner: &Arc<Inner<T>>) {
    let ready_to_teardown = {
        let mut phase = inner.phase.lock();
        match *phase {
            Phase::Starting => {
                *phase = Phase::Stopping;
                false
            }
            Phase::Started => {
                *phase = Phase::Stopping;
                inner.refcount.load(Ordering::SeqCst) == 0
            }
            Phase::Stopping | Phase::Stopped => false,
        }
    };

    if ready_to_teardown {
        if let Some(value) = inner.value.lock().clone() {
            begin_teardown(inner.clone(), value);
        }
    }
}

fn release<T: Send + Sync + 'static>(inner: &Arc<Inner<T>>) {
    let previous = inner.refcount.fetch_sub(1, Ordering::SeqCst);
    if previous != 1 {
        return;
    }

    let should_teardown = *inner.phase.lock() == Phase::Stopping;
    if should_teardown {
        if let Some(value) = inner.value.lock().clone() {
            begin_teardown(inner.clone(), value);
        }
    }
}

fn begin_teardown<T: Send + Sync + 'static>(inner: Arc<Inner<T>>, value: Arc<T>) {
    tracing::debug!("managed reference: tearing down");
    let teardown_future = (inner.teardown)(value);
    let inner_clone = inner.clone();
    teardown_future.on_finished(move |_outcome| {
        *inner_clone.phase.lock() = Phase::Stopped;
        inner_clone.stopped.resolve(());
    });
}

/// A managed reference that can be atomically swapped for a freshly started
/// one without its borrowers ever observing a gap (§4.8 "Reloadable
/// Managed"): `reload` starts a new value, and once it is ready, the slot is
/// replaced and the previous value is stopped.
pub struct ReloadableManaged<T: Send + Sync + 'static> {
    current: Arc<Mutex<Managed<T>>>,
    teardown: Arc<dyn Fn(Arc<T>) -> Future<()> + Send + Sync>,
}

impl<T: Send + Sync + 'static> ReloadableManaged<T> {
    /// Starts a reloadable managed reference from an initial `setup`.
    pub fn start<S>(setup: Future<T>, teardown: S) -> Self
    where
        S: Fn(Arc<T>) -> Future<()> + Send + Sync + 'static,
    {
        let teardown: Arc<dyn Fn(Arc<T>) -> Future<()> + Send + Sync> = Arc::new(teardown);
        let initial = Managed::start(setup, {
            let teardown = teardown.clone();
            move |v| teardown(v)
        });
        ReloadableManaged { current: Arc::new(Mutex::new(initial)), teardown }
    }

    /// Borrows the currently active value.
    pub fn borrow(&self) -> Future<Borrowed<T>> {
        self.current.lock().borrow()
    }

    /// Starts a new value from `setup`. The slot is only replaced once that
    /// setup resolves — at which point the previous value is stopped — so the
    /// returned future completes when both the new value is ready and the
    /// previous one has stopped. If `setup` fails or is cancelled instead, the
    /// slot is left untouched and that outcome propagates to the returned
    /// future.
    pub fn reload(&self, setup: Future<T>) -> Future<()> {
        let teardown = self.teardown.clone();
        let next = Managed::start(setup, {
            let teardown = teardown.clone();
            move |v| teardown(v)
        });

        let result: Future<()> = Future::resolvable();
        let current = self.current.clone();
        let r = result.clone();

        next.inner.setup.clone().on_finished(move |outcome| match outcome {
            Outcome::Resolved(_) => {
                let previous = std::mem::replace(&mut *current.lock(), next.clone());
                let stopped = previous.stop();
                let r = r.clone();
                stopped.on_resolved(move |_| {
                    r.resolve(());
                });
            }
            Outcome::Failed(cause) => {
                r.fail((*cause).clone());
            }
            Outcome::Cancelled => {
                r.cancel();
            }
        });

        result
    }

    /// Stops the currently active value.
    pub fn stop(&self) -> Future<()> {
        self.current.lock().stop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn borrow_resolves_once_setup_resolves() {
        let setup: Future<u32> = Future::resolvable();
        let managed = Managed::start(setup.clone(), |_v| Future::resolved(()));

        let borrow = managed.borrow();
        assert!(!borrow.is_done());
        setup.resolve(7);
        let borrowed = borrow.join().unwrap();
        assert_eq!(**borrowed.value(), 7);
    }

    #[test]
    fn borrow_fails_after_stop() {
        let setup: Future<u32> = Future::resolvable();
        setup.resolve(1);
        let managed = Managed::start(setup, |_v| Future::resolved(()));
        managed.stop().join().unwrap();

        match managed.borrow().join() {
            Err(crate::error::FutureError::Failed(_)) => {}
            _ => panic!("expected a Failed error"),
        }
    }

    #[test]
    fn stop_waits_for_outstanding_borrow_to_release() {
        let setup: Future<u32> = Future::resolvable();
        setup.resolve(1);
        let managed = Managed::start(setup, |_v| Future::resolved(()));

        let borrowed = managed.borrow().join().unwrap();
        let stopped = managed.stop();
        assert!(!stopped.is_done());
        drop(borrowed);
        stopped.join().unwrap();
    }

    #[test]
    fn reload_swaps_in_new_value_and_stops_previous() {
        let stopped_old = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let reloadable = ReloadableManaged::start(Future::resolved(1), {
            let stopped_old = stopped_old.clone();
            move |_v| {
                stopped_old.store(true, Ordering::SeqCst);
                Future::resolved(())
            }
        });

        let new_setup: Future<u32> = Future::resolvable();
        let reload = reloadable.reload(new_setup.clone());
        assert!(!reload.is_done());
        assert!(!stopped_old.load(Ordering::SeqCst));

        new_setup.resolve(2);
        reload.join().unwrap();
        assert!(stopped_old.load(Ordering::SeqCst));

        let borrowed = reloadable.borrow().join().unwrap();
        assert_eq!(**borrowed.value(), 2);
    }

    #[test]
    fn reload_failure_leaves_previous_value_in_place() {
        let stopped_old = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let reloadable = ReloadableManaged::start(Future::resolved(1), {
            let stopped_old = stopped_old.clone();
            move |_v| {
                stopped_old.store(true, Ordering::SeqCst);
                Future::resolved(())
            }
        });

        let new_setup: Future<u32> = Future::resolvable();
        let reload = reloadable.reload(new_setup.clone());
        new_setup.fail(crate::error::ComputationFailure::from_message("setup boom"));

        assert!(reload.join().unwrap_err().to_string().contains("setup boom"));
        assert!(!stopped_old.load(Ordering::SeqCst));

        let borrowed = reloadable.borrow().join().unwrap();
        assert_eq!(**borrowed.value(), 1);
    }
}
