//! The clock-source contract consumed by the retry driver (§4.7, §6): `now()`
//! for elapsed-time bookkeeping and `schedule(delay, action)` for backoff.
//! Injected so retry policies can be tested deterministically without
//! sleeping real wall-clock time.

use std::collections::BinaryHeap;
use std::cmp::Ordering as CmpOrdering;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// A monotonic clock plus a way to schedule a delayed action.
pub trait ClockSource: Send + Sync {
    /// Returns the current monotonic instant.
    fn now(&self) -> Instant;

    /// Runs `action` after approximately `delay` has elapsed.
    fn schedule(&self, delay: Duration, action: Box<dyn FnOnce() + Send>);
}

/// The real wall clock. Delayed actions run on a freshly spawned thread that
/// sleeps for the requested duration; see the module docs on why this is a
/// minimal stand-in rather than a production timer wheel.
#[derive(Debug, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn schedule(&self, delay: Duration, action: Box<dyn FnOnce() + Send>) {
        thread::Builder::new()
            .name("resolvent-retry-timer".to_string())
            .spawn(move || {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                action();
            })
            .expect("failed to spawn retry timer thread");
    }
}

struct PendingAction {
    fire_at: Instant,
    sequence: u64,
    action: Box<dyn FnOnce() + Send>,
}

impl PartialEq for PendingAction {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.sequence == other.sequence
    }
}
impl Eq for PendingAction {}
impl PartialOrd for PendingAction {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for PendingAction {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reverse so the BinaryHeap (a max-heap) pops the earliest deadline first.
        other.fire_at.cmp(&self.fire_at).then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// A deterministic clock for tests: `now()` is a virtual instant that only
/// moves forward when the test calls [`ManualClock::advance`], and scheduled
/// actions only fire once the virtual clock has reached their deadline.
pub struct ManualClock {
    origin: Instant,
    state: Mutex<ManualState>,
}

struct ManualState {
    elapsed: Duration,
    next_sequence: u64,
    pending: BinaryHeap<PendingAction>,
}

impl ManualClock {
    /// Creates a manual clock starting at "time zero".
    pub fn new() -> Self {
        ManualClock {
            origin: Instant::now(),
            state: Mutex::new(ManualState {
                elapsed: Duration::ZERO,
                next_sequence: 0,
                pending: BinaryHeap::new(),
            }),
        }
    }

    /// Advances the virtual clock by `delta`, firing (synchronously, on the
    /// calling thread) every scheduled action whose deadline has now passed.
    pub fn advance(&self, delta: Duration) {
        let due = {
            let mut state = self.state.lock();
            state.elapsed += delta;
            let now = self.origin + state.elapsed;
            let mut due = Vec::new();
            while let Some(top) = state.pending.peek() {
                if top.fire_at <= now {
                    due.push(state.pending.pop().unwrap());
                } else {
                    break;
                }
            }
            due
        };
        for pending in due {
            (pending.action)();
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for ManualClock {
    fn now(&self) -> Instant {
        let state = self.state.lock();
        self.origin + state.elapsed
    }

    fn schedule(&self, delay: Duration, action: Box<dyn FnOnce() + Send>) {
        let mut state = self.state.lock();
        let fire_at = self.origin + state.elapsed + delay;
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.pending.push(PendingAction { fire_at, sequence, action });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn manual_clock_only_fires_once_advanced_past_deadline() {
        let clock = ManualClock::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        clock.schedule(Duration::from_secs(5), Box::new(move || {
            fired2.fetch_add(1, Ordering::SeqCst);
        }));
        clock.advance(Duration::from_secs(2));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        clock.advance(Duration::from_secs(3));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn manual_clock_fires_in_deadline_order() {
        let clock = ManualClock::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for id in [3, 1, 2] {
            let order = order.clone();
            clock.schedule(Duration::from_millis(id * 10), Box::new(move || {
                order.lock().push(id);
            }));
        }
        clock.advance(Duration::from_millis(100));
        assert_eq!(*order.lock(), vec![1, 2, 3]);
    }
}
