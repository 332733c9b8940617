//! Error taxonomy for the library: [`ComputationFailure`] wraps whatever a user
//! callable/transform/collector panicked or returned as an error with, [`FutureError`] is
//! the public, typed outcome of `join`/`joinNow`, and [`RetryExhausted`] /
//! [`ManagedError`] give the retry driver and the managed reference their own
//! composite failures.

use std::fmt;
use std::sync::Arc;

/// A type-erased, cloneable, thread-safe error, the thing a future fails with.
///
/// Stored as an `Arc` rather than a `Box` because a single failure cause is
/// routinely read by many observers (the downstream of a `transform`, every
/// slot of a buffered collect, the retry driver's error list) without any one
/// of them owning it exclusively.
#[derive(Clone)]
pub struct ComputationFailure(Arc<dyn std::error::Error + Send + Sync + 'static>);

impl ComputationFailure {
    /// Wraps an arbitrary error as a computation failure.
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ComputationFailure(Arc::new(error))
    }

    /// Wraps a message-only failure, e.g. the description of a caught panic.
    pub fn from_message(message: impl Into<String>) -> Self {
        ComputationFailure(Arc::new(Message(message.into())))
    }

    /// Describes a panic payload caught via `catch_unwind`, preserving the
    /// panic message when the payload is a `&str` or `String`.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panicked with a non-string payload".to_string()
        };
        Self::from_message(format!("panicked: {message}"))
    }
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Message {}

impl fmt::Debug for ComputationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for ComputationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for ComputationFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// The public, typed result of `join`/`joinNow`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FutureError {
    /// The future failed; carries the original cause.
    #[error(transparent)]
    Failed(#[from] ComputationFailure),

    /// The future was cancelled.
    #[error("future was cancelled")]
    Cancelled,

    /// `joinNow` was called on a future that has not reached a terminal state yet.
    #[error("joinNow called on a future that is still running")]
    NotReady,
}

/// Every intermediate cause a retry loop accumulated before the policy aborted.
#[derive(Debug, thiserror::Error)]
#[error("retry exhausted after {attempts} attempt(s), last cause: {last}")]
pub struct RetryExhausted {
    /// Total number of attempts made (including the last, failing, one).
    pub attempts: usize,
    /// Every failure cause, in the order the attempts occurred.
    pub causes: Vec<ComputationFailure>,
    /// The cause of the final attempt; also the last element of `causes`.
    pub last: ComputationFailure,
}

/// Usage errors specific to [`crate::managed::Managed`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ManagedError {
    /// `borrow` was called after `stop` was invoked.
    #[error("managed reference has stopped")]
    Stopped,
}
