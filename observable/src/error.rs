//! Error types for the broadcast primitive

use std::time::Duration;

/// Error returned by a subscriber callback.
///
/// Returning this from a callback marks the subscriber as misbehaving; it is
/// removed once the current notify round completes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("subscriber callback failed: {0}")]
pub struct CallbackError(String);

impl CallbackError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<String> for CallbackError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for CallbackError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// Outcome of a failed [`Observable::wait_for_value_if`](crate::Observable::wait_for_value_if).
#[derive(Debug, thiserror::Error)]
pub enum WaitError<E> {
    /// No matching value was notified within the timeout
    #[error("no matching value within {0:?}")]
    Timeout(Duration),

    /// The enclosed action failed before waiting started
    #[error("enclosed action failed: {0}")]
    Action(E),

    /// The predicate panicked while inspecting a value
    #[error("predicate failed while inspecting a value")]
    PredicateFailed,

    /// The observable was dropped while waiting
    #[error("observable closed while waiting")]
    Closed,
}

impl<E> WaitError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::Timeout(_))
    }

    /// Map the action error, keeping every other variant
    pub fn map_action<F, E2>(self, f: F) -> WaitError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            WaitError::Timeout(d) => WaitError::Timeout(d),
            WaitError::Action(e) => WaitError::Action(f(e)),
            WaitError::PredicateFailed => WaitError::PredicateFailed,
            WaitError::Closed => WaitError::Closed,
        }
    }
}
