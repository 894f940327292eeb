//! Error types for the circuit breaker library.

use thiserror::Error;

/// Result type for guarded calls.
pub type BreakerResult<T, E> = Result<T, BreakerError<E>>;

/// Error returned by a guarded call.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The circuit is open and cooling down; the operation was not invoked.
    #[error("circuit breaker is open")]
    Open,

    /// The wrapped operation ran and failed. The error is its own, untouched.
    #[error(transparent)]
    Upstream(E),
}

impl<E> BreakerError<E> {
    /// Returns `true` if the call was short-circuited.
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open)
    }

    /// Returns the operation's error, if the operation ran.
    pub fn into_upstream(self) -> Option<E> {
        match self {
            BreakerError::Open => None,
            BreakerError::Upstream(e) => Some(e),
        }
    }
}

/// Rejected configuration, reported at construction time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A breaker needs at least one failure before judging the failure rate.
    #[error("failure count threshold must be at least 1")]
    ZeroFailureCountThreshold,

    /// The failure rate threshold is a percentage in `(0, 100]`.
    #[error("failure rate threshold must be within (0, 100], got {0}")]
    FailureRateOutOfRange(f64),

    /// A window or cooldown of zero length.
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    /// A window or cooldown too long to add to a timestamp.
    #[error("{0} exceeds the maximum supported duration")]
    DurationTooLong(&'static str),
}
