//! Main error type for resilient calls.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for calls made through the resilience layer.
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

/// Classification of an operation error, used by the retry and circuit-breaker layers.
///
/// Every method has a default, so a consumer error type only overrides what
/// it knows about. With the defaults every failure is retryable and counts
/// toward the breaker threshold.
pub trait Classify {
    /// Returns true if the failed attempt may be retried.
    fn is_retryable(&self) -> bool {
        true
    }

    /// Returns true if the error signals an exhausted quota (HTTP 429 and friends).
    ///
    /// Quota errors are never retried and trip the circuit breaker immediately.
    fn is_quota_exceeded(&self) -> bool {
        false
    }

    /// Server-provided hint for how long to stay away, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }

    /// Returns true if the error counts as a failure of the downstream dependency.
    fn trips_breaker(&self) -> bool {
        self.is_retryable() || self.is_quota_exceeded()
    }
}

impl Classify for io::Error {
    fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            io::ErrorKind::TimedOut
                | io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::Interrupted
                | io::ErrorKind::UnexpectedEof
        )
    }
}

/// Returned when the circuit breaker rejects a call without running it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Circuit breaker is open; next attempt allowed in {retry_in:?}")]
pub struct CircuitOpenError {
    /// Time left until the breaker admits a trial call. Zero when a
    /// half-open trial is already in flight.
    pub retry_in: Duration,
}

/// Top-level error returned by [`ResilientClient::call`](crate::resilience::ResilientClient::call).
///
/// `E` is the error type of the wrapped operation.
#[derive(Error, Debug)]
pub enum ResilienceError<E> {
    /// The circuit breaker rejected the call; the operation was not invoked.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// Every allowed attempt failed with a retryable error.
    #[error("Retries exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Error returned by the final attempt.
        #[source]
        source: E,
    },

    /// The operation failed and was not retried further.
    #[error(transparent)]
    Operation(E),

    /// The caller cancelled the call.
    #[error("Call cancelled")]
    Cancelled,

    /// The client was shut down before the call could run.
    #[error("Client is shut down")]
    Shutdown,
}

impl<E> ResilienceError<E> {
    /// Returns true if the call was rejected by an open circuit.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ResilienceError::CircuitOpen(_))
    }

    /// Returns true if the call was cancelled by the caller.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ResilienceError::Cancelled)
    }

    /// Returns true if the client was shut down.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, ResilienceError::Shutdown)
    }

    /// Number of attempts made, when retries were exhausted.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            ResilienceError::RetryExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Borrows the underlying operation error, if there is one.
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            ResilienceError::RetryExhausted { source, .. } | ResilienceError::Operation(source) => {
                Some(source)
            }
            _ => None,
        }
    }

    /// Consumes the error and returns the underlying operation error, if there is one.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            ResilienceError::RetryExhausted { source, .. } | ResilienceError::Operation(source) => {
                Some(source)
            }
            _ => None,
        }
    }
}
