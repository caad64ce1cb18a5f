//! Error types for the rate limiter.
//!
//! `ThrottleError` is the only error type that crosses the public API
//! boundary (`Limiter::submit`, `submit_with`, `stop`). Backend medium
//! failures (a Redis connection drop, a protocol error) are wrapped in
//! [`ThrottleError::Backend`] rather than leaking the underlying crate's
//! error type, so callers can match on the four variants without knowing
//! which backend is in use.

use thiserror::Error;

/// Errors returned by the rate limiter's public API.
#[derive(Debug, Error)]
pub enum ThrottleError {
    /// A backend was configured but no limiter id was given.
    ///
    /// An id is required whenever a shared backend is in play, since it is
    /// the namespace under which that backend's state is recorded.
    #[error("limiter id is required when a backend is configured")]
    MissingId,

    /// `submit_with` was called with a non-positive weight.
    #[error("invalid weight {weight}: weight must be a positive integer")]
    InvalidWeight {
        /// The rejected weight value, preserved for diagnostics.
        weight: i64,
    },

    /// The limiter has been stopped, or the backend has been disconnected.
    ///
    /// Returned by `submit`/`submit_with` on a stopped limiter, by queued
    /// jobs drained at `stop()`, and by any backend call made after
    /// `disconnect()`.
    #[error("store is closed")]
    StoreClosed,

    /// The underlying state backend failed (network I/O, protocol error).
    ///
    /// The affected job is never executed and is not re-enqueued; the
    /// error is returned to the submitter verbatim (wrapped here).
    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_weight_display_includes_value() {
        let err = ThrottleError::InvalidWeight { weight: -3 };
        assert!(err.to_string().contains("-3"));
    }

    #[test]
    fn backend_error_wraps_source() {
        let err = ThrottleError::Backend(anyhow::anyhow!("connection reset"));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn store_closed_display() {
        assert_eq!(ThrottleError::StoreClosed.to_string(), "store is closed");
    }
}
