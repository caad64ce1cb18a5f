//! The state backend contract.
//!
//! A [`StateBackend`] decides admission under two simultaneous constraints
//! (`max_concurrent`, `min_time`) and accounts for completions. Two
//! implementations ship with this crate: [`LocalBackend`] for single-process
//! use, and [`RedisBackend`] for coordinating a limit across processes that
//! share a limiter id.
//!
//! # Atomicity
//!
//! Concurrent `request` calls against the same id MUST NOT grant admissions
//! whose combined weight exceeds `max_concurrent`, nor violate `min_time`
//! spacing. `LocalBackend` gets this from a single process-wide lock;
//! `RedisBackend` gets it from Redis's single-threaded command execution
//! combined with a server-side script.

mod local_backend;
mod redis_backend;

pub use local_backend::LocalBackend;
pub use redis_backend::RedisBackend;

use std::time::Duration;

use crate::error::ThrottleError;

/// The outcome of a [`StateBackend::request`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request was granted; the caller may start the work now.
    Granted,
    /// The request was denied. `wait` is the backend's best estimate of how
    /// long the caller should wait before trying again; `Duration::ZERO`
    /// means "try again on the next tick" (this collapses the wire
    /// contract's `wait_ms = -1` concurrency-denial sentinel and
    /// `wait_ms = 0` into the same no-sleep behavior).
    Denied {
        /// Suggested minimum wait before the next `request`.
        wait: Duration,
    },
}

impl Admission {
    /// Returns `true` if this admission was granted.
    pub fn is_granted(&self) -> bool {
        matches!(self, Admission::Granted)
    }
}

/// A pluggable state store that decides admission and tracks completions
/// for one or more limiter ids.
///
/// Implementations must be safe to share across an arbitrary number of
/// concurrent callers (the dispatcher for every `Limiter` pointed at the
/// same backend, potentially across processes for a shared backend).
#[async_trait::async_trait]
pub trait StateBackend: Send + Sync + 'static {
    /// Atomically evaluate admission for `weight` units under `id`.
    ///
    /// - If `max_concurrent > 0` and granting `weight` would exceed it,
    ///   returns `Denied`.
    /// - Else if `min_time` has not elapsed since the last grant, returns
    ///   `Denied` with the remaining wait.
    /// - Else records the grant (`running += weight`, `last_start = now`)
    ///   and returns `Granted`.
    async fn request(
        &self,
        id: &str,
        weight: u32,
        max_concurrent: u32,
        min_time: Duration,
    ) -> Result<Admission, ThrottleError>;

    /// Release `weight` units previously granted under `id`.
    ///
    /// Clamps at zero and is a no-op if `id` has no recorded state (a job
    /// that finishes after the backend has forgotten its id, e.g. via TTL
    /// expiry, must not panic or error here).
    async fn register_done(&self, id: &str, weight: u32) -> Result<(), ThrottleError>;

    /// Release backend resources. Subsequent `request`/`register_done`
    /// calls MUST fail with [`ThrottleError::StoreClosed`].
    async fn disconnect(&self) -> Result<(), ThrottleError>;
}
