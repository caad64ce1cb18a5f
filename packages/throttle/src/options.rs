//! Immutable configuration for a [`Limiter`](crate::Limiter).

use std::sync::Arc;
use std::time::Duration;

use crate::backend::{LocalBackend, StateBackend};
use crate::error::ThrottleError;

/// Configuration for a [`Limiter`](crate::Limiter), validated and resolved
/// once at construction time.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use throttle::Options;
///
/// let options = Options::new()
///     .with_max_concurrent(5)
///     .with_min_time(Duration::from_millis(100));
/// ```
#[derive(Clone, Default)]
pub struct Options {
    id: Option<String>,
    max_concurrent: u32,
    min_time: Duration,
    backend: Option<Arc<dyn StateBackend>>,
}

impl Options {
    /// Start from the default configuration: no concurrency cap, no
    /// spacing, and an in-memory backend synthesized with id `"default"`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the limiter id. Required when [`Options::with_backend`] is used;
    /// otherwise defaults to `"default"`.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Cap on concurrently executing weight. `0` disables the concurrency
    /// gate.
    pub fn with_max_concurrent(mut self, max_concurrent: u32) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Minimum spacing between successive grants. `Duration::ZERO` disables
    /// the spacing gate.
    pub fn with_min_time(mut self, min_time: Duration) -> Self {
        self.min_time = min_time;
        self
    }

    /// Use a shared backend (e.g. [`RedisBackend`](crate::RedisBackend))
    /// instead of the default in-memory one. Requires an id.
    pub fn with_backend(mut self, backend: Arc<dyn StateBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Validate and resolve into `(id, backend, max_concurrent, min_time)`.
    pub(crate) fn resolve(
        self,
    ) -> Result<(String, Arc<dyn StateBackend>, u32, Duration), ThrottleError> {
        match self.backend {
            Some(backend) => {
                let id = self.id.ok_or(ThrottleError::MissingId)?;
                Ok((id, backend, self.max_concurrent, self.min_time))
            }
            None => {
                let id = self.id.unwrap_or_else(|| "default".to_string());
                Ok((
                    id,
                    Arc::new(LocalBackend::new()),
                    self.max_concurrent,
                    self.min_time,
                ))
            }
        }
    }
}
