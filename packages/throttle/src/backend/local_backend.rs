//! Single-process state backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use super::Admission;
use crate::error::ThrottleError;

/// Per-id admission state.
struct IdState {
    running: u32,
    last_start: Option<Instant>,
}

impl IdState {
    fn new() -> Self {
        Self {
            running: 0,
            last_start: None,
        }
    }
}

/// An in-memory [`StateBackend`](super::StateBackend) for single-process use.
///
/// State lives behind one `tokio::sync::Mutex`; `request` and
/// `register_done` hold it only for the duration of the check/update, never
/// across `.await` on anything but the lock itself. Uses the monotonic
/// clock (`Instant`) for `min_time` spacing, so it is immune to wall-clock
/// adjustments.
pub struct LocalBackend {
    states: Mutex<HashMap<String, IdState>>,
    closed: AtomicBool,
}

impl LocalBackend {
    /// Create a new, empty local backend.
    pub fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl super::StateBackend for LocalBackend {
    async fn request(
        &self,
        id: &str,
        weight: u32,
        max_concurrent: u32,
        min_time: Duration,
    ) -> Result<Admission, ThrottleError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ThrottleError::StoreClosed);
        }

        let mut states = self.states.lock().await;
        let state = states
            .entry(id.to_string())
            .or_insert_with(IdState::new);

        if max_concurrent > 0 && state.running.saturating_add(weight) > max_concurrent {
            return Ok(Admission::Denied {
                wait: Duration::ZERO,
            });
        }

        if min_time > Duration::ZERO {
            if let Some(last_start) = state.last_start {
                let elapsed = last_start.elapsed();
                if elapsed < min_time {
                    return Ok(Admission::Denied {
                        wait: min_time - elapsed,
                    });
                }
            }
        }

        state.running = state.running.saturating_add(weight);
        state.last_start = Some(Instant::now());
        Ok(Admission::Granted)
    }

    async fn register_done(&self, id: &str, weight: u32) -> Result<(), ThrottleError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ThrottleError::StoreClosed);
        }

        let mut states = self.states.lock().await;
        if let Some(state) = states.get_mut(id) {
            state.running = state.running.saturating_sub(weight);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ThrottleError> {
        self.closed.store(true, Ordering::Release);
        self.states.lock().await.clear();
        Ok(())
    }
}
