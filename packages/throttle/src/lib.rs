//! # throttle
//!
//! A priority-aware, weight-aware rate limiter for concurrent work.
//!
//! `throttle` enforces two simultaneous constraints on submitted work: a
//! ceiling on concurrently executing weight (`max_concurrent`) and a
//! minimum spacing between successive starts (`min_time`). Work carries a
//! `priority` (higher runs sooner) and a `weight` (cost against
//! `max_concurrent`).
//!
//! ## Architecture
//!
//! ```text
//! submit(work) ──► PriorityQueue ──► Dispatcher ──► StateBackend.request()
//!                                        │                  │
//!                                        │            granted / denied(wait)
//!                                        ▼                  │
//!                                 tokio::spawn(work) ◄───────┘
//!                                        │
//!                                        ▼
//!                          StateBackend.register_done() + deliver result
//! ```
//!
//! A dedicated dispatcher task owns the queue and drains it through the
//! backend's two-constraint gate: on grant it spawns the job; on denial it
//! re-enqueues the job and sleeps the suggested wait; on backend error it
//! fails the job without re-enqueuing it.
//!
//! ## Backends
//!
//! - [`LocalBackend`] enforces the limit within one process.
//! - [`RedisBackend`] enforces the same limit across any number of
//!   processes that share a limiter id, using a server-side Lua script as
//!   the atomic admission gate.
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use throttle::{Limiter, Options};
//!
//! # async fn run() -> Result<(), throttle::ThrottleError> {
//! let limiter: Limiter<String> = Limiter::new(
//!     Options::new()
//!         .with_max_concurrent(4)
//!         .with_min_time(Duration::from_millis(50)),
//! )?;
//!
//! let page = limiter
//!     .submit_with(
//!         || async { Ok("<html>...</html>".to_string()) },
//!         /* priority */ 10,
//!         /* weight */ 1,
//!     )
//!     .await?;
//!
//! println!("fetched {} bytes", page.len());
//! limiter.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## What This Is Not
//!
//! `throttle` is **not**:
//! - A token-bucket or leaky-bucket rate limiter.
//! - Fair across submitters — priority and arrival order are the only
//!   ordering signals.
//! - A durable queue — unadmitted work is lost on process crash.

mod backend;
mod error;
mod job;
mod limiter;
mod options;
mod queue;

pub use backend::{Admission, LocalBackend, RedisBackend, StateBackend};
pub use error::ThrottleError;
pub use limiter::Limiter;
pub use options::Options;
