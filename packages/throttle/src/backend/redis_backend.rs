//! Redis-backed distributed state backend.
//!
//! Coordinates a single `max_concurrent`/`min_time` limit across any number
//! of processes that share a limiter id, using a server-side Lua script as
//! the atomic admission gate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use redis::aio::ConnectionManager;
use tokio::sync::Mutex;

use super::Admission;
use crate::error::ThrottleError;

/// KEYS[1] = `gothrottle:<id>`
/// ARGV = [max_concurrent, min_time_ms, weight, now_ms]
/// Returns `{granted, wait_ms}`: `granted` is 0 or 1; `wait_ms` is -1 on a
/// concurrency denial, the remaining spacing on a min-time denial, 0 on grant.
const ADMISSION_SCRIPT: &str = r#"
local key = KEYS[1]
local max_concurrent = tonumber(ARGV[1])
local min_time_ms = tonumber(ARGV[2])
local weight = tonumber(ARGV[3])
local now_ms = tonumber(ARGV[4])

local running = tonumber(redis.call('HGET', key, 'running') or '0')
local last_start = tonumber(redis.call('HGET', key, 'last_start') or '0')

if max_concurrent > 0 and running + weight > max_concurrent then
    return {0, -1}
end

if min_time_ms > 0 and last_start > 0 then
    local elapsed = now_ms - last_start
    if elapsed < min_time_ms then
        return {0, min_time_ms - elapsed}
    end
end

redis.call('HSET', key, 'running', running + weight, 'last_start', now_ms)
redis.call('PEXPIRE', key, 30000)
return {1, 0}
"#;

/// KEYS[1] = `gothrottle:<id>`, ARGV[1] = weight.
/// No-op (returns -1) if the id has no recorded state; otherwise decrements
/// `running` by `weight`, clamped at zero.
const DONE_SCRIPT: &str = r#"
local key = KEYS[1]
local weight = tonumber(ARGV[1])

if redis.call('EXISTS', key) == 0 then
    return -1
end

local running = tonumber(redis.call('HGET', key, 'running') or '0')
local updated = running - weight
if updated < 0 then
    updated = 0
end
redis.call('HSET', key, 'running', updated)
return updated
"#;

/// A [`StateBackend`](super::StateBackend) backed by a shared Redis
/// instance, for coordinating a limit across independent processes.
///
/// Construction takes a pre-built `redis::Client` — connection string
/// parsing, TLS, and pooling policy are the caller's concern. The
/// underlying connection is a lazily-established, auto-reconnecting
/// `ConnectionManager`, shared across all calls.
///
/// # Clock skew
///
/// `min_time` spacing is measured against `now_ms` supplied by whichever
/// client happens to call `request`. Under skew between processes sharing
/// an id, the effective spacing is only as tight as the tightest client
/// clock. Pin all participating processes to a common NTP source if this
/// matters for your workload.
pub struct RedisBackend {
    client: redis::Client,
    conn: Mutex<Option<ConnectionManager>>,
    admission_script: redis::Script,
    done_script: redis::Script,
    closed: AtomicBool,
}

impl RedisBackend {
    /// Build a backend around an existing Redis client.
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            conn: Mutex::new(None),
            admission_script: redis::Script::new(ADMISSION_SCRIPT),
            done_script: redis::Script::new(DONE_SCRIPT),
            closed: AtomicBool::new(false),
        }
    }

    async fn connection(&self) -> Result<ConnectionManager, ThrottleError> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_connection_manager()
            .await
            .map_err(|e| ThrottleError::Backend(e.into()))?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    fn key(id: &str) -> String {
        format!("gothrottle:{id}")
    }
}

#[async_trait::async_trait]
impl super::StateBackend for RedisBackend {
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

        let mut conn = self.connection().await?;
        let now_ms = chrono::Utc::now().timestamp_millis();
        let min_time_ms = min_time.as_millis() as i64;

        // The redis crate's Script::invoke_async uses EVALSHA under the
        // hood and transparently falls back to EVAL (reloading the script)
        // on a NOSCRIPT response, satisfying the "load once, retry once on
        // cache miss" contract without us managing SHA hashes by hand.
        let (granted, wait_ms): (i64, i64) = self
            .admission_script
            .key(Self::key(id))
            .arg(max_concurrent)
            .arg(min_time_ms)
            .arg(weight)
            .arg(now_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| ThrottleError::Backend(e.into()))?;

        if granted == 1 {
            Ok(Admission::Granted)
        } else if wait_ms > 0 {
            Ok(Admission::Denied {
                wait: Duration::from_millis(wait_ms as u64),
            })
        } else {
            Ok(Admission::Denied {
                wait: Duration::ZERO,
            })
        }
    }

    async fn register_done(&self, id: &str, weight: u32) -> Result<(), ThrottleError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ThrottleError::StoreClosed);
        }

        let mut conn = self.connection().await?;
        let _: i64 = self
            .done_script
            .key(Self::key(id))
            .arg(weight)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| ThrottleError::Backend(e.into()))?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ThrottleError> {
        self.closed.store(true, Ordering::Release);
        *self.conn.lock().await = None;
        Ok(())
    }
}
