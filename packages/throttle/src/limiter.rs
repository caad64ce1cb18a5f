//! The scheduler: owns the queue and backend, runs the dispatcher, and
//! exposes the submission API.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;

use crate::backend::StateBackend;
use crate::error::ThrottleError;
use crate::job::{BoxedWork, Job};
use crate::options::Options;
use crate::queue::PriorityQueue;

/// Default priority for [`Limiter::submit`].
const DEFAULT_PRIORITY: i32 = 5;
/// Default weight for [`Limiter::submit`].
const DEFAULT_WEIGHT: i64 = 1;
/// Dispatcher polling cadence. The dispatcher also wakes immediately on
/// enqueue/stop via `Notify`, so this is a ceiling on latency, not the
/// only wake-up path.
const DISPATCH_TICK: Duration = Duration::from_millis(10);

struct Inner<T> {
    id: String,
    max_concurrent: u32,
    min_time: Duration,
    backend: Arc<dyn StateBackend>,
    queue: StdMutex<PriorityQueue<T>>,
    sequence: AtomicU64,
    stopped: AtomicBool,
    notify: Notify,
    dispatcher: StdMutex<Option<JoinHandle<()>>>,
}

impl<T> Inner<T> {
    /// Lock the job queue, recovering from poison instead of panicking.
    ///
    /// A panicking submitter or dispatcher task taking this lock down with
    /// it would otherwise wedge every other caller forever; the queue has
    /// no invariant that a poisoned guard could have left half-updated, so
    /// recovering and continuing is safe.
    fn lock_queue(&self) -> std::sync::MutexGuard<'_, PriorityQueue<T>> {
        self.queue.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(id = %self.id, "limiter queue mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Lock the dispatcher join handle slot, recovering from poison.
    fn lock_dispatcher(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.dispatcher.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(id = %self.id, "limiter dispatcher mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

/// A priority- and weight-aware rate limiter for concurrent async work.
///
/// Enforces a concurrency ceiling (`max_concurrent`) and a minimum
/// inter-start spacing (`min_time`) simultaneously, against a pluggable
/// [`StateBackend`]. Clone is cheap (it's an `Arc` handle to shared state);
/// clones share one dispatcher and one queue.
///
/// # Example
///
/// ```no_run
/// # async fn run() -> Result<(), throttle::ThrottleError> {
/// use throttle::{Limiter, Options};
///
/// let limiter: Limiter<u32> = Limiter::new(Options::new().with_max_concurrent(2))?;
///
/// let result = limiter.submit(|| async { Ok(42) }).await?;
/// assert_eq!(result, 42);
///
/// limiter.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct Limiter<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Limiter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> Limiter<T> {
    /// Construct a limiter from `options`, starting its dispatcher
    /// immediately.
    ///
    /// Fails with [`ThrottleError::MissingId`] if `options` configures a
    /// shared backend without an id.
    pub fn new(options: Options) -> Result<Self, ThrottleError> {
        let (id, backend, max_concurrent, min_time) = options.resolve()?;

        let inner = Arc::new(Inner {
            id,
            max_concurrent,
            min_time,
            backend,
            queue: StdMutex::new(PriorityQueue::new()),
            sequence: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            notify: Notify::new(),
            dispatcher: StdMutex::new(None),
        });

        let dispatcher_inner = inner.clone();
        let handle = tokio::spawn(dispatcher_loop(dispatcher_inner));
        *inner.lock_dispatcher() = Some(handle);

        Ok(Self { inner })
    }

    /// Submit work at the default priority (5) and weight (1).
    pub async fn submit<F, Fut>(&self, work: F) -> Result<T, ThrottleError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.submit_with(work, DEFAULT_PRIORITY, DEFAULT_WEIGHT)
            .await
    }

    /// Submit work with an explicit `priority` (higher runs sooner) and
    /// `weight` (cost against `max_concurrent`).
    ///
    /// Blocks until the work has been admitted, executed, and its result
    /// delivered. Returns [`ThrottleError::InvalidWeight`] if `weight` is
    /// not positive, or [`ThrottleError::StoreClosed`] if the limiter has
    /// already been stopped.
    pub async fn submit_with<F, Fut>(
        &self,
        work: F,
        priority: i32,
        weight: i64,
    ) -> Result<T, ThrottleError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        if weight <= 0 || weight > u32::MAX as i64 {
            return Err(ThrottleError::InvalidWeight { weight });
        }

        if self.inner.stopped.load(Ordering::Acquire) {
            return Err(ThrottleError::StoreClosed);
        }

        let (tx, rx) = oneshot::channel();
        let sequence = self.inner.sequence.fetch_add(1, Ordering::Relaxed);
        let boxed: BoxedWork<T> = Box::new(move || Box::pin(work()));
        let job = Job::new(boxed, priority, weight as u32, sequence, tx);

        self.inner.lock_queue().push(job);
        self.inner.notify.notify_one();

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(ThrottleError::StoreClosed),
        }
    }

    /// Build a nullary closure that forwards to [`Limiter::submit`].
    ///
    /// Purely a convenience for callers that want to pass a plain
    /// `Fn() -> Future` around without holding onto the limiter and work
    /// separately; it adds no semantics beyond what `submit` already does.
    pub fn wrap<F, Fut>(
        &self,
        work: F,
    ) -> impl Fn() -> Pin<Box<dyn Future<Output = Result<T, ThrottleError>> + Send>>
    where
        F: Fn() -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let limiter = self.clone();
        move || {
            let limiter = limiter.clone();
            let work = work.clone();
            Box::pin(async move { limiter.submit(work).await })
        }
    }

    /// Stop the limiter: idempotent. Signals the dispatcher to exit, waits
    /// for it to finish draining queued jobs (failed with `StoreClosed`),
    /// then disconnects the backend.
    ///
    /// Jobs already admitted before `stop` was called continue running to
    /// completion; `stop` does not wait for them, so a worker's
    /// `register_done` call can race `disconnect` and observe
    /// `StoreClosed` (it is swallowed there regardless, see
    /// [`crate::ThrottleError`]'s documentation on backend errors).
    pub async fn stop(&self) -> Result<(), ThrottleError> {
        let already_stopped = self.inner.stopped.swap(true, Ordering::AcqRel);
        if already_stopped {
            return Ok(());
        }

        self.inner.notify.notify_waiters();

        let handle = self.inner.lock_dispatcher().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        self.inner.backend.disconnect().await
    }

    /// The limiter id this instance was constructed with.
    pub fn id(&self) -> &str {
        &self.inner.id
    }
}

async fn dispatcher_loop<T: Send + 'static>(inner: Arc<Inner<T>>) {
    let mut interval = tokio::time::interval(DISPATCH_TICK);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = inner.notify.notified() => {}
        }

        if inner.stopped.load(Ordering::Acquire) {
            break;
        }

        let job = inner.lock_queue().pop();

        let Some(job) = job else {
            continue;
        };

        match inner
            .backend
            .request(&inner.id, job.weight, inner.max_concurrent, inner.min_time)
            .await
        {
            Ok(crate::backend::Admission::Granted) => {
                tracing::debug!(job_id = %job.id, weight = job.weight, "job admitted");
                spawn_job(inner.clone(), job);
            }
            Ok(crate::backend::Admission::Denied { wait }) => {
                inner.lock_queue().push(job);
                if wait > Duration::ZERO {
                    tokio::time::sleep(wait).await;
                }
            }
            Err(err) => {
                tracing::warn!(job_id = %job.id, error = %err, "admission check failed; job not re-enqueued");
                job.fail(err);
            }
        }
    }

    tracing::info!(id = %inner.id, "dispatcher stopping, draining queued jobs");
    let mut queue = inner.lock_queue();
    while let Some(job) = queue.pop() {
        job.fail(ThrottleError::StoreClosed);
    }
}

fn spawn_job<T: Send + 'static>(inner: Arc<Inner<T>>, mut job: Job<T>) {
    let work = job.take_work();
    tokio::spawn(async move {
        let result = work().await;
        if let Err(err) = inner.backend.register_done(&inner.id, job.weight).await {
            tracing::warn!(
                job_id = %job.id,
                error = %err,
                "register_done failed; running count may be stale until backend expiry",
            );
        }
        job.deliver(result.map_err(ThrottleError::Backend));
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    #[tokio::test]
    async fn submit_returns_the_work_result() {
        let limiter: Limiter<i32> = Limiter::new(Options::new()).unwrap();
        let result = limiter.submit(|| async { Ok(7) }).await.unwrap();
        assert_eq!(result, 7);
        limiter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn submit_propagates_work_errors() {
        let limiter: Limiter<i32> = Limiter::new(Options::new()).unwrap();
        let result = limiter
            .submit(|| async { Err(anyhow::anyhow!("boom")) })
            .await;
        assert!(matches!(result, Err(ThrottleError::Backend(_))));
        limiter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn submit_with_non_positive_weight_is_rejected() {
        let limiter: Limiter<i32> = Limiter::new(Options::new()).unwrap();
        let result = limiter.submit_with(|| async { Ok(0) }, 5, 0).await;
        assert!(matches!(
            result,
            Err(ThrottleError::InvalidWeight { weight: 0 })
        ));

        let result = limiter.submit_with(|| async { Ok(0) }, 5, -1).await;
        assert!(matches!(
            result,
            Err(ThrottleError::InvalidWeight { weight: -1 })
        ));
        limiter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn submit_with_weight_beyond_u32_range_is_rejected_not_truncated() {
        let limiter: Limiter<i32> = Limiter::new(Options::new()).unwrap();

        let overflowing = u32::MAX as i64 + 1;
        let result = limiter.submit_with(|| async { Ok(0) }, 5, overflowing).await;
        assert!(matches!(
            result,
            Err(ThrottleError::InvalidWeight { weight }) if weight == overflowing
        ));
        limiter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn concurrency_cap_bounds_inflight_work() {
        let limiter: Limiter<usize> =
            Limiter::new(Options::new().with_max_concurrent(2)).unwrap();

        let inflight = Arc::new(AtomicUsize::new(0));
        let max_observed = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..5 {
            let limiter = limiter.clone();
            let inflight = inflight.clone();
            let max_observed = max_observed.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .submit(move || async move {
                        let now = inflight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_observed.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(80)).await;
                        inflight.fetch_sub(1, Ordering::SeqCst);
                        Ok(i)
                    })
                    .await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(results.len(), 5);
        assert!(max_observed.load(Ordering::SeqCst) <= 2);
        limiter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn min_time_spaces_out_grants() {
        let limiter: Limiter<()> =
            Limiter::new(Options::new().with_min_time(Duration::from_millis(80))).unwrap();

        let start = Instant::now();
        let mut timestamps = Vec::new();
        for _ in 0..3 {
            limiter.submit(|| async { Ok(()) }).await.unwrap();
            timestamps.push(start.elapsed());
        }

        assert!(timestamps[1] - timestamps[0] >= Duration::from_millis(70));
        assert!(timestamps[2] - timestamps[1] >= Duration::from_millis(70));
        limiter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn higher_priority_completes_before_lower_when_serialized() {
        let limiter: Limiter<i32> = Limiter::new(Options::new().with_max_concurrent(1)).unwrap();

        // Hold the single concurrency slot so the next three jobs queue up
        // together and we can observe dispatch order.
        let gate = Arc::new(tokio::sync::Notify::new());
        let held = {
            let limiter = limiter.clone();
            let gate = gate.clone();
            tokio::spawn(async move {
                limiter
                    .submit(move || async move {
                        gate.notified().await;
                        Ok(-1)
                    })
                    .await
            })
        };

        // Give the holder time to be admitted.
        tokio::time::sleep(Duration::from_millis(30)).await;

        let order = Arc::new(StdMutex::new(Vec::new()));
        let mut handles = Vec::new();
        for (priority, label) in [(1, 1), (10, 10), (5, 5)] {
            let limiter = limiter.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .submit_with(
                        move || async move {
                            order.lock().unwrap().push(label);
                            Ok(label)
                        },
                        priority,
                        1,
                    )
                    .await
            }));
        }

        // Let all three queue up before releasing the held job.
        tokio::time::sleep(Duration::from_millis(30)).await;
        gate.notify_one();
        held.await.unwrap().unwrap();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![10, 5, 1]);
        limiter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_rejects_subsequent_submissions() {
        let limiter: Limiter<i32> = Limiter::new(Options::new()).unwrap();
        limiter.stop().await.unwrap();

        let result = limiter.submit(|| async { Ok(1) }).await;
        assert!(matches!(result, Err(ThrottleError::StoreClosed)));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let limiter: Limiter<i32> = Limiter::new(Options::new()).unwrap();
        limiter.stop().await.unwrap();
        limiter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_drains_queued_jobs_with_store_closed() {
        let limiter: Limiter<i32> = Limiter::new(Options::new().with_max_concurrent(1)).unwrap();

        let gate = Arc::new(tokio::sync::Notify::new());
        let holder = {
            let limiter = limiter.clone();
            let gate = gate.clone();
            tokio::spawn(async move {
                limiter
                    .submit(move || async move {
                        gate.notified().await;
                        Ok(0)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        let queued = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.submit(|| async { Ok(1) }).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        limiter.stop().await.unwrap();
        gate.notify_one();

        assert!(holder.await.unwrap().is_ok());
        assert!(matches!(
            queued.await.unwrap(),
            Err(ThrottleError::StoreClosed)
        ));
    }
}
