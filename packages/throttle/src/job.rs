//! The work unit submitted to a [`Limiter`](crate::Limiter).

use std::cmp::Ordering;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::ThrottleError;

pub(crate) type BoxedWork<T> =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send>> + Send>;

/// A submitted work unit, owned exclusively by the limiter from enqueue
/// until delivery.
///
/// Delivery is exactly-once, carried over a single
/// `oneshot::Sender<Result<T, ThrottleError>>` rather than a pair of
/// separate success/error channels.
pub(crate) struct Job<T> {
    pub(crate) id: Uuid,
    pub(crate) priority: i32,
    pub(crate) weight: u32,
    sequence: u64,
    work: Option<BoxedWork<T>>,
    tx: Option<oneshot::Sender<Result<T, ThrottleError>>>,
}

impl<T> Job<T> {
    pub(crate) fn new(
        work: BoxedWork<T>,
        priority: i32,
        weight: u32,
        sequence: u64,
        tx: oneshot::Sender<Result<T, ThrottleError>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            priority,
            weight,
            sequence,
            work: Some(work),
            tx: Some(tx),
        }
    }

    /// Take the work closure, leaving the job ready for delivery once the
    /// work completes. Panics if called twice; the dispatcher only ever
    /// does this once, immediately before spawning the job's worker.
    pub(crate) fn take_work(&mut self) -> BoxedWork<T> {
        self.work.take().expect("job work taken more than once")
    }

    /// The arrival-order tiebreaker, for tests asserting pop order.
    #[cfg(test)]
    pub(crate) fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Deliver a result to the submitter. Consumes the job; a job that has
    /// been delivered is done.
    pub(crate) fn deliver(mut self, result: Result<T, ThrottleError>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(result);
        }
    }

    /// Deliver an error to the submitter without ever executing the work.
    pub(crate) fn fail(self, err: ThrottleError) {
        self.deliver(Err(err));
    }
}

impl<T> PartialEq for Job<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl<T> Eq for Job<T> {}

impl<T> PartialOrd for Job<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Job<T> {
    /// Strict descending priority order; ties broken by arrival order (a
    /// smaller sequence number sorts as "greater" so it pops first out of
    /// the max-heap, giving earlier-arrival jobs precedence on a tie).
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}
