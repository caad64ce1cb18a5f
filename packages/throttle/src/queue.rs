//! The priority queue the dispatcher drains.

use std::collections::BinaryHeap;

use crate::job::Job;

/// A max-heap over [`Job`]s keyed by priority (ties broken by arrival
/// order, see `Job`'s `Ord` impl).
///
/// Not concurrency-safe on its own; the `Limiter` serializes access under
/// its own mutex and never holds that lock across a backend call or across
/// job execution.
pub(crate) struct PriorityQueue<T> {
    heap: BinaryHeap<Job<T>>,
}

impl<T> PriorityQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    pub(crate) fn push(&mut self, job: Job<T>) {
        self.heap.push(job);
    }

    pub(crate) fn pop(&mut self) -> Option<Job<T>> {
        self.heap.pop()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ThrottleError;
    use tokio::sync::oneshot;

    fn push_with_priority(queue: &mut PriorityQueue<i32>, priority: i32, sequence: u64) {
        let (tx, _rx) = oneshot::channel::<Result<i32, ThrottleError>>();
        queue.push(Job::new(
            Box::new(|| Box::pin(async { Ok(0) })),
            priority,
            1,
            sequence,
            tx,
        ));
    }

    #[test]
    fn pops_highest_priority_first() {
        let mut queue = PriorityQueue::new();
        push_with_priority(&mut queue, 1, 0);
        push_with_priority(&mut queue, 10, 1);
        push_with_priority(&mut queue, 5, 2);

        assert_eq!(queue.pop().unwrap().priority, 10);
        assert_eq!(queue.pop().unwrap().priority, 5);
        assert_eq!(queue.pop().unwrap().priority, 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn equal_priority_is_fifo() {
        let mut queue = PriorityQueue::new();
        // Pushed out of arrival order to prove the heap sorts on sequence,
        // not on push order.
        push_with_priority(&mut queue, 5, 2);
        push_with_priority(&mut queue, 5, 0);
        push_with_priority(&mut queue, 5, 1);

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop().unwrap().sequence(), 0);
        assert_eq!(queue.pop().unwrap().sequence(), 1);
        assert_eq!(queue.pop().unwrap().sequence(), 2);
    }

    #[test]
    fn empty_pop_returns_none() {
        let mut queue: PriorityQueue<i32> = PriorityQueue::new();
        assert!(queue.pop().is_none());
    }
}
