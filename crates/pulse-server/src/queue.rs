//! Bounded outbound queue with an explicit overflow policy.
//!
//! Single consumer (the connection's write task), many producers. Pushing
//! never blocks; a full queue is resolved by [`OverflowPolicy`].

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

pub use pulse_settings::OverflowPolicy;

/// Result of a non-blocking push.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// Accepted without loss.
    Queued,
    /// Accepted after evicting the oldest queued item.
    DroppedOldest,
    /// Rejected: the queue was full.
    DroppedNewest,
    /// Rejected under [`OverflowPolicy::Disconnect`]; the owner should close.
    Full,
    /// Rejected: the queue is closed.
    Closed,
}

impl PushOutcome {
    /// Whether some item was lost.
    pub fn dropped(self) -> bool {
        matches!(self, Self::DroppedOldest | Self::DroppedNewest)
    }
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded FIFO shared between producers and one async consumer.
pub struct OutboundQueue<T> {
    state: Mutex<State<T>>,
    notify: Notify,
    capacity: usize,
    policy: OverflowPolicy,
}

impl<T> OutboundQueue<T> {
    /// Create a queue. A zero capacity is raised to one.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            policy,
        }
    }

    /// Enqueue without blocking.
    pub fn push(&self, item: T) -> PushOutcome {
        let outcome = {
            let mut state = self.state.lock();
            if state.closed {
                return PushOutcome::Closed;
            }
            if state.items.len() < self.capacity {
                state.items.push_back(item);
                PushOutcome::Queued
            } else {
                match self.policy {
                    OverflowPolicy::DropOldest => {
                        let _ = state.items.pop_front();
                        state.items.push_back(item);
                        PushOutcome::DroppedOldest
                    }
                    OverflowPolicy::DropNewest => return PushOutcome::DroppedNewest,
                    OverflowPolicy::Disconnect => return PushOutcome::Full,
                }
            }
        };
        self.notify.notify_one();
        outcome
    }

    /// Wait for the next item. `None` once the queue is closed.
    ///
    /// Items still queued at close are discarded.
    pub async fn pop(&self) -> Option<T> {
        loop {
            {
                let mut state = self.state.lock();
                if state.closed {
                    return None;
                }
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Take the next item if one is ready.
    pub fn try_pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        state.items.pop_front()
    }

    /// Close the queue, discarding pending items and waking the consumer.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            state.closed = true;
            state.items.clear();
        }
        self.notify.notify_one();
    }

    /// Whether [`OutboundQueue::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Items currently queued.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum items held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Overflow policy.
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn fifo_within_capacity() {
        let q = OutboundQueue::new(4, OverflowPolicy::DropOldest);
        for i in 0..3 {
            assert_eq!(q.push(i), PushOutcome::Queued);
        }
        assert_eq!(q.try_pop(), Some(0));
        assert_eq!(q.try_pop(), Some(1));
        assert_eq!(q.try_pop(), Some(2));
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn drop_oldest_keeps_newest() {
        let q = OutboundQueue::new(100, OverflowPolicy::DropOldest);
        let dropped = (0..200).filter(|i| q.push(*i).dropped()).count();
        assert_eq!(dropped, 100);
        assert_eq!(q.len(), 100);
        let drained: Vec<_> = std::iter::from_fn(|| q.try_pop()).collect();
        assert_eq!(drained, (100..200).collect::<Vec<_>>());
    }

    #[test]
    fn drop_newest_rejects_incoming() {
        let q = OutboundQueue::new(2, OverflowPolicy::DropNewest);
        assert_eq!(q.push("a"), PushOutcome::Queued);
        assert_eq!(q.push("b"), PushOutcome::Queued);
        assert_eq!(q.push("c"), PushOutcome::DroppedNewest);
        assert_eq!(q.try_pop(), Some("a"));
        assert_eq!(q.try_pop(), Some("b"));
    }

    #[test]
    fn disconnect_policy_reports_full() {
        let q = OutboundQueue::new(1, OverflowPolicy::Disconnect);
        assert_eq!(q.push(1), PushOutcome::Queued);
        assert_eq!(q.push(2), PushOutcome::Full);
        assert!(!PushOutcome::Full.dropped());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn closed_queue_rejects_and_discards() {
        let q = OutboundQueue::new(4, OverflowPolicy::DropOldest);
        let _ = q.push(1);
        q.close();
        assert!(q.is_closed());
        assert!(q.is_empty());
        assert_eq!(q.push(2), PushOutcome::Closed);
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn zero_capacity_is_raised() {
        let q: OutboundQueue<u8> = OutboundQueue::new(0, OverflowPolicy::DropNewest);
        assert_eq!(q.capacity(), 1);
    }

    #[tokio::test]
    async fn pop_waits_for_push() {
        let q = Arc::new(OutboundQueue::new(8, OverflowPolicy::DropOldest));
        let consumer = {
            let q = q.clone();
            tokio::spawn(async move { q.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let _ = q.push(42);
        assert_eq!(consumer.await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn close_wakes_waiting_consumer() {
        let q: Arc<OutboundQueue<u8>> = Arc::new(OutboundQueue::new(8, OverflowPolicy::DropOldest));
        let consumer = {
            let q = q.clone();
            tokio::spawn(async move { q.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        q.close();
        assert_eq!(consumer.await.unwrap(), None);
    }
}
