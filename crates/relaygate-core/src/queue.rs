//! Blocking work queue drained by one plugin worker thread

use crate::item::WorkItem;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// What a full queue does with a new item
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Hand the item back to the caller
    #[default]
    Reject,
    /// Wait for the consumer to make room
    Block,
}

/// Capacity policy of a queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueuePolicy {
    /// Maximum number of queued items, 0 means unbounded
    pub max_depth: usize,
    /// Behaviour when `max_depth` is reached
    pub overflow: OverflowPolicy,
}

impl QueuePolicy {
    /// No depth limit
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Limit to `max_depth` items
    pub fn bounded(max_depth: usize, overflow: OverflowPolicy) -> Self {
        Self {
            max_depth,
            overflow,
        }
    }

    /// Whether a depth limit applies
    pub fn is_bounded(&self) -> bool {
        self.max_depth > 0
    }
}

/// Why an enqueue was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The queue was closed
    Closed,
    /// The queue was at `max_depth` under [`OverflowPolicy::Reject`]
    Full,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Closed => write!(f, "queue closed"),
            RejectReason::Full => write!(f, "queue full"),
        }
    }
}

/// A refused item, handed back to the caller
#[derive(Debug)]
pub struct Rejected {
    /// The item that was not queued
    pub item: WorkItem,
    /// Why it was refused
    pub reason: RejectReason,
}

/// Outcome of a dequeue
#[derive(Debug)]
pub enum Dequeued {
    /// An item was available
    Item(WorkItem),
    /// The deadline passed with nothing queued
    TimedOut,
    /// The queue is closed and empty
    Closed,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<WorkItem>,
    closed: bool,
}

/// Multi-producer, single-consumer FIFO with optional timed waits
#[derive(Debug)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    len: AtomicUsize,
    policy: QueuePolicy,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(QueuePolicy::default())
    }
}

impl WorkQueue {
    /// Create an empty queue
    pub fn new(policy: QueuePolicy) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            len: AtomicUsize::new(0),
            policy,
        }
    }

    /// Capacity policy
    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    /// Append an item and wake one waiting consumer
    pub fn enqueue(&self, item: WorkItem) -> Result<(), Rejected> {
        let mut state = self.state.lock();

        if self.policy.is_bounded() {
            while !state.closed && state.items.len() >= self.policy.max_depth {
                match self.policy.overflow {
                    OverflowPolicy::Reject => {
                        return Err(Rejected {
                            item,
                            reason: RejectReason::Full,
                        })
                    }
                    OverflowPolicy::Block => self.not_full.wait(&mut state),
                }
            }
        }

        if state.closed {
            return Err(Rejected {
                item,
                reason: RejectReason::Closed,
            });
        }

        state.items.push_back(item);
        self.len.store(state.items.len(), Ordering::Relaxed);
        drop(state);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Take the oldest item, waiting up to `timeout`
    ///
    /// `None` or a zero duration waits without a deadline. Queued items are
    /// still delivered after [`close`](Self::close); `Closed` is returned
    /// once nothing is left.
    pub fn dequeue(&self, timeout: Option<Duration>) -> Dequeued {
        let deadline = timeout
            .filter(|t| !t.is_zero())
            .map(|t| Instant::now() + t);

        let mut state = self.state.lock();
        loop {
            if let Some(item) = self.pop_locked(&mut state) {
                drop(state);
                self.not_full.notify_one();
                return Dequeued::Item(item);
            }

            if state.closed {
                return Dequeued::Closed;
            }

            match deadline {
                None => self.not_empty.wait(&mut state),
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Dequeued::TimedOut;
                    }
                    self.not_empty.wait_until(&mut state, deadline);
                }
            }
        }
    }

    /// Take the oldest item without waiting
    pub fn try_dequeue(&self) -> Option<WorkItem> {
        let item = {
            let mut state = self.state.lock();
            self.pop_locked(&mut state)
        };
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    fn pop_locked(&self, state: &mut QueueState) -> Option<WorkItem> {
        let item = state.items.pop_front();
        if item.is_some() {
            self.len.store(state.items.len(), Ordering::Relaxed);
        }
        item
    }

    /// Current depth, advisory only
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Whether the queue currently holds nothing
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuse further items and wake every waiter
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Remove and return everything still queued
    pub fn drain(&self) -> Vec<WorkItem> {
        let items: Vec<WorkItem> = {
            let mut state = self.state.lock();
            let items = state.items.drain(..).collect();
            self.len.store(0, Ordering::Relaxed);
            items
        };
        self.not_full.notify_all();
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;
    use std::sync::Arc;
    use std::thread;

    fn packet_item(byte: u8) -> WorkItem {
        WorkItem::Packet(Packet::new(vec![byte]))
    }

    fn first_byte(d: Dequeued) -> u8 {
        match d {
            Dequeued::Item(WorkItem::Packet(p)) => p.data()[0],
            other => panic!("expected packet, got {other:?}"),
        }
    }

    #[test]
    fn test_fifo_order() {
        let q = WorkQueue::default();
        for b in 0..5u8 {
            q.enqueue(packet_item(b)).unwrap();
        }
        assert_eq!(q.len(), 5);
        for b in 0..5u8 {
            assert_eq!(first_byte(q.dequeue(None)), b);
        }
        assert!(q.is_empty());
    }

    #[test]
    fn test_timed_dequeue_on_empty_queue() {
        let q = WorkQueue::default();
        let timeout = Duration::from_millis(50);
        let start = Instant::now();
        assert!(matches!(q.dequeue(Some(timeout)), Dequeued::TimedOut));
        let elapsed = start.elapsed();
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_secs(1));
    }

    #[test]
    fn test_item_enqueued_before_deadline_is_delivered() {
        let q = Arc::new(WorkQueue::default());
        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                q.enqueue(packet_item(9)).unwrap();
            })
        };
        let got = q.dequeue(Some(Duration::from_secs(5)));
        assert_eq!(first_byte(got), 9);
        producer.join().unwrap();
    }

    #[test]
    fn test_close_wakes_blocked_consumer() {
        let q = Arc::new(WorkQueue::default());
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.dequeue(None))
        };
        thread::sleep(Duration::from_millis(20));
        q.close();
        assert!(matches!(consumer.join().unwrap(), Dequeued::Closed));
    }

    #[test]
    fn test_closed_queue_rejects_and_still_delivers() {
        let q = WorkQueue::default();
        q.enqueue(packet_item(1)).unwrap();
        q.close();

        let rejected = q.enqueue(packet_item(2)).unwrap_err();
        assert_eq!(rejected.reason, RejectReason::Closed);
        assert!(rejected.item.as_packet().is_some());

        assert_eq!(first_byte(q.dequeue(None)), 1);
        assert!(matches!(q.dequeue(None), Dequeued::Closed));
    }

    #[test]
    fn test_reject_policy_when_full() {
        let q = WorkQueue::new(QueuePolicy::bounded(2, OverflowPolicy::Reject));
        q.enqueue(packet_item(1)).unwrap();
        q.enqueue(packet_item(2)).unwrap();
        let rejected = q.enqueue(packet_item(3)).unwrap_err();
        assert_eq!(rejected.reason, RejectReason::Full);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_block_policy_waits_for_room() {
        let q = Arc::new(WorkQueue::new(QueuePolicy::bounded(1, OverflowPolicy::Block)));
        q.enqueue(packet_item(1)).unwrap();

        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.enqueue(packet_item(2)))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(q.len(), 1);

        assert_eq!(first_byte(q.dequeue(None)), 1);
        producer.join().unwrap().unwrap();
        assert_eq!(first_byte(q.dequeue(None)), 2);
    }

    #[test]
    fn test_block_policy_rejects_on_close() {
        let q = Arc::new(WorkQueue::new(QueuePolicy::bounded(1, OverflowPolicy::Block)));
        q.enqueue(packet_item(1)).unwrap();

        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.enqueue(packet_item(2)))
        };
        thread::sleep(Duration::from_millis(20));
        q.close();
        let rejected = producer.join().unwrap().unwrap_err();
        assert_eq!(rejected.reason, RejectReason::Closed);
    }

    #[test]
    fn test_try_dequeue_and_drain() {
        let q = WorkQueue::default();
        assert!(q.try_dequeue().is_none());
        for b in 0..3u8 {
            q.enqueue(packet_item(b)).unwrap();
        }
        assert!(q.try_dequeue().is_some());
        assert_eq!(q.drain().len(), 2);
        assert!(q.is_empty());
    }
}
