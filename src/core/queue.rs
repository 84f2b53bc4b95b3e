//! Bounded priority queue for a single domain.
//!
//! Each domain owns exactly one queue; it is the single source of truth
//! for pending work in that domain. Ordering is strict: higher priority
//! bands drain first, and within a band tasks leave in arrival order.
//! Capacity is enforced fail-fast at enqueue time, never by dropping.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use tokio::sync::{watch, Mutex, Notify};

use crate::core::task::{Domain, Task};
use crate::error::{Error, Result};

/// Default queue depth when none is configured.
pub const DEFAULT_MAX_DEPTH: usize = 100;

/// Heap entry pairing a task with its arrival sequence number.
///
/// Ordering: higher priority wins; within a band, the lower sequence
/// number (earlier arrival) wins.
#[derive(Debug)]
struct QueueEntry {
    task: Task,
    seq: u64,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.task.priority == other.task.priority && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.task.priority.cmp(&other.task.priority) {
            // Inverted sequence comparison: earlier arrivals sort higher.
            Ordering::Equal => other.seq.cmp(&self.seq),
            ordering => ordering,
        }
    }
}

/// Bounded, priority-ordered task queue for one domain.
///
/// Shared behind an `Arc`; all methods take `&self`. Consumers block on
/// [`DomainQueue::dequeue_wait`] rather than polling, and observers can
/// follow depth changes through [`DomainQueue::depth_watch`].
#[derive(Debug)]
pub struct DomainQueue {
    domain: Domain,
    max_depth: usize,
    heap: Mutex<BinaryHeap<QueueEntry>>,
    seq: AtomicU64,
    notify: Notify,
    depth_tx: watch::Sender<usize>,
}

impl DomainQueue {
    /// Create a queue for `domain` holding at most `max_depth` tasks.
    pub fn new(domain: Domain, max_depth: usize) -> Self {
        let (depth_tx, _) = watch::channel(0);
        Self {
            domain,
            max_depth,
            heap: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            notify: Notify::new(),
            depth_tx,
        }
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Add a task to the queue.
    ///
    /// Fails fast with [`Error::QueueFull`] when the queue is at capacity;
    /// the queue is left untouched in that case. On success the new depth
    /// is published and one waiting consumer is woken.
    pub async fn enqueue(&self, task: Task) -> Result<()> {
        let mut heap = self.heap.lock().await;
        if heap.len() >= self.max_depth {
            return Err(Error::QueueFull {
                domain: self.domain,
                max_depth: self.max_depth,
            });
        }

        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        heap.push(QueueEntry { task, seq });
        let depth = heap.len();
        drop(heap);

        self.depth_tx.send_replace(depth);
        self.notify.notify_one();
        Ok(())
    }

    /// Remove and return the highest-priority, oldest-in-band task.
    pub async fn dequeue(&self) -> Option<Task> {
        let mut heap = self.heap.lock().await;
        let entry = heap.pop()?;
        let depth = heap.len();
        drop(heap);

        self.depth_tx.send_replace(depth);
        Some(entry.task)
    }

    /// Wait up to `timeout` for a task, returning `None` on expiry.
    ///
    /// Wakeups are edge-triggered; the heap is re-checked after every
    /// wakeup and once more after expiry, so a task enqueued concurrently
    /// with the wait is never missed.
    pub async fn dequeue_wait(&self, timeout: Duration) -> Option<Task> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(task) = self.dequeue().await {
                return Some(task);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                // Deadline hit while parked; a final check covers an
                // enqueue that raced the expiry.
                return self.dequeue().await;
            }
        }
    }

    /// Current number of queued tasks.
    pub async fn len(&self) -> usize {
        self.heap.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.heap.lock().await.is_empty()
    }

    /// Receiver that always carries the latest queue depth.
    pub fn depth_watch(&self) -> watch::Receiver<usize> {
        self.depth_tx.subscribe()
    }
}
