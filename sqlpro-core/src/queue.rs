//! Blocking FIFO task queue with shutdown.
//!
//! Producers [`push`](TaskQueue::push) without blocking; consumers
//! [`pop`](TaskQueue::pop) and sleep on a condition variable until an item
//! arrives or the queue is cancelled. Once cancelled, `pop` returns `None`
//! immediately and forever, and `push` hands items back to the caller.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

/// A thread-safe FIFO queue with blocking pop.
pub struct TaskQueue<T> {
    queue: Mutex<VecDeque<T>>,
    available: Condvar,
    shut_down: AtomicBool,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Append an item and wake one waiting consumer.
    ///
    /// After [`cancel`](Self::cancel) the item is returned unchanged.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut queue = self.queue.lock();
        if self.shut_down.load(Ordering::Acquire) {
            return Err(item);
        }
        queue.push_back(item);
        trace!(pending = queue.len(), "Task queued");
        drop(queue);

        self.available.notify_one();
        Ok(())
    }

    /// Remove the oldest item, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue has been cancelled.
    pub fn pop(&self) -> Option<T> {
        let mut queue = self.queue.lock();
        loop {
            if self.shut_down.load(Ordering::Acquire) {
                return None;
            }
            if let Some(item) = queue.pop_front() {
                return Some(item);
            }
            self.available.wait(&mut queue);
        }
    }

    /// Remove the oldest item without blocking.
    pub fn try_pop(&self) -> Option<T> {
        let mut queue = self.queue.lock();
        if self.shut_down.load(Ordering::Acquire) {
            return None;
        }
        queue.pop_front()
    }

    /// Number of pending items.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Check if no items are pending.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Check if the queue has been cancelled.
    pub fn is_shutdown(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Drop all pending items, shut the queue down and wake every consumer.
    ///
    /// Returns the number of discarded items. Calling it again is a no-op.
    pub fn cancel(&self) -> usize {
        self.cancel_with(drop)
    }

    /// Like [`cancel`](Self::cancel), handing every pending item to `release`.
    pub fn cancel_with<F>(&self, mut release: F) -> usize
    where
        F: FnMut(T),
    {
        let drained: Vec<T> = {
            let mut queue = self.queue.lock();
            self.shut_down.store(true, Ordering::Release);
            queue.drain(..).collect()
        };
        self.available.notify_all();

        let count = drained.len();
        // Released outside the lock: dropping an item may touch the queue.
        for item in drained {
            release(item);
        }

        if count > 0 {
            debug!(discarded = count, "Task queue cancelled");
        }
        count
    }
}

impl<T> std::fmt::Debug for TaskQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("pending", &self.len())
            .field("shut_down", &self.is_shutdown())
            .finish()
    }
}
