//! The bounded, growable FIFO between the reader and the processor.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::metrics;
use crate::slot::SlotObservation;

struct Shared {
    records: VecDeque<SlotObservation>,
    /// Set by [`SlotQueue::signal`] at shutdown; once up, pops never
    /// block again. Keeping it inside the mutex closes the window where
    /// a wake-up delivered between a consumer's empty-check and its park
    /// would otherwise be lost.
    signalled: bool,
}

/// Single-producer/single-consumer queue of slot observations.
///
/// Strictly FIFO and lossless: when a push would exhaust the buffer the
/// capacity is doubled under the pop mutex, so an in-flight pop never
/// observes torn storage. [`SlotQueue::pop_many`] blocks until at least
/// one record is present; it returns an empty batch only after
/// [`SlotQueue::signal`], which is how shutdown unblocks the consumer.
pub struct SlotQueue {
    inner: Mutex<Shared>,
    nonempty: Condvar,
}

impl SlotQueue {
    /// Default initial capacity.
    pub const DEFAULT_CAPACITY: usize = 256;

    /// Create a queue with the given initial capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Shared {
                records: VecDeque::with_capacity(capacity.max(1)),
                signalled: false,
            }),
            nonempty: Condvar::new(),
        }
    }

    /// Append all of `records`, growing the buffer first if needed.
    pub fn push_many(&self, records: &[SlotObservation]) {
        if records.is_empty() {
            return;
        }

        {
            let mut inner = self.inner.lock();
            let queued = inner.records.len();
            if queued + records.len() > inner.records.capacity() {
                let mut target = inner.records.capacity().max(1) * 2;
                while target < queued + records.len() {
                    target *= 2;
                }
                inner.records.reserve_exact(target - queued);
                metrics::queue_grown();
            }
            inner.records.extend(records.iter().copied());
        }

        self.nonempty.notify_one();
    }

    /// Block until at least one record is available, then return up to
    /// `max` records in FIFO order.
    ///
    /// Returns an empty batch only once [`SlotQueue::signal`] has been
    /// called and the queue is drained.
    pub fn pop_many(&self, max: usize) -> Vec<SlotObservation> {
        let mut inner = self.inner.lock();
        while inner.records.is_empty() && !inner.signalled {
            self.nonempty.wait(&mut inner);
        }

        let count = max.min(inner.records.len());
        inner.records.drain(..count).collect()
    }

    /// Return up to `max` records without blocking. Used by the shutdown
    /// drain.
    pub fn pop_ready(&self, max: usize) -> Vec<SlotObservation> {
        let mut inner = self.inner.lock();
        let count = max.min(inner.records.len());
        inner.records.drain(..count).collect()
    }

    /// Release any consumer blocked in [`SlotQueue::pop_many`], now and
    /// for good. Called once shutdown is underway.
    pub fn signal(&self) {
        self.inner.lock().signalled = true;
        self.nonempty.notify_all();
    }

    /// Number of queued records.
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().records.is_empty()
    }

    /// Current capacity of the backing buffer.
    pub fn capacity(&self) -> usize {
        self.inner.lock().records.capacity()
    }
}

impl Default for SlotQueue {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
