//! Bounded FIFO shared between producers and the cadence consumer.
//!
//! Overflow overwrites the oldest slot. Every cursor move and every counter
//! update happens inside one `parking_lot::Mutex` section, so a metrics read
//! never observes a half-applied enqueue.

use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, RingBuffer as _};
use ringbuf::HeapRb;
use serde::Serialize;
use std::time::Instant;

use super::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct RingMetrics {
    pub capacity: usize,
    pub current_count: usize,
    pub total_enqueued: u64,
    pub total_dequeued: u64,
    pub dropped_count: u64,
    /// `current_count / capacity * 100`.
    pub utilization_percent: f64,
    /// Fraction of enqueued items lost to overwrite, 0.0 - 1.0.
    pub drop_rate: f64,
    /// Dequeued items per second since construction.
    pub throughput: f64,
}

struct Slots<T> {
    rb: HeapRb<T>,
    total_enqueued: u64,
    total_dequeued: u64,
    dropped: u64,
}

pub struct RingBuffer<T> {
    slots: Mutex<Slots<T>>,
    capacity: usize,
    created_at: Instant,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        Self::with_origin(capacity, Instant::now())
    }

    /// `origin` is the instant throughput is measured from.
    pub fn with_origin(capacity: usize, origin: Instant) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(Self {
            slots: Mutex::new(Slots {
                rb: HeapRb::new(capacity),
                total_enqueued: 0,
                total_dequeued: 0,
                dropped: 0,
            }),
            capacity,
            created_at: origin,
        })
    }

    /// Never fails. Returns `true` when the oldest item was evicted to make room.
    pub fn enqueue(&self, item: T) -> bool {
        let mut slots = self.slots.lock();
        slots.total_enqueued += 1;
        let evicted = slots.rb.push_overwrite(item).is_some();
        if evicted {
            slots.dropped += 1;
        }
        evicted
    }

    pub fn dequeue(&self) -> Option<T> {
        let mut slots = self.slots.lock();
        let item = slots.rb.try_pop();
        if item.is_some() {
            slots.total_dequeued += 1;
        }
        item
    }

    /// Removes up to `max_count` of the oldest items, in order. Never blocks
    /// waiting for more.
    pub fn dequeue_batch(&self, max_count: usize) -> Vec<T> {
        let mut slots = self.slots.lock();
        let take = max_count.min(slots.rb.occupied_len());
        let mut out = Vec::with_capacity(take);
        while out.len() < take {
            match slots.rb.try_pop() {
                Some(item) => out.push(item),
                None => break,
            }
        }
        slots.total_dequeued += out.len() as u64;
        out
    }

    /// Drops everything buffered. Cumulative counters are kept.
    pub fn clear(&self) {
        let mut slots = self.slots.lock();
        while slots.rb.try_pop().is_some() {}
    }

    pub fn len(&self) -> usize {
        self.slots.lock().rb.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn metrics(&self) -> RingMetrics {
        self.metrics_at(Instant::now())
    }

    pub fn metrics_at(&self, now: Instant) -> RingMetrics {
        let slots = self.slots.lock();
        let current_count = slots.rb.occupied_len();
        let elapsed = now.saturating_duration_since(self.created_at).as_secs_f64();

        RingMetrics {
            capacity: self.capacity,
            current_count,
            total_enqueued: slots.total_enqueued,
            total_dequeued: slots.total_dequeued,
            dropped_count: slots.dropped,
            utilization_percent: current_count as f64 / self.capacity as f64 * 100.0,
            drop_rate: if slots.total_enqueued > 0 {
                slots.dropped as f64 / slots.total_enqueued as f64
            } else {
                0.0
            },
            throughput: if elapsed > 0.0 {
                slots.total_dequeued as f64 / elapsed
            } else {
                0.0
            },
        }
    }
}

impl<T> std::fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
