//! Time-sliced batching with per-window dedup and same-origin merge.
//!
//! Emission triggers:
//! - `Size`: pending reached `max_batch_size`. Emits exactly that many.
//! - `Interval`: `interval` has elapsed since the previous emission. Emits
//!   everything pending (below the size cap by construction).
//! - `Flush`: forced. Emits everything pending regardless of the cap.
//!
//! Size and interval triggers are evaluated in `poll`, not inside
//! `add_message`, so a producer never pays for an emission.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::debug;

use super::config::BatcherConfig;
use super::error::ConfigError;
use super::event::{Batch, BatchTrigger, Message};
use super::ring::RingBuffer;
use super::time::Clock;

/// Slots per subscriber before a slow reader starts seeing `Lagged`.
pub const BATCH_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct BatcherMetrics {
    pub total_received: u64,
    /// Inbound messages that survived dedup and were emitted.
    pub total_processed: u64,
    pub duplicates_skipped: u64,
    /// Inbound messages whose id was already pending, counted whether or
    /// not dedup is enabled.
    pub repeated_ids: u64,
    pub batches_processed: u64,
    /// Emitted (post-merge) messages per batch.
    pub average_batch_size: f64,
    /// Processed inbound messages per second.
    pub current_throughput: f64,
    /// Upstream ring utilisation when a source is attached, otherwise
    /// pending relative to the size cap.
    pub buffer_utilization: f64,
    pub drop_rate: f64,
    pub deduplication_rate: f64,
    /// `repeated_ids / total_received`.
    pub repeat_rate: f64,
    /// Emitted (post-merge) messages per second.
    pub effective_messages_per_second: f64,
    pub pending: usize,
}

pub struct Batcher {
    config: BatcherConfig,
    clock: Arc<dyn Clock>,
    pending: Vec<Message>,
    pending_ids: HashSet<String>,
    last_emit: Instant,
    started_at: Instant,
    seq: u64,
    tx: broadcast::Sender<Arc<Batch>>,
    source: Option<Arc<RingBuffer<Message>>>,

    total_received: u64,
    total_processed: u64,
    duplicates_skipped: u64,
    repeated_ids: u64,
    batches_processed: u64,
    messages_emitted: u64,
}

impl Batcher {
    pub fn new(config: BatcherConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;
        let now = clock.now();
        let (tx, _) = broadcast::channel(BATCH_CHANNEL_CAPACITY);

        Ok(Self {
            pending: Vec::with_capacity(config.max_batch_size),
            config,
            clock,
            pending_ids: HashSet::new(),
            last_emit: now,
            started_at: now,
            seq: 0,
            tx,
            source: None,
            total_received: 0,
            total_processed: 0,
            duplicates_skipped: 0,
            repeated_ids: 0,
            batches_processed: 0,
            messages_emitted: 0,
        })
    }

    /// Attach the ring this batcher is fed from, for utilisation and drop
    /// reporting.
    pub fn with_source(mut self, source: Arc<RingBuffer<Message>>) -> Self {
        self.source = Some(source);
        self
    }

    /// Push-style batch stream. Each subscriber sees every batch emitted
    /// after it subscribed, in order.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Batch>> {
        self.tx.subscribe()
    }

    /// Returns `true` when a size or interval trigger is armed and the next
    /// `poll` will emit.
    ///
    /// Never emits by itself. The owner must call `poll` (or `flush`)
    /// regularly, otherwise `pending` grows without bound.
    pub fn add_message(&mut self, msg: Message) -> bool {
        self.total_received += 1;

        if !self.pending_ids.insert(msg.id.clone()) {
            self.repeated_ids += 1;
            if self.config.dedup {
                self.duplicates_skipped += 1;
                return self.should_emit();
            }
        }

        self.pending.push(msg);
        self.should_emit()
    }

    pub fn add_messages(&mut self, msgs: impl IntoIterator<Item = Message>) -> bool {
        let mut armed = false;
        for msg in msgs {
            armed = self.add_message(msg);
        }
        armed
    }

    pub fn should_emit(&self) -> bool {
        self.pending.len() >= self.config.max_batch_size
            || (!self.pending.is_empty() && self.clock.now().saturating_duration_since(self.last_emit) >= self.config.interval())
    }

    /// Evaluate triggers and emit. One batch per size trigger, then at most
    /// one interval batch for the remainder.
    pub fn poll(&mut self) -> Vec<Arc<Batch>> {
        let mut emitted = Vec::new();

        while self.pending.len() >= self.config.max_batch_size {
            let rest = self.pending.split_off(self.config.max_batch_size);
            let head = std::mem::replace(&mut self.pending, rest);
            emitted.extend(self.emit(head, BatchTrigger::Size));
        }

        let now = self.clock.now();
        if !self.pending.is_empty() && now.saturating_duration_since(self.last_emit) >= self.config.interval() {
            let all = std::mem::take(&mut self.pending);
            emitted.extend(self.emit(all, BatchTrigger::Interval));
        }

        emitted
    }

    /// Emit everything pending as one batch, ignoring the size cap.
    pub fn flush(&mut self) -> Option<Arc<Batch>> {
        if self.pending.is_empty() {
            return None;
        }
        let all = std::mem::take(&mut self.pending);
        let batch = self.emit(all, BatchTrigger::Flush);
        if let Some(b) = &batch {
            debug!("Batcher flushed {} messages (batch {})", b.source_count, b.seq);
        }
        batch
    }

    fn emit(&mut self, msgs: Vec<Message>, trigger: BatchTrigger) -> Option<Arc<Batch>> {
        if msgs.is_empty() {
            return None;
        }
        for m in &msgs {
            self.pending_ids.remove(&m.id);
        }

        let source_count = msgs.len();
        let merged = if self.config.merge { merge_runs(msgs) } else { msgs };

        self.seq += 1;
        self.batches_processed += 1;
        self.total_processed += source_count as u64;
        self.messages_emitted += merged.len() as u64;
        self.last_emit = self.clock.now();

        let batch = Arc::new(Batch {
            seq: self.seq,
            messages: merged.into_iter().map(Arc::new).collect(),
            emitted_at: self.last_emit,
            trigger,
            source_count,
        });

        // No subscribers is not an error.
        let _ = self.tx.send(batch.clone());
        Some(batch)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Time until the interval trigger fires.
    pub fn time_until_flush(&self) -> Duration {
        self.config
            .interval()
            .saturating_sub(self.clock.now().saturating_duration_since(self.last_emit))
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.config
    }

    pub fn set_max_batch_size(&mut self, size: usize) {
        if size > 0 {
            self.config.max_batch_size = size;
        }
    }

    pub fn set_interval(&mut self, interval: Duration) {
        let ms = interval.as_millis() as u64;
        if ms > 0 {
            self.config.interval_ms = ms;
        }
    }

    /// Takes effect for messages added from now on. Repeats already
    /// pending are emitted as they are.
    pub fn set_dedup(&mut self, enabled: bool) {
        self.config.dedup = enabled;
    }

    pub fn metrics(&self) -> BatcherMetrics {
        let elapsed = self.clock.now().saturating_duration_since(self.started_at).as_secs_f64();
        let per_sec = |n: u64| if elapsed > 0.0 { n as f64 / elapsed } else { 0.0 };

        let (buffer_utilization, drop_rate) = match &self.source {
            Some(ring) => {
                let m = ring.metrics();
                (m.utilization_percent, m.drop_rate)
            }
            None => (self.pending.len() as f64 / self.config.max_batch_size as f64 * 100.0, 0.0),
        };

        BatcherMetrics {
            total_received: self.total_received,
            total_processed: self.total_processed,
            duplicates_skipped: self.duplicates_skipped,
            repeated_ids: self.repeated_ids,
            batches_processed: self.batches_processed,
            average_batch_size: if self.batches_processed > 0 {
                self.messages_emitted as f64 / self.batches_processed as f64
            } else {
                0.0
            },
            current_throughput: per_sec(self.total_processed),
            buffer_utilization,
            drop_rate,
            deduplication_rate: if self.total_received > 0 {
                self.duplicates_skipped as f64 / self.total_received as f64
            } else {
                0.0
            },
            repeat_rate: if self.total_received > 0 {
                self.repeated_ids as f64 / self.total_received as f64
            } else {
                0.0
            },
            effective_messages_per_second: per_sec(self.messages_emitted),
            pending: self.pending.len(),
        }
    }
}

/// Coalesce consecutive mergeable messages from the same origin. The first
/// message of a run keeps its id, timestamp and metadata.
pub fn merge_runs(msgs: Vec<Message>) -> Vec<Message> {
    let mut out: Vec<Message> = Vec::with_capacity(msgs.len());
    for msg in msgs {
        match out.last_mut() {
            Some(prev) if prev.is_mergeable() && msg.is_mergeable() && prev.origin == msg.origin => {
                prev.content.push_str(&msg.content);
            }
            _ => out.push(msg),
        }
    }
    out
}
