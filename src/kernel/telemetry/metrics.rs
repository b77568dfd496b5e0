use serde::Serialize;

use super::monitor::FrameStats;
use crate::kernel::batcher::BatcherMetrics;
use crate::kernel::ring::RingMetrics;
use crate::kernel::window::WindowMetrics;

/// Pollable, read-only view of the whole pipeline. Recomputed on demand.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub total_enqueued: u64,
    pub total_dequeued: u64,
    pub total_dropped: u64,
    pub total_received: u64,
    pub total_processed: u64,
    pub total_rendered: u64,
    pub duplicates_skipped: u64,
    pub retention_evicted: u64,
    pub rejected: u64,
    pub batches_emitted: u64,
    pub pending: usize,
    pub buffered: usize,

    pub utilization_percent: f64,
    pub drop_rate: f64,
    /// Messages drained from the ring per second.
    pub throughput: f64,
    pub average_fps: f64,
    pub average_latency_ms: f64,
    pub p95_frame_ms: f64,
    pub p99_frame_ms: f64,
    pub dropped_frames: u64,
    pub frame_samples: usize,
    pub deduplication_rate: f64,
    /// Share of inbound messages repeating a pending id, dedup on or off.
    pub repeat_rate: f64,
    pub current_budget: usize,
}

/// Counters owned by the coordinator itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoordinatorCounters {
    pub rendered: u64,
    pub rejected: u64,
    pub budget: usize,
}

pub fn compute_snapshot(
    ring: &RingMetrics,
    batcher: &BatcherMetrics,
    window: &WindowMetrics,
    frames: &FrameStats,
    counters: &CoordinatorCounters,
) -> MetricsSnapshot {
    MetricsSnapshot {
        total_enqueued: ring.total_enqueued,
        total_dequeued: ring.total_dequeued,
        total_dropped: ring.dropped_count,
        total_received: batcher.total_received,
        total_processed: batcher.total_processed,
        total_rendered: counters.rendered,
        duplicates_skipped: batcher.duplicates_skipped,
        retention_evicted: window.retention_evicted,
        rejected: counters.rejected,
        batches_emitted: batcher.batches_processed,
        pending: batcher.pending,
        buffered: ring.current_count,

        utilization_percent: ring.utilization_percent,
        drop_rate: ring.drop_rate,
        throughput: ring.throughput,
        average_fps: frames.average_fps,
        average_latency_ms: frames.average_latency_ms,
        p95_frame_ms: frames.p95_frame_ms,
        p99_frame_ms: frames.p99_frame_ms,
        dropped_frames: frames.dropped_total,
        frame_samples: frames.samples,
        deduplication_rate: batcher.deduplication_rate,
        repeat_rate: batcher.repeat_rate,
        current_budget: counters.budget,
    }
}
