use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Samples kept for frame statistics (~2 s at 60 Hz).
pub const DEFAULT_FRAME_WINDOW: usize = 120;
/// Samples kept for delivery latency (one per emitted batch).
pub const DEFAULT_LATENCY_WINDOW: usize = 256;
/// A frame longer than this multiple of the target counts as dropped.
pub const DROPPED_FRAME_FACTOR: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct FrameStats {
    pub samples: usize,
    pub average_fps: f64,
    pub average_frame_ms: f64,
    pub p95_frame_ms: f64,
    pub p99_frame_ms: f64,
    /// Dropped frames currently inside the sample window.
    pub dropped_in_window: usize,
    /// Dropped frames since construction or the last reset.
    pub dropped_total: u64,
    pub average_latency_ms: f64,
    pub p95_latency_ms: f64,
}

/// Consumer-side frame timing. Fed once per cadence tick; only ever touched
/// from the consumer context.
#[derive(Debug)]
pub struct PerformanceMonitor {
    target_frame: Duration,
    frames: VecDeque<Duration>,
    latencies: VecDeque<Duration>,
    frame_window: usize,
    latency_window: usize,
    last_tick: Option<Instant>,
    dropped_total: u64,
}

impl PerformanceMonitor {
    pub fn new(target_frame: Duration) -> Self {
        Self::with_windows(target_frame, DEFAULT_FRAME_WINDOW, DEFAULT_LATENCY_WINDOW)
    }

    pub fn with_windows(target_frame: Duration, frame_window: usize, latency_window: usize) -> Self {
        let frame_window = frame_window.max(1);
        let latency_window = latency_window.max(1);
        Self {
            target_frame,
            frames: VecDeque::with_capacity(frame_window),
            latencies: VecDeque::with_capacity(latency_window),
            frame_window,
            latency_window,
            last_tick: None,
            dropped_total: 0,
        }
    }

    /// Mark a cadence tick at `now`. The first call only sets the reference
    /// point; later calls record the interval since the previous tick.
    pub fn record_tick(&mut self, now: Instant) -> Option<Duration> {
        let elapsed = self.last_tick.map(|prev| now.saturating_duration_since(prev));
        self.last_tick = Some(now);
        if let Some(d) = elapsed {
            self.record_frame_time(d);
        }
        elapsed
    }

    pub fn record_frame_time(&mut self, frame: Duration) {
        if self.frames.len() >= self.frame_window {
            self.frames.pop_front();
        }
        if self.is_dropped(frame) {
            self.dropped_total += 1;
        }
        self.frames.push_back(frame);
    }

    pub fn record_latency(&mut self, latency: Duration) {
        if self.latencies.len() >= self.latency_window {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
    }

    /// Forget the previous tick so a pause (stop/start) is not measured as
    /// one very long frame.
    pub fn pause(&mut self) {
        self.last_tick = None;
    }

    pub fn reset(&mut self) {
        self.frames.clear();
        self.latencies.clear();
        self.last_tick = None;
        self.dropped_total = 0;
    }

    fn is_dropped(&self, frame: Duration) -> bool {
        frame.as_secs_f64() > self.target_frame.as_secs_f64() * DROPPED_FRAME_FACTOR
    }

    pub fn sample_count(&self) -> usize {
        self.frames.len()
    }

    /// 0.0 until at least one frame interval has been recorded.
    pub fn average_fps(&self) -> f64 {
        let avg = mean_secs(&self.frames);
        if avg > 0.0 {
            1.0 / avg
        } else {
            0.0
        }
    }

    pub fn target_frame(&self) -> Duration {
        self.target_frame
    }

    pub fn stats(&self) -> FrameStats {
        let average_frame = mean_secs(&self.frames);
        FrameStats {
            samples: self.frames.len(),
            average_fps: self.average_fps(),
            average_frame_ms: average_frame * 1000.0,
            p95_frame_ms: percentile_ms(&self.frames, 0.95),
            p99_frame_ms: percentile_ms(&self.frames, 0.99),
            dropped_in_window: self.frames.iter().filter(|f| self.is_dropped(**f)).count(),
            dropped_total: self.dropped_total,
            average_latency_ms: mean_secs(&self.latencies) * 1000.0,
            p95_latency_ms: percentile_ms(&self.latencies, 0.95),
        }
    }
}

fn mean_secs(samples: &VecDeque<Duration>) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(Duration::as_secs_f64).sum::<f64>() / samples.len() as f64
}

/// Nearest-rank percentile.
fn percentile_ms(samples: &VecDeque<Duration>, p: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<Duration> = samples.iter().copied().collect();
    sorted.sort_unstable();
    let rank = (p * sorted.len() as f64).ceil() as usize;
    let idx = rank.clamp(1, sorted.len()) - 1;
    sorted[idx].as_secs_f64() * 1000.0
}
