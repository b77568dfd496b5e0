use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::batcher::{Batcher, BatcherMetrics};
use super::cadence::{Cadence, CadenceSubscription};
use super::config::{PipelineConfig, TuningMode};
use super::error::{ConfigError, IngestError};
use super::event::{Batch, IngestOutcome, IngestSummary, Message, TickReport};
use super::ring::RingBuffer;
use super::telemetry::event::{FlushReason, PipelineEvent};
use super::telemetry::metrics::{compute_snapshot, CoordinatorCounters, MetricsSnapshot};
use super::telemetry::monitor::{FrameStats, PerformanceMonitor};
use super::telemetry::recorder::TelemetryRecorder;
use super::telemetry::tuner::{Adjustment, AdaptiveTuner, TuningRecommendation};
use super::time::{Clock, SystemClock, Tick};
use super::window::{VirtualWindow, WindowHandle, WindowMetrics};

/// Lifecycle of the streaming coordinator. There is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CoordinatorState {
    /// Constructed, cadence never started.
    #[default]
    Idle,
    /// Cadence-driven draining active.
    Running,
    /// Cadence halted. Buffered messages stay reachable through `flush`.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleRequest {
    Start,
    Stop,
}

impl CoordinatorState {
    /// Pure function: (current, request) -> next. `None` means ignored.
    pub fn transition(self, request: LifecycleRequest) -> Option<CoordinatorState> {
        use CoordinatorState::*;
        use LifecycleRequest::*;

        match (self, request) {
            (Idle, Start) | (Stopped, Start) => Some(Running),
            (Running, Stop) => Some(Stopped),
            _ => None,
        }
    }
}

/// Producer-side entry point. Cheap to clone and safe to use from any
/// thread; it only ever touches the ring buffer.
#[derive(Debug, Clone)]
pub struct IngestHandle {
    ring: Arc<RingBuffer<Message>>,
    max_message_bytes: usize,
    rejected: Arc<AtomicU64>,
}

impl IngestHandle {
    pub fn ingest(&self, msg: Message) -> Result<IngestOutcome, IngestError> {
        if let Err(e) = msg.validate(self.max_message_bytes) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            debug!("Rejected message at ingest: {}", e);
            return Err(e);
        }
        Ok(if self.ring.enqueue(msg) {
            IngestOutcome::AcceptedWithEviction
        } else {
            IngestOutcome::Accepted
        })
    }

    /// Validates and enqueues each message independently. A rejection does
    /// not stop the rest of the batch.
    pub fn ingest_batch(&self, msgs: impl IntoIterator<Item = Message>) -> IngestSummary {
        let mut summary = IngestSummary::default();
        for msg in msgs {
            match self.ingest(msg) {
                Ok(IngestOutcome::Accepted) => summary.accepted += 1,
                Ok(IngestOutcome::AcceptedWithEviction) => {
                    summary.accepted += 1;
                    summary.evicted += 1;
                }
                Err(e) => summary.rejected.push(e),
            }
        }
        summary
    }

    pub fn buffered(&self) -> usize {
        self.ring.len()
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

/// The streaming optimizer. Owns the ring buffer, batcher, window and
/// telemetry; every method other than ingestion runs on the consumer
/// context.
pub struct Coordinator {
    config: PipelineConfig,
    state: CoordinatorState,
    clock: Arc<dyn Clock>,
    ring: Arc<RingBuffer<Message>>,
    ingest: IngestHandle,
    batcher: Batcher,
    window: WindowHandle,
    monitor: PerformanceMonitor,
    tuner: AdaptiveTuner,
    pub telemetry: TelemetryRecorder,
    tick: Tick,
    budget: usize,
    rendered: u64,
    last_dropped: u64,
    overload_since: Option<Tick>,
    last_tuning: Option<Instant>,
    last_recommendation: Option<TuningRecommendation>,
    subscription: Option<CadenceSubscription>,
}

impl Coordinator {
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Validates every sub-component up front; nothing is built on error.
    pub fn with_clock(config: PipelineConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;

        let ring = Arc::new(RingBuffer::with_origin(config.ring_capacity, clock.now())?);
        let batcher = Batcher::new(config.batcher.clone(), clock.clone())?.with_source(ring.clone());
        let window = WindowHandle::new(VirtualWindow::new(&config.window)?);
        let ingest = IngestHandle {
            ring: ring.clone(),
            max_message_bytes: config.max_message_bytes,
            rejected: Arc::new(AtomicU64::new(0)),
        };

        Ok(Self {
            monitor: PerformanceMonitor::new(config.target_frame_time()),
            tuner: AdaptiveTuner::new(config.tuning.clone()),
            budget: config.budget.initial.clamp(config.budget.min, config.budget.max),
            config,
            state: CoordinatorState::Idle,
            clock,
            ring,
            ingest,
            batcher,
            window,
            telemetry: TelemetryRecorder::new(),
            tick: Tick::new(),
            rendered: 0,
            last_dropped: 0,
            overload_since: None,
            last_tuning: None,
            last_recommendation: None,
            subscription: None,
        })
    }

    pub fn ingest(&self, msg: Message) -> Result<IngestOutcome, IngestError> {
        self.ingest.ingest(msg)
    }

    pub fn ingest_batch(&self, msgs: impl IntoIterator<Item = Message>) -> IngestSummary {
        self.ingest.ingest_batch(msgs)
    }

    pub fn ingest_handle(&self) -> IngestHandle {
        self.ingest.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Batch>> {
        self.batcher.subscribe()
    }

    pub fn window(&self) -> WindowHandle {
        self.window.clone()
    }

    /// Ad hoc query against the delivered log.
    pub fn visible_slice(&self, offset: i64, size: usize) -> Vec<Arc<Message>> {
        self.window.visible_slice(offset, size)
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn current_tick(&self) -> Tick {
        self.tick
    }

    pub fn current_budget(&self) -> usize {
        self.budget
    }

    pub fn effective_batch_interval(&self) -> Duration {
        self.batcher.config().interval()
    }

    pub fn effective_max_batch_size(&self) -> usize {
        self.batcher.config().max_batch_size
    }

    pub fn dedup_enabled(&self) -> bool {
        self.batcher.config().dedup
    }

    pub fn last_recommendation(&self) -> Option<TuningRecommendation> {
        self.last_recommendation
    }

    fn apply_lifecycle(&mut self, request: LifecycleRequest) -> bool {
        let Some(next) = self.state.transition(request) else {
            debug!("Ignored {:?} in state {:?}", request, self.state);
            return false;
        };
        let from = self.state;
        self.state = next;
        self.telemetry.record(PipelineEvent::StateTransition { from, to: next, tick: self.tick });
        info!("Coordinator {:?} -> {:?}", from, next);
        true
    }

    /// Idle/Stopped -> Running. Ticks must then be driven, either by hand
    /// through `tick` or by a cadence via `start_on`.
    pub fn start(&mut self) -> bool {
        if !self.apply_lifecycle(LifecycleRequest::Start) {
            return false;
        }
        // The gap since the last tick is a pause, not a slow frame.
        self.monitor.pause();
        true
    }

    /// Running -> Stopped. Cancels the cadence registration. Buffered
    /// messages stay in place unless `flush_on_stop` is set.
    pub fn stop(&mut self) -> bool {
        if !self.apply_lifecycle(LifecycleRequest::Stop) {
            return false;
        }
        if let Some(sub) = self.subscription.take() {
            sub.cancel();
        }
        self.monitor.pause();
        if self.config.flush_on_stop {
            self.flush_with(FlushReason::Stop);
        }
        true
    }

    /// Start and register on `cadence` at the target frame rate. The
    /// registration holds only a weak reference, so dropping the last
    /// `Arc` ends the cadence too.
    pub fn start_on<C: Cadence + ?Sized>(this: &Arc<Mutex<Self>>, cadence: &C) -> bool {
        let mut guard = this.lock();
        if !guard.start() {
            return false;
        }

        let weak = Arc::downgrade(this);
        let period = guard.config.target_frame_time();
        let subscription = cadence.every(
            period,
            Box::new(move || {
                let Some(strong) = weak.upgrade() else {
                    return ControlFlow::Break(());
                };
                let mut coordinator = strong.lock();
                match coordinator.tick() {
                    Some(_) => ControlFlow::Continue(()),
                    None => ControlFlow::Break(()),
                }
            }),
        );
        guard.subscription = Some(subscription);
        true
    }

    /// One cadence step. `None` unless running.
    pub fn tick(&mut self) -> Option<TickReport> {
        if self.state != CoordinatorState::Running {
            return None;
        }

        self.tick = self.tick.next();
        let now = self.clock.now();
        self.monitor.record_tick(now);
        self.budget = self.next_budget();

        let drained = self.ring.dequeue_batch(self.budget);
        let drained_count = drained.len();
        self.batcher.add_messages(drained);
        let batches = self.batcher.poll();
        let rendered = self.deliver(&batches, now);

        let snapshot = self.snapshot_at(now);
        self.observe(&snapshot, now);

        Some(TickReport {
            tick: self.tick,
            budget: self.budget,
            drained: drained_count,
            batches: batches.len(),
            rendered,
        })
    }

    /// Drain everything buffered and emit it as one batch, in any state.
    /// Returns the number of messages delivered to the window.
    pub fn flush(&mut self) -> usize {
        self.flush_with(FlushReason::Explicit)
    }

    fn flush_with(&mut self, reason: FlushReason) -> usize {
        let buffered = self.ring.dequeue_batch(self.ring.capacity());
        self.batcher.add_messages(buffered);

        let now = self.clock.now();
        let rendered = match self.batcher.flush() {
            Some(batch) => self.deliver(&[batch], now),
            None => 0,
        };
        self.telemetry.record(PipelineEvent::Flushed { reason, messages: rendered });
        debug!("Flush ({:?}) delivered {} messages", reason, rendered);
        rendered
    }

    fn next_budget(&self) -> usize {
        let cfg = &self.config.budget;
        if self.monitor.sample_count() == 0 {
            return self.budget;
        }

        let ratio = self.monitor.average_fps() / self.config.target_fps;
        // Grow rounds up so small budgets can still move.
        let scaled = if ratio >= cfg.grow_ratio {
            (self.budget as f64 * cfg.grow_factor).ceil()
        } else if ratio < cfg.shrink_ratio {
            (self.budget as f64 * cfg.shrink_factor).round()
        } else {
            self.budget as f64
        };
        (scaled as usize).clamp(cfg.min, cfg.max)
    }

    fn deliver(&mut self, batches: &[Arc<Batch>], now: Instant) -> usize {
        if batches.is_empty() {
            return 0;
        }

        let mut rendered = 0;
        {
            let mut window = self.window.write();
            for batch in batches {
                window.append_batch(batch);
                rendered += batch.len();
            }
        }

        for batch in batches {
            let total: Duration = batch
                .messages
                .iter()
                .map(|m| now.saturating_duration_since(m.timestamp))
                .sum();
            self.monitor.record_latency(total / batch.len() as u32);
        }

        self.rendered += rendered as u64;
        rendered
    }

    fn observe(&mut self, snapshot: &MetricsSnapshot, now: Instant) {
        let dropped_now = snapshot.total_dropped > self.last_dropped;
        self.last_dropped = snapshot.total_dropped;

        match (dropped_now, self.overload_since) {
            (true, None) => {
                warn!(
                    "Overload: ring dropping (drop rate {:.4}, utilization {:.1}%)",
                    snapshot.drop_rate, snapshot.utilization_percent
                );
                self.overload_since = Some(self.tick);
                self.telemetry.record(PipelineEvent::OverloadStarted {
                    tick: self.tick,
                    drop_rate: snapshot.drop_rate,
                    utilization_percent: snapshot.utilization_percent,
                });
            }
            (false, Some(since)) => {
                let duration_ticks = self.tick.frame - since.frame;
                info!("Overload cleared after {} ticks", duration_ticks);
                self.overload_since = None;
                self.telemetry.record(PipelineEvent::OverloadCleared { tick: self.tick, duration_ticks });
            }
            _ => {}
        }

        self.maybe_tune(snapshot, now);
    }

    fn maybe_tune(&mut self, snapshot: &MetricsSnapshot, now: Instant) {
        let mode = self.tuner.config().mode;
        if mode == TuningMode::Off || !self.tuner.breaches(snapshot).any() {
            return;
        }
        let interval = Duration::from_millis(self.tuner.config().evaluation_interval_ms);
        if let Some(last) = self.last_tuning {
            if now.saturating_duration_since(last) < interval {
                return;
            }
        }
        self.last_tuning = Some(now);

        let rec = self.tuner.analyze(snapshot);
        if rec.is_noop() {
            return;
        }
        self.last_recommendation = Some(rec);

        let applied = mode == TuningMode::Apply;
        if applied {
            self.apply_recommendation(&rec);
        } else {
            info!("Tuning advisory: {:?}", rec);
        }
        if rec.grow_buffer || rec.enable_compression {
            info!(
                "Advisory only: grow_buffer={} enable_compression={} (capacity is fixed at construction)",
                rec.grow_buffer, rec.enable_compression
            );
        }
        self.telemetry.record(PipelineEvent::TuningRecommended {
            tick: self.tick,
            recommendation: rec,
            applied,
        });
    }

    fn apply_recommendation(&mut self, rec: &TuningRecommendation) {
        let bounds = self.tuner.config().clone();

        let size = self.batcher.config().max_batch_size;
        // Bounds apply to adjusted values only; Keep leaves the configured
        // value alone even when it sits outside them.
        let next_size = match rec.batch_size {
            Adjustment::Grow => size.saturating_mul(2).clamp(bounds.min_batch_size, bounds.max_batch_size),
            Adjustment::Shrink => (size / 2).clamp(bounds.min_batch_size, bounds.max_batch_size),
            Adjustment::Keep => size,
        };

        let interval = self.batcher.config().interval_ms;
        let next_interval = match rec.batch_interval {
            Adjustment::Grow => (interval * 3 / 2).clamp(bounds.min_interval_ms, bounds.max_interval_ms),
            Adjustment::Shrink => (interval * 2 / 3).clamp(bounds.min_interval_ms, bounds.max_interval_ms),
            Adjustment::Keep => interval,
        };

        if next_size != size {
            self.batcher.set_max_batch_size(next_size);
        }
        if next_interval != interval {
            self.batcher.set_interval(Duration::from_millis(next_interval));
        }
        if rec.aggressive_dedup && !self.batcher.config().dedup {
            self.batcher.set_dedup(true);
        }
        info!(
            "Tuning applied: max_batch_size {} -> {}, interval {}ms -> {}ms, dedup={}",
            size,
            next_size,
            interval,
            next_interval,
            self.batcher.config().dedup
        );
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.snapshot_at(self.clock.now())
    }

    fn snapshot_at(&self, now: Instant) -> MetricsSnapshot {
        compute_snapshot(
            &self.ring.metrics_at(now),
            &self.batcher.metrics(),
            &self.window.metrics(),
            &self.monitor.stats(),
            &CoordinatorCounters {
                rendered: self.rendered,
                rejected: self.ingest.rejected(),
                budget: self.budget,
            },
        )
    }

    pub fn batcher_metrics(&self) -> BatcherMetrics {
        self.batcher.metrics()
    }

    pub fn frame_stats(&self) -> FrameStats {
        self.monitor.stats()
    }

    pub fn window_metrics(&self) -> WindowMetrics {
        self.window.metrics()
    }
}
