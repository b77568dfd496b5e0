use nexus_stream::kernel::cadence::{ManualCadence, TokioCadence};
use nexus_stream::kernel::config::{PipelineConfig, TuningMode};
use nexus_stream::kernel::coordinator::{Coordinator, CoordinatorState, LifecycleRequest};
use nexus_stream::kernel::error::{ConfigError, IngestError};
use nexus_stream::kernel::event::{IngestOutcome, Message, OriginTag};
use nexus_stream::kernel::telemetry::event::PipelineEvent;
use nexus_stream::kernel::telemetry::tuner::Adjustment;
use nexus_stream::kernel::time::{Clock, ManualClock};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Dedup and merge off so message counts map 1:1 onto the window.
fn plain_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.batcher.dedup = false;
    config.batcher.merge = false;
    config.tuning.mode = TuningMode::Off;
    config
}

fn build(config: PipelineConfig) -> (Arc<ManualClock>, Coordinator) {
    let clock = Arc::new(ManualClock::new());
    let coordinator = Coordinator::with_clock(config, clock.clone()).unwrap();
    (clock, coordinator)
}

fn msg(clock: &ManualClock, n: usize) -> Message {
    Message::new(format!("m{}", n), OriginTag::Assistant, "x", clock.now())
}

#[test]
fn test_lifecycle_transitions() {
    use CoordinatorState::*;
    assert_eq!(Idle.transition(LifecycleRequest::Start), Some(Running));
    assert_eq!(Stopped.transition(LifecycleRequest::Start), Some(Running));
    assert_eq!(Running.transition(LifecycleRequest::Stop), Some(Stopped));
    assert_eq!(Idle.transition(LifecycleRequest::Stop), None);
    assert_eq!(Running.transition(LifecycleRequest::Start), None);

    let (_clock, mut c) = build(plain_config());
    assert_eq!(c.state(), Idle);
    assert!(c.tick().is_none(), "Idle coordinator does not tick");
    assert!(c.start());
    assert!(!c.start());
    assert!(c.tick().is_some());
    assert!(c.stop());
    assert!(!c.stop());
    assert!(c.tick().is_none());
    assert!(c.start(), "Restart from Stopped is allowed");
    assert_eq!(c.telemetry.summary().transitions, 3);
}

#[test]
fn test_scenario_b_sustained_rate_without_drops() {
    let (clock, mut c) = build(plain_config());
    c.start();

    let total = 15_000;
    let per_tick = 167;
    let mut sent = 0;
    while sent < total {
        let n = per_tick.min(total - sent);
        let summary = c.ingest_batch((sent..sent + n).map(|i| msg(&clock, i)));
        assert_eq!(summary.accepted, n);
        sent += n;
        clock.advance_ms(16);
        c.tick();
    }
    // 90 ticks * 16 ms = 1440 ms of virtual time so far. One more tick lets
    // the interval trigger emit the sub-cap remainder.
    clock.advance_ms(16);
    c.tick();

    let snap = c.snapshot();
    assert_eq!(snap.total_dropped, 0);
    assert_eq!(snap.total_processed, 15_000);
    assert_eq!(snap.total_rendered, 15_000);
    assert_eq!(snap.pending, 0);
    assert_eq!(snap.buffered, 0);
    assert!(snap.throughput > 10_000.0, "throughput {}", snap.throughput);
    assert!(c.batcher_metrics().current_throughput > 10_000.0);
    assert!(snap.batches_emitted >= 150 && snap.batches_emitted <= 150 + 91, "batches {}", snap.batches_emitted);
    assert!(snap.average_fps > 60.0);
    assert_eq!(c.window().len(), 10_000, "Retention cap bounds the log");
    assert_eq!(snap.retention_evicted, 5_000);
}

#[test]
fn test_stop_without_flush_keeps_buffer() {
    let (clock, mut c) = build(plain_config());
    c.start();
    c.ingest_batch((0..10).map(|i| msg(&clock, i)));
    c.stop();

    assert!(c.window().is_empty());
    assert_eq!(c.ingest_handle().buffered(), 10);

    assert_eq!(c.flush(), 10, "Buffered messages stay reachable after stop");
    assert_eq!(c.window().len(), 10);
    assert_eq!(c.telemetry.summary().explicit_flushes, 1);
}

#[test]
fn test_stop_with_flush_on_stop() {
    let mut config = plain_config();
    config.flush_on_stop = true;
    let (clock, mut c) = build(config);
    c.start();
    c.ingest_batch((0..10).map(|i| msg(&clock, i)));
    c.stop();

    assert_eq!(c.window().len(), 10);
    let summary = c.telemetry.summary();
    assert_eq!(summary.stop_flushes, 1);
    assert_eq!(summary.flushed_messages, 10);
}

#[test]
fn test_ingest_boundary_rejects_malformed() {
    let mut config = plain_config();
    config.max_message_bytes = 8;
    let (clock, c) = build(config);

    assert_eq!(
        c.ingest(Message::new("", OriginTag::User, "hi", clock.now())),
        Err(IngestError::EmptyId)
    );
    assert!(matches!(
        c.ingest(Message::new("big", OriginTag::User, "0123456789", clock.now())),
        Err(IngestError::ContentTooLarge { len: 10, limit: 8, .. })
    ));
    assert_eq!(c.ingest(msg(&clock, 1)), Ok(IngestOutcome::Accepted));

    let summary = c.ingest_batch(vec![msg(&clock, 2), Message::new(" ", OriginTag::Tool, "", clock.now())]);
    assert_eq!(summary.accepted, 1);
    assert_eq!(summary.rejected, vec![IngestError::EmptyId]);

    let snap = c.snapshot();
    assert_eq!(snap.rejected, 3);
    assert_eq!(snap.buffered, 2, "Rejected messages never reach the ring");
}

#[test]
fn test_capacity_eviction_and_overload_events() {
    let mut config = plain_config();
    config.ring_capacity = 10;
    let (clock, mut c) = build(config);
    c.start();

    let outcomes: Vec<_> = (0..25).map(|i| c.ingest(msg(&clock, i)).unwrap()).collect();
    assert_eq!(outcomes.iter().filter(|o| **o == IngestOutcome::AcceptedWithEviction).count(), 15);

    clock.advance_ms(16);
    c.tick();
    clock.advance_ms(16);
    c.tick();

    let snap = c.snapshot();
    assert_eq!(snap.total_dropped, 15);
    assert!((snap.drop_rate - 0.6).abs() < 1e-9);
    assert_eq!(snap.total_rendered, 10);
    assert_eq!(c.window().visible_slice(0, 1)[0].id, "m15", "Oldest survivor is delivered first");

    let events: Vec<_> = c.telemetry.events().cloned().collect();
    assert!(events.iter().any(|e| matches!(e, PipelineEvent::OverloadStarted { .. })));
    assert!(events.iter().any(|e| matches!(e, PipelineEvent::OverloadCleared { duration_ticks: 1, .. })));
}

#[test]
fn test_budget_grows_at_target_and_shrinks_when_degraded() {
    let (clock, mut c) = build(plain_config());
    c.start();
    let initial = c.current_budget();

    for _ in 0..5 {
        clock.advance_ms(16);
        c.tick();
    }
    let grown = c.current_budget();
    assert!(grown > initial, "{} should exceed {}", grown, initial);

    let (clock, mut c) = build(plain_config());
    c.start();
    clock.advance_ms(16);
    c.tick();
    for _ in 0..10 {
        clock.advance_ms(40);
        c.tick();
    }
    let shrunk = c.current_budget();
    assert!(shrunk < initial);
    assert!(shrunk >= c.config().budget.min);
}

#[test]
fn test_budget_grows_from_one() {
    let mut config = plain_config();
    config.budget.initial = 1;
    config.budget.min = 1;
    config.budget.max = 8;
    let (clock, mut c) = build(config);
    c.start();

    for _ in 0..4 {
        clock.advance_ms(16);
        c.tick();
    }
    assert!(c.current_budget() > 1, "budget stuck at {}", c.current_budget());
    assert!(c.current_budget() <= 8);
}

#[test]
fn test_budget_limits_drain_per_tick() {
    let mut config = plain_config();
    config.budget.initial = 32;
    config.budget.min = 32;
    config.budget.max = 32;
    let (clock, mut c) = build(config);
    c.start();
    c.ingest_batch((0..100).map(|i| msg(&clock, i)));

    clock.advance_ms(16);
    let report = c.tick().unwrap();
    assert_eq!(report.budget, 32);
    assert_eq!(report.drained, 32);
    assert_eq!(c.ingest_handle().buffered(), 68);
}

#[test]
fn test_tuning_apply_mode_adjusts_batcher() {
    let mut config = plain_config();
    config.tuning.mode = TuningMode::Apply;
    let (clock, mut c) = build(config);
    c.start();

    clock.advance_ms(16);
    c.tick();
    assert!(c.last_recommendation().is_none(), "No frame samples yet");

    clock.advance_ms(40);
    c.tick();
    let rec = c.last_recommendation().expect("25 fps is below threshold");
    assert_eq!(rec.batch_size, Adjustment::Shrink);
    assert_eq!(rec.batch_interval, Adjustment::Grow);
    assert_eq!(c.effective_max_batch_size(), 50);
    assert_eq!(c.effective_batch_interval(), Duration::from_millis(24));

    // Throttled by the evaluation interval.
    clock.advance_ms(40);
    c.tick();
    assert_eq!(c.effective_max_batch_size(), 50);
    assert_eq!(c.telemetry.summary().recommendations_applied, 1);
}

#[test]
fn test_tuning_enables_dedup_on_repeated_ids_under_drops() {
    let mut config = plain_config();
    config.ring_capacity = 16;
    config.tuning.mode = TuningMode::Apply;
    let (clock, mut c) = build(config);
    c.start();
    assert!(!c.dedup_enabled());

    c.ingest_batch((0..200).map(|i| Message::new(format!("id{}", i % 4), OriginTag::Assistant, "x", clock.now())));
    clock.advance_ms(16);
    c.tick();

    let rec = c.last_recommendation().expect("drop rate breach");
    assert!(rec.grow_buffer);
    assert!(rec.aggressive_dedup, "Repeats are visible while dedup is off");
    assert!(c.dedup_enabled());
    assert!(c.batcher_metrics().repeat_rate > 0.0);
}

#[test]
fn test_tuning_keep_leaves_out_of_bounds_size() {
    let mut config = plain_config();
    config.batcher.max_batch_size = 3;
    config.tuning.mode = TuningMode::Apply;
    config.tuning.latency_threshold_ms = 1.0;
    let (clock, mut c) = build(config);
    c.start();

    c.ingest(msg(&clock, 0)).unwrap();
    clock.advance_ms(30);
    c.tick();

    let rec = c.last_recommendation().expect("latency breach");
    assert_eq!(rec.batch_size, Adjustment::Keep);
    assert_eq!(rec.batch_interval, Adjustment::Shrink);
    assert_eq!(c.effective_max_batch_size(), 3, "Keep is not clamped into tuning bounds");
    assert_eq!(c.effective_batch_interval(), Duration::from_millis(10));
}

#[test]
fn test_tuning_advisory_mode_changes_nothing() {
    let mut config = plain_config();
    config.tuning.mode = TuningMode::Advisory;
    let (clock, mut c) = build(config);
    c.start();

    clock.advance_ms(16);
    c.tick();
    clock.advance_ms(40);
    c.tick();

    assert!(c.last_recommendation().is_some());
    assert_eq!(c.effective_max_batch_size(), 100);
    assert_eq!(c.effective_batch_interval(), Duration::from_millis(16));
    let summary = c.telemetry.summary();
    assert_eq!(summary.recommendations, 1);
    assert_eq!(summary.recommendations_applied, 0);
}

#[test]
fn test_batch_stream_and_visible_slice() {
    let (clock, mut c) = build(plain_config());
    let mut rx = c.subscribe();
    c.start();
    c.ingest_batch((0..250).map(|i| msg(&clock, i)));
    clock.advance_ms(16);
    c.tick();

    let batches: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    assert_eq!(batches.iter().map(|b| b.len()).collect::<Vec<_>>(), vec![100, 100]);
    assert_eq!(batches[0].messages[0].id, "m0");

    let slice = c.visible_slice(150, 50);
    assert_eq!(slice.len(), 50);
    assert_eq!(slice[0].id, "m150");
}

#[test]
fn test_merge_and_dedup_through_pipeline() {
    let mut config = PipelineConfig::default();
    config.tuning.mode = TuningMode::Off;
    let (clock, mut c) = build(config);
    c.start();

    c.ingest(Message::new("a", OriginTag::Assistant, "Hel", clock.now())).unwrap();
    c.ingest(Message::new("a", OriginTag::Assistant, "Hel", clock.now())).unwrap();
    c.ingest(Message::new("b", OriginTag::Assistant, "lo", clock.now())).unwrap();
    c.ingest(Message::new("c", OriginTag::User, "hey", clock.now())).unwrap();
    clock.advance_ms(16);
    c.tick();

    let visible = c.visible_slice(0, 10);
    let contents: Vec<&str> = visible.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["Hello", "hey"]);
    let snap = c.snapshot();
    assert_eq!(snap.duplicates_skipped, 1);
    assert_eq!(snap.total_processed, 3);
    assert_eq!(snap.total_rendered, 2);
}

#[test]
fn test_latency_is_measured_from_message_timestamp() {
    let (clock, mut c) = build(plain_config());
    c.start();
    c.ingest(msg(&clock, 0)).unwrap();
    clock.advance_ms(30);
    c.tick();

    let snap = c.snapshot();
    assert_eq!(snap.total_rendered, 1);
    assert!((snap.average_latency_ms - 30.0).abs() < 1e-6);
}

#[test]
fn test_construction_validation_fails_fast() {
    let mut config = PipelineConfig::default();
    config.batcher.interval_ms = 0;
    assert_eq!(Coordinator::new(config).err(), Some(ConfigError::ZeroBatchInterval));

    let mut config = PipelineConfig::default();
    config.budget.min = 100;
    config.budget.max = 10;
    assert!(matches!(Coordinator::new(config), Err(ConfigError::InvertedBudget { min: 100, max: 10 })));

    let mut config = PipelineConfig::default();
    config.target_fps = 0.0;
    assert!(matches!(Coordinator::new(config), Err(ConfigError::InvalidTargetFps(_))));

    let mut config = PipelineConfig::default();
    config.target_fps = 1e-30;
    assert!(matches!(Coordinator::new(config), Err(ConfigError::InvalidTargetFps(_))));
}

#[test]
fn test_manual_cadence_drives_and_unsubscribes() {
    let clock = Arc::new(ManualClock::new());
    let c = Arc::new(Mutex::new(Coordinator::with_clock(plain_config(), clock.clone()).unwrap()));
    let cadence = ManualCadence::new();

    assert!(Coordinator::start_on(&c, &cadence));
    assert!(!Coordinator::start_on(&c, &cadence), "Already running");
    assert_eq!(cadence.active(), 1);
    assert_eq!(Arc::strong_count(&c), 1, "Cadence holds no strong reference");

    c.lock().ingest(msg(&clock, 0)).unwrap();
    clock.advance_ms(16);
    assert_eq!(cadence.fire(), 1);
    assert_eq!(c.lock().current_tick().frame, 1);
    assert_eq!(c.lock().window().len(), 1);

    c.lock().stop();
    assert_eq!(cadence.active(), 0);
    assert_eq!(cadence.fire(), 0);
    assert_eq!(c.lock().current_tick().frame, 1);

    assert!(Coordinator::start_on(&c, &cadence));
    assert_eq!(cadence.active(), 1);
    drop(c);
    assert_eq!(cadence.active(), 0, "Dropping the coordinator ends its cadence");
    assert_eq!(cadence.fire(), 0);
}

#[tokio::test]
async fn test_tokio_cadence_delivers() {
    let c = Arc::new(Mutex::new(Coordinator::new(plain_config()).unwrap()));
    let ingest = c.lock().ingest_handle();
    let mut rx = c.lock().subscribe();

    assert!(Coordinator::start_on(&c, &TokioCadence::current()));
    let now = std::time::Instant::now();
    for i in 0..20 {
        ingest.ingest(Message::new(format!("t{}", i), OriginTag::Assistant, "x", now)).unwrap();
    }

    let batch = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("a batch within 2s")
        .unwrap();
    assert_eq!(batch.messages[0].id, "t0");

    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut guard = c.lock();
    assert_eq!(guard.snapshot().total_rendered, 20);
    assert!(guard.stop());
    assert_eq!(guard.state(), CoordinatorState::Stopped);
}
