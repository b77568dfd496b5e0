use anyhow::Context;
use nexus_stream::kernel::cadence::TokioCadence;
use nexus_stream::kernel::event::{Message, OriginTag};
use nexus_stream::{Coordinator, IngestHandle, PipelineConfig};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

const CONFIG_ENV: &str = "NEXUS_STREAM_CONFIG";
const RATE_ENV: &str = "NEXUS_STREAM_RATE";
const SECONDS_ENV: &str = "NEXUS_STREAM_SECONDS";
const DEFAULT_RATE: u64 = 12_000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")?;

    let config = match std::env::var(CONFIG_ENV) {
        Ok(path) => PipelineConfig::from_path(&path).with_context(|| format!("loading {}", path))?,
        Err(_) => PipelineConfig::default(),
    };
    let rate: u64 = env_or(RATE_ENV, DEFAULT_RATE);
    let run_for: Option<u64> = std::env::var(SECONDS_ENV).ok().and_then(|v| v.parse().ok());

    tracing::info!("Nexus Stream booting: {} msgs/s, ring capacity {}", rate, config.ring_capacity);

    let coordinator = Arc::new(Mutex::new(Coordinator::new(config)?));
    let ingest = coordinator.lock().ingest_handle();

    // Presentation stand-in: count what arrives on the batch stream.
    let mut batches = coordinator.lock().subscribe();
    let consumer = tokio::spawn(async move {
        let mut received = 0u64;
        let mut lagged = 0u64;
        loop {
            match batches.recv().await {
                Ok(batch) => received += batch.len() as u64,
                Err(RecvError::Lagged(n)) => lagged += n,
                Err(RecvError::Closed) => break,
            }
        }
        (received, lagged)
    });

    let running = Arc::new(AtomicBool::new(true));
    let producer = {
        let running = running.clone();
        std::thread::spawn(move || produce(ingest, rate, running))
    };

    Coordinator::start_on(&coordinator, &TokioCadence::current());
    tracing::info!("Cadence active. Press Ctrl+C to stop.");

    let mut report = tokio::time::interval(Duration::from_secs(1));
    report.tick().await;
    let deadline = run_for.map(|s| tokio::time::Instant::now() + Duration::from_secs(s));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = async {
                match deadline {
                    Some(d) => tokio::time::sleep_until(d).await,
                    None => std::future::pending::<()>().await,
                }
            } => break,
            _ = report.tick() => {
                let snap = coordinator.lock().snapshot();
                tracing::info!(
                    "fps {:.1} | budget {} | buffered {} ({:.1}%) | dropped {} | rendered {} | latency {:.1}ms | {:.0} msg/s",
                    snap.average_fps,
                    snap.current_budget,
                    snap.buffered,
                    snap.utilization_percent,
                    snap.total_dropped,
                    snap.total_rendered,
                    snap.average_latency_ms,
                    snap.throughput,
                );
            }
        }
    }

    running.store(false, Ordering::Relaxed);
    if producer.join().is_err() {
        tracing::warn!("Producer thread panicked");
    }

    let (snapshot, summary) = {
        let mut c = coordinator.lock();
        c.stop();
        let flushed = c.flush();
        tracing::info!("Final flush delivered {} messages", flushed);
        (c.snapshot(), c.telemetry.summary())
    };
    drop(coordinator);

    let (received, lagged) = consumer.await.context("batch consumer task failed")?;
    tracing::info!("Batch stream: {} messages received, {} batches lagged", received, lagged);
    tracing::info!("Telemetry: {:?}", summary);
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

/// Bursty synthetic transport: alternating runs of assistant chunks and the
/// occasional control event, paced in 1 ms slices.
fn produce(ingest: IngestHandle, rate: u64, running: Arc<AtomicBool>) {
    let per_slice = (rate / 1000).max(1);
    let started = Instant::now();
    let mut sent = 0u64;

    while running.load(Ordering::Relaxed) {
        for i in 0..per_slice {
            let now = Instant::now();
            let msg = if (sent + i) % 50 == 49 {
                Message::control(Uuid::new_v4().to_string(), OriginTag::Tool, "tool_call", now)
            } else {
                Message::new(Uuid::new_v4().to_string(), OriginTag::Assistant, "token ", now)
            };
            if let Err(e) = ingest.ingest(msg) {
                tracing::warn!("Producer message rejected: {}", e);
            }
        }
        sent += per_slice;

        let target = started + Duration::from_micros(sent * 1_000_000 / rate);
        if let Some(wait) = target.checked_duration_since(Instant::now()) {
            std::thread::sleep(wait);
        }
    }
    tracing::info!("Producer stopped after {} messages", sent);
}

fn env_or(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
