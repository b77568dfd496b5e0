//! Streaming kernel: ingest -> ring -> batcher -> window, driven by a cadence.
//!
//! # Concurrency invariant
//! Only the ring buffer is shared between producer threads and the consumer.
//! Batcher, window mutation, monitor and tuner run on the consumer context
//! (the cadence tick) and are never locked against each other.

pub mod batcher;
pub mod cadence;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod ring;
pub mod telemetry;
pub mod time;
pub mod window;
