//! Observation side of the pipeline.
//!
//! Everything here is fed from the consumer context only. The monitor and
//! tuner never touch the ring buffer; the coordinator hands them numbers.
//!
//! Telemetry events carry counts, rates and ticks. Never message content.

pub mod event;
pub mod metrics;
pub mod monitor;
pub mod recorder;
pub mod tuner;
