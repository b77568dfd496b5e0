use std::collections::VecDeque;

use super::event::{FlushReason, PipelineEvent};

const MAX_EVENTS: usize = 10_000;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetrySummary {
    pub transitions: u64,
    pub overload_periods: u64,
    pub total_overload_ticks: u64,
    pub avg_overload_ticks: f64,
    pub recommendations: u64,
    pub recommendations_applied: u64,
    pub explicit_flushes: u64,
    pub stop_flushes: u64,
    pub flushed_messages: u64,
}

pub fn compute_summary(events: &VecDeque<PipelineEvent>) -> TelemetrySummary {
    let mut summary = TelemetrySummary::default();
    let mut cleared = 0u64;

    for event in events {
        match event {
            PipelineEvent::StateTransition { .. } => summary.transitions += 1,
            PipelineEvent::OverloadStarted { .. } => summary.overload_periods += 1,
            PipelineEvent::OverloadCleared { duration_ticks, .. } => {
                summary.total_overload_ticks += duration_ticks;
                cleared += 1;
            }
            PipelineEvent::TuningRecommended { applied, .. } => {
                summary.recommendations += 1;
                if *applied {
                    summary.recommendations_applied += 1;
                }
            }
            PipelineEvent::Flushed { reason, messages } => {
                match reason {
                    FlushReason::Explicit => summary.explicit_flushes += 1,
                    FlushReason::Stop => summary.stop_flushes += 1,
                }
                summary.flushed_messages += *messages as u64;
            }
        }
    }

    if cleared > 0 {
        summary.avg_overload_ticks = summary.total_overload_ticks as f64 / cleared as f64;
    }

    summary
}

/// Bounded log of pipeline events. Oldest entries fall off first.
#[derive(Debug)]
pub struct TelemetryRecorder {
    buffer: VecDeque<PipelineEvent>,
}

impl TelemetryRecorder {
    pub fn new() -> Self {
        Self {
            buffer: VecDeque::with_capacity(256),
        }
    }

    pub fn record(&mut self, event: PipelineEvent) {
        if self.buffer.len() >= MAX_EVENTS {
            self.buffer.pop_front();
        }
        self.buffer.push_back(event);
    }

    pub fn summary(&self) -> TelemetrySummary {
        compute_summary(&self.buffer)
    }

    pub fn events(&self) -> impl Iterator<Item = &PipelineEvent> {
        self.buffer.iter()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for TelemetryRecorder {
    fn default() -> Self {
        Self::new()
    }
}
