use serde::{Deserialize, Serialize};

use super::tuner::TuningRecommendation;
use crate::kernel::coordinator::CoordinatorState;
use crate::kernel::time::Tick;

// Allowed: ticks, counts, rates, enums.
// Forbidden: message ids or content.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineEvent {
    StateTransition {
        from: CoordinatorState,
        to: CoordinatorState,
        tick: Tick,
    },

    OverloadStarted {
        tick: Tick,
        drop_rate: f64,
        utilization_percent: f64,
    },

    OverloadCleared {
        tick: Tick,
        duration_ticks: u64,
    },

    TuningRecommended {
        tick: Tick,
        recommendation: TuningRecommendation,
        applied: bool,
    },

    Flushed {
        reason: FlushReason,
        messages: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlushReason {
    Explicit,
    Stop,
}
