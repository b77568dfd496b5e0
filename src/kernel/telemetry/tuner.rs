use serde::{Deserialize, Serialize};

use super::metrics::MetricsSnapshot;
use crate::kernel::config::TuningConfig;

/// Utilisation above which buffer growth is suggested even without drops.
pub const BUFFER_PRESSURE_PERCENT: f64 = 80.0;
/// Utilisation above which compression is suggested.
pub const COMPRESSION_PRESSURE_PERCENT: f64 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Adjustment {
    #[default]
    Keep,
    Grow,
    Shrink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TuningRecommendation {
    pub batch_size: Adjustment,
    pub batch_interval: Adjustment,
    pub grow_buffer: bool,
    pub aggressive_dedup: bool,
    pub enable_compression: bool,
}

impl TuningRecommendation {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

/// Which thresholds a snapshot breaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Breaches {
    pub fps: bool,
    pub drop_rate: bool,
    pub latency: bool,
}

impl Breaches {
    pub fn any(&self) -> bool {
        self.fps || self.drop_rate || self.latency
    }
}

/// Pure analysis: snapshot in, recommendation out. Applying it is the
/// coordinator's business.
#[derive(Debug, Clone)]
pub struct AdaptiveTuner {
    config: TuningConfig,
}

impl AdaptiveTuner {
    pub fn new(config: TuningConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TuningConfig {
        &self.config
    }

    pub fn breaches(&self, snap: &MetricsSnapshot) -> Breaches {
        Breaches {
            // No frame samples means no evidence either way.
            fps: snap.frame_samples > 0 && snap.average_fps < self.config.fps_threshold,
            drop_rate: snap.drop_rate > self.config.drop_rate_threshold,
            latency: snap.average_latency_ms > self.config.latency_threshold_ms,
        }
    }

    pub fn analyze(&self, snap: &MetricsSnapshot) -> TuningRecommendation {
        let b = self.breaches(snap);
        let mut rec = TuningRecommendation::default();

        if b.fps {
            // Rendering is the bottleneck: fewer, smaller updates.
            rec.batch_size = Adjustment::Shrink;
            rec.batch_interval = Adjustment::Grow;
        } else if b.latency {
            rec.batch_interval = Adjustment::Shrink;
        }

        if b.drop_rate {
            rec.grow_buffer = true;
            if !b.fps {
                rec.batch_size = Adjustment::Grow;
            }
            if snap.repeat_rate > 0.0 {
                rec.aggressive_dedup = true;
            }
        } else if snap.utilization_percent > BUFFER_PRESSURE_PERCENT {
            rec.grow_buffer = true;
        }

        if snap.utilization_percent > COMPRESSION_PRESSURE_PERCENT {
            rec.enable_compression = true;
        }

        rec
    }
}
