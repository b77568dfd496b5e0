use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::error::ConfigError;
use super::time::TICK_MS;

/// Construction-time settings. Immutable once a coordinator is built; the
/// tuner adjusts runtime copies, never this struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub ring_capacity: usize,
    pub target_fps: f64,
    pub flush_on_stop: bool,
    /// Ingest rejects content larger than this.
    pub max_message_bytes: usize,
    pub batcher: BatcherConfig,
    pub window: WindowConfig,
    pub budget: BudgetConfig,
    pub tuning: TuningConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 65_536,
            target_fps: 60.0,
            flush_on_stop: false,
            max_message_bytes: 1024 * 1024,
            batcher: BatcherConfig::default(),
            window: WindowConfig::default(),
            budget: BudgetConfig::default(),
            tuning: TuningConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatcherConfig {
    pub interval_ms: u64,
    pub max_batch_size: usize,
    pub dedup: bool,
    pub merge: bool,
}

impl BatcherConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_ms == 0 {
            return Err(ConfigError::ZeroBatchInterval);
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        Ok(())
    }
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            interval_ms: TICK_MS,
            max_batch_size: 100,
            dedup: true,
            merge: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub viewport_size: usize,
    pub max_retained: usize,
    /// Keep the viewport pinned to the newest messages after each append.
    pub follow_tail: bool,
}

impl WindowConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.viewport_size == 0 {
            return Err(ConfigError::ZeroViewport);
        }
        if self.max_retained == 0 {
            return Err(ConfigError::ZeroRetention);
        }
        Ok(())
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            viewport_size: 50,
            max_retained: 10_000,
            follow_tail: false,
        }
    }
}

/// Proportional controller for the per-tick drain budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub initial: usize,
    pub min: usize,
    pub max: usize,
    /// fps / target at or above this grows the budget.
    pub grow_ratio: f64,
    /// fps / target below this shrinks the budget.
    pub shrink_ratio: f64,
    pub grow_factor: f64,
    pub shrink_factor: f64,
}

impl BudgetConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min == 0 {
            return Err(ConfigError::Invalid {
                field: "budget.min",
                reason: "must be greater than zero".into(),
            });
        }
        if self.min > self.max {
            return Err(ConfigError::InvertedBudget { min: self.min, max: self.max });
        }
        if !(self.shrink_ratio <= self.grow_ratio) {
            return Err(ConfigError::Invalid {
                field: "budget.shrink_ratio",
                reason: format!("{} must not exceed grow_ratio {}", self.shrink_ratio, self.grow_ratio),
            });
        }
        if !(self.grow_factor >= 1.0) || !(self.shrink_factor > 0.0 && self.shrink_factor <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "budget factors",
                reason: "grow_factor must be >= 1 and shrink_factor in (0, 1]".into(),
            });
        }
        Ok(())
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            initial: 256,
            min: 16,
            max: 8_192,
            grow_ratio: 0.95,
            shrink_ratio: 0.80,
            grow_factor: 1.2,
            shrink_factor: 0.7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TuningMode {
    Off,
    /// Recommendations are computed, logged and recorded, never applied.
    #[default]
    Advisory,
    /// Batch size, interval and dedup recommendations are applied.
    Apply,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    pub mode: TuningMode,
    pub evaluation_interval_ms: u64,
    pub fps_threshold: f64,
    pub drop_rate_threshold: f64,
    pub latency_threshold_ms: f64,
    pub min_batch_size: usize,
    pub max_batch_size: usize,
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            mode: TuningMode::Advisory,
            evaluation_interval_ms: 1_000,
            fps_threshold: 50.0,
            drop_rate_threshold: 0.01,
            latency_threshold_ms: 100.0,
            min_batch_size: 10,
            max_batch_size: 1_000,
            min_interval_ms: 8,
            max_interval_ms: 100,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ring_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if !self.target_fps.is_finite() || self.target_fps <= 0.0 {
            return Err(ConfigError::InvalidTargetFps(self.target_fps));
        }
        // The frame time must be representable and non-zero, or the cadence
        // cannot be built from it.
        match Duration::try_from_secs_f64(1.0 / self.target_fps) {
            Ok(frame) if !frame.is_zero() => {}
            _ => return Err(ConfigError::InvalidTargetFps(self.target_fps)),
        }
        if self.max_message_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "max_message_bytes",
                reason: "must be greater than zero".into(),
            });
        }
        self.batcher.validate()?;
        self.window.validate()?;
        self.budget.validate()?;

        let t = &self.tuning;
        if t.min_batch_size == 0 || t.min_batch_size > t.max_batch_size {
            return Err(ConfigError::Invalid {
                field: "tuning.batch_size",
                reason: format!("bounds {}..={} are not usable", t.min_batch_size, t.max_batch_size),
            });
        }
        if t.min_interval_ms == 0 || t.min_interval_ms > t.max_interval_ms {
            return Err(ConfigError::Invalid {
                field: "tuning.interval",
                reason: format!("bounds {}..={} ms are not usable", t.min_interval_ms, t.max_interval_ms),
            });
        }
        Ok(())
    }

    /// Nominal duration of one render frame. Falls back to one default
    /// tick for a `target_fps` that `validate` would reject.
    pub fn target_frame_time(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.target_fps)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or(Duration::from_millis(TICK_MS))
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&raw)
    }
}
