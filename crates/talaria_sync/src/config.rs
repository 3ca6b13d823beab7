//! # Engine Configuration
//!
//! Every tuned constant in one place, loaded once at startup from a TOML
//! file and passed read-only into the engine. Defaults are the shipped
//! values; a config file only needs the keys it overrides.
//!
//! Both sides of the wire must run the same movement constants or every
//! reconciliation replays into a correction.

use serde::{Deserialize, Serialize};
use talaria_core::MoveTuning;

use crate::error::{SyncError, SyncResult};

/// Correction-tier thresholds for the reconciler.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    /// Below this replay error (world units) only velocity is synced.
    pub correct_threshold: f32,
    /// At or above this replay error the correction is a hard snap with no
    /// visual smoothing.
    pub snap_threshold: f32,
    /// Ticks after a movement burst starts during which position
    /// corrections are skipped entirely.
    pub grace_ticks: u32,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            correct_threshold: 8.0,
            snap_threshold: 64.0,
            grace_ticks: 10,
        }
    }
}

/// Remote-entity interpolation tuning.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolationConfig {
    /// Snapshot buffer capacity per remote entity; oldest evicted first.
    pub buffer_cap: usize,
    /// How far behind now the remote render time sits, seconds.
    pub delay: f32,
    /// Ceiling on forward extrapolation past the newest snapshot, seconds.
    pub max_extrapolation: f32,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            buffer_cap: 20,
            delay: 0.100,
            max_extrapolation: 0.100,
        }
    }
}

/// Engine-wide configuration. Construct with [`Default::default`], or load
/// overrides from TOML with [`SyncConfig::from_toml_str`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Movement integrator tuning, shared with the server.
    pub tuning: MoveTuning,
    /// Fixed simulation step, seconds.
    pub fixed_step: f32,
    /// Most catch-up steps one frame may run after a stall.
    pub max_buffered_steps: u32,
    /// Input history cap, entries (~1 s at the default step).
    pub history_cap: usize,
    /// Outbound movement update cadence, Hz. Independent of the tick rate.
    pub send_rate_hz: f32,
    /// Correction-tier thresholds.
    pub correction: CorrectionConfig,
    /// Remote interpolation tuning.
    pub interpolation: InterpolationConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tuning: MoveTuning::default(),
            fixed_step: 1.0 / 60.0,
            max_buffered_steps: 5,
            history_cap: 60,
            send_rate_hz: 20.0,
            correction: CorrectionConfig::default(),
            interpolation: InterpolationConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Parse a config from TOML text. Missing keys keep their defaults;
    /// the parsed config is validated before it is returned.
    pub fn from_toml_str(text: &str) -> SyncResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| SyncError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Seconds between outbound movement updates.
    #[inline]
    #[must_use]
    pub fn send_interval(&self) -> f32 {
        1.0 / self.send_rate_hz
    }

    /// Reject configs the engine cannot run with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.fixed_step <= 0.0 {
            return Err(SyncError::InvalidConfig(format!(
                "fixed_step must be positive, got {}",
                self.fixed_step
            )));
        }
        if self.max_buffered_steps == 0 {
            return Err(SyncError::InvalidConfig(
                "max_buffered_steps must be at least 1".to_string(),
            ));
        }
        if self.history_cap == 0 {
            return Err(SyncError::InvalidConfig(
                "history_cap must be at least 1".to_string(),
            ));
        }
        if self.send_rate_hz <= 0.0 {
            return Err(SyncError::InvalidConfig(format!(
                "send_rate_hz must be positive, got {}",
                self.send_rate_hz
            )));
        }
        if self.correction.snap_threshold < self.correction.correct_threshold {
            return Err(SyncError::InvalidConfig(format!(
                "snap_threshold ({}) must not be below correct_threshold ({})",
                self.correction.snap_threshold, self.correction.correct_threshold
            )));
        }
        if self.interpolation.buffer_cap < 2 {
            return Err(SyncError::InvalidConfig(
                "interpolation.buffer_cap must be at least 2".to_string(),
            ));
        }
        Ok(())
    }
}
