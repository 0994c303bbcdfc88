//! Runtime configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::schedule::ModSchedules;

/// Configuration for the runtime and its tick loop.
///
/// Loaded from JSON; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Target frames per second for [`crate::Runtime::run`].
    pub tick_rate: f64,
    /// Maximum number of frames to run (0 = unlimited).
    pub max_ticks: u64,
    /// Fixed-timestep stages run at this rate.
    pub fixed_timestep_hz: f64,
    /// Upper bound on fixed steps per frame; any backlog beyond it is dropped.
    pub max_fixed_steps_per_frame: u32,
    /// Despawn the entities a mod spawned when the mod is unloaded.
    pub despawn_mod_entities: bool,
    /// Enabled stages, in execution order.
    pub schedules: ModSchedules,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60.0,
            max_ticks: 0,
            fixed_timestep_hz: 64.0,
            max_fixed_steps_per_frame: 8,
            despawn_mod_entities: true,
            schedules: ModSchedules::default(),
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a JSON config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, otherwise
    /// as [`RuntimeConfig::from_json`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Check that rates and limits are usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tick_rate.is_finite() && self.tick_rate > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "tick_rate must be positive, got {}",
                self.tick_rate
            )));
        }
        self.tick_duration()?;
        if !(self.fixed_timestep_hz.is_finite() && self.fixed_timestep_hz > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "fixed_timestep_hz must be positive, got {}",
                self.fixed_timestep_hz
            )));
        }
        if self.max_fixed_steps_per_frame == 0 {
            return Err(ConfigError::Invalid(
                "max_fixed_steps_per_frame must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Wall-clock budget of one frame.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `tick_rate` does not describe a
    /// representable frame period.
    pub fn tick_duration(&self) -> Result<Duration, ConfigError> {
        Duration::try_from_secs_f64(1.0 / self.tick_rate).map_err(|err| {
            ConfigError::Invalid(format!("tick_rate {} has no usable period: {err}", self.tick_rate))
        })
    }

    /// Seconds per fixed step.
    #[must_use]
    pub fn fixed_timestep(&self) -> f64 {
        1.0 / self.fixed_timestep_hz
    }

    /// Set the frame rate.
    #[must_use]
    pub fn with_tick_rate(mut self, tick_rate: f64) -> Self {
        self.tick_rate = tick_rate;
        self
    }

    /// Set the frame limit (0 = unlimited).
    #[must_use]
    pub fn with_max_ticks(mut self, max_ticks: u64) -> Self {
        self.max_ticks = max_ticks;
        self
    }

    /// Set the fixed-timestep rate.
    #[must_use]
    pub fn with_fixed_timestep_hz(mut self, hz: f64) -> Self {
        self.fixed_timestep_hz = hz;
        self
    }

    /// Set the enabled stages.
    #[must_use]
    pub fn with_schedules(mut self, schedules: ModSchedules) -> Self {
        self.schedules = schedules;
        self
    }

    /// Keep or despawn a mod's entities when it is unloaded.
    #[must_use]
    pub fn with_despawn_mod_entities(mut self, despawn: bool) -> Self {
        self.despawn_mod_entities = despawn;
        self
    }
}
