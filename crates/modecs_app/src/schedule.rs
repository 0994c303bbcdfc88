//! Execution stages and the host's stage order.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A named execution stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Schedule {
    /// Runs once, on the first frame after mods added systems to it.
    ModStartup,
    /// Start of every frame.
    PreUpdate,
    /// Main per-frame stage.
    Update,
    /// End of every frame.
    PostUpdate,
    /// Before [`Schedule::FixedUpdate`], on every fixed step.
    FixedPreUpdate,
    /// Main fixed-timestep stage.
    FixedUpdate,
    /// After [`Schedule::FixedUpdate`], on every fixed step.
    FixedPostUpdate,
    /// A host-defined stage.
    Custom(String),
}

impl Schedule {
    /// Returns `true` for the fixed-timestep stages.
    #[must_use]
    pub fn is_fixed(&self) -> bool {
        matches!(
            self,
            Self::FixedPreUpdate | Self::FixedUpdate | Self::FixedPostUpdate
        )
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ModStartup => f.write_str("ModStartup"),
            Self::PreUpdate => f.write_str("PreUpdate"),
            Self::Update => f.write_str("Update"),
            Self::PostUpdate => f.write_str("PostUpdate"),
            Self::FixedPreUpdate => f.write_str("FixedPreUpdate"),
            Self::FixedUpdate => f.write_str("FixedUpdate"),
            Self::FixedPostUpdate => f.write_str("FixedPostUpdate"),
            Self::Custom(name) => write!(f, "Custom({name})"),
        }
    }
}

/// The stages the host runs, in execution order.
///
/// Systems that mods add to a stage missing from this list never run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Schedule>", into = "Vec<Schedule>")]
pub struct ModSchedules(Vec<Schedule>);

impl ModSchedules {
    /// Build a stage list.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateSchedule`] if a stage is listed twice.
    pub fn new(schedules: Vec<Schedule>) -> Result<Self, ConfigError> {
        for (i, schedule) in schedules.iter().enumerate() {
            if schedules[..i].contains(schedule) {
                return Err(ConfigError::DuplicateSchedule(schedule.clone()));
            }
        }
        Ok(Self(schedules))
    }

    /// Append a stage at the end of the order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateSchedule`] if it is already listed.
    pub fn push(&mut self, schedule: Schedule) -> Result<(), ConfigError> {
        if self.contains(&schedule) {
            return Err(ConfigError::DuplicateSchedule(schedule));
        }
        self.0.push(schedule);
        Ok(())
    }

    /// Returns `true` if the stage is enabled.
    #[must_use]
    pub fn contains(&self, schedule: &Schedule) -> bool {
        self.0.contains(schedule)
    }

    /// Enabled stages in execution order.
    pub fn iter(&self) -> std::slice::Iter<'_, Schedule> {
        self.0.iter()
    }

    /// Number of enabled stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no stage is enabled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for ModSchedules {
    fn default() -> Self {
        Self(vec![
            Schedule::ModStartup,
            Schedule::PreUpdate,
            Schedule::FixedPreUpdate,
            Schedule::FixedUpdate,
            Schedule::FixedPostUpdate,
            Schedule::Update,
            Schedule::PostUpdate,
        ])
    }
}

impl TryFrom<Vec<Schedule>> for ModSchedules {
    type Error = ConfigError;

    fn try_from(schedules: Vec<Schedule>) -> Result<Self, Self::Error> {
        Self::new(schedules)
    }
}

impl From<ModSchedules> for Vec<Schedule> {
    fn from(schedules: ModSchedules) -> Self {
        schedules.0
    }
}

impl<'a> IntoIterator for &'a ModSchedules {
    type Item = &'a Schedule;
    type IntoIter = std::slice::Iter<'a, Schedule>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
