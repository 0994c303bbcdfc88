//! Runtime error types.

use std::path::PathBuf;

use modecs_component::Entity;

use crate::schedule::Schedule;
use crate::setup::ModId;

/// Errors detected while loading mods or configuring the runtime.
///
/// Every configuration error aborts the mod's initialisation: nothing it
/// declared is registered.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `ModSetup::app` was called more than once.
    #[error("mod '{mod_name}' created its App more than once")]
    AppAlreadyCreated {
        /// The offending mod.
        mod_name: String,
    },

    /// Before/after constraints form a cycle.
    #[error("ordering cycle in schedule {schedule} between systems {systems:?}")]
    Cycle {
        /// Schedule holding the cycle.
        schedule: Schedule,
        /// Systems left unordered, in declaration order.
        systems: Vec<String>,
    },

    /// A before/after constraint names a system the mod did not add to the
    /// same schedule.
    #[error("system '{system}' in schedule {schedule} is ordered against unknown system '{target}'")]
    UnknownOrderingTarget {
        /// Schedule of the constrained system.
        schedule: Schedule,
        /// The constrained system.
        system: String,
        /// The missing target.
        target: String,
    },

    /// A mod added two systems with the same name to one schedule.
    #[error("system '{system}' added twice to schedule {schedule}")]
    DuplicateSystem {
        /// The schedule.
        schedule: Schedule,
        /// The repeated name.
        system: String,
    },

    /// A schedule appears twice in the host's schedule list.
    #[error("schedule {0} is listed more than once")]
    DuplicateSchedule(Schedule),

    /// No mod with this id is loaded.
    #[error("mod {0} is not loaded")]
    UnknownMod(ModId),

    /// The entity is not a sandbox created by the runtime.
    #[error("entity {0} is not a runtime sandbox")]
    UnknownSandbox(Entity),

    /// The runtime has shut down.
    #[error("runtime has been shut down")]
    Terminated,

    /// A configuration value is out of range.
    #[error("invalid runtime config: {0}")]
    Invalid(String),

    /// The config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Path of the config file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid JSON for [`crate::RuntimeConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors raised while running schedules.
///
/// System traps are not runtime errors: they are logged and counted in the
/// stage report.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The runtime has shut down.
    #[error("runtime has been shut down")]
    Terminated,

    /// A worker still held the world after its stage finished.
    #[error("world still shared after stage {0}")]
    WorldShared(Schedule),

    /// Workers of an interrupted stage still hold the world. Call
    /// [`crate::Runtime::settle`] first.
    #[error("world is still shared with running systems")]
    WorldBusy,

    /// A configuration error raised while the runtime was running.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
