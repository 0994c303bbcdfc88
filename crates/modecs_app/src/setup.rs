//! Mod setup: the only place a mod may declare systems.
//!
//! The runtime calls [`Mod::setup`] once when the mod is loaded. Inside it
//! the mod obtains its [`App`] through [`ModSetup::app`] and adds systems to
//! schedules. `App` borrows the setup scope, so it cannot outlive `setup`.

use std::fmt;

use modecs_system::System;
use uuid::Uuid;

use crate::error::ConfigError;
use crate::schedule::Schedule;

/// Unique identifier of a loaded mod instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModId(Uuid);

impl ModId {
    /// Generate a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ModId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ModId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A unit of gameplay logic loaded into the runtime.
pub trait Mod: Send + Sync {
    /// Human-readable mod name, used in logs.
    fn name(&self) -> &str;

    /// Declare the mod's systems.
    ///
    /// # Errors
    ///
    /// Any error aborts loading; nothing the mod declared is registered.
    fn setup(&self, setup: &mut ModSetup<'_>) -> Result<(), ConfigError>;
}

/// The setup scope handed to [`Mod::setup`].
#[derive(Debug)]
pub struct ModSetup<'a> {
    mod_id: ModId,
    mod_name: &'a str,
    app_created: bool,
    systems: Vec<(Schedule, System)>,
}

impl<'a> ModSetup<'a> {
    pub(crate) fn new(mod_id: ModId, mod_name: &'a str) -> Self {
        Self {
            mod_id,
            mod_name,
            app_created: false,
            systems: Vec::new(),
        }
    }

    /// The id assigned to the mod being loaded.
    #[must_use]
    pub fn mod_id(&self) -> ModId {
        self.mod_id
    }

    /// The mod's name.
    #[must_use]
    pub fn mod_name(&self) -> &'a str {
        self.mod_name
    }

    /// Create the mod's [`App`]. Allowed once per mod.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::AppAlreadyCreated`] on the second call.
    pub fn app(&mut self) -> Result<App<'_>, ConfigError> {
        if self.app_created {
            return Err(ConfigError::AppAlreadyCreated {
                mod_name: self.mod_name.to_string(),
            });
        }
        self.app_created = true;
        Ok(App {
            systems: &mut self.systems,
        })
    }

    pub(crate) fn into_systems(self) -> Vec<(Schedule, System)> {
        self.systems
    }
}

/// A mod's handle for registering systems.
#[derive(Debug)]
pub struct App<'s> {
    systems: &'s mut Vec<(Schedule, System)>,
}

impl App<'_> {
    /// Add systems to a schedule. They are moved in and can no longer be
    /// changed.
    pub fn add_systems<I>(&mut self, schedule: Schedule, systems: I) -> &mut Self
    where
        I: IntoIterator<Item = System>,
    {
        self.systems
            .extend(systems.into_iter().map(|system| (schedule.clone(), system)));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_once_per_mod() {
        let mut setup = ModSetup::new(ModId::new(), "example");
        assert!(setup.app().is_ok());
        assert!(matches!(
            setup.app(),
            Err(ConfigError::AppAlreadyCreated { mod_name }) if mod_name == "example"
        ));
    }

    #[test]
    fn test_add_systems_collects_per_schedule() {
        let mut setup = ModSetup::new(ModId::new(), "example");
        {
            let mut app = setup.app().unwrap();
            app.add_systems(
                Schedule::Update,
                [System::new("a", |_| Ok(())), System::new("b", |_| Ok(()))],
            )
            .add_systems(Schedule::ModStartup, [System::new("init", |_| Ok(()))]);
        }
        let systems = setup.into_systems();
        assert_eq!(systems.len(), 3);
        assert_eq!(systems[2].0, Schedule::ModStartup);
        assert_eq!(systems[1].1.name(), "b");
    }

    #[test]
    fn test_mod_ids_are_unique() {
        assert_ne!(ModId::new(), ModId::new());
    }
}
