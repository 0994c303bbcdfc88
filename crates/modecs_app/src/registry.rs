//! System registry: the systems of every schedule and their cached plans.
//!
//! Registration is transactional: all plans affected by a mod are rebuilt
//! first and committed only if every one of them is valid.

use std::collections::HashMap;

use modecs_component::EntityScope;
use tracing::debug;

use crate::error::ConfigError;
use crate::schedule::Schedule;
use crate::scheduler::{self, RegisteredSystem, SchedulePlan};
use crate::setup::ModId;

/// The systems of one schedule.
#[derive(Debug, Clone, Default)]
pub struct ScheduleSystems {
    /// Systems in registration order.
    pub systems: Vec<RegisteredSystem>,
    /// Plan computed from `systems`.
    pub plan: SchedulePlan,
}

/// Registry of all systems known to the runtime.
#[derive(Debug, Default)]
pub struct SystemRegistry {
    schedules: HashMap<Schedule, ScheduleSystems>,
}

impl SystemRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register systems, grouped by schedule.
    ///
    /// Either every group is registered or none is.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] raised while planning an affected
    /// schedule.
    pub fn register(
        &mut self,
        additions: Vec<(Schedule, Vec<RegisteredSystem>)>,
    ) -> Result<(), ConfigError> {
        let mut grouped: Vec<(Schedule, Vec<RegisteredSystem>)> = Vec::with_capacity(additions.len());
        for (schedule, new_systems) in additions {
            match grouped.iter_mut().find(|(existing, _)| *existing == schedule) {
                Some((_, systems)) => systems.extend(new_systems),
                None => grouped.push((schedule, new_systems)),
            }
        }

        let mut staged: Vec<(Schedule, ScheduleSystems)> = Vec::with_capacity(grouped.len());
        for (schedule, new_systems) in grouped {
            let mut systems = self
                .schedules
                .get(&schedule)
                .map(|entry| entry.systems.clone())
                .unwrap_or_default();
            systems.extend(new_systems);
            let plan = scheduler::build_plan(&schedule, &systems)?;
            staged.push((schedule, ScheduleSystems { systems, plan }));
        }

        for (schedule, entry) in staged {
            debug!(
                %schedule,
                systems = entry.systems.len(),
                batches = entry.plan.batches.len(),
                "schedule updated"
            );
            self.schedules.insert(schedule, entry);
        }
        Ok(())
    }

    /// Remove every system registered by `mod_id`.
    ///
    /// Returns the number of systems removed.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a remaining schedule can no longer be
    /// planned; the registry is left unchanged.
    pub fn remove_mod(&mut self, mod_id: ModId) -> Result<usize, ConfigError> {
        self.remove_matching(|system| system.mod_id == mod_id)
    }

    /// Remove the systems `mod_id` runs in `scope`.
    ///
    /// # Errors
    ///
    /// As [`SystemRegistry::remove_mod`].
    pub fn remove_access(&mut self, mod_id: ModId, scope: EntityScope) -> Result<usize, ConfigError> {
        self.remove_matching(|system| system.mod_id == mod_id && system.scope == scope)
    }

    /// Remove every system running in `scope`, whichever mod added it.
    ///
    /// # Errors
    ///
    /// As [`SystemRegistry::remove_mod`].
    pub fn remove_scope(&mut self, scope: EntityScope) -> Result<usize, ConfigError> {
        self.remove_matching(|system| system.scope == scope)
    }

    fn remove_matching(
        &mut self,
        matches: impl Fn(&RegisteredSystem) -> bool,
    ) -> Result<usize, ConfigError> {
        let mut staged = Vec::new();
        let mut removed = 0;
        for (schedule, entry) in &self.schedules {
            let before = entry.systems.len();
            let systems: Vec<RegisteredSystem> = entry
                .systems
                .iter()
                .filter(|system| !matches(system))
                .cloned()
                .collect();
            if systems.len() == before {
                continue;
            }
            removed += before - systems.len();
            let plan = scheduler::build_plan(schedule, &systems)?;
            staged.push((schedule.clone(), ScheduleSystems { systems, plan }));
        }

        for (schedule, entry) in staged {
            if entry.systems.is_empty() {
                self.schedules.remove(&schedule);
            } else {
                self.schedules.insert(schedule, entry);
            }
        }
        Ok(removed)
    }

    /// The systems and plan of a schedule.
    #[must_use]
    pub fn get(&self, schedule: &Schedule) -> Option<&ScheduleSystems> {
        self.schedules.get(schedule)
    }

    /// Remove and return a schedule's systems.
    pub fn take(&mut self, schedule: &Schedule) -> Option<ScheduleSystems> {
        self.schedules.remove(schedule)
    }

    /// Returns `true` if the schedule has at least one system.
    #[must_use]
    pub fn has_systems(&self, schedule: &Schedule) -> bool {
        self.schedules
            .get(schedule)
            .is_some_and(|entry| !entry.systems.is_empty())
    }

    /// Returns the number of schedules with systems.
    #[must_use]
    pub fn schedule_count(&self) -> usize {
        self.schedules.len()
    }

    /// Returns the total number of systems across all schedules.
    #[must_use]
    pub fn system_count(&self) -> usize {
        self.schedules.values().map(|entry| entry.systems.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use modecs_system::{System, SystemRunner};

    use super::*;

    fn make(mod_id: ModId, name: &str) -> RegisteredSystem {
        make_in(mod_id, EntityScope::World, name)
    }

    fn make_in(mod_id: ModId, scope: EntityScope, name: &str) -> RegisteredSystem {
        RegisteredSystem::new(
            mod_id,
            Arc::from("test"),
            scope,
            SystemRunner::new(System::new(name, |_| Ok(()))),
        )
    }

    #[test]
    fn test_register_new_systems() {
        let mut registry = SystemRegistry::new();
        let id = ModId::new();
        registry
            .register(vec![
                (Schedule::Update, vec![make(id, "a"), make(id, "b")]),
                (Schedule::PostUpdate, vec![make(id, "c")]),
            ])
            .unwrap();
        assert_eq!(registry.schedule_count(), 2);
        assert_eq!(registry.system_count(), 3);
        assert_eq!(registry.get(&Schedule::Update).unwrap().plan.order.len(), 2);
    }

    #[test]
    fn test_failed_registration_leaves_registry_unchanged() {
        let mut registry = SystemRegistry::new();
        let id = ModId::new();
        registry
            .register(vec![(Schedule::Update, vec![make(id, "a")])])
            .unwrap();

        let other = ModId::new();
        let result = registry.register(vec![
            (Schedule::PostUpdate, vec![make(other, "fine")]),
            (Schedule::Update, vec![make(other, "x"), make(other, "x")]),
        ]);
        assert!(matches!(result, Err(ConfigError::DuplicateSystem { .. })));
        assert_eq!(registry.system_count(), 1);
        assert!(!registry.has_systems(&Schedule::PostUpdate));
    }

    #[test]
    fn test_remove_mod() {
        let mut registry = SystemRegistry::new();
        let keep = ModId::new();
        let drop = ModId::new();
        registry
            .register(vec![(Schedule::Update, vec![make(keep, "a")])])
            .unwrap();
        registry
            .register(vec![
                (Schedule::Update, vec![make(drop, "b")]),
                (Schedule::PreUpdate, vec![make(drop, "c")]),
            ])
            .unwrap();

        assert_eq!(registry.remove_mod(drop).unwrap(), 2);
        assert_eq!(registry.system_count(), 1);
        assert!(!registry.has_systems(&Schedule::PreUpdate));
        assert_eq!(registry.remove_mod(drop).unwrap(), 0);
    }

    #[test]
    fn test_take_schedule() {
        let mut registry = SystemRegistry::new();
        let id = ModId::new();
        registry
            .register(vec![(Schedule::ModStartup, vec![make(id, "init")])])
            .unwrap();
        let taken = registry.take(&Schedule::ModStartup).unwrap();
        assert_eq!(taken.systems.len(), 1);
        assert!(!registry.has_systems(&Schedule::ModStartup));
    }

    #[test]
    fn test_remove_by_access_and_scope() {
        let mut registry = SystemRegistry::new();
        let sandbox = EntityScope::Sandbox(modecs_component::Entity::from_raw_parts(3, 0));
        let first = ModId::new();
        let second = ModId::new();
        registry
            .register(vec![(
                Schedule::Update,
                vec![
                    make_in(first, EntityScope::World, "a"),
                    make_in(first, sandbox, "a"),
                    make_in(second, sandbox, "b"),
                ],
            )])
            .unwrap();

        assert_eq!(registry.remove_access(first, sandbox).unwrap(), 1);
        assert_eq!(registry.system_count(), 2);
        assert_eq!(registry.remove_scope(sandbox).unwrap(), 1);
        let remaining = &registry.get(&Schedule::Update).unwrap().systems;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].scope, EntityScope::World);
    }
}
