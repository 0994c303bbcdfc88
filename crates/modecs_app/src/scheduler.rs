//! System scheduler: ordering and batch computation.
//!
//! For one schedule the scheduler first orders systems topologically by
//! their before/after constraints, then groups them into **batches**. Systems
//! within a batch have no ordering edge and no access conflict between them
//! and run in parallel. Batches execute sequentially.
//!
//! Systems running in different entity scopes never touch the same rows, so
//! their accesses never conflict.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use modecs_component::{ComponentAccess, EntityScope};
use modecs_system::SystemRunner;
use tracing::debug;

use crate::error::ConfigError;
use crate::schedule::Schedule;
use crate::setup::ModId;

/// A system registered by a mod, with its data access.
#[derive(Debug, Clone)]
pub struct RegisteredSystem {
    /// The mod that added the system.
    pub mod_id: ModId,
    /// The mod's name, for diagnostics.
    pub mod_name: Arc<str>,
    /// The entities the system runs against.
    pub scope: EntityScope,
    /// Runs the system.
    pub runner: SystemRunner,
    /// Combined access of the system's queries.
    pub access: ComponentAccess,
}

impl RegisteredSystem {
    /// Wrap a system added by `mod_id`, running in `scope`.
    #[must_use]
    pub fn new(mod_id: ModId, mod_name: Arc<str>, scope: EntityScope, runner: SystemRunner) -> Self {
        let access = runner.system().access();
        Self {
            mod_id,
            mod_name,
            scope,
            runner,
            access,
        }
    }

    /// Returns `true` if both systems may touch the same component data.
    #[must_use]
    pub fn conflicts_with(&self, other: &RegisteredSystem) -> bool {
        self.scope == other.scope && self.access.conflicts_with(&other.access)
    }

    /// The system name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.runner.name()
    }
}

/// A group of systems that can run in parallel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    /// Indices into the schedule's system list, in plan order.
    pub system_indices: Vec<usize>,
}

/// The execution plan of one schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulePlan {
    /// Topological order of the systems. Command buffers are applied in this
    /// order.
    pub order: Vec<usize>,
    /// Parallel batches, executed in sequence.
    pub batches: Vec<Batch>,
}

/// Compute the execution plan for the systems of one schedule.
///
/// 1. Resolve before/after names within each system's own mod and scope.
/// 2. Kahn's algorithm, always taking the ready system declared first.
/// 3. Place each system one batch after the latest of its predecessors and
///    of the earlier-ordered systems it conflicts with.
///
/// # Errors
///
/// Returns [`ConfigError::DuplicateSystem`],
/// [`ConfigError::UnknownOrderingTarget`] or [`ConfigError::Cycle`].
pub fn build_plan(
    schedule: &Schedule,
    systems: &[RegisteredSystem],
) -> Result<SchedulePlan, ConfigError> {
    if systems.is_empty() {
        return Ok(SchedulePlan::default());
    }

    let mut by_name: HashMap<(ModId, EntityScope, &str), usize> =
        HashMap::with_capacity(systems.len());
    for (idx, system) in systems.iter().enumerate() {
        if by_name
            .insert((system.mod_id, system.scope, system.name()), idx)
            .is_some()
        {
            return Err(ConfigError::DuplicateSystem {
                schedule: schedule.clone(),
                system: system.name().to_string(),
            });
        }
    }

    let resolve = |idx: usize, target: &str| {
        by_name
            .get(&(systems[idx].mod_id, systems[idx].scope, target))
            .copied()
            .ok_or_else(|| ConfigError::UnknownOrderingTarget {
                schedule: schedule.clone(),
                system: systems[idx].name().to_string(),
                target: target.to_string(),
            })
    };

    // predecessors[i]: systems that must finish before i.
    let mut predecessors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); systems.len()];
    for (idx, system) in systems.iter().enumerate() {
        let declared = system.runner.system();
        for target in declared.after_names() {
            let before = resolve(idx, target)?;
            predecessors[idx].insert(before);
        }
        for target in declared.before_names() {
            let after = resolve(idx, target)?;
            predecessors[after].insert(idx);
        }
    }

    let order = topological_order(schedule, systems, &predecessors)?;

    // level[i]: batch index of system i.
    let mut level = vec![0usize; systems.len()];
    for (pos, &idx) in order.iter().enumerate() {
        let after_predecessors = predecessors[idx].iter().map(|&p| level[p] + 1).max();
        let after_conflicts = order[..pos]
            .iter()
            .filter(|&&earlier| systems[earlier].conflicts_with(&systems[idx]))
            .map(|&earlier| level[earlier] + 1)
            .max();
        level[idx] = after_predecessors.max(after_conflicts).unwrap_or(0);
    }

    let batch_count = level.iter().copied().max().map_or(0, |max| max + 1);
    let mut batches = vec![Batch::default(); batch_count];
    for &idx in &order {
        batches[level[idx]].system_indices.push(idx);
    }

    debug!(
        %schedule,
        systems = systems.len(),
        batches = batches.len(),
        "built schedule plan"
    );

    Ok(SchedulePlan { order, batches })
}

fn topological_order(
    schedule: &Schedule,
    systems: &[RegisteredSystem],
    predecessors: &[BTreeSet<usize>],
) -> Result<Vec<usize>, ConfigError> {
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); systems.len()];
    let mut in_degree: Vec<usize> = vec![0; systems.len()];
    for (idx, preds) in predecessors.iter().enumerate() {
        in_degree[idx] = preds.len();
        for &pred in preds {
            successors[pred].push(idx);
        }
    }

    let mut ready: BTreeSet<usize> = (0..systems.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(systems.len());
    while let Some(idx) = ready.pop_first() {
        order.push(idx);
        for &next in &successors[idx] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() < systems.len() {
        let stuck = (0..systems.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| systems[i].name().to_string())
            .collect();
        return Err(ConfigError::Cycle {
            schedule: schedule.clone(),
            systems: stuck,
        });
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use modecs_component::QueryFor;
    use modecs_system::System;

    use super::*;

    fn register(mod_id: ModId, system: System) -> RegisteredSystem {
        register_in(mod_id, EntityScope::World, system)
    }

    fn register_in(mod_id: ModId, scope: EntityScope, system: System) -> RegisteredSystem {
        RegisteredSystem::new(mod_id, Arc::from("test"), scope, SystemRunner::new(system))
    }

    fn make_system(name: &str, reads: &[&str], writes: &[&str]) -> System {
        let mut filters = Vec::new();
        for &r in reads {
            filters.push(QueryFor::Ref(r.to_string()));
        }
        for &w in writes {
            filters.push(QueryFor::Mut(w.to_string()));
        }
        let mut system = System::new(name, |_| Ok(()));
        system.add_query(&filters);
        system
    }

    fn names(systems: &[RegisteredSystem], plan: &SchedulePlan) -> Vec<Vec<String>> {
        plan.batches
            .iter()
            .map(|batch| {
                batch
                    .system_indices
                    .iter()
                    .map(|&i| systems[i].name().to_string())
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_no_systems_no_batches() {
        let plan = build_plan(&Schedule::Update, &[]).unwrap();
        assert!(plan.batches.is_empty());
        assert!(plan.order.is_empty());
    }

    #[test]
    fn test_non_conflicting_systems_same_batch() {
        let id = ModId::new();
        let systems = vec![
            register(id, make_system("physics", &["Transform"], &["Velocity"])),
            register(id, make_system("ai", &["Transform"], &["AiState"])),
        ];
        let plan = build_plan(&Schedule::Update, &systems).unwrap();
        assert_eq!(plan.batches.len(), 1);
        assert_eq!(plan.batches[0].system_indices, vec![0, 1]);
    }

    #[test]
    fn test_conflicting_systems_different_batches() {
        // Physics: reads Transform, writes Velocity
        // AI: reads Transform, writes AiState
        // Movement: reads Velocity, writes Transform
        let id = ModId::new();
        let systems = vec![
            register(id, make_system("physics", &["Transform"], &["Velocity"])),
            register(id, make_system("ai", &["Transform"], &["AiState"])),
            register(id, make_system("movement", &["Velocity"], &["Transform"])),
        ];
        let plan = build_plan(&Schedule::Update, &systems).unwrap();
        assert_eq!(
            names(&systems, &plan),
            vec![vec!["physics", "ai"], vec!["movement"]]
        );
    }

    #[test]
    fn test_two_writers_never_share_a_batch() {
        let id = ModId::new();
        let systems = vec![
            register(id, make_system("w1", &[], &["A"])),
            register(id, make_system("w2", &[], &["A"])),
            register(id, make_system("other", &[], &["B"])),
        ];
        let plan = build_plan(&Schedule::Update, &systems).unwrap();
        assert_eq!(names(&systems, &plan), vec![vec!["w1", "other"], vec!["w2"]]);
    }

    #[test]
    fn test_ordering_overrides_declaration_order() {
        let id = ModId::new();
        let first = make_system("first", &[], &[]);
        let mut second = make_system("second", &[], &[]);
        second.before(&first);
        let systems = vec![register(id, first), register(id, second)];

        let plan = build_plan(&Schedule::Update, &systems).unwrap();
        assert_eq!(plan.order, vec![1, 0]);
        assert_eq!(names(&systems, &plan), vec![vec!["second"], vec!["first"]]);
    }

    #[test]
    fn test_ties_follow_declaration_order() {
        let id = ModId::new();
        let a = make_system("a", &[], &[]);
        let mut c = make_system("c", &[], &[]);
        c.after(&a);
        let b = make_system("b", &[], &[]);
        let systems = vec![register(id, a), register(id, c), register(id, b)];

        let plan = build_plan(&Schedule::Update, &systems).unwrap();
        assert_eq!(plan.order, vec![0, 1, 2]);
        assert_eq!(names(&systems, &plan), vec![vec!["a", "b"], vec!["c"]]);
    }

    #[test]
    fn test_cycle_of_three_rejected() {
        let id = ModId::new();
        let mut a = make_system("a", &[], &[]);
        let mut b = make_system("b", &[], &[]);
        let mut c = make_system("c", &[], &[]);
        a.before(&b);
        b.before(&c);
        c.before(&a);
        let systems = vec![register(id, a), register(id, b), register(id, c)];

        let err = build_plan(&Schedule::Update, &systems).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Cycle { systems, .. } if systems == ["a", "b", "c"]
        ));
    }

    #[test]
    fn test_unknown_target_rejected() {
        let id = ModId::new();
        let ghost = make_system("ghost", &[], &[]);
        let mut a = make_system("a", &[], &[]);
        a.after(&ghost);

        let err = build_plan(&Schedule::Update, &[register(id, a)]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnknownOrderingTarget { target, .. } if target == "ghost"
        ));
    }

    #[test]
    fn test_ordering_does_not_cross_mods() {
        let first_mod = ModId::new();
        let second_mod = ModId::new();
        let a = make_system("a", &[], &[]);
        let mut b = make_system("b", &[], &[]);
        b.after(&a);

        let err = build_plan(
            &Schedule::Update,
            &[register(first_mod, a), register(second_mod, b)],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownOrderingTarget { .. }));
    }

    #[test]
    fn test_duplicate_name_within_mod() {
        let id = ModId::new();
        let systems = vec![
            register(id, make_system("a", &[], &[])),
            register(id, make_system("a", &[], &[])),
        ];
        assert!(matches!(
            build_plan(&Schedule::Update, &systems),
            Err(ConfigError::DuplicateSystem { .. })
        ));

        // The same name in different mods is fine.
        let systems = vec![
            register(ModId::new(), make_system("a", &[], &[])),
            register(ModId::new(), make_system("a", &[], &[])),
        ];
        assert!(build_plan(&Schedule::Update, &systems).is_ok());
    }

    #[test]
    fn test_writers_in_different_scopes_share_a_batch() {
        let id = ModId::new();
        let first = EntityScope::Sandbox(modecs_component::Entity::from_raw_parts(1, 0));
        let second = EntityScope::Sandbox(modecs_component::Entity::from_raw_parts(2, 0));
        let systems = vec![
            register_in(id, first, make_system("spin", &[], &["Transform"])),
            register_in(id, second, make_system("spin", &[], &["Transform"])),
            register_in(id, EntityScope::World, make_system("spin", &[], &["Transform"])),
            register_in(id, first, make_system("nudge", &[], &["Transform"])),
        ];
        let plan = build_plan(&Schedule::Update, &systems).unwrap();
        assert_eq!(plan.batches.len(), 2);
        assert_eq!(plan.batches[0].system_indices, vec![0, 1, 2]);
        assert_eq!(plan.batches[1].system_indices, vec![3]);
    }

    #[test]
    fn test_ordering_stays_within_scope() {
        let id = ModId::new();
        let sandbox = EntityScope::Sandbox(modecs_component::Entity::from_raw_parts(1, 0));
        let a = make_system("a", &[], &[]);
        let mut b = make_system("b", &[], &[]);
        b.after(&a);

        let err = build_plan(
            &Schedule::Update,
            &[register_in(id, EntityScope::World, a), register_in(id, sandbox, b)],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownOrderingTarget { .. }));
    }
}
