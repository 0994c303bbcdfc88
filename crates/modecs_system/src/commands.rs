//! Deferred structural changes.
//!
//! Systems never change archetype structure directly. They queue
//! [`Command`]s through [`Commands`]; the runtime applies every buffer
//! exclusively once all systems of a stage have finished.
//!
//! A buffer queued by a scoped system only touches entities visible from that
//! scope, and entities it spawns inside a sandbox join that sandbox.

use modecs_component::{AccessFault, Bundle, Entity, EntityError, EntityScope, World};
use tracing::{debug, trace, warn};

/// One deferred structural change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Materialise a reserved entity with no components.
    SpawnEmpty {
        /// The reserved id.
        entity: Entity,
    },
    /// Materialise a reserved entity with components.
    Spawn {
        /// The reserved id.
        entity: Entity,
        /// Initial components.
        bundle: Bundle,
    },
    /// Add or overwrite components.
    Insert {
        /// Target entity.
        entity: Entity,
        /// Components to write.
        bundle: Bundle,
    },
    /// Drop components by name.
    Remove {
        /// Target entity.
        entity: Entity,
        /// Component names.
        names: Vec<String>,
    },
    /// Despawn, warning if the entity is already gone.
    Despawn {
        /// Target entity.
        entity: Entity,
    },
    /// Despawn, silently ignoring dead entities.
    TryDespawn {
        /// Target entity.
        entity: Entity,
    },
}

impl Command {
    /// The entity this command targets.
    #[must_use]
    pub fn entity(&self) -> Entity {
        match self {
            Self::SpawnEmpty { entity }
            | Self::Spawn { entity, .. }
            | Self::Insert { entity, .. }
            | Self::Remove { entity, .. }
            | Self::Despawn { entity }
            | Self::TryDespawn { entity } => *entity,
        }
    }
}

/// Outcome of applying one or more command buffers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Commands that changed the world.
    pub applied: usize,
    /// Commands dropped because their entity was not alive or not in scope.
    pub dropped: usize,
    /// Entities materialised by spawn commands, in application order.
    pub spawned: Vec<Entity>,
}

impl ApplyReport {
    /// Fold another report into this one.
    pub fn merge(&mut self, other: ApplyReport) {
        self.applied += other.applied;
        self.dropped += other.dropped;
        self.spawned.extend(other.spawned);
    }
}

/// An append-only queue of commands from one system invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandBuffer {
    queue: Vec<Command>,
    scope: Option<EntityScope>,
}

impl CommandBuffer {
    /// Create an empty, unrestricted buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer restricted to `scope`.
    #[must_use]
    pub fn scoped(scope: EntityScope) -> Self {
        Self {
            queue: Vec::new(),
            scope: Some(scope),
        }
    }

    /// The scope commands are restricted to, if any.
    #[must_use]
    pub fn scope(&self) -> Option<EntityScope> {
        self.scope
    }

    /// Append a command.
    pub fn push(&mut self, command: Command) {
        self.queue.push(command);
    }

    /// Queued commands, in submission order.
    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.queue
    }

    /// Number of queued commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns `true` if nothing was queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Apply every command in submission order.
    ///
    /// Reserved entities are materialised first. A command against an entity
    /// that is not alive, or alive but outside the buffer's scope, is dropped
    /// on its own; the rest still apply. Spawns of a sandbox-scoped buffer join
    /// the sandbox, and are undone if it no longer exists.
    pub fn apply(self, world: &mut World) -> ApplyReport {
        world.flush_reserved();
        let mut report = ApplyReport::default();
        let scope = self.scope;

        for command in self.queue {
            let entity = command.entity();
            let spawning = matches!(command, Command::SpawnEmpty { .. } | Command::Spawn { .. });
            if !spawning
                && let Some(scope) = scope
                && world.is_alive(entity)
                && !world.in_scope(entity, scope)
            {
                if matches!(command, Command::TryDespawn { .. }) {
                    debug!(%entity, %scope, "ignored despawn outside scope");
                } else {
                    warn!(%entity, %scope, "dropped command outside scope");
                }
                report.dropped += 1;
                continue;
            }

            let result = match command {
                Command::SpawnEmpty { entity } => {
                    if world.is_alive(entity) {
                        place_in_scope(world, entity, scope).map(|()| {
                            report.spawned.push(entity);
                        })
                    } else {
                        Err(EntityError::NotFound(entity))
                    }
                }
                Command::Spawn { entity, bundle } => world
                    .insert(entity, bundle)
                    .and_then(|()| place_in_scope(world, entity, scope))
                    .map(|()| {
                        report.spawned.push(entity);
                    }),
                Command::Insert { entity, bundle } => world.insert(entity, bundle),
                Command::Remove { entity, names } => world.remove(entity, names.as_slice()),
                Command::Despawn { entity } => world.despawn(entity),
                Command::TryDespawn { entity } => {
                    if world.despawn(entity).is_err() {
                        report.dropped += 1;
                    } else {
                        report.applied += 1;
                    }
                    continue;
                }
            };

            match result {
                Ok(()) => {
                    trace!(%entity, "applied command");
                    report.applied += 1;
                }
                Err(err) => {
                    warn!(%entity, error = %err, "dropped command");
                    report.dropped += 1;
                }
            }
        }

        report
    }
}

/// Move a freshly spawned entity into the buffer's sandbox. On failure the
/// entity is despawned so it never leaks into the world scope.
fn place_in_scope(
    world: &mut World,
    entity: Entity,
    scope: Option<EntityScope>,
) -> Result<(), EntityError> {
    let Some(root) = scope.and_then(EntityScope::sandbox) else {
        return Ok(());
    };
    let result = world.add_to_sandbox(entity, root);
    if result.is_err() {
        let _ = world.despawn(entity);
    }
    result
}

/// The Commands param: queues structural changes for later application.
///
/// A queue guarded by an [`AccessFault`] stops accepting commands once the
/// fault is raised; spawns then return [`Entity::PLACEHOLDER`].
#[derive(Debug)]
pub struct Commands<'w> {
    world: &'w World,
    buffer: CommandBuffer,
    fault: Option<&'w AccessFault>,
}

impl<'w> Commands<'w> {
    /// Create an unrestricted command queue bound to `world`.
    #[must_use]
    pub fn new(world: &'w World) -> Self {
        Self {
            world,
            buffer: CommandBuffer::new(),
            fault: None,
        }
    }

    /// Create a command queue whose buffer is restricted to `scope`.
    #[must_use]
    pub fn scoped(world: &'w World, scope: EntityScope) -> Self {
        Self {
            world,
            buffer: CommandBuffer::scoped(scope),
            fault: None,
        }
    }

    /// Stop accepting commands once `fault` is raised.
    #[must_use]
    pub fn guarded(mut self, fault: &'w AccessFault) -> Self {
        self.fault = Some(fault);
        self
    }

    /// Returns `true` if the queue no longer accepts commands.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.fault.is_some_and(AccessFault::is_raised)
    }

    /// Queue the spawn of an entity with no components.
    ///
    /// The returned id is reserved immediately and becomes alive when the
    /// buffer is applied.
    pub fn spawn_empty(&mut self) -> EntityCommands<'_, 'w> {
        let entity = if self.is_halted() {
            Entity::PLACEHOLDER
        } else {
            let entity = self.world.reserve_entity();
            self.push(Command::SpawnEmpty { entity });
            entity
        };
        EntityCommands {
            commands: self,
            entity,
        }
    }

    /// Queue the spawn of an entity with the components of `bundle`.
    pub fn spawn(&mut self, bundle: impl Into<Bundle>) -> EntityCommands<'_, 'w> {
        let entity = if self.is_halted() {
            Entity::PLACEHOLDER
        } else {
            let bundle = bundle.into();
            let entity = self.world.reserve_entity();
            self.register(&bundle);
            self.push(Command::Spawn { entity, bundle });
            entity
        };
        EntityCommands {
            commands: self,
            entity,
        }
    }

    /// Queue changes against an existing entity.
    ///
    /// Liveness is not checked here: commands against a dead entity are
    /// dropped when the buffer is applied.
    pub fn entity(&mut self, entity: Entity) -> EntityCommands<'_, 'w> {
        EntityCommands {
            commands: self,
            entity,
        }
    }

    /// The commands queued so far.
    #[must_use]
    pub fn buffer(&self) -> &CommandBuffer {
        &self.buffer
    }

    /// Take the queued commands.
    #[must_use]
    pub fn into_buffer(self) -> CommandBuffer {
        self.buffer
    }

    fn push(&mut self, command: Command) {
        if self.is_halted() {
            trace!(entity = %command.entity(), "discarded command after access fault");
            return;
        }
        self.buffer.push(command);
    }

    fn register(&self, bundle: &Bundle) {
        for (name, _) in bundle.iter() {
            self.world.components().register(name);
        }
    }
}

/// Queues commands against one entity.
#[derive(Debug)]
pub struct EntityCommands<'a, 'w> {
    commands: &'a mut Commands<'w>,
    entity: Entity,
}

impl EntityCommands<'_, '_> {
    /// The target entity.
    #[must_use]
    pub fn id(&self) -> Entity {
        self.entity
    }

    /// Queue insertion of `bundle`, overwriting components of the same name.
    pub fn insert(&mut self, bundle: impl Into<Bundle>) -> &mut Self {
        let bundle = bundle.into();
        if !bundle.is_empty() {
            self.commands.register(&bundle);
            self.commands.push(Command::Insert {
                entity: self.entity,
                bundle,
            });
        }
        self
    }

    /// Queue removal of components by name.
    pub fn remove<I, S>(&mut self, names: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if !names.is_empty() {
            self.commands.push(Command::Remove {
                entity: self.entity,
                names,
            });
        }
        self
    }

    /// Queue a despawn. Logs a warning at apply time if the entity is gone.
    pub fn despawn(self) {
        self.commands.push(Command::Despawn {
            entity: self.entity,
        });
    }

    /// Queue a despawn that is silent if the entity is gone.
    pub fn try_despawn(self) {
        self.commands.push(Command::TryDespawn {
            entity: self.entity,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_reserves_and_applies() {
        let mut world = World::new();
        let mut commands = Commands::new(&world);
        let e = commands.spawn(Bundle::new().with("A", "1")).id();
        let empty = commands.spawn_empty().id();
        let buffer = commands.into_buffer();
        assert!(!world.is_alive(e));

        let report = buffer.apply(&mut world);
        assert_eq!(report.applied, 2);
        assert_eq!(report.spawned, vec![e, empty]);
        assert_eq!(world.get(e, "A").as_deref(), Some("1"));
        assert!(world.is_alive(empty));
        assert!(world.components().contains("A"));
    }

    #[test]
    fn test_stale_commands_are_dropped_individually() {
        let mut world = World::new();
        let dead = world.spawn(Bundle::new().with("A", "1"));
        let live = world.spawn(Bundle::new().with("A", "2"));
        world.despawn(dead).unwrap();

        let mut commands = Commands::new(&world);
        commands.entity(dead).insert(Bundle::new().with("B", "x"));
        commands.entity(live).insert(Bundle::new().with("B", "y"));
        commands.entity(dead).despawn();
        let report = commands.into_buffer().apply(&mut world);

        assert_eq!(report.applied, 1);
        assert_eq!(report.dropped, 2);
        assert_eq!(world.get(live, "B").as_deref(), Some("y"));
    }

    #[test]
    fn test_try_despawn_is_silent_for_dead_entities() {
        let mut world = World::new();
        let e = world.spawn_empty();

        let mut commands = Commands::new(&world);
        commands.entity(e).try_despawn();
        commands.entity(e).try_despawn();
        let report = commands.into_buffer().apply(&mut world);

        assert!(!world.is_alive(e));
        assert_eq!(report.applied, 1);
        assert_eq!(report.dropped, 1);
    }

    #[test]
    fn test_remove_twice_equals_once() {
        let mut world = World::new();
        let e = world.spawn(Bundle::new().with("X", "1").with("Y", "2"));

        let mut commands = Commands::new(&world);
        commands.entity(e).remove(["X"]).remove(["X"]);
        commands.into_buffer().apply(&mut world);

        assert!(!world.contains(e, "X"));
        assert_eq!(world.get(e, "Y").as_deref(), Some("2"));
    }

    #[test]
    fn test_last_write_wins_within_one_buffer() {
        let mut world = World::new();
        let e = world.spawn_empty();

        let mut commands = Commands::new(&world);
        commands
            .entity(e)
            .insert(Bundle::new().with("A", "first"))
            .insert(Bundle::new().with("A", "second"));
        commands.into_buffer().apply(&mut world);

        assert_eq!(world.get(e, "A").as_deref(), Some("second"));
    }

    #[test]
    fn test_empty_changes_are_not_queued() {
        let world = World::new();
        let mut commands = Commands::new(&world);
        let e = Entity::from_raw_parts(0, 0);
        commands
            .entity(e)
            .insert(Bundle::new())
            .remove(Vec::<String>::new());
        assert!(commands.buffer().is_empty());
    }

    #[test]
    fn test_insert_then_remove_in_order() {
        let mut world = World::new();
        let mut commands = Commands::new(&world);
        let e = {
            let mut spawned = commands.spawn(Bundle::new().with("A", "1"));
            spawned.insert(Bundle::new().with("B", "2")).remove(["A"]);
            spawned.id()
        };
        let report = commands.into_buffer().apply(&mut world);

        assert_eq!(report.applied, 3);
        assert!(!world.contains(e, "A"));
        assert_eq!(world.get(e, "B").as_deref(), Some("2"));
    }

    #[test]
    fn test_scoped_buffer_ignores_entities_outside_scope() {
        let mut world = World::new();
        let sandbox = world.spawn_sandbox();
        let member = world.spawn(Bundle::new().with("A", "1"));
        world.add_to_sandbox(member, sandbox).unwrap();
        let outsider = world.spawn(Bundle::new().with("A", "1"));

        let mut commands = Commands::scoped(&world, EntityScope::Sandbox(sandbox));
        commands.entity(member).insert(Bundle::new().with("B", "in"));
        commands.entity(outsider).insert(Bundle::new().with("B", "out"));
        commands.entity(outsider).despawn();
        commands.entity(outsider).try_despawn();
        let report = commands.into_buffer().apply(&mut world);

        assert_eq!(report.applied, 1);
        assert_eq!(report.dropped, 3);
        assert_eq!(world.get(member, "B").as_deref(), Some("in"));
        assert!(world.is_alive(outsider));
        assert!(!world.contains(outsider, "B"));
    }

    #[test]
    fn test_sandbox_spawns_join_the_sandbox() {
        let mut world = World::new();
        let sandbox = world.spawn_sandbox();

        let mut commands = Commands::scoped(&world, EntityScope::Sandbox(sandbox));
        let e = commands.spawn(Bundle::new().with("A", "1")).id();
        let empty = commands.spawn_empty().id();
        let report = commands.into_buffer().apply(&mut world);

        assert_eq!(report.spawned, vec![e, empty]);
        assert_eq!(world.sandbox_of(e), Some(sandbox));
        assert_eq!(world.sandbox_members(sandbox), vec![e, empty]);
        assert!(!world.in_scope(e, EntityScope::World));
    }

    #[test]
    fn test_spawn_into_vanished_sandbox_is_undone() {
        let mut world = World::new();
        let sandbox = world.spawn_sandbox();

        let mut commands = Commands::scoped(&world, EntityScope::Sandbox(sandbox));
        let e = commands.spawn(Bundle::new().with("A", "1")).id();
        let buffer = commands.into_buffer();
        world.despawn(sandbox).unwrap();

        let report = buffer.apply(&mut world);
        assert_eq!(report.dropped, 1);
        assert!(report.spawned.is_empty());
        assert!(!world.is_alive(e));
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    fn test_halted_queue_discards_commands() {
        let world = World::new();
        let fault = AccessFault::new();
        let mut commands = Commands::new(&world).guarded(&fault);
        let before = commands.spawn_empty().id();

        fault.raise(modecs_component::QueryError::NotMutable {
            component: "A".into(),
        });
        let after = commands.spawn(Bundle::new().with("A", "1")).id();
        commands.entity(before).despawn();

        assert!(commands.is_halted());
        assert_eq!(after, Entity::PLACEHOLDER);
        assert_eq!(
            commands.buffer().commands(),
            &[Command::SpawnEmpty { entity: before }]
        );
    }
}
