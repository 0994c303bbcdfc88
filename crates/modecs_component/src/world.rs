//! World state: entities, archetype storage and the component registry.
//!
//! Structural changes (spawn, insert, remove, despawn) require `&mut World`
//! and therefore only happen while the runtime applies command buffers.
//! Systems get `&World`: they read and write component payloads through
//! query results and reserve entity ids for deferred spawns.
//!
//! The world also tracks sandboxes (see [`crate::sandbox`]). Despawning a
//! sandbox root despawns its members with it.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::trace;

use crate::archetype::{ArchetypeId, ArchetypeTable, Archetypes};
use crate::component::{Bundle, ComponentRegistry, ComponentTypeId, SerializedComponent};
use crate::entity::{Entities, Entity, EntityLocation};
use crate::error::EntityError;
use crate::query::{CompiledQuery, QueryIter};
use crate::sandbox::{EntityScope, Sandboxes};

/// The world state owned by the runtime.
#[derive(Debug, Default)]
pub struct World {
    entities: Entities,
    archetypes: Archetypes,
    components: ComponentRegistry,
    sandboxes: Sandboxes,
}

impl World {
    /// Create a new empty world.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The entity store.
    #[must_use]
    pub fn entities(&self) -> &Entities {
        &self.entities
    }

    /// All archetype tables.
    #[must_use]
    pub fn archetypes(&self) -> &Archetypes {
        &self.archetypes
    }

    /// The component registry.
    #[must_use]
    pub fn components(&self) -> &ComponentRegistry {
        &self.components
    }

    // -- Entity lifecycle --

    /// Reserve an entity id for a deferred spawn. See [`Entities::reserve`].
    pub fn reserve_entity(&self) -> Entity {
        self.entities.reserve()
    }

    /// Materialise every reserved entity into the empty archetype.
    pub fn flush_reserved(&mut self) {
        for entity in self.entities.flush_reserved() {
            self.place_empty(entity);
        }
    }

    /// Forget ids reserved for spawns that will never be applied.
    pub fn discard_reserved(&mut self) -> usize {
        self.entities.discard_reserved()
    }

    /// Spawn an entity with no components.
    pub fn spawn_empty(&mut self) -> Entity {
        self.flush_reserved();
        let entity = self.entities.allocate();
        self.place_empty(entity);
        entity
    }

    /// Spawn an entity with the components of `bundle`.
    pub fn spawn(&mut self, bundle: Bundle) -> Entity {
        let entity = self.spawn_empty();
        // A freshly spawned entity is always alive.
        let _ = self.insert(entity, bundle);
        entity
    }

    /// Despawn an entity, dropping all of its components.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::NotFound`] if the entity is not alive.
    pub fn despawn(&mut self, entity: Entity) -> Result<(), EntityError> {
        let parent = self.entities.sandbox_of(entity);
        if let Some(location) = self.entities.despawn(entity)? {
            self.remove_row(location);
        }
        if let Some(parent) = parent {
            self.sandboxes.leave(parent, entity);
        }
        trace!(%entity, "despawned");

        if let Some(members) = self.sandboxes.dissolve(entity) {
            for member in members {
                // Members of a live sandbox are alive.
                let _ = self.despawn(member);
            }
        }
        Ok(())
    }

    /// Returns `true` if the entity is alive.
    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    /// Returns the number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Returns the number of archetypes, the empty archetype included.
    #[must_use]
    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    // -- Sandboxes --

    /// Spawn an empty entity and register it as a sandbox root.
    pub fn spawn_sandbox(&mut self) -> Entity {
        let root = self.spawn_empty();
        self.sandboxes.create(root);
        trace!(%root, "created sandbox");
        root
    }

    /// The sandbox registry.
    #[must_use]
    pub fn sandboxes(&self) -> &Sandboxes {
        &self.sandboxes
    }

    /// Returns `true` if `entity` is a live sandbox root.
    #[must_use]
    pub fn is_sandbox(&self, entity: Entity) -> bool {
        self.sandboxes.contains(entity)
    }

    /// The sandbox an entity belongs to, if any.
    #[must_use]
    pub fn sandbox_of(&self, entity: Entity) -> Option<Entity> {
        self.entities.sandbox_of(entity)
    }

    /// Direct members of a sandbox, in id order. Empty for non-sandboxes.
    #[must_use]
    pub fn sandbox_members(&self, root: Entity) -> Vec<Entity> {
        self.sandboxes
            .members(root)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Move `entity` into the sandbox `root`, leaving any sandbox it was in.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::NotFound`] if either entity is dead,
    /// [`EntityError::NotASandbox`] if `root` is not a sandbox and
    /// [`EntityError::SandboxCycle`] if `entity` is `root` or a sandbox that
    /// encloses `root`.
    pub fn add_to_sandbox(&mut self, entity: Entity, root: Entity) -> Result<(), EntityError> {
        if !self.is_alive(entity) {
            return Err(EntityError::NotFound(entity));
        }
        if !self.is_alive(root) {
            return Err(EntityError::NotFound(root));
        }
        if !self.sandboxes.contains(root) {
            return Err(EntityError::NotASandbox(root));
        }
        let mut enclosing = Some(root);
        while let Some(current) = enclosing {
            if current == entity {
                return Err(EntityError::SandboxCycle {
                    entity,
                    sandbox: root,
                });
            }
            enclosing = self.entities.sandbox_of(current);
        }

        if let Some(previous) = self.entities.sandbox_of(entity) {
            self.sandboxes.leave(previous, entity);
        }
        self.sandboxes.join(root, entity);
        self.entities.set_sandbox(entity, Some(root));
        trace!(%entity, %root, "joined sandbox");
        Ok(())
    }

    /// Move `entity` back to the world. Returns the sandbox it left.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::NotFound`] if the entity is not alive.
    pub fn remove_from_sandbox(&mut self, entity: Entity) -> Result<Option<Entity>, EntityError> {
        if !self.is_alive(entity) {
            return Err(EntityError::NotFound(entity));
        }
        let previous = self.entities.sandbox_of(entity);
        if let Some(root) = previous {
            self.sandboxes.leave(root, entity);
            self.entities.set_sandbox(entity, None);
        }
        Ok(previous)
    }

    /// Returns `true` if `entity` is alive and visible from `scope`.
    #[must_use]
    pub fn in_scope(&self, entity: Entity, scope: EntityScope) -> bool {
        scope.admits(&self.entities, entity)
    }

    // -- Component operations --

    /// Insert the components of `bundle`, overwriting existing components of
    /// the same name. Duplicate names inside the bundle: last occurrence wins.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::NotFound`] if the entity is not alive.
    pub fn insert(&mut self, entity: Entity, bundle: Bundle) -> Result<(), EntityError> {
        let current = self.component_types(entity)?;
        let mut values = HashMap::with_capacity(bundle.len());
        for (name, payload) in bundle.normalized() {
            let type_id = self.components.register(&name);
            values.insert(type_id, payload);
        }
        let mut target = current;
        target.extend(values.keys().copied());
        self.move_entity(entity, target, values)?;
        Ok(())
    }

    /// Remove the named components. Names the entity does not have are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::NotFound`] if the entity is not alive.
    pub fn remove<S: AsRef<str>>(&mut self, entity: Entity, names: &[S]) -> Result<(), EntityError> {
        let mut target = self.component_types(entity)?;
        for name in names {
            target.remove(&ComponentTypeId::from_name(name.as_ref()));
        }
        self.move_entity(entity, target, HashMap::new())?;
        Ok(())
    }

    /// Read a component payload.
    #[must_use]
    pub fn get(&self, entity: Entity, name: &str) -> Option<SerializedComponent> {
        let location = self.entities.location(entity)?;
        self.archetypes
            .get(location.archetype)?
            .column(ComponentTypeId::from_name(name))?
            .get(location.row)
    }

    /// Returns `true` if the entity is alive and has the named component.
    #[must_use]
    pub fn contains(&self, entity: Entity, name: &str) -> bool {
        self.entity_table(entity)
            .is_some_and(|table| table.has_component(ComponentTypeId::from_name(name)))
    }

    /// Names of the components an entity currently has.
    #[must_use]
    pub fn component_names(&self, entity: Entity) -> Vec<Arc<str>> {
        self.entity_table(entity)
            .map(|table| {
                table
                    .component_types
                    .iter()
                    .filter_map(|&ty| self.components.name(ty))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the archetype ID for a given entity.
    #[must_use]
    pub fn entity_archetype(&self, entity: Entity) -> Option<ArchetypeId> {
        self.entities.location(entity).map(|loc| loc.archetype)
    }

    /// Relocate an entity to the archetype for `component_types`.
    ///
    /// Payloads of components kept across the move are preserved, payloads in
    /// `values` overwrite or add components, and components missing from
    /// `component_types` are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::NotFound`] if the entity is not alive.
    pub fn move_entity(
        &mut self,
        entity: Entity,
        component_types: BTreeSet<ComponentTypeId>,
        mut values: HashMap<ComponentTypeId, SerializedComponent>,
    ) -> Result<ArchetypeId, EntityError> {
        let location = self
            .entities
            .location(entity)
            .ok_or(EntityError::NotFound(entity))?;

        // Same archetype: overwrite in place.
        if self
            .archetypes
            .find(&component_types)
            .is_some_and(|id| id == location.archetype)
        {
            if let Some(table) = self.archetypes.get_mut(location.archetype) {
                for (type_id, value) in values {
                    if let Some(slot) = table
                        .column_mut(type_id)
                        .and_then(|col| col.get_mut(location.row))
                    {
                        *slot = value;
                    }
                }
            }
            return Ok(location.archetype);
        }

        for (type_id, value) in self.remove_row(location) {
            if component_types.contains(&type_id) {
                values.entry(type_id).or_insert(value);
            }
        }

        let target = self.archetypes.get_or_create(component_types);
        let Some(table) = self.archetypes.get_mut(target) else {
            return Err(EntityError::NotFound(entity));
        };
        let row_values = table
            .component_types
            .iter()
            .map(|ty| values.remove(ty).unwrap_or_default())
            .collect();
        let row = table.push_row(entity, row_values);
        self.entities.set_location(
            entity,
            EntityLocation {
                archetype: target,
                row,
            },
        );
        trace!(%entity, from = location.archetype.0, to = target.0, "moved entity");
        Ok(target)
    }

    // -- Query --

    /// Lazily evaluate a query against the current archetype tables.
    #[must_use]
    pub fn query<'w>(&'w self, query: &'w CompiledQuery) -> QueryIter<'w> {
        query.iter(&self.archetypes)
    }

    /// Like [`World::query`], restricted to entities visible from `scope`.
    #[must_use]
    pub fn query_in<'w>(&'w self, query: &'w CompiledQuery, scope: EntityScope) -> QueryIter<'w> {
        query
            .iter(&self.archetypes)
            .scoped(scope, &self.entities)
    }

    // -- Internals --

    fn component_types(&self, entity: Entity) -> Result<BTreeSet<ComponentTypeId>, EntityError> {
        self.entity_table(entity)
            .map(|table| table.component_types.clone())
            .ok_or(EntityError::NotFound(entity))
    }

    fn entity_table(&self, entity: Entity) -> Option<&ArchetypeTable> {
        let location = self.entities.location(entity)?;
        self.archetypes.get(location.archetype)
    }

    fn place_empty(&mut self, entity: Entity) {
        if let Some(table) = self.archetypes.get_mut(ArchetypeId::EMPTY) {
            let row = table.push_row(entity, Vec::new());
            self.entities.set_location(
                entity,
                EntityLocation {
                    archetype: ArchetypeId::EMPTY,
                    row,
                },
            );
        }
    }

    /// Swap-remove a row, fixing up the location of the entity moved into it.
    fn remove_row(&mut self, location: EntityLocation) -> Vec<(ComponentTypeId, SerializedComponent)> {
        let Some(table) = self.archetypes.get_mut(location.archetype) else {
            return Vec::new();
        };
        let (values, moved) = table.swap_remove_row(location.row);
        if let Some(moved) = moved {
            self.entities.set_location(moved, location);
        }
        values
    }
}
