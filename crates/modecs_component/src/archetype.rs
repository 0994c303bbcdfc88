//! Archetype definitions and storage.
//!
//! An archetype is a unique combination of component types. Entities sharing
//! the same set of components are grouped into the same archetype table so
//! queries can match whole tables and walk their columns row by row.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::component::{ComponentTypeId, SerializedComponent};
use crate::entity::Entity;

/// Index of an archetype table inside [`Archetypes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArchetypeId(pub u32);

impl ArchetypeId {
    /// The archetype of entities with no components.
    pub const EMPTY: ArchetypeId = ArchetypeId(0);

    /// Position in the archetype list.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A column in an archetype table, storing one component type's payloads.
///
/// Rows are guarded by a per-column lock: systems that only read the
/// component share it, and a system holding `Mut` access takes it exclusively
/// for the duration of a single write. Structural changes never happen while
/// systems run, so row indices are stable under the lock.
#[derive(Debug)]
pub struct Column {
    /// The component type stored in this column.
    pub type_id: ComponentTypeId,
    data: RwLock<Vec<SerializedComponent>>,
}

impl Column {
    /// Create a new empty column for the given component type.
    #[must_use]
    pub fn new(type_id: ComponentTypeId) -> Self {
        Self {
            type_id,
            data: RwLock::new(Vec::new()),
        }
    }

    /// Returns the number of payloads stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns `true` if this column contains no payloads.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Clone the payload at `row`.
    #[must_use]
    pub fn get(&self, row: usize) -> Option<SerializedComponent> {
        self.data.read().get(row).cloned()
    }

    /// Overwrite the payload at `row` through a shared reference.
    ///
    /// Returns `false` if the row does not exist.
    pub fn set(&self, row: usize, value: SerializedComponent) -> bool {
        match self.data.write().get_mut(row) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Mutable access to a payload when the table is exclusively borrowed.
    #[must_use]
    pub fn get_mut(&mut self, row: usize) -> Option<&mut SerializedComponent> {
        self.data.get_mut().get_mut(row)
    }

    /// Push a payload onto the end of the column.
    pub fn push(&mut self, value: SerializedComponent) {
        self.data.get_mut().push(value);
    }

    /// Remove the payload at `row`, moving the last payload into its place.
    pub fn swap_remove(&mut self, row: usize) -> SerializedComponent {
        self.data.get_mut().swap_remove(row)
    }
}

/// A table of entities sharing the same archetype (set of component types).
///
/// Data is stored in struct-of-arrays layout: one [`Column`] per component
/// type, with entity IDs stored in a parallel vector.
#[derive(Debug)]
pub struct ArchetypeTable {
    /// The archetype identifier.
    pub id: ArchetypeId,
    /// Sorted set of component type IDs that define this archetype.
    pub component_types: BTreeSet<ComponentTypeId>,
    /// Entity IDs in row order. `entities[i]` corresponds to row `i` in every
    /// column.
    entities: Vec<Entity>,
    /// One column per component type, in the same order as `component_types`.
    columns: Vec<Column>,
}

impl ArchetypeTable {
    /// Create a new, empty archetype table.
    #[must_use]
    pub fn new(id: ArchetypeId, component_types: BTreeSet<ComponentTypeId>) -> Self {
        let columns = component_types.iter().map(|&ty| Column::new(ty)).collect();
        Self {
            id,
            component_types,
            entities: Vec::new(),
            columns,
        }
    }

    /// Returns the number of entities in this archetype table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if this table has no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entities in row order.
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Returns `true` if this archetype contains the given component type.
    #[must_use]
    pub fn has_component(&self, type_id: ComponentTypeId) -> bool {
        self.component_types.contains(&type_id)
    }

    /// Returns the column index for the given component type, if present.
    #[must_use]
    pub fn column_index(&self, type_id: ComponentTypeId) -> Option<usize> {
        self.columns.iter().position(|col| col.type_id == type_id)
    }

    /// Returns the column for the given component type, if present.
    #[must_use]
    pub fn column(&self, type_id: ComponentTypeId) -> Option<&Column> {
        self.columns.iter().find(|col| col.type_id == type_id)
    }

    /// Mutable column access when the table is exclusively borrowed.
    #[must_use]
    pub fn column_mut(&mut self, type_id: ComponentTypeId) -> Option<&mut Column> {
        self.columns.iter_mut().find(|col| col.type_id == type_id)
    }

    /// Append a row. `values` must hold exactly one payload per column, in
    /// column order.
    ///
    /// Returns the new row index.
    pub fn push_row(&mut self, entity: Entity, values: Vec<SerializedComponent>) -> usize {
        assert_eq!(
            values.len(),
            self.columns.len(),
            "row width mismatch: expected {}, got {}",
            self.columns.len(),
            values.len()
        );
        for (column, value) in self.columns.iter_mut().zip(values) {
            column.push(value);
        }
        self.entities.push(entity);
        self.entities.len() - 1
    }

    /// Remove a row by swapping the last row into its place.
    ///
    /// Returns the removed payloads (paired with their component types) and
    /// the entity that now occupies `row`, if one was moved.
    pub fn swap_remove_row(
        &mut self,
        row: usize,
    ) -> (Vec<(ComponentTypeId, SerializedComponent)>, Option<Entity>) {
        let values = self
            .columns
            .iter_mut()
            .map(|col| (col.type_id, col.swap_remove(row)))
            .collect();
        self.entities.swap_remove(row);
        let moved = self.entities.get(row).copied();
        (values, moved)
    }
}

/// Every archetype table in the world, in creation order.
#[derive(Debug)]
pub struct Archetypes {
    tables: Vec<ArchetypeTable>,
    by_types: HashMap<BTreeSet<ComponentTypeId>, ArchetypeId>,
}

impl Archetypes {
    /// Create the archetype list, holding only the empty archetype.
    #[must_use]
    pub fn new() -> Self {
        let empty = BTreeSet::new();
        let mut by_types = HashMap::new();
        by_types.insert(empty.clone(), ArchetypeId::EMPTY);
        Self {
            tables: vec![ArchetypeTable::new(ArchetypeId::EMPTY, empty)],
            by_types,
        }
    }

    /// Get or create the archetype for the given set of component types.
    pub fn get_or_create(&mut self, component_types: BTreeSet<ComponentTypeId>) -> ArchetypeId {
        if let Some(&id) = self.by_types.get(&component_types) {
            return id;
        }
        let id = ArchetypeId(self.tables.len() as u32);
        self.tables
            .push(ArchetypeTable::new(id, component_types.clone()));
        self.by_types.insert(component_types, id);
        id
    }

    /// Returns a reference to an archetype table by ID.
    #[must_use]
    pub fn get(&self, id: ArchetypeId) -> Option<&ArchetypeTable> {
        self.tables.get(id.index())
    }

    /// Returns a mutable reference to an archetype table by ID.
    #[must_use]
    pub fn get_mut(&mut self, id: ArchetypeId) -> Option<&mut ArchetypeTable> {
        self.tables.get_mut(id.index())
    }

    /// Looks up the archetype for an exact component set.
    #[must_use]
    pub fn find(&self, component_types: &BTreeSet<ComponentTypeId>) -> Option<ArchetypeId> {
        self.by_types.get(component_types).copied()
    }

    /// Iterate all tables in creation order.
    pub fn iter(&self) -> std::slice::Iter<'_, ArchetypeTable> {
        self.tables.iter()
    }

    /// Number of archetypes, the empty archetype included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Always `false`: the empty archetype always exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl Default for Archetypes {
    fn default() -> Self {
        Self::new()
    }
}
