//! Declarative queries and their evaluation against archetype storage.
//!
//! A system describes the data it needs as a list of [`QueryFor`] filters.
//! [`CompiledQuery::build`] splits them into positional fetch items (`Ref` and
//! `Mut`, in declaration order) and presence filters (`With`, `Without`).
//! The scheduler uses the derived [`ComponentAccess`] to keep conflicting
//! systems apart; [`QueryIter`] walks the matching archetype tables lazily.
//! An iterator can be narrowed to one [`EntityScope`] and guarded by an
//! [`AccessFault`] that halts the invocation after an illegal write.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::archetype::{ArchetypeTable, Archetypes, Column};
use crate::component::{ComponentTypeId, SerializedComponent};
use crate::entity::{Entities, Entity};
use crate::error::QueryError;
use crate::sandbox::EntityScope;

/// One filter in a query declaration. Each variant carries a component name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryFor {
    /// Required component, returned read-only.
    Ref(String),
    /// Required component, returned writable.
    Mut(String),
    /// Required component, not returned.
    With(String),
    /// Component that must be absent.
    Without(String),
}

impl QueryFor {
    /// The component name this filter refers to.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Ref(name) | Self::Mut(name) | Self::With(name) | Self::Without(name) => name,
        }
    }

    /// The component type id this filter refers to.
    #[must_use]
    pub fn type_id(&self) -> ComponentTypeId {
        ComponentTypeId::from_name(self.name())
    }
}

/// A positional data item of a compiled query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchItem {
    /// Component type fetched.
    pub type_id: ComponentTypeId,
    /// Component name, for diagnostics.
    pub name: Arc<str>,
    /// Whether the query declared `Mut` for this item.
    pub mutable: bool,
}

/// The read and write sets of one or more queries.
///
/// Two accesses conflict when one writes a component type that the other
/// reads or writes:
///
/// ```text
/// A.writes ∩ (B.reads ∪ B.writes) ≠ ∅  OR
/// B.writes ∩ (A.reads ∪ A.writes) ≠ ∅
/// ```
///
/// Presence filters are not data access: archetype structure is frozen while
/// systems run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentAccess {
    /// Component types read immutably.
    pub reads: BTreeSet<ComponentTypeId>,
    /// Component types written.
    pub writes: BTreeSet<ComponentTypeId>,
}

impl ComponentAccess {
    /// Create an empty access set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a read-only component requirement.
    #[must_use]
    pub fn read(mut self, type_id: ComponentTypeId) -> Self {
        self.reads.insert(type_id);
        self
    }

    /// Add a mutable component requirement.
    #[must_use]
    pub fn write(mut self, type_id: ComponentTypeId) -> Self {
        self.writes.insert(type_id);
        self
    }

    /// Merge another access set into this one.
    pub fn extend(&mut self, other: &ComponentAccess) {
        self.reads.extend(other.reads.iter().copied());
        self.writes.extend(other.writes.iter().copied());
    }

    /// Returns `true` if nothing is written.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.writes.is_empty()
    }

    /// Checks whether this access conflicts with another.
    #[must_use]
    pub fn conflicts_with(&self, other: &ComponentAccess) -> bool {
        self.writes
            .iter()
            .any(|w| other.reads.contains(w) || other.writes.contains(w))
            || other
                .writes
                .iter()
                .any(|w| self.reads.contains(w) || self.writes.contains(w))
    }
}

/// A query declaration resolved into fetch items and presence filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledQuery {
    fetch: Vec<FetchItem>,
    with: Vec<ComponentTypeId>,
    without: Vec<ComponentTypeId>,
}

impl CompiledQuery {
    /// Partition `filters` into positional data items and presence filters.
    #[must_use]
    pub fn build(filters: &[QueryFor]) -> Self {
        let mut query = Self::default();
        for filter in filters {
            let type_id = filter.type_id();
            match filter {
                QueryFor::Ref(name) | QueryFor::Mut(name) => query.fetch.push(FetchItem {
                    type_id,
                    name: Arc::from(name.as_str()),
                    mutable: matches!(filter, QueryFor::Mut(_)),
                }),
                QueryFor::With(_) => query.with.push(type_id),
                QueryFor::Without(_) => query.without.push(type_id),
            }
        }
        query
    }

    /// Positional data items, in declaration order.
    #[must_use]
    pub fn fetch(&self) -> &[FetchItem] {
        &self.fetch
    }

    /// Returns `true` if entities of this archetype satisfy the query: the
    /// archetype holds every Ref/Mut/With component and none of the Without
    /// components.
    #[must_use]
    pub fn matches(&self, table: &ArchetypeTable) -> bool {
        self.fetch.iter().all(|item| table.has_component(item.type_id))
            && self.with.iter().all(|&ty| table.has_component(ty))
            && !self.without.iter().any(|&ty| table.has_component(ty))
    }

    /// The data access this query performs.
    #[must_use]
    pub fn access(&self) -> ComponentAccess {
        let mut access = ComponentAccess::new();
        for item in &self.fetch {
            if item.mutable {
                access.writes.insert(item.type_id);
            } else {
                access.reads.insert(item.type_id);
            }
        }
        access
    }

    /// Start a lazy evaluation over `archetypes`.
    #[must_use]
    pub fn iter<'w>(&'w self, archetypes: &'w Archetypes) -> QueryIter<'w> {
        QueryIter::new(self, archetypes)
    }
}

/// Records the first illegal access made through guarded query results.
///
/// Once raised it stays raised: guarded [`ComponentRef::set`] calls fail with
/// the recorded error and guarded [`QueryIter`]s stop yielding.
#[derive(Debug, Default)]
pub struct AccessFault {
    error: Mutex<Option<QueryError>>,
}

impl AccessFault {
    /// Create a fault that has not been raised.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `error` unless a fault is already recorded. Returns the
    /// recorded error.
    pub fn raise(&self, error: QueryError) -> QueryError {
        self.error.lock().get_or_insert(error).clone()
    }

    /// Returns `true` once an illegal access was recorded.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.error.lock().is_some()
    }

    /// The recorded error, if any.
    #[must_use]
    pub fn error(&self) -> Option<QueryError> {
        self.error.lock().clone()
    }

    /// Consume the fault, returning the recorded error.
    #[must_use]
    pub fn into_error(self) -> Option<QueryError> {
        self.error.into_inner()
    }
}

/// Handle to one component of one query result.
#[derive(Debug, Clone, Copy)]
pub struct ComponentRef<'w> {
    column: &'w Column,
    row: usize,
    item: &'w FetchItem,
    fault: Option<&'w AccessFault>,
}

impl<'w> ComponentRef<'w> {
    /// The component's name.
    #[must_use]
    pub fn name(&self) -> &'w str {
        &self.item.name
    }

    /// Whether `set` is permitted.
    #[must_use]
    pub fn is_mutable(&self) -> bool {
        self.item.mutable
    }

    /// Read the current payload.
    #[must_use]
    pub fn get(&self) -> SerializedComponent {
        self.column.get(self.row).unwrap_or_default()
    }

    /// Replace the payload.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::NotMutable`] unless the query declared `Mut` for
    /// this component. On a guarded result the error also raises the
    /// [`AccessFault`], and every later `set` returns the first error without
    /// writing.
    pub fn set(&self, value: impl Into<SerializedComponent>) -> Result<(), QueryError> {
        if let Some(error) = self.fault.and_then(AccessFault::error) {
            return Err(error);
        }
        if !self.item.mutable {
            let error = QueryError::NotMutable {
                component: self.item.name.to_string(),
            };
            return Err(match self.fault {
                Some(fault) => fault.raise(error),
                None => error,
            });
        }
        self.column.set(self.row, value.into());
        Ok(())
    }
}

/// One matching entity and its fetched components.
#[derive(Debug, Clone)]
pub struct QueryResult<'w> {
    entity: Entity,
    components: Vec<ComponentRef<'w>>,
}

impl<'w> QueryResult<'w> {
    /// The matched entity.
    #[must_use]
    pub fn entity(&self) -> Entity {
        self.entity
    }

    /// The component at `index` in the query's Ref/Mut list.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::IndexOutOfRange`] if `index` is past the list.
    pub fn component(&self, index: usize) -> Result<&ComponentRef<'w>, QueryError> {
        self.components
            .get(index)
            .ok_or(QueryError::IndexOutOfRange {
                index,
                len: self.components.len(),
            })
    }

    /// All fetched components, in declaration order.
    #[must_use]
    pub fn components(&self) -> &[ComponentRef<'w>] {
        &self.components
    }

    /// Number of fetched components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Returns `true` for queries made only of presence filters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

/// Lazy, single-pass evaluation of a [`CompiledQuery`].
///
/// Walks archetype tables in creation order and rows in table order. Once it
/// returns `None` it stays exhausted; evaluate the query again for a fresh
/// pass.
#[derive(Debug)]
pub struct QueryIter<'w> {
    query: &'w CompiledQuery,
    tables: std::slice::Iter<'w, ArchetypeTable>,
    current: Option<(&'w ArchetypeTable, Vec<&'w Column>)>,
    row: usize,
    scope: Option<(EntityScope, &'w Entities)>,
    fault: Option<&'w AccessFault>,
}

impl<'w> QueryIter<'w> {
    fn new(query: &'w CompiledQuery, archetypes: &'w Archetypes) -> Self {
        Self {
            query,
            tables: archetypes.iter(),
            current: None,
            row: 0,
            scope: None,
            fault: None,
        }
    }

    /// Only yield entities visible from `scope`.
    #[must_use]
    pub fn scoped(mut self, scope: EntityScope, entities: &'w Entities) -> Self {
        self.scope = Some((scope, entities));
        self
    }

    /// Attach `fault` to every yielded component and stop once it is raised.
    #[must_use]
    pub fn guarded(mut self, fault: &'w AccessFault) -> Self {
        self.fault = Some(fault);
        self
    }

    fn advance_table(&mut self) -> bool {
        for table in self.tables.by_ref() {
            if table.is_empty() || !self.query.matches(table) {
                continue;
            }
            let columns = self
                .query
                .fetch
                .iter()
                .filter_map(|item| table.column(item.type_id))
                .collect();
            self.current = Some((table, columns));
            self.row = 0;
            return true;
        }
        self.current = None;
        false
    }
}

impl<'w> Iterator for QueryIter<'w> {
    type Item = QueryResult<'w>;

    fn next(&mut self) -> Option<Self::Item> {
        let query: &'w CompiledQuery = self.query;
        let fault = self.fault;
        if fault.is_some_and(AccessFault::is_raised) {
            self.current = None;
            return None;
        }
        loop {
            if let Some((table, columns)) = &self.current
                && self.row < table.len()
            {
                let table: &'w ArchetypeTable = *table;
                let row = self.row;
                self.row += 1;
                let entity = table.entities()[row];
                if let Some((scope, entities)) = self.scope
                    && !scope.admits(entities, entity)
                {
                    continue;
                }
                let components = columns
                    .iter()
                    .zip(&query.fetch)
                    .map(|(&column, item)| ComponentRef {
                        column,
                        row,
                        item,
                        fault,
                    })
                    .collect();
                return Some(QueryResult { entity, components });
            }
            if !self.advance_table() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> ComponentTypeId {
        ComponentTypeId::from_name(name)
    }

    #[test]
    fn test_build_partitions_filters() {
        let query = CompiledQuery::build(&[
            QueryFor::With("Marker".into()),
            QueryFor::Mut("Transform".into()),
            QueryFor::Without("Hidden".into()),
            QueryFor::Ref("Velocity".into()),
        ]);
        let names: Vec<_> = query.fetch().iter().map(|f| &*f.name).collect();
        assert_eq!(names, vec!["Transform", "Velocity"]);
        assert!(query.fetch()[0].mutable);
        assert!(!query.fetch()[1].mutable);
    }

    #[test]
    fn test_access_ignores_presence_filters() {
        let query = CompiledQuery::build(&[
            QueryFor::Mut("Transform".into()),
            QueryFor::Ref("Velocity".into()),
            QueryFor::With("Marker".into()),
        ]);
        let access = query.access();
        assert_eq!(access.writes, BTreeSet::from([id("Transform")]));
        assert_eq!(access.reads, BTreeSet::from([id("Velocity")]));
    }

    #[test]
    fn test_no_conflict_both_read() {
        let q1 = ComponentAccess::new().read(id("Transform"));
        let q2 = ComponentAccess::new().read(id("Transform"));
        assert!(!q1.conflicts_with(&q2));
    }

    #[test]
    fn test_conflict_read_vs_write() {
        let q1 = ComponentAccess::new().read(id("Transform"));
        let q2 = ComponentAccess::new().write(id("Transform"));
        assert!(q1.conflicts_with(&q2));
        assert!(q2.conflicts_with(&q1));
    }

    #[test]
    fn test_conflict_write_vs_write() {
        let q1 = ComponentAccess::new().write(id("Velocity"));
        let q2 = ComponentAccess::new().write(id("Velocity"));
        assert!(q1.conflicts_with(&q2));
    }

    #[test]
    fn test_no_conflict_different_types() {
        // Physics: reads Transform, writes Velocity
        let physics = ComponentAccess::new()
            .read(id("Transform"))
            .write(id("Velocity"));
        // AI: reads Transform, writes AiState
        let ai = ComponentAccess::new()
            .read(id("Transform"))
            .write(id("AiState"));
        assert!(!physics.conflicts_with(&ai));
    }

    #[test]
    fn test_matches_superset_and_disjoint() {
        let mut archetypes = Archetypes::new();
        let ab = archetypes.get_or_create(BTreeSet::from([id("A"), id("B")]));
        let abc = archetypes.get_or_create(BTreeSet::from([id("A"), id("B"), id("C")]));
        let a = archetypes.get_or_create(BTreeSet::from([id("A")]));

        let query = CompiledQuery::build(&[
            QueryFor::Ref("A".into()),
            QueryFor::With("B".into()),
            QueryFor::Without("C".into()),
        ]);
        assert!(query.matches(archetypes.get(ab).unwrap()));
        assert!(!query.matches(archetypes.get(abc).unwrap()));
        assert!(!query.matches(archetypes.get(a).unwrap()));
    }

    fn table_with_rows(names: &[&str], rows: u32) -> Archetypes {
        let mut archetypes = Archetypes::new();
        let types: BTreeSet<_> = names.iter().map(|name| id(name)).collect();
        let target = archetypes.get_or_create(types);
        let table = archetypes.get_mut(target).unwrap();
        for index in 0..rows {
            let values = names.iter().map(|_| "0".to_string()).collect();
            table.push_row(Entity::from_raw_parts(index, 0), values);
        }
        archetypes
    }

    #[test]
    fn test_raised_fault_refuses_writes_and_halts_iteration() {
        let archetypes = table_with_rows(&["Health", "Armor"], 3);
        let query = CompiledQuery::build(&[
            QueryFor::Ref("Health".into()),
            QueryFor::Mut("Armor".into()),
        ]);
        let fault = AccessFault::new();
        let mut iter = query.iter(&archetypes).guarded(&fault);

        let first = iter.next().unwrap();
        first.component(1).unwrap().set("5").unwrap();
        let err = first.component(0).unwrap().set("1").unwrap_err();
        assert!(matches!(err, QueryError::NotMutable { ref component } if component == "Health"));
        assert!(fault.is_raised());

        // The legal write is refused after the fault, and nothing more is yielded.
        assert_eq!(first.component(1).unwrap().set("6"), Err(err.clone()));
        assert_eq!(first.component(1).unwrap().get(), "5");
        assert!(iter.next().is_none());
        assert_eq!(fault.into_error(), Some(err));
    }

    #[test]
    fn test_unguarded_set_error_is_local() {
        let archetypes = table_with_rows(&["Health"], 2);
        let query = CompiledQuery::build(&[QueryFor::Ref("Health".into())]);
        let mut iter = query.iter(&archetypes);
        let first = iter.next().unwrap();
        assert!(first.component(0).unwrap().set("1").is_err());
        assert!(iter.next().is_some());
    }
}
