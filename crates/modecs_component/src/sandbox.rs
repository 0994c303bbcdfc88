//! Sandboxes: disjoint subsets of the world that mods can be confined to.
//!
//! A sandbox is an ordinary entity registered as a sandbox root. Entities join
//! a sandbox explicitly and belong to at most one sandbox at a time. A root may
//! itself sit inside another sandbox; the members of the inner sandbox are not
//! visible from the outer one.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::{Entities, Entity};

/// The set of entities a system may observe and target.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum EntityScope {
    /// Every entity that is not inside a sandbox.
    #[default]
    World,
    /// Only the direct members of the given sandbox.
    Sandbox(Entity),
}

impl EntityScope {
    /// The sandbox root, for sandbox scopes.
    #[must_use]
    pub fn sandbox(self) -> Option<Entity> {
        match self {
            Self::World => None,
            Self::Sandbox(root) => Some(root),
        }
    }

    /// Returns `true` if `entity` is alive and visible from this scope.
    #[must_use]
    pub fn admits(self, entities: &Entities, entity: Entity) -> bool {
        entities.is_alive(entity) && entities.sandbox_of(entity) == self.sandbox()
    }
}

impl fmt::Display for EntityScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::World => write!(f, "world"),
            Self::Sandbox(root) => write!(f, "sandbox {root}"),
        }
    }
}

/// Registry of sandbox roots and their members.
#[derive(Debug, Default)]
pub struct Sandboxes {
    members: HashMap<Entity, BTreeSet<Entity>>,
}

impl Sandboxes {
    /// Returns `true` if `entity` is a sandbox root.
    #[must_use]
    pub fn contains(&self, entity: Entity) -> bool {
        self.members.contains_key(&entity)
    }

    /// Direct members of a sandbox.
    #[must_use]
    pub fn members(&self, root: Entity) -> Option<&BTreeSet<Entity>> {
        self.members.get(&root)
    }

    /// Sandbox roots, in no particular order.
    pub fn roots(&self) -> impl Iterator<Item = Entity> + '_ {
        self.members.keys().copied()
    }

    /// Number of sandboxes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns `true` if there are no sandboxes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub(crate) fn create(&mut self, root: Entity) {
        self.members.entry(root).or_default();
    }

    pub(crate) fn join(&mut self, root: Entity, entity: Entity) {
        if let Some(members) = self.members.get_mut(&root) {
            members.insert(entity);
        }
    }

    pub(crate) fn leave(&mut self, root: Entity, entity: Entity) {
        if let Some(members) = self.members.get_mut(&root) {
            members.remove(&entity);
        }
    }

    pub(crate) fn dissolve(&mut self, root: Entity) -> Option<BTreeSet<Entity>> {
        self.members.remove(&root)
    }
}
