//! Entity identifiers and the entity store.
//!
//! An [`Entity`] is an `(index, generation)` pair. The index addresses a slot
//! in [`Entities`]; the generation is bumped every time the slot is freed, so
//! handles to a despawned entity go stale instead of aliasing whatever entity
//! reuses the slot.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::archetype::ArchetypeId;
use crate::error::EntityError;

/// A generational entity identifier.
///
/// Entities are pure identifiers. An id is only valid while its generation
/// matches the live entity stored at its index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity {
    index: u32,
    generation: u32,
}

impl Entity {
    /// An id that never refers to a live entity.
    pub const PLACEHOLDER: Self = Self::from_raw_parts(u32::MAX, u32::MAX);

    /// Build an entity from its raw parts.
    #[must_use]
    pub const fn from_raw_parts(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index in the entity store.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation of the slot this handle was issued for.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Pack into a single `u64` (generation in the high half).
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Inverse of [`Entity::to_bits`].
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Where a live entity's row is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    /// The archetype table holding the entity.
    pub archetype: ArchetypeId,
    /// Row inside that table.
    pub row: usize,
}

#[derive(Debug, Clone, Copy)]
struct EntityMeta {
    generation: u32,
    alive: bool,
    location: Option<EntityLocation>,
    sandbox: Option<Entity>,
}

#[derive(Debug, Default)]
struct Reservations {
    /// How many indices were taken from the back of the free list.
    from_free: usize,
    /// How many indices past the end of `meta` were handed out.
    fresh: u32,
}

impl Reservations {
    fn is_empty(&self) -> bool {
        self.from_free == 0 && self.fresh == 0
    }
}

/// Owns entity identities and their liveness.
///
/// Indices of despawned entities are recycled with an incremented
/// generation. While systems run, ids are handed out through
/// [`Entities::reserve`], which only needs a shared reference; reserved ids
/// become alive when [`Entities::flush_reserved`] runs at the start of
/// command application.
#[derive(Debug, Default)]
pub struct Entities {
    meta: Vec<EntityMeta>,
    free: Vec<u32>,
    reserved: Mutex<Reservations>,
    alive: usize,
}

impl Entities {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a live entity, reusing a freed index when one is available.
    ///
    /// Outstanding reservations must have been flushed first, otherwise the
    /// free-list slots they claimed would be handed out twice.
    pub fn allocate(&mut self) -> Entity {
        debug_assert!(
            self.reserved.get_mut().is_empty(),
            "allocate called with unflushed reservations"
        );
        let entity = match self.free.pop() {
            Some(index) => {
                let meta = &mut self.meta[index as usize];
                meta.alive = true;
                meta.location = None;
                meta.sandbox = None;
                Entity::from_raw_parts(index, meta.generation)
            }
            None => {
                let index = self.meta.len() as u32;
                self.meta.push(EntityMeta {
                    generation: 0,
                    alive: true,
                    location: None,
                    sandbox: None,
                });
                Entity::from_raw_parts(index, 0)
            }
        };
        self.alive += 1;
        entity
    }

    /// Reserve an entity id without exclusive access.
    ///
    /// The id is stable immediately but the entity is not alive until
    /// [`Entities::flush_reserved`] is called.
    pub fn reserve(&self) -> Entity {
        let mut reserved = self.reserved.lock();
        if reserved.from_free < self.free.len() {
            let index = self.free[self.free.len() - 1 - reserved.from_free];
            reserved.from_free += 1;
            Entity::from_raw_parts(index, self.meta[index as usize].generation)
        } else {
            let index = self.meta.len() as u32 + reserved.fresh;
            reserved.fresh += 1;
            Entity::from_raw_parts(index, 0)
        }
    }

    /// Turn every outstanding reservation into a live entity.
    ///
    /// Returns the materialised entities in reservation order; they have no
    /// location yet.
    pub fn flush_reserved(&mut self) -> Vec<Entity> {
        let reserved = std::mem::take(self.reserved.get_mut());
        let mut flushed = Vec::with_capacity(reserved.from_free + reserved.fresh as usize);

        for _ in 0..reserved.from_free {
            if let Some(index) = self.free.pop() {
                let meta = &mut self.meta[index as usize];
                meta.alive = true;
                meta.location = None;
                meta.sandbox = None;
                flushed.push(Entity::from_raw_parts(index, meta.generation));
            }
        }
        for _ in 0..reserved.fresh {
            let index = self.meta.len() as u32;
            self.meta.push(EntityMeta {
                generation: 0,
                alive: true,
                location: None,
                sandbox: None,
            });
            flushed.push(Entity::from_raw_parts(index, 0));
        }

        self.alive += flushed.len();
        flushed
    }

    /// Drop every outstanding reservation without materialising it.
    ///
    /// Returns how many ids were released.
    pub fn discard_reserved(&mut self) -> usize {
        let reserved = std::mem::take(self.reserved.get_mut());
        reserved.from_free + reserved.fresh as usize
    }

    /// Despawn an entity, making every handle to it stale.
    ///
    /// Returns the location the entity occupied, if it had one.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::NotFound`] if the entity is not alive.
    pub fn despawn(&mut self, entity: Entity) -> Result<Option<EntityLocation>, EntityError> {
        if !self.is_alive(entity) {
            return Err(EntityError::NotFound(entity));
        }
        let meta = &mut self.meta[entity.index as usize];
        meta.generation = meta.generation.wrapping_add(1);
        meta.alive = false;
        let location = meta.location.take();
        meta.sandbox = None;
        self.free.push(entity.index);
        self.alive -= 1;
        Ok(location)
    }

    /// Returns `true` if `entity` refers to the current live occupant of its slot.
    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.meta
            .get(entity.index as usize)
            .is_some_and(|meta| meta.alive && meta.generation == entity.generation)
    }

    /// Location of a live entity.
    #[must_use]
    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        if !self.is_alive(entity) {
            return None;
        }
        self.meta[entity.index as usize].location
    }

    /// Record where a live entity is stored. Ignored for stale handles.
    pub fn set_location(&mut self, entity: Entity, location: EntityLocation) {
        if self.is_alive(entity) {
            self.meta[entity.index as usize].location = Some(location);
        }
    }

    /// The sandbox a live entity belongs to, if any.
    #[must_use]
    pub fn sandbox_of(&self, entity: Entity) -> Option<Entity> {
        if !self.is_alive(entity) {
            return None;
        }
        self.meta[entity.index as usize].sandbox
    }

    pub(crate) fn set_sandbox(&mut self, entity: Entity, sandbox: Option<Entity>) {
        if self.is_alive(entity) {
            self.meta[entity.index as usize].sandbox = sandbox;
        }
    }

    /// Number of live entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.alive
    }

    /// Returns `true` if no entity is alive.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alive == 0
    }
}
