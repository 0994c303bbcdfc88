//! # modecs_component
//!
//! The storage half of the mod ECS runtime: entity identities, archetype
//! tables of opaque component payloads, and the query engine.
//!
//! This crate provides:
//!
//! - [`Entity`] and [`Entities`]: generational ids with deferred reservation.
//! - [`ComponentTypeId`] and [`ComponentRegistry`]: name-derived component ids.
//! - [`ArchetypeTable`]: SoA storage grouped by component combination.
//! - [`CompiledQuery`]: declarative data access and lazy evaluation.
//! - [`EntityScope`]: the world or one sandbox, as seen by a system.
//! - [`World`]: the state the runtime owns and mutates between stages.

pub mod archetype;
pub mod component;
pub mod entity;
pub mod error;
pub mod query;
pub mod sandbox;
pub mod world;

pub use archetype::{ArchetypeId, ArchetypeTable, Archetypes, Column};
pub use component::{Bundle, ComponentRegistry, ComponentTypeId, SerializedComponent};
pub use entity::{Entities, Entity, EntityLocation};
pub use error::{EntityError, QueryError};
pub use query::{
    AccessFault, CompiledQuery, ComponentAccess, ComponentRef, FetchItem, QueryFor, QueryIter,
    QueryResult,
};
pub use sandbox::{EntityScope, Sandboxes};
pub use world::World;
