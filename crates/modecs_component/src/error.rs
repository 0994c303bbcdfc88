//! Storage and query error types.

use crate::entity::Entity;

/// Errors raised by entity-liveness checks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntityError {
    /// The entity is not alive (never spawned, or despawned since).
    #[error("entity {0} not found")]
    NotFound(Entity),

    /// The entity is alive but is not a sandbox.
    #[error("entity {0} is not a sandbox")]
    NotASandbox(Entity),

    /// Placing the entity in the sandbox would make a sandbox contain itself.
    #[error("entity {entity} cannot be placed in sandbox {sandbox}: it would contain itself")]
    SandboxCycle {
        /// The entity being placed.
        entity: Entity,
        /// The target sandbox.
        sandbox: Entity,
    },
}

/// Errors raised while reading or writing query results.
///
/// Inside a running system these are traps: they abort the current
/// invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// `set` was called on a component the query did not declare `Mut`.
    #[error("component '{component}' is not mutable in this query")]
    NotMutable {
        /// Name of the component.
        component: String,
    },

    /// `component(index)` addressed past the query's Ref/Mut list.
    #[error("component index {index} out of range for a query fetching {len} components")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of Ref/Mut items in the query.
        len: usize,
    },
}
