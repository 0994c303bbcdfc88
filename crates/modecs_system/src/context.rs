//! Per-invocation execution context provided to system functions.

use modecs_component::{AccessFault, EntityScope, QueryIter, QueryResult, World};

use crate::commands::Commands;
use crate::error::SystemError;
use crate::system::System;

/// Context provided to a system function on each invocation.
///
/// Binds the system's declared params to the world, restricted to one
/// [`EntityScope`]. Query handles borrow the world rather than the context, so
/// a system can iterate a query while queuing commands. Every param is guarded
/// by the invocation's [`AccessFault`].
#[derive(Debug)]
pub struct SystemContext<'w> {
    world: &'w World,
    system: &'w System,
    scope: EntityScope,
    fault: &'w AccessFault,
    tick_id: u64,
    commands: Option<Commands<'w>>,
}

impl<'w> SystemContext<'w> {
    /// Create a context for one invocation of `system` in `scope`.
    #[must_use]
    pub fn new(
        world: &'w World,
        system: &'w System,
        scope: EntityScope,
        fault: &'w AccessFault,
        tick_id: u64,
    ) -> Self {
        Self {
            world,
            system,
            scope,
            fault,
            tick_id,
            commands: system
                .has_commands()
                .then(|| Commands::scoped(world, scope).guarded(fault)),
        }
    }

    /// The entities this invocation may see and target.
    #[must_use]
    pub fn scope(&self) -> EntityScope {
        self.scope
    }

    /// The current tick ID.
    #[must_use]
    pub fn tick_id(&self) -> u64 {
        self.tick_id
    }

    /// Name of the running system.
    #[must_use]
    pub fn system_name(&self) -> &'w str {
        self.system.name()
    }

    /// The Commands param.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::CommandsNotDeclared`] if the system did not call
    /// `add_commands`.
    pub fn commands(&mut self) -> Result<&mut Commands<'w>, SystemError> {
        let system = self.system.name();
        self.commands
            .as_mut()
            .ok_or_else(|| SystemError::CommandsNotDeclared {
                system: system.to_string(),
            })
    }

    /// Evaluate the query param at `index` (declaration order).
    ///
    /// Every call starts a fresh pass over the matching entities.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::QueryNotDeclared`] if fewer queries were declared.
    pub fn query(&self, index: usize) -> Result<Query<'w>, SystemError> {
        let queries = self.system.queries();
        let query = queries
            .get(index)
            .ok_or_else(|| SystemError::QueryNotDeclared {
                system: self.system.name().to_string(),
                index,
                declared: queries.len(),
            })?;
        Ok(Query {
            iter: self.world.query_in(query, self.scope).guarded(self.fault),
        })
    }

    /// Take the commands queued during the invocation.
    #[must_use]
    pub fn into_commands(self) -> Option<Commands<'w>> {
        self.commands
    }
}

/// The Query param: a lazy, single-pass sequence of matching entities.
#[derive(Debug)]
pub struct Query<'w> {
    iter: QueryIter<'w>,
}

impl<'w> Iterator for Query<'w> {
    type Item = QueryResult<'w>;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next()
    }
}
