//! System declarations.

use std::fmt;
use std::sync::Arc;

use modecs_component::{CompiledQuery, ComponentAccess, QueryFor};

use crate::context::SystemContext;

/// The function a system runs once per invocation.
pub type SystemFn = dyn Fn(&mut SystemContext<'_>) -> anyhow::Result<()> + Send + Sync;

/// A named unit of work together with its declared params and ordering
/// constraints.
///
/// Built with the `add_*`, `before` and `after` calls, then moved into a
/// schedule. Once moved it can no longer be changed.
///
/// ```rust
/// use modecs_component::QueryFor;
/// use modecs_system::System;
///
/// let mut spin = System::new("spin", |ctx| {
///     for result in ctx.query(0)? {
///         let transform = result.component(0)?;
///         transform.set(transform.get())?;
///     }
///     Ok(())
/// });
/// spin.add_query(&[
///     QueryFor::Mut("game::Transform".into()),
///     QueryFor::With("game::Spinning".into()),
/// ]);
///
/// let mut render = System::new("render", |_ctx| Ok(()));
/// render.after(&spin);
/// ```
#[derive(Clone)]
pub struct System {
    name: String,
    commands: bool,
    queries: Vec<CompiledQuery>,
    filters: Vec<Vec<QueryFor>>,
    before: Vec<String>,
    after: Vec<String>,
    run: Arc<SystemFn>,
}

impl System {
    /// Create a system with no params.
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(&mut SystemContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            commands: false,
            queries: Vec::new(),
            filters: Vec::new(),
            before: Vec::new(),
            after: Vec::new(),
            run: Arc::new(run),
        }
    }

    /// Declare the Commands param.
    pub fn add_commands(&mut self) -> &mut Self {
        self.commands = true;
        self
    }

    /// Declare a Query param. Queries are addressed by declaration order.
    pub fn add_query(&mut self, filters: &[QueryFor]) -> &mut Self {
        self.queries.push(CompiledQuery::build(filters));
        self.filters.push(filters.to_vec());
        self
    }

    /// Order this system before `other` within the same schedule.
    pub fn before(&mut self, other: &System) -> &mut Self {
        self.before.push(other.name.clone());
        self
    }

    /// Order this system after `other` within the same schedule.
    pub fn after(&mut self, other: &System) -> &mut Self {
        self.after.push(other.name.clone());
        self
    }

    /// The system's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the Commands param was declared.
    #[must_use]
    pub fn has_commands(&self) -> bool {
        self.commands
    }

    /// Declared queries, compiled.
    #[must_use]
    pub fn queries(&self) -> &[CompiledQuery] {
        &self.queries
    }

    /// Declared queries, as written.
    #[must_use]
    pub fn query_filters(&self) -> &[Vec<QueryFor>] {
        &self.filters
    }

    /// Names of systems this one must run before.
    #[must_use]
    pub fn before_names(&self) -> &[String] {
        &self.before
    }

    /// Names of systems this one must run after.
    #[must_use]
    pub fn after_names(&self) -> &[String] {
        &self.after
    }

    /// Combined data access of every declared query.
    #[must_use]
    pub fn access(&self) -> ComponentAccess {
        let mut access = ComponentAccess::new();
        for query in &self.queries {
            access.extend(&query.access());
        }
        access
    }

    pub(crate) fn call(&self, ctx: &mut SystemContext<'_>) -> anyhow::Result<()> {
        (self.run)(ctx)
    }
}

impl fmt::Debug for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("System")
            .field("name", &self.name)
            .field("commands", &self.commands)
            .field("queries", &self.filters)
            .field("before", &self.before)
            .field("after", &self.after)
            .finish_non_exhaustive()
    }
}
