//! System runner: executes one invocation of a system and captures traps.
//!
//! A trap (the system function returning an error, or panicking) aborts only
//! that invocation. Commands queued before the trap are still handed back so
//! the runtime can apply them with the rest of the stage.
//!
//! Writing through a `Ref` query result is an illegal access. It traps the
//! invocation even if the system ignores the returned error, and nothing the
//! system queues after it is kept.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use modecs_component::{AccessFault, EntityScope, World};
use tracing::trace;

use crate::commands::CommandBuffer;
use crate::context::SystemContext;
use crate::error::SystemTrap;
use crate::system::System;

/// Result of one system invocation.
#[derive(Debug)]
pub struct SystemOutcome {
    /// Name of the system that ran.
    pub system: String,
    /// Commands queued during the invocation, trap or not.
    pub commands: CommandBuffer,
    /// `Err` if the invocation trapped.
    pub result: Result<(), SystemTrap>,
}

impl SystemOutcome {
    /// Returns `true` if the invocation trapped.
    #[must_use]
    pub fn trapped(&self) -> bool {
        self.result.is_err()
    }
}

/// Runs a registered system against the world.
///
/// Cheap to clone; the system itself is shared.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    system: Arc<System>,
}

impl SystemRunner {
    /// Create a runner for `system`.
    #[must_use]
    pub fn new(system: System) -> Self {
        Self {
            system: Arc::new(system),
        }
    }

    /// Returns the system name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.system.name()
    }

    /// The system being run.
    #[must_use]
    pub fn system(&self) -> &System {
        &self.system
    }

    /// Run one invocation against the world scope.
    ///
    /// Never fails: traps are reported through [`SystemOutcome::result`].
    pub fn run(&self, world: &World, tick_id: u64) -> SystemOutcome {
        self.run_in(world, EntityScope::World, tick_id)
    }

    /// Run one invocation that only sees and targets entities in `scope`.
    pub fn run_in(&self, world: &World, scope: EntityScope, tick_id: u64) -> SystemOutcome {
        let system = self.system.as_ref();
        let fault = AccessFault::new();
        trace!(system = system.name(), tick_id, %scope, "running system");

        let (returned, commands) = {
            let mut ctx = SystemContext::new(world, system, scope, &fault, tick_id);
            let returned = panic::catch_unwind(AssertUnwindSafe(|| system.call(&mut ctx)));
            let commands = ctx
                .into_commands()
                .map(|commands| commands.into_buffer())
                .unwrap_or_default();
            (returned, commands)
        };

        let result = match (fault.into_error(), returned) {
            (Some(error), _) => Err(SystemTrap::IllegalAccess {
                system: system.name().to_string(),
                error,
            }),
            (None, Ok(Ok(()))) => Ok(()),
            (None, Ok(Err(err))) => Err(SystemTrap::Failed {
                system: system.name().to_string(),
                message: format!("{err:#}"),
            }),
            (None, Err(payload)) => Err(SystemTrap::Panicked {
                system: system.name().to_string(),
                message: panic_message(payload.as_ref()),
            }),
        };

        SystemOutcome {
            system: system.name().to_string(),
            commands,
            result,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
