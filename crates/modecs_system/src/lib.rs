//! # modecs_system
//!
//! The surface mod authors write systems against.
//!
//! A [`System`] is a named function plus its declared params: an optional
//! Commands param and any number of queries. On each invocation the
//! [`SystemRunner`] binds those params to the world through a
//! [`SystemContext`]; reads and `Mut` writes go straight to component
//! storage, structural changes are queued in a [`CommandBuffer`].
//!
//! ## Usage
//!
//! ```rust
//! use modecs_component::{Bundle, QueryFor, World};
//! use modecs_system::{System, SystemRunner};
//!
//! let mut world = World::new();
//! world.spawn(Bundle::new().with("game::Health", "0"));
//!
//! let mut reaper = System::new("reaper", |ctx| {
//!     for result in ctx.query(0)? {
//!         if result.component(0)?.get() == "0" {
//!             ctx.commands()?.entity(result.entity()).despawn();
//!         }
//!     }
//!     Ok(())
//! });
//! reaper
//!     .add_commands()
//!     .add_query(&[QueryFor::Ref("game::Health".into())]);
//!
//! let outcome = SystemRunner::new(reaper).run(&world, 1);
//! outcome.commands.apply(&mut world);
//! assert_eq!(world.entity_count(), 0);
//! ```

pub mod commands;
pub mod context;
pub mod error;
pub mod runner;
pub mod system;

pub use commands::{ApplyReport, Command, CommandBuffer, Commands, EntityCommands};
pub use context::{Query, SystemContext};
pub use error::{SystemError, SystemTrap};
pub use runner::{SystemOutcome, SystemRunner};
pub use system::{System, SystemFn};
