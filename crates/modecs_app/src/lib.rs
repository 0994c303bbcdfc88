//! # modecs_app
//!
//! The host runtime. It owns the world, loads mods, plans their systems per
//! schedule and drives the frame loop.
//!
//! ## Frame sequence
//!
//! 1. Run `ModStartup` systems added since the previous frame, then drop them.
//! 2. Run the fixed-timestep schedules as often as the accumulator allows.
//! 3. Run the remaining enabled schedules in order.
//!
//! Inside a schedule, systems run in parallel batches computed from their
//! ordering constraints and component access. Structural changes queued by
//! systems are applied exclusively after the last batch.
//!
//! ## Sandboxes
//!
//! A mod starts out running against the world. The host can create sandboxes
//! with [`Runtime::create_sandbox`] and move a mod's access into them with
//! [`Runtime::enable_access`] and [`Runtime::disable_access`]. A system
//! running in a sandbox only sees and targets that sandbox's members, so the
//! same system in different sandboxes runs in one batch.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use modecs_app::{ConfigError, Mod, ModSetup, Runtime, RuntimeConfig, Schedule};
//! use modecs_system::System;
//!
//! struct Hello;
//!
//! impl Mod for Hello {
//!     fn name(&self) -> &str {
//!         "hello"
//!     }
//!
//!     fn setup(&self, setup: &mut ModSetup<'_>) -> Result<(), ConfigError> {
//!         let greet = System::new("greet", |ctx| {
//!             println!("tick {}", ctx.tick_id());
//!             Ok(())
//!         });
//!         setup.app()?.add_systems(Schedule::Update, [greet]);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut runtime = Runtime::new(RuntimeConfig::default().with_max_ticks(3))?;
//!     runtime.load_mod(&Hello)?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod registry;
pub mod schedule;
pub mod scheduler;
pub mod setup;
pub mod tick;

pub use config::RuntimeConfig;
pub use error::{ConfigError, RuntimeError};
pub use registry::{ScheduleSystems, SystemRegistry};
pub use schedule::{ModSchedules, Schedule};
pub use scheduler::{Batch, RegisteredSystem, SchedulePlan, build_plan};
pub use setup::{App, Mod, ModId, ModSetup};
pub use tick::{FrameReport, Runtime, RuntimeState, StageReport};
