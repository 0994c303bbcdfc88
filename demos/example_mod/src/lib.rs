//! Example mod.
//!
//! Registers two `Update` systems:
//!
//! - [`spin_cube`] rotates every marked transform a little each frame.
//! - [`my_system`] spawns `MyComponent` entities until ten exist.

pub mod my_system;
pub mod spin_cube;

use modecs_app::{ConfigError, Mod, ModSetup, Schedule};
use tracing::info;

/// The example mod.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExampleMod;

impl Mod for ExampleMod {
    fn name(&self) -> &str {
        "example_mod"
    }

    fn setup(&self, setup: &mut ModSetup<'_>) -> Result<(), ConfigError> {
        info!(mod_id = %setup.mod_id(), "example mod setting up");
        setup
            .app()?
            .add_systems(Schedule::Update, [spin_cube::system(), my_system::system()]);
        Ok(())
    }
}
