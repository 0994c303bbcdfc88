//! Keeps a fixed population of `MyComponent` entities.

use components::{GuestComponent, MyComponent, Transform};
use modecs_component::{Bundle, QueryFor};
use modecs_system::System;
use tracing::debug;

/// Number of `MyComponent` entities the system maintains.
pub const TARGET_COUNT: usize = 10;

/// Build the `my-system` system.
///
/// Each frame it counts the entities carrying `MyComponent` and, while fewer
/// than [`TARGET_COUNT`] exist, spawns one more with a default transform.
#[must_use]
pub fn system() -> System {
    let mut system = System::new("my-system", |ctx| {
        let count = ctx.query(0)?.count();
        if count < TARGET_COUNT {
            let bundle = Bundle::from(vec![
                MyComponent { value: 0 }.entry()?,
                Transform::default().entry()?,
            ]);
            let entity = ctx.commands()?.spawn(bundle).id();
            debug!(tick_id = ctx.tick_id(), count, %entity, "spawning");
        }
        Ok(())
    });
    system
        .add_commands()
        .add_query(&[QueryFor::With(MyComponent::NAME.into())]);
    system
}
