//! Spin cube system: rotates marked transforms about their X axis.

use components::{GuestComponent, MyMarker, Transform};
use modecs_component::QueryFor;
use modecs_system::System;
use tracing::trace;

/// Rotation applied per frame, in radians.
pub const DELTA: f32 = 0.015;

/// Build the `spin-cube` system.
#[must_use]
pub fn system() -> System {
    let mut system = System::new("spin-cube", |ctx| {
        for result in ctx.query(0)? {
            let component = result.component(0)?;
            let transform = Transform::from_payload(&component.get())?.rotated_x(DELTA);
            component.set(transform.to_payload()?)?;
            trace!(entity = %result.entity(), "spun");
        }
        Ok(())
    });
    system.add_query(&[
        QueryFor::Mut(Transform::NAME.into()),
        QueryFor::With(MyMarker::NAME.into()),
    ]);
    system
}
