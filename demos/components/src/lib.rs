//! Example component definitions for the mod ECS runtime.
//!
//! The runtime stores every component as an opaque string. These types show
//! how a mod gives that string meaning: each implements [`GuestComponent`],
//! which fixes the component's globally unique name and encodes the value as
//! JSON.

use glam::{Quat, Vec3};
use modecs_component::{ComponentTypeId, SerializedComponent};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A typed view of a runtime component.
pub trait GuestComponent: Serialize + DeserializeOwned {
    /// Globally unique component name, `"module::TypeName"`.
    const NAME: &'static str;

    /// Returns the [`ComponentTypeId`] the runtime derives from [`Self::NAME`].
    fn component_type_id() -> ComponentTypeId {
        ComponentTypeId::from_name(Self::NAME)
    }

    /// Encode as a payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be encoded as JSON.
    fn to_payload(&self) -> Result<SerializedComponent, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not valid JSON for this type.
    fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// A `(name, payload)` pair ready to push into a bundle.
    ///
    /// # Errors
    ///
    /// As [`GuestComponent::to_payload`].
    fn entry(&self) -> Result<(String, SerializedComponent), serde_json::Error> {
        Ok((Self::NAME.to_string(), self.to_payload()?))
    }
}

/// Position, rotation and scale in 3D space.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Transform {
    /// World-space position.
    pub translation: Vec3,
    /// Rotation as a unit quaternion.
    pub rotation: Quat,
    /// Per-axis scale.
    pub scale: Vec3,
}

impl Transform {
    /// The identity transform: origin, no rotation, unit scale.
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    /// Create a transform at `translation` with default rotation and scale.
    #[must_use]
    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    /// Apply a further rotation about the local X axis.
    #[must_use]
    pub fn rotated_x(mut self, angle: f32) -> Self {
        self.rotation = (self.rotation * Quat::from_rotation_x(angle)).normalize();
        self
    }

    /// Compute the 4×4 model matrix for this transform.
    #[must_use]
    pub fn to_matrix(&self) -> glam::Mat4 {
        glam::Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl GuestComponent for Transform {
    const NAME: &'static str = "transform::Transform";
}

/// Data spawned by the example mod's `my-system`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MyComponent {
    /// Counter value.
    pub value: i32,
}

impl GuestComponent for MyComponent {
    const NAME: &'static str = "example_mod::MyComponent";
}

/// Marks the entities the example mod spins.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MyMarker;

impl GuestComponent for MyMarker {
    const NAME: &'static str = "host::MyMarker";
}
