//! Component identity, the component registry, and bundles.
//!
//! Components are named by a globally unique string (for example
//! `"my_mod::Health"`) and carry an opaque serialized payload. The runtime
//! never looks inside a payload: encoding and decoding belong to the mod.
//!
//! ## Type Identity
//!
//! [`ComponentTypeId`] is derived from the component's **string name** using
//! the FNV-1a 64-bit hash algorithm. This is deterministic and
//! language-neutral, so a guest written in any language computes the same ID
//! for the same name.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::error;

/// The opaque payload stored for one component on one entity.
pub type SerializedComponent = String;

/// A unique identifier for a component type, derived from its string name
/// using the FNV-1a 64-bit hash algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ComponentTypeId(pub u64);

impl ComponentTypeId {
    /// FNV-1a 64-bit offset basis.
    const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;

    /// FNV-1a 64-bit prime.
    const FNV_PRIME: u64 = 0x0100_0000_01b3;

    /// Compute the [`ComponentTypeId`] from a component's string name.
    ///
    /// # Algorithm (FNV-1a 64-bit)
    ///
    /// ```text
    /// hash = 0xcbf29ce484222325          (offset basis)
    /// for each byte in name.as_bytes():
    ///     hash = hash XOR byte
    ///     hash = hash * 0x00000100000001b3  (prime)
    /// return hash
    /// ```
    #[must_use]
    pub const fn from_name(name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut hash = Self::FNV_OFFSET_BASIS;
        let mut i = 0;
        while i < bytes.len() {
            hash ^= bytes[i] as u64;
            hash = hash.wrapping_mul(Self::FNV_PRIME);
            i += 1;
        }
        Self(hash)
    }
}

impl std::fmt::Display for ComponentTypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Maps component names to their ids.
///
/// Backed by a concurrent map so systems running in parallel can register
/// names while they queue commands.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    names: DashMap<ComponentTypeId, Arc<str>>,
}

impl ComponentRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component name, returning its id.
    ///
    /// Registering the same name twice is a no-op. If a different name already
    /// hashed to the same id, the collision is logged and the first name kept.
    pub fn register(&self, name: &str) -> ComponentTypeId {
        let id = ComponentTypeId::from_name(name);
        let entry = self.names.entry(id).or_insert_with(|| Arc::from(name));
        if &**entry != name {
            error!(
                %id,
                existing = &**entry,
                name,
                "component name hash collision"
            );
        }
        id
    }

    /// The registered name for an id.
    #[must_use]
    pub fn name(&self, id: ComponentTypeId) -> Option<Arc<str>> {
        self.names.get(&id).map(|name| Arc::clone(&name))
    }

    /// Returns `true` if a component with this name has been registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(&ComponentTypeId::from_name(name))
    }

    /// Number of registered component types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns `true` if nothing has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// An ordered collection of `(component name, payload)` pairs applied to an
/// entity together.
///
/// Duplicate names are allowed when building; the last occurrence wins when
/// the bundle is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle(Vec<(String, SerializedComponent)>);

impl Bundle {
    /// An empty bundle.
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a component, builder style.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, payload: impl Into<SerializedComponent>) -> Self {
        self.push(name, payload);
        self
    }

    /// Append a component.
    pub fn push(&mut self, name: impl Into<String>, payload: impl Into<SerializedComponent>) {
        self.0.push((name.into(), payload.into()));
    }

    /// Number of entries, duplicates included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the bundle has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate the raw entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(name, payload)| (name.as_str(), payload.as_str()))
    }

    /// Resolve duplicate names (last occurrence wins), keeping the position of
    /// each name's first occurrence.
    #[must_use]
    pub fn normalized(self) -> Vec<(String, SerializedComponent)> {
        let mut positions: HashMap<String, usize> = HashMap::with_capacity(self.0.len());
        let mut out: Vec<(String, SerializedComponent)> = Vec::with_capacity(self.0.len());
        for (name, payload) in self.0 {
            match positions.get(&name) {
                Some(&pos) => out[pos].1 = payload,
                None => {
                    positions.insert(name.clone(), out.len());
                    out.push((name, payload));
                }
            }
        }
        out
    }
}

impl<N, P> FromIterator<(N, P)> for Bundle
where
    N: Into<String>,
    P: Into<SerializedComponent>,
{
    fn from_iter<I: IntoIterator<Item = (N, P)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, payload)| (name.into(), payload.into()))
                .collect(),
        )
    }
}

impl From<Vec<(String, SerializedComponent)>> for Bundle {
    fn from(entries: Vec<(String, SerializedComponent)>) -> Self {
        Self(entries)
    }
}
