// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Global addressing for units hosted on the grid.
//!
//! An [Address] is created once per unit and never changes. Only `distributable`
//! addresses take part in placement and relocation; the rest are pinned to the node
//! that created them (internal control units, for example).

use std::fmt::Display;
use std::hash::{Hash, Hasher};

use rand::Rng;

/// A globally unique identifier for an addressable unit of work
#[derive(Clone, Debug, Eq)]
pub struct Address {
    id: String,
    name: Option<String>,
    distributable: bool,
}

impl Address {
    /// Build a distributable address whose id is derived from `key`. Two nodes calling
    /// this with the same key produce the same address.
    pub fn from_key(key: impl Into<String>) -> Self {
        Self {
            id: key.into(),
            name: None,
            distributable: true,
        }
    }

    /// Build a fresh distributable address with a random 128-bit id
    pub fn unique() -> Self {
        let id: u128 = rand::thread_rng().gen();
        Self {
            id: format!("{id:032x}"),
            name: None,
            distributable: true,
        }
    }

    /// Build an address that is always hosted on the node which created it
    pub fn local(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name: Some(name),
            distributable: false,
        }
    }

    /// Rebuild an address received over the wire
    pub fn from_parts(id: String, name: Option<String>, distributable: bool) -> Self {
        Self {
            id,
            name,
            distributable,
        }
    }

    /// Attach a human-readable name, used in logs only
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The id string hashed onto the ring
    pub fn id_string(&self) -> &str {
        &self.id
    }

    /// The optional display name
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether this address participates in placement and relocation
    pub fn is_distributable(&self) -> bool {
        self.distributable
    }
}

// identity is the id alone, the name is decoration
impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) if name != &self.id => write!(f, "{}({})", name, self.id),
            _ => write!(f, "{}", self.id),
        }
    }
}

/// Everything a node needs to construct a unit from scratch: the registered type
/// name plus opaque constructor parameters.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Definition {
    /// The name the unit's factory is registered under
    pub type_name: String,
    /// Opaque constructor parameters handed to the factory
    pub parameters: Vec<u8>,
}

impl Definition {
    /// A definition without constructor parameters
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            parameters: Vec::new(),
        }
    }

    /// A definition carrying constructor parameters
    pub fn with_parameters(type_name: impl Into<String>, parameters: Vec<u8>) -> Self {
        Self {
            type_name: type_name.into(),
            parameters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_addresses_are_stable() {
        let a = Address::from_key("order-42");
        let b = Address::from_key("order-42").with_name("an order");
        assert_eq!(a, b);
        assert!(a.is_distributable());
        assert_eq!("order-42", a.id_string());
    }

    #[test]
    fn test_unique_addresses_differ() {
        let a = Address::unique();
        let b = Address::unique();
        assert_ne!(a, b);
        assert_eq!(32, a.id_string().len());
    }

    #[test]
    fn test_local_addresses_are_not_distributable() {
        let control = Address::local("grid-control");
        assert!(!control.is_distributable());
        assert_eq!(Some("grid-control"), control.name());
        assert_eq!("grid-control", format!("{control}"));
    }
}
