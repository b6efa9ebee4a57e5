// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{any::Any, collections::HashMap, sync::Arc};

use thiserror::Error;
use tracing::debug;

/// An opaque reference a package publishes for other packages to discover by
/// identifier. The registry never looks inside.
pub type Resource = Arc<dyn Any + Send + Sync>;

/// Shared store where packages register resources and find resources
/// registered by other packages.
///
/// Not internally synchronized: it is only ever touched by the manager thread
/// while a command executes.
#[derive(Default)]
pub struct ResourceRegistry {
    /// Resource identifier to reference. Identifiers are globally unique.
    resources: HashMap<String, Resource>,
    /// Package identifier to the resources it registered while loading or
    /// running, in registration order.
    ownership: HashMap<String, Vec<String>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `resource` under `identifier`, attributing ownership to
    /// `owner` when one is given. Fails without mutating on a duplicate
    /// identifier.
    pub fn register(
        &mut self,
        identifier: &str,
        resource: Resource,
        owner: Option<&str>,
    ) -> Result<(), RegistryError> {
        if self.resources.contains_key(identifier) {
            return Err(RegistryError::Conflict {
                identifier: identifier.to_string(),
            });
        }
        self.resources.insert(identifier.to_string(), resource);
        if let Some(owner) = owner {
            self.ownership
                .entry(owner.to_string())
                .or_default()
                .push(identifier.to_string());
        }
        Ok(())
    }

    /// Removes `identifier` from the resource map. Ownership entries are the
    /// unload path's concern: it clears a package's whole set at once via
    /// [`Self::purge_owner`].
    pub fn deregister(&mut self, identifier: &str) -> Result<(), RegistryError> {
        self.resources
            .remove(identifier)
            .map(|_| ())
            .ok_or_else(|| RegistryError::Unknown {
                identifier: identifier.to_string(),
            })
    }

    pub fn get(&self, identifier: &str) -> Result<Resource, RegistryError> {
        self.resources
            .get(identifier)
            .cloned()
            .ok_or_else(|| RegistryError::Unknown {
                identifier: identifier.to_string(),
            })
    }

    pub fn has(&self, identifier: &str) -> bool {
        self.resources.contains_key(identifier)
    }

    /// Deregisters every resource `owner` registered and drops its ownership
    /// entry. Returns whether the owner had an entry at all.
    pub(crate) fn purge_owner(&mut self, owner: &str) -> bool {
        let Some(identifiers) = self.ownership.remove(owner) else {
            return false;
        };
        for identifier in &identifiers {
            // Owned identifiers are always present; a miss here would mean
            // someone deregistered behind the owner's back.
            self.resources.remove(identifier);
        }
        debug!("Deregistered resource refs for package: {owner}");
        true
    }

    /// Sorted identifiers of every registered resource.
    pub(crate) fn identifiers(&self) -> Vec<String> {
        let mut identifiers: Vec<String> = self.resources.keys().cloned().collect();
        identifiers.sort();
        identifiers
    }

    pub(crate) fn len(&self) -> usize {
        self.resources.len()
    }

    /// A view of this registry that attributes every registration to `owner`.
    pub fn scoped<'a>(&'a mut self, owner: &'a str) -> ScopedRegistry<'a> {
        ScopedRegistry {
            registry: self,
            owner,
        }
    }

    #[cfg(test)]
    pub(crate) fn owned_by(&self, owner: &str) -> Option<&[String]> {
        self.ownership.get(owner).map(|v| v.as_slice())
    }

    #[cfg(test)]
    pub(crate) fn owners(&self) -> Vec<&str> {
        self.ownership.keys().map(|s| s.as_str()).collect()
    }
}

/// Façade handed to a package while it loads, so the resources it registers
/// can be deregistered automatically when the package is unloaded.
pub struct ScopedRegistry<'a> {
    registry: &'a mut ResourceRegistry,
    owner: &'a str,
}

impl ScopedRegistry<'_> {
    pub fn register(&mut self, identifier: &str, resource: Resource) -> Result<(), RegistryError> {
        self.registry
            .register(identifier, resource, Some(self.owner))
    }

    pub fn get(&self, identifier: &str) -> Result<Resource, RegistryError> {
        self.registry.get(identifier)
    }

    pub fn has(&self, identifier: &str) -> bool {
        self.registry.has(identifier)
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("conflicting resource identifier: {identifier}")]
    Conflict { identifier: String },

    #[error("unknown resource identifier: {identifier}")]
    Unknown { identifier: String },
}
