//! Which local modules listen to which gossip types.

use crate::api::ModuleSender;
use crate::error::{NodeError, NodeResult};
use parking_lot::RwLock;
use rumor_admission::ConnectionId;
use std::collections::HashMap;

/// A module subscribed to a gossip type.
#[derive(Debug, Clone)]
pub struct RegisteredModule {
    sender: ModuleSender,
}

impl RegisteredModule {
    /// Wraps the module's outbound handle.
    #[must_use]
    pub const fn new(sender: ModuleSender) -> Self {
        Self { sender }
    }

    /// Returns the module identity.
    #[must_use]
    pub const fn id(&self) -> &ConnectionId {
        self.sender.id()
    }

    /// Returns the module's outbound handle.
    #[must_use]
    pub const fn sender(&self) -> &ModuleSender {
        &self.sender
    }
}

/// Maps gossip types to the modules registered for them.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<u16, Vec<RegisteredModule>>>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `module` to `data_type`.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::DuplicateRegistration`] if the module is already
    /// registered for the type; the registry is left unchanged.
    pub fn register(&self, data_type: u16, module: RegisteredModule) -> NodeResult<()> {
        let mut types = self.types.write();
        let bucket = types.entry(data_type).or_default();
        if bucket.iter().any(|m| m.id() == module.id()) {
            return Err(NodeError::DuplicateRegistration {
                module: module.id().clone(),
                data_type,
            });
        }
        bucket.push(module);
        Ok(())
    }

    /// Removes a module from every type it registered for.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::ModuleNotFound`] if the module had no registration.
    pub fn unregister(&self, id: &ConnectionId) -> NodeResult<RegisteredModule> {
        let mut types = self.types.write();
        let mut removed = None;
        types.retain(|_, bucket| {
            if let Some(pos) = bucket.iter().position(|m| m.id() == id) {
                removed = Some(bucket.remove(pos));
            }
            !bucket.is_empty()
        });
        removed.ok_or_else(|| NodeError::ModuleNotFound(id.clone()))
    }

    /// Returns the modules registered for `data_type`, in registration order.
    #[must_use]
    pub fn modules_for(&self, data_type: u16) -> Vec<RegisteredModule> {
        self.types
            .read()
            .get(&data_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns true if any module is registered for `data_type`.
    #[must_use]
    pub fn is_registered(&self, data_type: u16) -> bool {
        self.types.read().contains_key(&data_type)
    }

    /// Number of gossip types with at least one module.
    #[must_use]
    pub fn type_count(&self) -> usize {
        self.types.read().len()
    }
}
