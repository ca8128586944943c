//! Type-map service container for service contribution.
//!
//! Each service-contributing extension gets an isolated child container
//! seeded by the host with an allow-listed set of host services plus the
//! extension's own context. Once sealed, the container is read-only.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ExtensionError, Result};

/// A small typed service locator keyed by `TypeId`.
#[derive(Default)]
pub struct ServiceContainer {
    services: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    names: HashMap<TypeId, &'static str>,
    sealed: bool,
}

impl ServiceContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service instance. Fails once the container is sealed or
    /// if a service of the same type is already present.
    pub fn register<T: Any + Send + Sync>(&mut self, service: Arc<T>) -> Result<()> {
        if self.sealed {
            return Err(ExtensionError::Services(
                "container is sealed; services can no longer be registered".into(),
            ));
        }
        let id = TypeId::of::<T>();
        if self.services.contains_key(&id) {
            return Err(ExtensionError::Services(format!(
                "service already registered: {}",
                std::any::type_name::<T>()
            )));
        }
        self.names.insert(id, std::any::type_name::<T>());
        self.services.insert(id, service);
        Ok(())
    }

    /// Copies every entry of `other` into this container. Used by the host
    /// to seed a child container from its allow-listed services.
    pub fn seed_from(&mut self, other: &ServiceContainer) -> Result<()> {
        if self.sealed {
            return Err(ExtensionError::Services("container is sealed".into()));
        }
        for (id, service) in &other.services {
            self.services.insert(*id, service.clone());
            if let Some(name) = other.names.get(id) {
                self.names.insert(*id, name);
            }
        }
        Ok(())
    }

    /// Resolves a service by type.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.services
            .get(&TypeId::of::<T>())
            .and_then(|service| service.clone().downcast::<T>().ok())
    }

    /// Marks the container read-only.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl std::fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContainer")
            .field("services", &self.names.values().collect::<Vec<_>>())
            .field("sealed", &self.sealed)
            .finish()
    }
}
