//! # Component Registrar
//!
//! Concurrency-safe catalog mapping factory identifiers to factories and
//! component identifiers to live instances. Every other manager in the
//! runtime builds on this substrate.
//!
//! Each map sits behind its own reader/writer lock; every mutating
//! sequence holds the writer lock across the whole check-then-insert span
//! so duplicate registrations cannot race past the uniqueness check.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::component::{
    Component, ComponentConfig, ComponentError, ComponentFactory, ComponentKind,
};
use crate::event_bus::{Event, EventBus, EventType, Value};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("factory already registered: {id}")]
    FactoryAlreadyExists { id: String },

    #[error("factory not found: {id}")]
    FactoryNotFound { id: String },

    #[error("component already registered: {id}")]
    ComponentAlreadyExists { id: String },

    #[error("component not found: {id}")]
    ComponentNotFound { id: String },

    #[error("factory {id} failed: {source}")]
    Factory {
        id: String,
        #[source]
        source: ComponentError,
    },
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Thread-safe catalog of factories and the components they have produced.
///
/// Components are owned by the registry that created them and live until
/// explicitly unregistered; removing a factory does **not** cascade-remove
/// components previously built from it.
pub struct ComponentRegistry {
    factories: RwLock<HashMap<String, Arc<dyn ComponentFactory>>>,
    components: RwLock<HashMap<String, Arc<dyn Component>>>,
    event_bus: Arc<EventBus>,
}

impl ComponentRegistry {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
            components: RwLock::new(HashMap::new()),
            event_bus,
        }
    }

    /// Registers a factory under `id`. Re-registering under a taken key is
    /// an error, never an overwrite.
    #[instrument(level = "debug", skip(self, factory))]
    pub async fn register_factory(
        &self,
        id: &str,
        factory: Arc<dyn ComponentFactory>,
    ) -> RegistryResult<()> {
        let mut factories = self.factories.write().await;
        if factories.contains_key(id) {
            return Err(RegistryError::FactoryAlreadyExists { id: id.to_string() });
        }
        factories.insert(id.to_string(), factory);
        debug!("Factory registered: {}", id);
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn unregister_factory(&self, id: &str) -> RegistryResult<()> {
        let mut factories = self.factories.write().await;
        if factories.remove(id).is_none() {
            return Err(RegistryError::FactoryNotFound { id: id.to_string() });
        }
        Ok(())
    }

    pub async fn get_factory(&self, id: &str) -> RegistryResult<Arc<dyn ComponentFactory>> {
        self.factories
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::FactoryNotFound { id: id.to_string() })
    }

    pub async fn get_all_factories(&self) -> HashMap<String, Arc<dyn ComponentFactory>> {
        self.factories.read().await.clone()
    }

    /// Resolves `config.factory` and constructs a component without
    /// registering it. Used by managers that own their components in a
    /// separate map (the ETL process manager, the system boot phase).
    pub async fn build_component(
        &self,
        config: &ComponentConfig,
    ) -> RegistryResult<Arc<dyn Component>> {
        let factory = self.get_factory(&config.factory).await?;
        factory
            .create(config)
            .await
            .map_err(|source| RegistryError::Factory {
                id: config.factory.clone(),
                source,
            })
    }

    /// Constructs a component through its factory and registers it under
    /// `config.id`. Registration happens strictly after successful
    /// construction; factory side effects are not rolled back if the id
    /// turns out to be taken.
    #[instrument(level = "debug", skip(self, config), fields(id = %config.id))]
    pub async fn create_component(
        &self,
        config: &ComponentConfig,
    ) -> RegistryResult<Arc<dyn Component>> {
        let component = self.build_component(config).await?;
        self.register_component(&config.id, component.clone())
            .await?;
        Ok(component)
    }

    /// Registers an already-constructed component under `id`.
    pub async fn register_component(
        &self,
        id: &str,
        component: Arc<dyn Component>,
    ) -> RegistryResult<()> {
        {
            let mut components = self.components.write().await;
            if components.contains_key(id) {
                return Err(RegistryError::ComponentAlreadyExists { id: id.to_string() });
            }
            components.insert(id.to_string(), component);
        }
        let _ = self
            .event_bus
            .publish(
                Event::new(EventType::ComponentRegistered)
                    .with_parameter("component_id", Value::from(id)),
            )
            .await;
        Ok(())
    }

    pub async fn get_component(&self, id: &str) -> RegistryResult<Arc<dyn Component>> {
        self.components
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::ComponentNotFound { id: id.to_string() })
    }

    /// Returns every component of the given kind; empty for kinds with no
    /// registrations (never an error).
    pub async fn get_components_by_kind(&self, kind: ComponentKind) -> Vec<Arc<dyn Component>> {
        self.components
            .read()
            .await
            .values()
            .filter(|c| c.info().kind == kind)
            .cloned()
            .collect()
    }

    pub async fn get_all_components(&self) -> Vec<Arc<dyn Component>> {
        self.components.read().await.values().cloned().collect()
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn unregister_component(&self, id: &str) -> RegistryResult<()> {
        {
            let mut components = self.components.write().await;
            if components.remove(id).is_none() {
                return Err(RegistryError::ComponentNotFound { id: id.to_string() });
            }
        }
        let _ = self
            .event_bus
            .publish(
                Event::new(EventType::ComponentUnregistered)
                    .with_parameter("component_id", Value::from(id)),
            )
            .await;
        Ok(())
    }
}
