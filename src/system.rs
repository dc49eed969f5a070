//! # System Runtime
//!
//! Root composition object. The [`System`] owns the event bus and the
//! component registry, boots declared services and operations in two
//! phases, and drives bulk and per-service lifecycle.
//!
//! Boot is strictly construct-everything, initialize-everything,
//! register-everything: a failure in any phase aborts the boot and leaves
//! the registry without any of the declared components, so observers never
//! see a partially booted system.

use std::sync::Arc;

use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::component::{
    Component, ComponentError, ComponentKind, OperationInput, OperationOutput, ServiceState,
    StateCell,
};
use crate::config::SystemConfig;
use crate::context::ExecutionContext;
use crate::error::{Failure, FailureList};
use crate::event_bus::{Event, EventBus, EventType, Value};
use crate::registry::{ComponentRegistry, RegistryError};

#[derive(Error, Debug)]
pub enum SystemError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Component(#[from] ComponentError),

    #[error("component is not startable: {id}")]
    NotStartable { id: String },

    #[error("duplicate component id in configuration: {id}")]
    DuplicateConfig { id: String },

    #[error("component is not an operation: {id}")]
    NotAnOperation { id: String },

    #[error("initialization of {id} failed: {source}")]
    Initialize {
        id: String,
        #[source]
        source: ComponentError,
    },

    #[error("failed to start services: {0}")]
    StartFailures(FailureList),

    #[error("failed to stop services: {0}")]
    StopFailures(FailureList),
}

pub type SystemResult<T> = Result<T, SystemError>;

/// Collaborator handle passed to components during initialization.
///
/// Components resolve their dependencies from here instead of reaching for
/// globals; nothing in the runtime is process-wide state.
#[derive(Clone)]
pub struct SystemContext {
    pub registry: Arc<ComponentRegistry>,
    pub event_bus: Arc<EventBus>,
}

impl SystemContext {
    pub fn new(registry: Arc<ComponentRegistry>, event_bus: Arc<EventBus>) -> Self {
        Self {
            registry,
            event_bus,
        }
    }
}

pub struct System {
    config: SystemConfig,
    registry: Arc<ComponentRegistry>,
    event_bus: Arc<EventBus>,
    state: StateCell,
}

impl System {
    pub fn new(config: SystemConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let registry = Arc::new(ComponentRegistry::new(event_bus.clone()));
        Self {
            config,
            registry,
            event_bus,
            state: StateCell::new(),
        }
    }

    pub fn registry(&self) -> Arc<ComponentRegistry> {
        self.registry.clone()
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn context(&self) -> SystemContext {
        SystemContext::new(self.registry.clone(), self.event_bus.clone())
    }

    pub async fn state(&self) -> ServiceState {
        self.state.get().await
    }

    /// Boots the system: constructs every declared service and operation,
    /// initializes the ones that want wiring, then registers all of them.
    ///
    /// Construction and initialization of *all* components completes before
    /// *any* component is registered. On failure the boot aborts and the
    /// registry stays as it was.
    #[instrument(level = "debug", skip(self))]
    pub async fn initialize(&self) -> SystemResult<()> {
        self.state.advance(ServiceState::Initialized).await?;
        info!("Initializing system");

        let mut configs = self.config.services.clone();
        configs.extend(self.config.operations.iter().cloned());

        // duplicate ids would let phase 3 register a partial set
        let mut seen = std::collections::HashSet::new();
        for config in &configs {
            if !seen.insert(config.id.as_str()) {
                return Err(SystemError::DuplicateConfig {
                    id: config.id.clone(),
                });
            }
        }

        // phase 1: construct
        let mut built: Vec<(String, Arc<dyn Component>)> = Vec::with_capacity(configs.len());
        for config in &configs {
            let component = self.registry.build_component(config).await?;
            built.push((config.id.clone(), component));
        }

        // phase 2: initialize
        let system_ctx = self.context();
        let ctx = ExecutionContext::with_timeout(self.config.init_timeout);
        for (id, component) in &built {
            if let Some(initializable) = component.as_initializable() {
                initializable
                    .initialize(&ctx, &system_ctx)
                    .await
                    .map_err(|source| SystemError::Initialize {
                        id: id.clone(),
                        source,
                    })?;
                debug!("Initialized component: {}", id);
            }
        }

        // phase 3: register
        for (id, component) in built {
            self.registry.register_component(&id, component).await?;
        }

        info!("System initialized");
        Ok(())
    }

    /// Starts every startable service concurrently. Every service is
    /// attempted even when siblings fail; failures are aggregated into a
    /// single [`SystemError::StartFailures`] and the system state rolls
    /// back so a later `start` can retry the stragglers.
    #[instrument(level = "debug", skip(self))]
    pub async fn start(&self) -> SystemResult<()> {
        let prior = self.state.get().await;
        self.state.advance(ServiceState::Started).await?;
        let _ = self.event_bus.publish(Event::new(EventType::SystemStarting)).await;
        info!("Starting system services");

        let failures = self.run_service_lifecycle(LifecyclePhase::Start).await;

        if !failures.is_empty() {
            error!("System start completed with {} failure(s)", failures.len());
            self.state.force(prior).await;
            return Err(SystemError::StartFailures(failures));
        }
        let _ = self.event_bus.publish(Event::new(EventType::SystemStarted)).await;
        info!("System started");
        Ok(())
    }

    /// Stops every startable service concurrently, aggregating failures.
    /// Stop is attempted for all services regardless of individual errors.
    #[instrument(level = "debug", skip(self))]
    pub async fn stop(&self) -> SystemResult<()> {
        self.state.advance(ServiceState::Stopped).await?;
        let _ = self.event_bus.publish(Event::new(EventType::SystemStopping)).await;
        info!("Stopping system services");

        let failures = self.run_service_lifecycle(LifecyclePhase::Stop).await;

        if !failures.is_empty() {
            error!("System stop completed with {} failure(s)", failures.len());
            return Err(SystemError::StopFailures(failures));
        }
        let _ = self.event_bus.publish(Event::new(EventType::SystemStopped)).await;
        info!("System stopped");
        Ok(())
    }

    /// Executes the named operation with a request-scoped timeout.
    #[instrument(level = "debug", skip(self, input))]
    pub async fn execute_operation(
        &self,
        id: &str,
        input: OperationInput,
    ) -> SystemResult<OperationOutput> {
        let component = self.registry.get_component(id).await?;
        let operation = component
            .as_operation()
            .ok_or_else(|| SystemError::NotAnOperation { id: id.to_string() })?;

        let ctx = ExecutionContext::with_timeout(self.config.request_timeout);
        Ok(operation.execute(&ctx, input).await?)
    }

    /// Starts one service by id.
    #[instrument(level = "debug", skip(self))]
    pub async fn start_service(&self, id: &str) -> SystemResult<()> {
        let component = self.registry.get_component(id).await?;
        let startable = component
            .as_startable()
            .ok_or_else(|| SystemError::NotStartable { id: id.to_string() })?;

        let ctx = ExecutionContext::with_timeout(self.config.init_timeout);
        startable.start(&ctx).await?;
        let _ = self
            .event_bus
            .publish(
                Event::new(EventType::ServiceStarted)
                    .with_parameter("service_id", Value::from(id)),
            )
            .await;
        Ok(())
    }

    /// Stops one service by id.
    #[instrument(level = "debug", skip(self))]
    pub async fn stop_service(&self, id: &str) -> SystemResult<()> {
        let component = self.registry.get_component(id).await?;
        let startable = component
            .as_startable()
            .ok_or_else(|| SystemError::NotStartable { id: id.to_string() })?;

        let ctx = ExecutionContext::with_timeout(self.config.shutdown_timeout);
        startable.stop(&ctx).await?;
        let _ = self
            .event_bus
            .publish(
                Event::new(EventType::ServiceStopped)
                    .with_parameter("service_id", Value::from(id)),
            )
            .await;
        Ok(())
    }

    /// Stops then starts one service. A stop failure aborts the restart.
    pub async fn restart_service(&self, id: &str) -> SystemResult<()> {
        self.stop_service(id).await?;
        self.start_service(id).await
    }

    /// Runs the given lifecycle phase over every startable service
    /// concurrently and collects per-service failures. Services without the
    /// startable capability are skipped with a warning, never treated as
    /// errors.
    async fn run_service_lifecycle(&self, phase: LifecyclePhase) -> FailureList {
        let services = self
            .registry
            .get_components_by_kind(ComponentKind::Service)
            .await;

        let timeout = match phase {
            LifecyclePhase::Start => self.config.init_timeout,
            LifecyclePhase::Stop => self.config.shutdown_timeout,
        };

        let mut futures = Vec::new();
        for service in services {
            let id = service.info().id.clone();
            if service.as_startable().is_none() {
                warn!("Service {} has no lifecycle, skipping", id);
                continue;
            }
            let ctx = ExecutionContext::with_timeout(timeout);
            let event_bus = self.event_bus.clone();
            futures.push(async move {
                let Some(startable) = service.as_startable() else {
                    return None;
                };
                let result = match phase {
                    LifecyclePhase::Start => startable.start(&ctx).await,
                    LifecyclePhase::Stop => startable.stop(&ctx).await,
                };
                match result {
                    Ok(()) => {
                        let event_type = match phase {
                            LifecyclePhase::Start => EventType::ServiceStarted,
                            LifecyclePhase::Stop => EventType::ServiceStopped,
                        };
                        let _ = event_bus
                            .publish(
                                Event::new(event_type)
                                    .with_parameter("service_id", Value::from(id.clone())),
                            )
                            .await;
                        None
                    }
                    Err(e) => Some(Failure::new(&id, e.to_string())),
                }
            });
        }

        let mut failures = FailureList::new();
        for failure in join_all(futures).await.into_iter().flatten() {
            failures.push(failure);
        }
        failures
    }
}

#[derive(Debug, Clone, Copy)]
enum LifecyclePhase {
    Start,
    Stop,
}
