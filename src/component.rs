//! # Component Model
//!
//! Shared vocabulary for everything the runtime manages: identity
//! ([`ComponentInfo`]), the closed set of component kinds
//! ([`ComponentKind`]), the construction contract ([`ComponentConfig`] and
//! [`ComponentFactory`]), and the capability traits a concrete type opts
//! into ([`Startable`], [`Initializable`], [`Operation`]).
//!
//! Capabilities are flat: a component is a single value that exposes the
//! interfaces it implements through `as_*` accessors rather than through a
//! chain of embedded base types. A registry only ever holds
//! `Arc<dyn Component>` and discovers capabilities at the call site.

use std::sync::Arc;

use async_trait::async_trait;
use mockall::automock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::context::{ContextError, ExecutionContext};
use crate::system::SystemContext;

/// Closed set of component kinds managed by the runtime.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::Display,
    strum::EnumString,
    Serialize,
    Deserialize,
)]
pub enum ComponentKind {
    #[default]
    Basic,
    System,
    Operation,
    Service,
    Plugin,
}

/// Identity of a component: unique id within its owning registry, plus
/// human-readable name and description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub kind: ComponentKind,
}

impl ComponentInfo {
    pub fn new(id: &str, name: &str, description: &str, kind: ComponentKind) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            kind,
        }
    }
}

/// Immutable construction contract. The only channel for construction-time
/// parameters; `factory` must exactly match a registered factory key
/// (convention: `"<ComponentId>Factory"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub factory: String,
    #[serde(default)]
    pub custom: serde_json::Value,
}

impl ComponentConfig {
    pub fn new(id: &str, name: &str, factory: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            factory: factory.to_string(),
            custom: serde_json::Value::Null,
        }
    }

    pub fn with_custom(mut self, custom: serde_json::Value) -> Self {
        self.custom = custom;
        self
    }
}

/// Error type returned by factories and component bodies.
#[derive(Error, Debug)]
pub enum ComponentError {
    #[error("invalid configuration: {message}")]
    Configuration { message: String },

    #[error("invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition {
        from: ServiceState,
        to: ServiceState,
    },

    #[error("execution failed: {message}")]
    Execution { message: String },

    #[error(transparent)]
    Context(#[from] ContextError),
}

impl ComponentError {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        ComponentError::Configuration {
            message: message.into(),
        }
    }

    pub fn execution<S: Into<String>>(message: S) -> Self {
        ComponentError::Execution {
            message: message.into(),
        }
    }
}

pub type ComponentResult<T> = Result<T, ComponentError>;

/// The smallest identifiable unit managed by the runtime.
///
/// Concrete types opt into capabilities by overriding the `as_*` accessors
/// to return `Some(self)`.
pub trait Component: Send + Sync {
    fn info(&self) -> &ComponentInfo;

    fn as_startable(&self) -> Option<&dyn Startable> {
        None
    }

    fn as_initializable(&self) -> Option<&dyn Initializable> {
        None
    }

    fn as_operation(&self) -> Option<&dyn Operation> {
        None
    }
}

/// Start/stop lifecycle capability.
#[async_trait]
pub trait Startable: Send + Sync {
    async fn start(&self, ctx: &ExecutionContext) -> ComponentResult<()>;
    async fn stop(&self, ctx: &ExecutionContext) -> ComponentResult<()>;
}

/// Construction-time wiring capability. Called exactly once by the owning
/// manager before the component is registered or started.
#[async_trait]
pub trait Initializable: Send + Sync {
    async fn initialize(
        &self,
        ctx: &ExecutionContext,
        system: &SystemContext,
    ) -> ComponentResult<()>;
}

/// Opaque request/response payload for operations. The shape of `data` is a
/// private contract between the caller and the operation implementation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationInput {
    pub data: serde_json::Value,
}

impl OperationInput {
    pub fn new(data: serde_json::Value) -> Self {
        Self { data }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationOutput {
    pub data: serde_json::Value,
}

impl OperationOutput {
    pub fn new(data: serde_json::Value) -> Self {
        Self { data }
    }
}

/// Single request/response execution capability.
#[automock]
#[async_trait]
pub trait Operation: Send + Sync {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        input: OperationInput,
    ) -> ComponentResult<OperationOutput>;
}

/// Named constructor turning a [`ComponentConfig`] into a live component.
///
/// Factories must be idempotent or pure with respect to external state:
/// the registry does not roll back factory side effects when registration
/// fails afterwards.
#[async_trait]
pub trait ComponentFactory: Send + Sync {
    async fn create(&self, config: &ComponentConfig) -> ComponentResult<Arc<dyn Component>>;
}

/// Observable lifecycle states of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
pub enum ServiceState {
    #[default]
    Constructed,
    Initialized,
    Started,
    Stopped,
}

fn valid_transition(from: ServiceState, to: ServiceState) -> bool {
    matches!(
        (from, to),
        (ServiceState::Constructed, ServiceState::Initialized)
            | (ServiceState::Initialized, ServiceState::Started)
            | (ServiceState::Started, ServiceState::Stopped)
            | (ServiceState::Stopped, ServiceState::Started)
    )
}

/// Transition guard service implementations embed to enforce lifecycle
/// ordering. `start` before `initialize` fails; re-`start` after `stop` is
/// permitted (no terminal state).
#[derive(Debug, Default)]
pub struct StateCell {
    state: RwLock<ServiceState>,
}

impl StateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self) -> ServiceState {
        *self.state.read().await
    }

    /// Moves to `to`, failing with `InvalidTransition` if the step is not
    /// allowed from the current state.
    pub async fn advance(&self, to: ServiceState) -> ComponentResult<()> {
        let mut state = self.state.write().await;
        if !valid_transition(*state, to) {
            return Err(ComponentError::InvalidTransition { from: *state, to });
        }
        *state = to;
        Ok(())
    }

    /// Unconditionally records `to`. Reserved for failure paths where the
    /// observed outcome wins over the transition table.
    pub async fn force(&self, to: ServiceState) {
        *self.state.write().await = to;
    }
}
