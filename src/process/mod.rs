//! # ETL Process Management
//!
//! An ETL process is a named group of components driven through a shared
//! lifecycle: the group is assembled once at initialization and then
//! started, paused, and stopped as a unit. The [`manager`] owns the
//! processes and the [`schedule`] module drives recurring starts from a
//! background polling task.

pub mod manager;
pub mod schedule;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::component::{Component, ComponentConfig, ComponentError};
use crate::error::FailureList;
use crate::registry::RegistryError;

pub use manager::ProcessManager;
pub use schedule::{IntervalSchedule, Schedule, ScheduleDriver};

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("process already exists: {id}")]
    AlreadyExists { id: String },

    #[error("process not found: {id}")]
    NotFound { id: String },

    #[error("process {id} cannot go from {from} to {to}")]
    InvalidStatus {
        id: String,
        from: ProcessStatus,
        to: ProcessStatus,
    },

    #[error("schedule already exists for process: {id}")]
    ScheduleAlreadyExists { id: String },

    #[error("no schedule for process: {id}")]
    ScheduleNotFound { id: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Component(#[from] ComponentError),

    #[error("failed to start process components: {0}")]
    StartFailures(FailureList),

    #[error("failed to stop process components: {0}")]
    StopFailures(FailureList),
}

pub type ProcessResult<T> = Result<T, ProcessError>;

/// Observable lifecycle states of an ETL process.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, Serialize, Deserialize,
)]
pub enum ProcessStatus {
    #[default]
    Initialized,
    Running,
    Paused,
    Completed,
    Failed,
    Stopped,
}

/// Allowed status transitions. Running is re-enterable from every resting
/// state so a completed or failed process can be launched again.
pub(crate) fn valid_transition(from: ProcessStatus, to: ProcessStatus) -> bool {
    use ProcessStatus::*;
    matches!(
        (from, to),
        (Initialized, Running)
            | (Running, Paused)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Stopped)
            | (Paused, Running)
            | (Paused, Stopped)
            | (Completed, Running)
            | (Failed, Running)
            | (Stopped, Running)
    )
}

/// Declarative description of a process: its identity plus the component
/// configurations that make up its membership. A process without an
/// explicit id gets a generated one at initialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtlProcessConfig {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub components: Vec<ComponentConfig>,
}

impl EtlProcessConfig {
    /// The configured id, or a fresh uuid when none was given.
    pub(crate) fn resolve_id(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }
}

/// A live process: fixed membership plus a guarded status.
///
/// Membership is decided at initialization and never changes afterwards;
/// reshaping a pipeline means initializing a new process.
pub struct EtlProcess {
    id: String,
    config: EtlProcessConfig,
    components: Vec<Arc<dyn Component>>,
    status: RwLock<ProcessStatus>,
}

impl EtlProcess {
    pub(crate) fn new(
        id: String,
        config: EtlProcessConfig,
        components: Vec<Arc<dyn Component>>,
    ) -> Self {
        Self {
            id,
            config,
            components,
            status: RwLock::new(ProcessStatus::Initialized),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &EtlProcessConfig {
        &self.config
    }

    pub fn components(&self) -> &[Arc<dyn Component>] {
        &self.components
    }

    pub async fn status(&self) -> ProcessStatus {
        *self.status.read().await
    }

    /// Moves the process to `to`, rejecting transitions the state machine
    /// does not allow.
    pub(crate) async fn transition(&self, to: ProcessStatus) -> ProcessResult<()> {
        let mut status = self.status.write().await;
        if !valid_transition(*status, to) {
            return Err(ProcessError::InvalidStatus {
                id: self.id.clone(),
                from: *status,
                to,
            });
        }
        *status = to;
        Ok(())
    }

    /// Unconditionally records `to`. Reserved for failure paths where the
    /// observed outcome wins over the state machine.
    pub(crate) async fn force_status(&self, to: ProcessStatus) {
        *self.status.write().await = to;
    }
}
