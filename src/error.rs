//! Crate-level error type aggregating every module error, plus the
//! multi-failure types bulk lifecycle operations report with.

use thiserror::Error;

use crate::component::ComponentError;
use crate::context::ContextError;
use crate::event_bus::EventError;
use crate::plugin::PluginError;
use crate::process::ProcessError;
use crate::registry::RegistryError;
use crate::system::SystemError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Component(#[from] ComponentError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    System(#[from] SystemError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// One participant's failure within a bulk lifecycle operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub id: String,
    pub message: String,
}

impl Failure {
    pub fn new(id: &str, message: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            message: message.into(),
        }
    }
}

/// Collected failures from a bulk operation that visits every participant
/// before reporting. Empty means total success.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FailureList {
    pub failures: Vec<Failure>,
}

impl FailureList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, failure: Failure) {
        self.failures.push(failure);
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Converts to a result: `Ok(())` when no participant failed.
    pub fn into_result(self) -> std::result::Result<(), FailureList> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl std::fmt::Display for FailureList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failure(s):", self.failures.len())?;
        for failure in &self.failures {
            write!(f, " [{}: {}]", failure.id, failure.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for FailureList {}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_failure_list_into_result() {
        assert!(FailureList::new().into_result().is_ok());

        let mut failures = FailureList::new();
        failures.push(Failure::new("svc1", "bind refused"));
        failures.push(Failure::new("svc2", "timeout"));

        let err = failures.into_result().unwrap_err();
        assert_eq!(err.len(), 2);
        assert_eq!(err.failures[0].id, "svc1");
    }

    #[test]
    fn test_failure_list_display() {
        let mut failures = FailureList::new();
        failures.push(Failure::new("svc1", "bind refused"));
        assert_eq!(failures.to_string(), "1 failure(s): [svc1: bind refused]");
    }
}
