//! Cooperative cancellation and deadline propagation.
//!
//! Every lifecycle method and operation execution receives an
//! [`ExecutionContext`]. Long-running work is expected to call
//! [`ExecutionContext::ensure_active`] before and after blocking steps so
//! that cancellation surfaces as a distinct error instead of being folded
//! into business failures.

use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContextError {
    #[error("execution cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

pub type ContextResult<T> = Result<T, ContextError>;

/// Carries cancellation and deadline state through lifecycle calls.
///
/// Contexts form a tree: cancelling a parent cancels every child derived
/// via [`ExecutionContext::child`]. Deadlines are inherited unless the
/// child narrows them.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            cancellation: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancellation: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Derives a child context linked to this one.
    pub fn child(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derives a child context whose deadline is the sooner of the parent's
    /// deadline and `timeout` from now.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) => Some(existing.min(candidate)),
            None => Some(candidate),
        };
        Self {
            cancellation: self.cancellation.child_token(),
            deadline,
        }
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Returns an error if this context has been cancelled or its deadline
    /// has passed. Call this before and after any blocking step.
    pub fn ensure_active(&self) -> ContextResult<()> {
        if self.cancellation.is_cancelled() {
            return Err(ContextError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(ContextError::DeadlineExceeded);
            }
        }
        Ok(())
    }
}
