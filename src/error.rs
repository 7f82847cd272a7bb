use crate::scheduler::Lifecycle;

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Error type returned by fallible task bodies.
pub type TaskError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why a task body did not produce a value.
#[derive(Error, Debug, Clone)]
pub enum FailureCause {
  #[error("task panicked: {0}")]
  Panicked(String),

  #[error("{0}")]
  Error(Arc<dyn std::error::Error + Send + Sync + 'static>),
}

impl FailureCause {
  /// Renders a `catch_unwind` payload into a cause.
  pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
      (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
      s.clone()
    } else {
      "non-string panic payload".to_string()
    };
    FailureCause::Panicked(message)
  }

  pub fn is_panic(&self) -> bool {
    matches!(self, FailureCause::Panicked(_))
  }
}

impl From<TaskError> for FailureCause {
  fn from(error: TaskError) -> Self {
    FailureCause::Error(Arc::from(error))
  }
}

impl From<&str> for FailureCause {
  fn from(message: &str) -> Self {
    FailureCause::from(TaskError::from(message))
  }
}

impl From<String> for FailureCause {
  fn from(message: String) -> Self {
    FailureCause::from(TaskError::from(message))
  }
}

/// Errors that can occur within the `priority_orchestra` scheduler.
#[derive(Error, Debug, Clone)]
pub enum SchedulerError {
  #[error("Scheduler is {0:?} and cannot accept new tasks")]
  RejectedExecution(Lifecycle),

  #[error("Task failed: {cause}")]
  Execution {
    #[source]
    cause: FailureCause,
  },

  #[error("Task was cancelled")]
  Cancelled,

  #[error("Timed out after {0:?} waiting for task result")]
  Timeout(Duration),

  #[error("Illegal state: {0}")]
  IllegalState(&'static str),
}

impl SchedulerError {
  pub fn execution(cause: impl Into<FailureCause>) -> Self {
    SchedulerError::Execution { cause: cause.into() }
  }

  /// Returns the captured failure if this is an `Execution` error.
  pub fn cause(&self) -> Option<&FailureCause> {
    match self {
      SchedulerError::Execution { cause } => Some(cause),
      _ => None,
    }
  }
}
