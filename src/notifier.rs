use crate::task::TaskPriority;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use tracing::{debug, error, info, trace};

// --- Public Event Structs for Handlers ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskCompletionStatus {
  Success,
  Failed,
  Cancelled,
}

#[derive(Debug, Clone)]
pub struct TaskCompletionInfo {
  pub task_id: u64,
  pub pool_name: Arc<str>,
  pub priority: TaskPriority,
  pub status: TaskCompletionStatus,
  /// `true` for a single run of a fixed-delay task.
  pub recurring: bool,
  pub completion_time: SystemTime,
}

pub(crate) type CompletionHandler = Arc<dyn Fn(&TaskCompletionInfo) + Send + Sync + 'static>;

// --- CompletionNotifier Struct ---

/// Fans task completions out to the handlers registered on a scheduler.
///
/// Handlers run on the thread that finished the task: a worker for executed
/// tasks, the caller of `shutdown`/`remove` for discarded ones.
pub(crate) struct CompletionNotifier {
  handlers: RwLock<Vec<CompletionHandler>>,
  pool_name: Arc<str>,
}

impl fmt::Debug for CompletionNotifier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let handler_count = self.handlers.try_read().map_or(0, |guard| guard.len());
    f.debug_struct("CompletionNotifier")
      .field("pool_name", &self.pool_name)
      .field("handler_count", &handler_count)
      .finish()
  }
}

impl CompletionNotifier {
  pub(crate) fn new(pool_name: Arc<str>) -> Self {
    Self {
      handlers: RwLock::new(Vec::new()),
      pool_name,
    }
  }

  pub(crate) fn add_handler(&self, handler: impl Fn(&TaskCompletionInfo) + Send + Sync + 'static) {
    let mut handlers_guard = self.handlers.write();
    handlers_guard.push(Arc::new(handler));
    info!(pool_name = %self.pool_name, "Notifier: Added new completion handler. Total handlers: {}", handlers_guard.len());
  }

  pub(crate) fn notify(&self, task_id: u64, priority: TaskPriority, status: TaskCompletionStatus, recurring: bool) {
    // Clone the list so handlers may register further handlers without deadlocking.
    let handlers: Vec<CompletionHandler> = self.handlers.read().clone();
    if handlers.is_empty() {
      trace!(%task_id, "No completion handlers registered, dropping notification.");
      return;
    }

    let info = TaskCompletionInfo {
      task_id,
      pool_name: self.pool_name.clone(),
      priority,
      status,
      recurring,
      completion_time: SystemTime::now(),
    };
    debug!(%task_id, ?status, "Dispatching notification to {} handlers.", handlers.len());

    for handler in handlers {
      let result = panic::catch_unwind(AssertUnwindSafe(|| handler(&info)));
      if result.is_err() {
        error!(
          "A completion handler panicked during execution. Pool: {}, Task ID: {}",
          info.pool_name, info.task_id
        );
      }
    }
  }
}
