use crate::error::FailureCause;
use crate::future::ListenableFuture;
use crate::notifier::TaskCompletionStatus;
use crate::task::TaskPriority;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::error;

pub(crate) type RecurringFn = Box<dyn FnMut(&CancellationToken) + Send + 'static>;

/// Shared state of a task the scheduler re-enqueues after each run.
pub(crate) struct RecurringTask {
  pub(crate) task_id: u64,
  pub(crate) priority: TaskPriority,
  pub(crate) delay: Duration,
  pub(crate) token: CancellationToken,
  body: Mutex<RecurringFn>,
  executions: AtomicU64,
  failures: AtomicU64,
}

impl RecurringTask {
  pub(crate) fn new(task_id: u64, priority: TaskPriority, delay: Duration, body: RecurringFn) -> Self {
    Self {
      task_id,
      priority,
      delay,
      token: CancellationToken::new(),
      body: Mutex::new(body),
      executions: AtomicU64::new(0),
      failures: AtomicU64::new(0),
    }
  }

  pub(crate) fn is_cancelled(&self) -> bool {
    self.token.is_cancelled()
  }

  /// Runs the body once. A panic is logged and counted; it never stops the
  /// recurrence.
  pub(crate) fn run_once(&self) -> TaskCompletionStatus {
    self.executions.fetch_add(1, AtomicOrdering::SeqCst);
    let mut body = self.body.lock();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| (&mut *body)(&self.token)));
    match outcome {
      Ok(()) => TaskCompletionStatus::Success,
      Err(payload) => {
        self.failures.fetch_add(1, AtomicOrdering::SeqCst);
        let cause = FailureCause::from_panic(payload);
        error!(task_id = %self.task_id, %cause, "Recurring task failed; it will still be rescheduled.");
        TaskCompletionStatus::Failed
      }
    }
  }
}

/// A handle to a task scheduled with a fixed delay between runs.
///
/// Cancelling the handle (directly, or through `PriorityScheduler::remove`)
/// prevents every run that has not started yet.
#[derive(Clone)]
pub struct RecurringTaskHandle {
  pub(crate) task: Arc<RecurringTask>,
}

impl fmt::Debug for RecurringTaskHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RecurringTaskHandle")
      .field("task_id", &self.task.task_id)
      .field("cancelled", &self.is_cancelled())
      .field("executions", &self.execution_count())
      .finish()
  }
}

impl RecurringTaskHandle {
  /// Returns the unique ID of this task.
  pub fn id(&self) -> u64 {
    self.task.task_id
  }

  pub fn priority(&self) -> TaskPriority {
    self.task.priority
  }

  /// Stops future recurrences. A run already in progress is signalled through
  /// its token but finishes normally. Returns `false` if already cancelled.
  pub fn cancel(&self) -> bool {
    if self.task.token.is_cancelled() {
      return false;
    }
    self.task.token.cancel();
    true
  }

  pub fn is_cancelled(&self) -> bool {
    self.task.is_cancelled()
  }

  /// Number of runs started so far.
  pub fn execution_count(&self) -> u64 {
    self.task.executions.load(AtomicOrdering::SeqCst)
  }

  /// Number of runs that panicked.
  pub fn failure_count(&self) -> u64 {
    self.task.failures.load(AtomicOrdering::SeqCst)
  }
}

/// Something `PriorityScheduler::remove` can take out of the queue.
pub trait Removable {
  fn task_id(&self) -> u64;

  /// Stops any further scheduling that is not tied to the queued entry.
  /// Returns `true` if this call changed anything.
  fn stop_recurrence(&self) -> bool {
    false
  }
}

impl Removable for RecurringTaskHandle {
  fn task_id(&self) -> u64 {
    self.task.task_id
  }

  fn stop_recurrence(&self) -> bool {
    self.cancel()
  }
}

impl<T: Send + Sync + 'static> Removable for ListenableFuture<T> {
  fn task_id(&self) -> u64 {
    ListenableFuture::task_id(self)
  }
}
