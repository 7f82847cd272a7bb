use crate::error::{FailureCause, TaskError};
use crate::future::ListenableFuture;
use crate::handle::RecurringTask;
use crate::notifier::TaskCompletionStatus;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

lazy_static::lazy_static! {
  static ref NEXT_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

pub(crate) fn next_task_id() -> u64 {
  NEXT_TASK_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed)
}

/// Relative dequeue preference of a task.
///
/// Workers always take a waiting `High` task before any `Low` task, and a `Low`
/// task before any `Starvable` task. `Starvable` work only runs when nothing
/// else is waiting, so it can be delayed indefinitely under sustained load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskPriority {
  High,
  Low,
  Starvable,
}

/// No-result body of an [`Task::Action`].
pub type ActionFn = Box<dyn FnOnce(&CancellationToken) + Send + 'static>;

/// Value-producing body of a [`Task::Callable`].
pub type CallableFn<T> = Box<dyn FnOnce(&CancellationToken) -> Result<T, TaskError> + Send + 'static>;

/// A unit of work accepted by the scheduler.
///
/// Every body receives the cancellation token of its future. Long-running
/// bodies should check it at loop boundaries; cancellation is never forced.
pub enum Task<T> {
  /// Runs for its side effects and reports `result` on success.
  Action { run: ActionFn, result: T },
  /// Produces the value of the future, or a failure.
  Callable(CallableFn<T>),
}

impl Task<()> {
  pub fn action(run: impl FnOnce(&CancellationToken) + Send + 'static) -> Self {
    Task::Action {
      run: Box::new(run),
      result: (),
    }
  }
}

impl<T> Task<T> {
  pub fn action_with_result(run: impl FnOnce(&CancellationToken) + Send + 'static, result: T) -> Self {
    Task::Action {
      run: Box::new(run),
      result,
    }
  }

  /// Wraps an infallible value-producing function.
  pub fn call(f: impl FnOnce(&CancellationToken) -> T + Send + 'static) -> Self
  where
    T: 'static,
  {
    Task::Callable(Box::new(move |token| Ok(f(token))))
  }

  /// Wraps a fallible value-producing function.
  pub fn try_call<E>(f: impl FnOnce(&CancellationToken) -> Result<T, E> + Send + 'static) -> Self
  where
    T: 'static,
    E: Into<TaskError> + 'static,
  {
    Task::Callable(Box::new(move |token| f(token).map_err(Into::into)))
  }

  /// Runs the body, capturing both returned errors and panics.
  pub(crate) fn execute(self, token: &CancellationToken) -> Result<T, FailureCause> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(move || match self {
      Task::Action { run, result } => {
        run(token);
        Ok(result)
      }
      Task::Callable(f) => f(token),
    }));
    match outcome {
      Ok(Ok(value)) => Ok(value),
      Ok(Err(error)) => Err(FailureCause::from(error)),
      Err(payload) => Err(FailureCause::from_panic(payload)),
    }
  }
}

impl<T> fmt::Debug for Task<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Task::Action { .. } => f.write_str("Task::Action"),
      Task::Callable(_) => f.write_str("Task::Callable"),
    }
  }
}

/// Type-erased one-shot work as stored in the queue.
pub(crate) trait Runnable: Send {
  /// Executes the work unless it was cancelled while pending.
  fn run(self: Box<Self>) -> TaskCompletionStatus;
  /// Discards the work without running it.
  fn cancel(self: Box<Self>);
  fn token(&self) -> CancellationToken;
}

/// Pairs a task with the future that reports its outcome.
pub(crate) struct FutureTask<T: Send + Sync + 'static> {
  pub(crate) task: Task<T>,
  pub(crate) future: ListenableFuture<T>,
}

impl<T: Send + Sync + 'static> Runnable for FutureTask<T> {
  fn run(self: Box<Self>) -> TaskCompletionStatus {
    let FutureTask { task, future } = *self;
    if !future.begin_running() {
      return TaskCompletionStatus::Cancelled;
    }
    let token = future.cancellation_token();
    let outcome = task.execute(&token);
    future.finish_running(outcome)
  }

  fn cancel(self: Box<Self>) {
    self.future.cancel();
  }

  fn token(&self) -> CancellationToken {
    self.future.cancellation_token()
  }
}

pub(crate) enum TaskKind {
  OneShot(Box<dyn Runnable>),
  Recurring(Arc<RecurringTask>),
}

/// Internal representation of a task owned by the queue.
pub(crate) struct QueuedTask {
  pub(crate) task_id: u64,
  pub(crate) priority: TaskPriority,
  pub(crate) enqueued_at: Instant,
  pub(crate) kind: TaskKind,
}

impl QueuedTask {
  pub(crate) fn one_shot(task_id: u64, priority: TaskPriority, runnable: Box<dyn Runnable>) -> Self {
    Self {
      task_id,
      priority,
      enqueued_at: Instant::now(),
      kind: TaskKind::OneShot(runnable),
    }
  }

  pub(crate) fn recurring(task: Arc<RecurringTask>) -> Self {
    Self {
      task_id: task.task_id,
      priority: task.priority,
      enqueued_at: Instant::now(),
      kind: TaskKind::Recurring(task),
    }
  }

  pub(crate) fn is_recurring(&self) -> bool {
    matches!(self.kind, TaskKind::Recurring(_))
  }

  /// Drops the task without running it, settling whatever observes it.
  pub(crate) fn discard(self) {
    match self.kind {
      TaskKind::OneShot(runnable) => runnable.cancel(),
      TaskKind::Recurring(task) => task.token.cancel(),
    }
  }
}

impl fmt::Debug for QueuedTask {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueuedTask")
      .field("task_id", &self.task_id)
      .field("priority", &self.priority)
      .field("recurring", &self.is_recurring())
      .finish_non_exhaustive()
  }
}
