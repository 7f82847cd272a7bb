use crate::error::{FailureCause, SchedulerError};
use crate::notifier::TaskCompletionStatus;
use crate::task::next_task_id;

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use futures::channel::oneshot;
use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, trace, warn};

type Listener<T> = Box<dyn FnOnce(Result<&T, SchedulerError>) + Send + 'static>;

/// Terminal outcome of a future; written exactly once.
enum Outcome<T> {
  Completed(T),
  Failed(FailureCause),
  Cancelled,
}

impl<T> Outcome<T> {
  fn as_result(&self) -> Result<&T, SchedulerError> {
    match self {
      Outcome::Completed(value) => Ok(value),
      Outcome::Failed(cause) => Err(SchedulerError::Execution { cause: cause.clone() }),
      Outcome::Cancelled => Err(SchedulerError::Cancelled),
    }
  }

  fn status(&self) -> TaskCompletionStatus {
    match self {
      Outcome::Completed(_) => TaskCompletionStatus::Success,
      Outcome::Failed(_) => TaskCompletionStatus::Failed,
      Outcome::Cancelled => TaskCompletionStatus::Cancelled,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
  Pending,
  Running,
  Done,
}

struct Waiters<T> {
  phase: Phase,
  listeners: Vec<Listener<T>>,
}

struct Shared<T> {
  task_id: u64,
  token: CancellationToken,
  outcome: OnceLock<Outcome<T>>,
  waiters: Mutex<Waiters<T>>,
  done: Condvar,
}

/// A single-assignment completion cell shared between a submitter and the
/// worker that runs its task.
///
/// The outcome is written at most once. Readers that observe a terminal
/// future read it without taking the lock.
pub struct ListenableFuture<T> {
  shared: Arc<Shared<T>>,
}

impl<T> Clone for ListenableFuture<T> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<T> fmt::Debug for ListenableFuture<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ListenableFuture")
      .field("task_id", &self.shared.task_id)
      .field("done", &self.shared.outcome.get().is_some())
      .finish_non_exhaustive()
  }
}

impl<T: Send + Sync + 'static> Default for ListenableFuture<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: Send + Sync + 'static> ListenableFuture<T> {
  /// Creates a pending future that is not bound to any scheduled task.
  pub fn new() -> Self {
    Self {
      shared: Arc::new(Shared {
        task_id: next_task_id(),
        token: CancellationToken::new(),
        outcome: OnceLock::new(),
        waiters: Mutex::new(Waiters {
          phase: Phase::Pending,
          listeners: Vec::new(),
        }),
        done: Condvar::new(),
      }),
    }
  }

  /// Returns the id of the task this future reports on.
  pub fn task_id(&self) -> u64 {
    self.shared.task_id
  }

  /// Returns the token the task body observes for cooperative cancellation.
  pub fn cancellation_token(&self) -> CancellationToken {
    self.shared.token.clone()
  }

  pub fn is_done(&self) -> bool {
    self.shared.outcome.get().is_some()
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self.shared.outcome.get(), Some(Outcome::Cancelled))
  }

  /// Completes the future with `value`.
  ///
  /// # Errors
  /// Returns `SchedulerError::IllegalState` if the future is already terminal.
  pub fn complete(&self, value: T) -> Result<(), SchedulerError> {
    self
      .settle(Outcome::Completed(value), false)
      .map_err(|_| SchedulerError::IllegalState("future completed more than once"))
  }

  /// Fails the future with `cause`.
  ///
  /// # Errors
  /// Returns `SchedulerError::IllegalState` if the future is already terminal.
  pub fn fail(&self, cause: impl Into<FailureCause>) -> Result<(), SchedulerError> {
    self
      .settle(Outcome::Failed(cause.into()), false)
      .map_err(|_| SchedulerError::IllegalState("future failed after reaching a terminal state"))
  }

  /// Requests cancellation.
  ///
  /// A pending future becomes `Cancelled` at once and its task never runs. A
  /// running task only has its token signalled; the future turns `Cancelled`
  /// when the body returns. Returns `false` if the future was already terminal.
  pub fn cancel(&self) -> bool {
    let phase = self.shared.waiters.lock().phase;
    match phase {
      Phase::Done => false,
      Phase::Running => {
        trace!(task_id = %self.shared.task_id, "Cancellation requested for running task; signalling token.");
        self.shared.token.cancel();
        true
      }
      Phase::Pending => {
        self.shared.token.cancel();
        match self.settle(Outcome::Cancelled, true) {
          Ok(()) => true,
          // A worker picked the task up first; it observes the token.
          Err(_) => !self.is_done() || self.is_cancelled(),
        }
      }
    }
  }

  /// Registers `listener` to run once the future is terminal.
  ///
  /// If the future is already terminal the listener runs immediately on the
  /// calling thread; otherwise it runs on whichever thread settles the future.
  pub fn add_listener(&self, listener: impl FnOnce(Result<&T, SchedulerError>) + Send + 'static) {
    {
      let mut waiters = self.shared.waiters.lock();
      if waiters.phase != Phase::Done {
        waiters.listeners.push(Box::new(listener));
        return;
      }
    }
    if let Some(outcome) = self.shared.outcome.get() {
      Self::invoke_listener(self.shared.task_id, Box::new(listener), outcome);
    }
  }

  /// Blocks until the future is terminal and returns a clone of its value.
  pub fn get(&self) -> Result<T, SchedulerError>
  where
    T: Clone,
  {
    self.inspect(T::clone)
  }

  /// Like [`get`](Self::get) but gives up after `timeout`. Timing out never
  /// cancels the task.
  pub fn get_timeout(&self, timeout: Duration) -> Result<T, SchedulerError>
  where
    T: Clone,
  {
    self.wait(Some(timeout))?.as_result().map(T::clone)
  }

  /// Blocks until terminal and maps the value by reference.
  pub fn inspect<U>(&self, f: impl FnOnce(&T) -> U) -> Result<U, SchedulerError> {
    self.wait(None)?.as_result().map(f)
  }

  /// Returns a future that resolves once this one is terminal, for async callers.
  pub fn completion(&self) -> impl Future<Output = Result<T, SchedulerError>> + Send + 'static
  where
    T: Clone,
  {
    let (tx, rx) = oneshot::channel();
    self.add_listener(move |result| {
      let _ = tx.send(result.cloned());
    });
    async move { rx.await.unwrap_or(Err(SchedulerError::Cancelled)) }
  }

  fn wait(&self, timeout: Option<Duration>) -> Result<&Outcome<T>, SchedulerError> {
    if let Some(outcome) = self.shared.outcome.get() {
      return Ok(outcome);
    }
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut waiters = self.shared.waiters.lock();
    while waiters.phase != Phase::Done {
      match deadline {
        Some(deadline) => {
          if self.shared.done.wait_until(&mut waiters, deadline).timed_out() && waiters.phase != Phase::Done {
            return Err(SchedulerError::Timeout(timeout.unwrap_or_default()));
          }
        }
        None => self.shared.done.wait(&mut waiters),
      }
    }
    drop(waiters);
    self
      .shared
      .outcome
      .get()
      .ok_or(SchedulerError::IllegalState("future marked done without an outcome"))
  }

  /// Moves a pending future to running. Returns `false` if it was cancelled
  /// (or otherwise settled) before a worker got to it.
  pub(crate) fn begin_running(&self) -> bool {
    let mut waiters = self.shared.waiters.lock();
    if waiters.phase != Phase::Pending {
      return false;
    }
    waiters.phase = Phase::Running;
    true
  }

  /// Records the outcome of a body that ran to completion on a worker.
  pub(crate) fn finish_running(&self, outcome: Result<T, FailureCause>) -> TaskCompletionStatus {
    let outcome = if self.shared.token.is_cancelled() {
      Outcome::Cancelled
    } else {
      match outcome {
        Ok(value) => Outcome::Completed(value),
        Err(cause) => Outcome::Failed(cause),
      }
    };
    let status = outcome.status();
    match self.settle(outcome, false) {
      Ok(()) => status,
      Err(_) => {
        warn!(task_id = %self.shared.task_id, "Task finished but its future was already settled externally; outcome dropped.");
        self
          .shared
          .outcome
          .get()
          .map(Outcome::status)
          .unwrap_or(TaskCompletionStatus::Cancelled)
      }
    }
  }

  fn settle(&self, outcome: Outcome<T>, only_if_pending: bool) -> Result<(), Outcome<T>> {
    let listeners = {
      let mut waiters = self.shared.waiters.lock();
      if waiters.phase == Phase::Done || (only_if_pending && waiters.phase != Phase::Pending) {
        return Err(outcome);
      }
      if let Err(rejected) = self.shared.outcome.set(outcome) {
        return Err(rejected);
      }
      waiters.phase = Phase::Done;
      self.shared.done.notify_all();
      std::mem::take(&mut waiters.listeners)
    };

    if let Some(outcome) = self.shared.outcome.get() {
      for listener in listeners {
        Self::invoke_listener(self.shared.task_id, listener, outcome);
      }
    }
    Ok(())
  }

  fn invoke_listener(task_id: u64, listener: Listener<T>, outcome: &Outcome<T>) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| listener(outcome.as_result())));
    if result.is_err() {
      error!(%task_id, "A future listener panicked during execution.");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::thread;

  #[test]
  fn test_get_after_complete_returns_value() {
    let future = ListenableFuture::new();
    future.complete(42).unwrap();
    assert!(future.is_done());
    assert_eq!(future.get().unwrap(), 42);
    assert_eq!(future.get_timeout(Duration::from_millis(1)).unwrap(), 42);
  }

  #[test]
  fn test_get_after_fail_returns_execution_error() {
    let future = ListenableFuture::<u32>::new();
    future.fail("boom").unwrap();
    match future.get() {
      Err(SchedulerError::Execution { cause }) => assert_eq!(cause.to_string(), "boom"),
      other => panic!("Expected Execution error, got {:?}", other),
    }
  }

  #[test]
  fn test_cancel_pending_future() {
    let future = ListenableFuture::<u32>::new();
    assert!(future.cancel());
    assert!(future.is_cancelled());
    assert!(future.cancellation_token().is_cancelled());
    assert!(matches!(future.get(), Err(SchedulerError::Cancelled)));
    // Already terminal.
    assert!(!future.cancel());
  }

  #[test]
  fn test_double_complete_is_illegal_state() {
    let future = ListenableFuture::new();
    future.complete(1).unwrap();
    assert!(matches!(future.complete(2), Err(SchedulerError::IllegalState(_))));
    assert!(matches!(future.fail("late"), Err(SchedulerError::IllegalState(_))));
    assert_eq!(future.get().unwrap(), 1);
  }

  #[test]
  fn test_get_timeout_on_pending_future() {
    let future = ListenableFuture::<u32>::new();
    let started = Instant::now();
    let result = future.get_timeout(Duration::from_millis(30));
    assert!(matches!(result, Err(SchedulerError::Timeout(_))));
    assert!(started.elapsed() >= Duration::from_millis(30));
    // Timing out leaves the future usable.
    assert!(!future.is_done());
    future.complete(7).unwrap();
    assert_eq!(future.get().unwrap(), 7);
  }

  #[test]
  fn test_get_blocks_until_completed_by_other_thread() {
    let future = ListenableFuture::new();
    let completer = future.clone();
    let handle = thread::spawn(move || {
      thread::sleep(Duration::from_millis(20));
      completer.complete("done".to_string()).unwrap();
    });
    assert_eq!(future.get().unwrap(), "done");
    handle.join().unwrap();
  }

  #[test]
  fn test_listener_on_terminal_future_runs_on_calling_thread() {
    let future = ListenableFuture::new();
    future.complete(5).unwrap();

    let caller = thread::current().id();
    let seen = Arc::new(Mutex::new(None));
    let seen_clone = seen.clone();
    future.add_listener(move |result| {
      *seen_clone.lock() = Some((thread::current().id(), *result.unwrap()));
    });
    assert_eq!(*seen.lock(), Some((caller, 5)));
  }

  #[test]
  fn test_listener_runs_on_completing_thread() {
    let future = ListenableFuture::<u32>::new();
    let seen = Arc::new(Mutex::new(None));
    let seen_clone = seen.clone();
    future.add_listener(move |result| {
      *seen_clone.lock() = Some((thread::current().id(), result.is_err()));
    });

    let completer = future.clone();
    let handle = thread::spawn(move || {
      completer.fail("nope").unwrap();
      thread::current().id()
    });
    let completing_thread = handle.join().unwrap();
    assert_eq!(*seen.lock(), Some((completing_thread, true)));
  }

  #[test]
  fn test_listeners_fire_once_and_panics_are_isolated() {
    let future = ListenableFuture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    future.add_listener(|_| panic!("listener failure"));
    for _ in 0..3 {
      let calls = calls.clone();
      future.add_listener(move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
      });
    }
    future.complete(()).unwrap();
    let _ = future.complete(());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[test]
  fn test_running_future_cancel_signals_token_and_settles_cancelled() {
    let future = ListenableFuture::<u32>::new();
    assert!(future.begin_running());
    assert!(future.cancel());
    assert!(!future.is_done());
    assert!(future.cancellation_token().is_cancelled());

    let status = future.finish_running(Ok(3));
    assert_eq!(status, TaskCompletionStatus::Cancelled);
    assert!(matches!(future.get(), Err(SchedulerError::Cancelled)));
  }

  #[test]
  fn test_cancelled_future_is_not_started() {
    let future = ListenableFuture::<u32>::new();
    future.cancel();
    assert!(!future.begin_running());
  }
}
