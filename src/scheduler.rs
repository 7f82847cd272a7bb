use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::future::ListenableFuture;
use crate::handle::{RecurringTask, RecurringTaskHandle, Removable};
use crate::notifier::{CompletionNotifier, TaskCompletionInfo, TaskCompletionStatus};
use crate::task::{next_task_id, FutureTask, QueuedTask, Task, TaskKind, TaskPriority};
use crate::task_queue::PriorityTaskQueue;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, error, info, info_span, trace, warn};

/// Lifecycle of a scheduler. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  Running,
  ShuttingDown,
  Terminated,
}

/// Defines what happens to queued work when the scheduler shuts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
  /// Runs every already-queued task before terminating.
  Graceful,
  /// Cancels every queued task that has not started; running tasks finish.
  DiscardPending,
  /// Like `DiscardPending`, and also signals the token of every running task.
  ForcefulCancel,
}

struct PoolState {
  queue: PriorityTaskQueue,
  lifecycle: Lifecycle,
  workers: usize,
  idle: usize,
  running: usize,
}

struct SchedulerInner {
  pool_name: Arc<str>,
  config: SchedulerConfig,
  state: Mutex<PoolState>,
  work_available: Condvar,
  terminated: Condvar,
  active_task_info: DashMap<u64, CancellationToken>,
  notifier: CompletionNotifier,
  next_worker_id: AtomicUsize,
}

/// A bounded pool of worker threads pulling from one three-lane priority queue.
///
/// The scheduler is an ordinary value: construct it, pass it by reference to
/// whatever needs it, and shut it down (or drop it) when done. Dropping it
/// performs a `DiscardPending` shutdown without waiting for workers.
pub struct PriorityScheduler {
  inner: Arc<SchedulerInner>,
}

impl fmt::Debug for PriorityScheduler {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.inner.state.lock();
    f.debug_struct("PriorityScheduler")
      .field("pool_name", &self.inner.pool_name)
      .field("lifecycle", &state.lifecycle)
      .field("workers", &state.workers)
      .field("queue", &state.queue)
      .finish_non_exhaustive()
  }
}

impl PriorityScheduler {
  pub fn new(config: SchedulerConfig) -> Self {
    let config = config.normalized();
    let pool_name: Arc<str> = Arc::from(config.pool_name.as_str());
    info!(
      pool_name = %pool_name,
      core = config.core_pool_size,
      max = config.max_pool_size,
      "Creating priority scheduler."
    );
    Self {
      inner: Arc::new(SchedulerInner {
        pool_name: pool_name.clone(),
        config,
        state: Mutex::new(PoolState {
          queue: PriorityTaskQueue::new(),
          lifecycle: Lifecycle::Running,
          workers: 0,
          idle: 0,
          running: 0,
        }),
        work_available: Condvar::new(),
        terminated: Condvar::new(),
        active_task_info: DashMap::new(),
        notifier: CompletionNotifier::new(pool_name),
        next_worker_id: AtomicUsize::new(0),
      }),
    }
  }

  /// A pool with `pool_size` core and maximum workers and default settings otherwise.
  pub fn with_pool_size(pool_size: usize) -> Self {
    Self::new(SchedulerConfig::new(pool_size, pool_size))
  }

  pub fn name(&self) -> &str {
    &self.inner.pool_name
  }

  pub fn config(&self) -> &SchedulerConfig {
    &self.inner.config
  }

  pub fn lifecycle(&self) -> Lifecycle {
    self.inner.state.lock().lifecycle
  }

  pub fn is_shutdown(&self) -> bool {
    self.lifecycle() != Lifecycle::Running
  }

  pub fn is_terminated(&self) -> bool {
    self.lifecycle() == Lifecycle::Terminated
  }

  /// Number of live worker threads.
  pub fn current_pool_size(&self) -> usize {
    self.inner.state.lock().workers
  }

  /// Returns the number of tasks waiting in the queue, delayed ones included.
  pub fn queued_task_count(&self) -> usize {
    self.inner.state.lock().queue.len()
  }

  /// Returns the number of ready tasks waiting in one priority lane.
  pub fn queued_task_count_for(&self, priority: TaskPriority) -> usize {
    self.inner.state.lock().queue.lane_len(priority)
  }

  /// Returns the number of tasks currently executing on workers.
  pub fn active_task_count(&self) -> usize {
    self.inner.active_task_info.len()
  }

  /// Queues `task` in the lane for `priority` and returns the future bound to it.
  ///
  /// # Errors
  /// Returns `SchedulerError::RejectedExecution` once shutdown has begun.
  pub fn submit<T: Send + Sync + 'static>(
    &self,
    task: Task<T>,
    priority: TaskPriority,
  ) -> Result<ListenableFuture<T>, SchedulerError> {
    self.enqueue_future(task, priority, None)
  }

  /// Queues `task` once `delay` has elapsed.
  pub fn schedule<T: Send + Sync + 'static>(
    &self,
    task: Task<T>,
    delay: Duration,
    priority: TaskPriority,
  ) -> Result<ListenableFuture<T>, SchedulerError> {
    self.enqueue_future(task, priority, Some(delay))
  }

  /// Runs `task` after `initial_delay`, then again `delay` after each run
  /// finishes, until the returned handle is cancelled or the scheduler shuts
  /// down. A panicking run is logged and does not stop the recurrence. Runs
  /// use the configured default priority and never overlap.
  pub fn schedule_with_fixed_delay(
    &self,
    task: impl FnMut(&CancellationToken) + Send + 'static,
    initial_delay: Duration,
    delay: Duration,
  ) -> Result<RecurringTaskHandle, SchedulerError> {
    let recurring = Arc::new(RecurringTask::new(
      next_task_id(),
      self.inner.config.default_priority,
      delay,
      Box::new(task),
    ));
    let task_id = recurring.task_id;
    self
      .inner
      .enqueue(QueuedTask::recurring(recurring.clone()), Some(initial_delay))?;
    debug!(pool_name = %self.inner.pool_name, %task_id, ?initial_delay, ?delay, "Scheduled fixed-delay task.");
    Ok(RecurringTaskHandle { task: recurring })
  }

  /// Removes a task that has not started yet, cancelling its future, or stops
  /// the future runs of a recurring task. Has no effect on a task already
  /// running. Returns `true` if anything was removed or stopped.
  pub fn remove<R: Removable + ?Sized>(&self, target: &R) -> bool {
    let task_id = target.task_id();
    let stopped = target.stop_recurrence();
    let removed = self.inner.state.lock().queue.remove(task_id);
    match removed {
      Some(task) => {
        debug!(pool_name = %self.inner.pool_name, %task_id, "Removed pending task from queue.");
        self.inner.discard(task);
        let mut state = self.inner.state.lock();
        self.inner.check_terminated(&mut state);
        true
      }
      None => stopped,
    }
  }

  /// Starts workers up to the maximum pool size so that later submissions find
  /// a running worker. Returns the number of workers started.
  pub fn prestart_all_threads(&self) -> usize {
    let mut state = self.inner.state.lock();
    if state.lifecycle != Lifecycle::Running {
      return 0;
    }
    let mut started = 0;
    while state.workers < self.inner.config.max_pool_size {
      if !self.inner.spawn_worker(&mut state) {
        break;
      }
      started += 1;
    }
    debug!(pool_name = %self.inner.pool_name, started, workers = state.workers, "Prestarted workers.");
    started
  }

  /// Registers a handler invoked for every task the scheduler finishes,
  /// skips or discards.
  pub fn on_task_completion(&self, handler: impl Fn(&TaskCompletionInfo) + Send + Sync + 'static) {
    self.inner.notifier.add_handler(handler);
  }

  /// Stops accepting tasks. Returns the number of queued tasks discarded.
  ///
  /// The scheduler becomes `Terminated` once the queue is empty and no task is
  /// running; use [`await_termination`](Self::await_termination) to wait for it.
  pub fn shutdown(&self, mode: ShutdownMode) -> usize {
    let discarded = {
      let mut state = self.inner.state.lock();
      if state.lifecycle != Lifecycle::Running {
        info!(pool_name = %self.inner.pool_name, "Shutdown already in progress or completed.");
        return 0;
      }
      info!(pool_name = %self.inner.pool_name, "Initiating scheduler shutdown (mode: {:?}).", mode);
      state.lifecycle = Lifecycle::ShuttingDown;
      let discarded = match mode {
        ShutdownMode::Graceful => state.queue.drain_recurring(),
        ShutdownMode::DiscardPending | ShutdownMode::ForcefulCancel => state.queue.drain_all(),
      };
      self.inner.work_available.notify_all();
      discarded
    };

    if mode == ShutdownMode::ForcefulCancel {
      for entry in self.inner.active_task_info.iter() {
        debug!(pool_name = %self.inner.pool_name, task_id = %entry.key(), "Forcefully cancelling active task during shutdown.");
        entry.value().cancel();
      }
    }

    let discarded_count = discarded.len();
    if discarded_count > 0 {
      info!(pool_name = %self.inner.pool_name, discarded = discarded_count, "Discarded queued tasks.");
    }
    for task in discarded {
      self.inner.discard(task);
    }

    let mut state = self.inner.state.lock();
    self.inner.check_terminated(&mut state);
    discarded_count
  }

  /// Blocks until the scheduler is terminated and every worker has exited.
  /// Returns `false` if `timeout` elapsed first.
  pub fn await_termination(&self, timeout: Option<Duration>) -> bool {
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut state = self.inner.state.lock();
    while !Self::fully_terminated(&state) {
      match deadline {
        Some(deadline) => {
          if self.inner.terminated.wait_until(&mut state, deadline).timed_out() {
            return Self::fully_terminated(&state);
          }
        }
        None => self.inner.terminated.wait(&mut state),
      }
    }
    true
  }

  fn fully_terminated(state: &PoolState) -> bool {
    state.lifecycle == Lifecycle::Terminated && state.workers == 0
  }

  fn enqueue_future<T: Send + Sync + 'static>(
    &self,
    task: Task<T>,
    priority: TaskPriority,
    delay: Option<Duration>,
  ) -> Result<ListenableFuture<T>, SchedulerError> {
    let future = ListenableFuture::new();
    let task_id = future.task_id();
    let runnable = FutureTask {
      task,
      future: future.clone(),
    };
    debug!(pool_name = %self.inner.pool_name, %task_id, ?priority, ?delay, "Submitting task to queue.");
    self
      .inner
      .enqueue(QueuedTask::one_shot(task_id, priority, Box::new(runnable)), delay)?;

    // A future cancelled while queued leaves its lane at once.
    let inner = Arc::downgrade(&self.inner);
    future.add_listener(move |result| {
      if let (Err(SchedulerError::Cancelled), Some(inner)) = (result, inner.upgrade()) {
        inner.purge_cancelled(task_id);
      }
    });
    Ok(future)
  }
}

impl SchedulerInner {
  fn enqueue(self: &Arc<Self>, task: QueuedTask, delay: Option<Duration>) -> Result<(), SchedulerError> {
    let task_id = task.task_id;
    let priority = task.priority;
    let mut state = self.state.lock();
    if state.lifecycle != Lifecycle::Running {
      warn!(
        pool_name = %self.pool_name,
        %task_id,
        lifecycle = ?state.lifecycle,
        "Submit: Attempted to submit task to a scheduler that is shutting down or terminated."
      );
      return Err(SchedulerError::RejectedExecution(state.lifecycle));
    }

    match delay.filter(|d| !d.is_zero()) {
      Some(delay) => state.queue.push_delayed(task, Instant::now() + delay),
      None => state.queue.push(task),
    }
    trace!(pool_name = %self.pool_name, %task_id, ?priority, ready = state.queue.ready_len(), "Task queued.");
    self.grow_if_needed(&mut state);
    self.work_available.notify_one();
    Ok(())
  }

  /// Adds a worker when ready work outnumbers idle workers and the pool may
  /// grow. Past the core size the backlog must exceed the threshold first.
  fn grow_if_needed(self: &Arc<Self>, state: &mut PoolState) {
    if state.workers == 0 {
      self.spawn_worker(state);
      return;
    }
    if state.workers >= self.config.max_pool_size {
      return;
    }
    let ready = state.queue.ready_len();
    if ready <= state.idle {
      return;
    }
    let backlog = ready - state.idle;
    if state.workers < self.config.core_pool_size || backlog > self.config.backlog_threshold {
      self.spawn_worker(state);
    }
  }

  fn spawn_worker(self: &Arc<Self>, state: &mut PoolState) -> bool {
    let worker_id = self.next_worker_id.fetch_add(1, AtomicOrdering::Relaxed);
    let inner = self.clone();
    let spawn_result = thread::Builder::new()
      .name(format!("{}-worker-{}", self.pool_name, worker_id))
      .spawn(move || inner.run_worker_loop(worker_id));
    match spawn_result {
      Ok(_) => {
        state.workers += 1;
        trace!(pool_name = %self.pool_name, worker_id, workers = state.workers, "Spawned worker thread.");
        true
      }
      Err(spawn_error) => {
        error!(pool_name = %self.pool_name, worker_id, "Failed to spawn worker thread: {}", spawn_error);
        false
      }
    }
  }

  fn run_worker_loop(self: Arc<Self>, worker_id: usize) {
    let span = info_span!("scheduler_worker", pool_name = %self.pool_name, worker_id);
    let _entered = span.enter();
    debug!("Worker started.");

    let mut state = self.state.lock();
    loop {
      let now = Instant::now();
      state.queue.promote_due(now);

      if let Some(task) = state.queue.pop() {
        state.running += 1;
        let rearm = MutexGuard::unlocked(&mut state, || self.execute(task));
        state.running -= 1;
        if let Some(recurring) = rearm {
          self.rearm(&mut state, recurring);
        }
        self.check_terminated(&mut state);
        continue;
      }

      if state.lifecycle != Lifecycle::Running && state.queue.is_empty() {
        break;
      }

      let keep_alive_deadline =
        (state.workers > self.config.core_pool_size).then(|| now + self.config.keep_alive);
      let deadline = match (state.queue.next_due(), keep_alive_deadline) {
        (Some(due), Some(keep_alive)) => Some(due.min(keep_alive)),
        (due, keep_alive) => due.or(keep_alive),
      };

      state.idle += 1;
      match deadline {
        Some(deadline) => {
          self.work_available.wait_until(&mut state, deadline);
        }
        None => self.work_available.wait(&mut state),
      }
      state.idle -= 1;

      if let Some(keep_alive) = keep_alive_deadline {
        if Instant::now() >= keep_alive
          && state.lifecycle == Lifecycle::Running
          && state.workers > self.config.core_pool_size
          && state.queue.ready_len() == 0
        {
          debug!("Idle above core pool size past keep-alive; worker retiring.");
          break;
        }
      }
    }

    state.workers -= 1;
    self.check_terminated(&mut state);
    if state.workers == 0 {
      self.terminated.notify_all();
    }
    debug!(remaining_workers = state.workers, "Worker stopped.");
  }

  /// Runs one dequeued task with the state lock released. Returns a recurring
  /// task that should be re-armed.
  fn execute(&self, task: QueuedTask) -> Option<Arc<RecurringTask>> {
    let QueuedTask {
      task_id,
      priority,
      enqueued_at,
      kind,
    } = task;
    let span = debug_span!("scheduled_task", %task_id, ?priority);
    let _entered = span.enter();
    trace!(waited_us = enqueued_at.elapsed().as_micros() as u64, "Dequeued task.");

    match kind {
      TaskKind::OneShot(runnable) => {
        self.active_task_info.insert(task_id, runnable.token());
        let status = runnable.run();
        self.active_task_info.remove(&task_id);
        match status {
          TaskCompletionStatus::Success => trace!("Task executed successfully."),
          TaskCompletionStatus::Failed => debug!("Task failed; failure captured in its future."),
          TaskCompletionStatus::Cancelled => debug!("Task cancelled before or while running."),
        }
        self.notifier.notify(task_id, priority, status, false);
        None
      }
      TaskKind::Recurring(recurring) => {
        if recurring.is_cancelled() {
          debug!("Dequeued recurring task already cancelled; dropping it.");
          return None;
        }
        self.active_task_info.insert(task_id, recurring.token.clone());
        let status = recurring.run_once();
        self.active_task_info.remove(&task_id);
        self.notifier.notify(task_id, priority, status, true);
        Some(recurring)
      }
    }
  }

  fn rearm(&self, state: &mut PoolState, recurring: Arc<RecurringTask>) {
    if state.lifecycle != Lifecycle::Running || recurring.is_cancelled() {
      debug!(task_id = %recurring.task_id, "Recurring task not rescheduled.");
      return;
    }
    let due = Instant::now() + recurring.delay;
    state.queue.push_delayed(QueuedTask::recurring(recurring), due);
  }

  /// Settles a task that will never run.
  fn discard(&self, task: QueuedTask) {
    let (task_id, priority, recurring) = (task.task_id, task.priority, task.is_recurring());
    task.discard();
    self
      .notifier
      .notify(task_id, priority, TaskCompletionStatus::Cancelled, recurring);
  }

  fn purge_cancelled(&self, task_id: u64) {
    let removed = self.state.lock().queue.remove(task_id);
    if let Some(task) = removed {
      trace!(pool_name = %self.pool_name, %task_id, "Purged cancelled task from queue.");
      self.discard(task);
      let mut state = self.state.lock();
      self.check_terminated(&mut state);
    }
  }

  fn check_terminated(&self, state: &mut PoolState) {
    if state.lifecycle == Lifecycle::ShuttingDown && state.queue.is_empty() && state.running == 0 {
      state.lifecycle = Lifecycle::Terminated;
      info!(pool_name = %self.pool_name, workers = state.workers, "Scheduler terminated.");
      self.work_available.notify_all();
      self.terminated.notify_all();
    }
  }
}

impl Drop for PriorityScheduler {
  fn drop(&mut self) {
    if self.lifecycle() == Lifecycle::Running {
      info!(
        pool_name = %self.inner.pool_name,
        "PriorityScheduler dropped. Initiating implicit shutdown (discarding pending tasks)."
      );
      self.shutdown(ShutdownMode::DiscardPending);
    } else {
      trace!(pool_name = %self.inner.pool_name, "Drop: Shutdown already in progress or completed.");
    }
  }
}
