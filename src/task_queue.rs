use crate::task::{QueuedTask, TaskPriority};

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;
use std::time::Instant;

/// A task waiting for its due time before it joins a lane.
struct DelayedTask {
  due: Instant,
  sequence: u64,
  task: QueuedTask,
}

// Min-heap on (due, sequence): earliest first, insertion order among equals.
impl Ord for DelayedTask {
  fn cmp(&self, other: &Self) -> Ordering {
    other
      .due
      .cmp(&self.due)
      .then_with(|| other.sequence.cmp(&self.sequence))
  }
}

impl PartialOrd for DelayedTask {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl PartialEq for DelayedTask {
  fn eq(&self, other: &Self) -> bool {
    self.due == other.due && self.sequence == other.sequence
  }
}

impl Eq for DelayedTask {}

/// Three FIFO lanes plus a timer heap for tasks that are not yet due.
///
/// `pop` always drains `High` before `Low` and `Low` before `Starvable`, and is
/// strictly FIFO within a lane. The queue itself is not synchronized; the
/// scheduler guards it with its single state lock.
#[derive(Default)]
pub(crate) struct PriorityTaskQueue {
  high: VecDeque<QueuedTask>,
  low: VecDeque<QueuedTask>,
  starvable: VecDeque<QueuedTask>,
  delayed: BinaryHeap<DelayedTask>,
  delay_sequence: u64,
}

impl fmt::Debug for PriorityTaskQueue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PriorityTaskQueue")
      .field("high", &self.high.len())
      .field("low", &self.low.len())
      .field("starvable", &self.starvable.len())
      .field("delayed", &self.delayed.len())
      .finish()
  }
}

impl PriorityTaskQueue {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  fn lane_mut(&mut self, priority: TaskPriority) -> &mut VecDeque<QueuedTask> {
    match priority {
      TaskPriority::High => &mut self.high,
      TaskPriority::Low => &mut self.low,
      TaskPriority::Starvable => &mut self.starvable,
    }
  }

  /// Appends a ready task to the back of its priority lane.
  pub(crate) fn push(&mut self, mut task: QueuedTask) {
    task.enqueued_at = Instant::now();
    self.lane_mut(task.priority).push_back(task);
  }

  /// Holds `task` back until `due`; `promote_due` moves it into its lane.
  pub(crate) fn push_delayed(&mut self, task: QueuedTask, due: Instant) {
    let sequence = self.delay_sequence;
    self.delay_sequence += 1;
    self.delayed.push(DelayedTask { due, sequence, task });
  }

  /// Moves every delayed task due at `now` into its lane, earliest first.
  pub(crate) fn promote_due(&mut self, now: Instant) -> usize {
    let mut promoted = 0;
    while self.delayed.peek().is_some_and(|d| d.due <= now) {
      if let Some(delayed) = self.delayed.pop() {
        self.push(delayed.task);
        promoted += 1;
      }
    }
    promoted
  }

  /// Due time of the earliest delayed task.
  pub(crate) fn next_due(&self) -> Option<Instant> {
    self.delayed.peek().map(|d| d.due)
  }

  /// Takes the next ready task: `High`, then `Low`, then `Starvable`.
  pub(crate) fn pop(&mut self) -> Option<QueuedTask> {
    self
      .high
      .pop_front()
      .or_else(|| self.low.pop_front())
      .or_else(|| self.starvable.pop_front())
  }

  /// Removes a task that has not been dequeued yet, ready or delayed.
  pub(crate) fn remove(&mut self, task_id: u64) -> Option<QueuedTask> {
    for priority in [TaskPriority::High, TaskPriority::Low, TaskPriority::Starvable] {
      let lane = self.lane_mut(priority);
      if let Some(position) = lane.iter().position(|t| t.task_id == task_id) {
        return lane.remove(position);
      }
    }

    if self.delayed.iter().any(|d| d.task.task_id == task_id) {
      let (removed, kept): (Vec<_>, Vec<_>) =
        std::mem::take(&mut self.delayed).into_iter().partition(|d| d.task.task_id == task_id);
      self.delayed = kept.into_iter().collect();
      return removed.into_iter().next().map(|d| d.task);
    }
    None
  }

  /// Removes every queued task, ready and delayed.
  pub(crate) fn drain_all(&mut self) -> Vec<QueuedTask> {
    let mut drained: Vec<QueuedTask> = Vec::with_capacity(self.len());
    drained.extend(self.high.drain(..));
    drained.extend(self.low.drain(..));
    drained.extend(self.starvable.drain(..));
    drained.extend(self.delayed.drain().map(|d| d.task));
    drained
  }

  /// Removes delayed recurring entries; used once the scheduler stops re-arming them.
  pub(crate) fn drain_recurring(&mut self) -> Vec<QueuedTask> {
    let mut drained = Vec::new();
    for priority in [TaskPriority::High, TaskPriority::Low, TaskPriority::Starvable] {
      let lane = self.lane_mut(priority);
      let (recurring, kept): (VecDeque<_>, VecDeque<_>) = lane.drain(..).partition(|t| t.is_recurring());
      *lane = kept;
      drained.extend(recurring);
    }
    let (recurring, kept): (Vec<_>, Vec<_>) =
      std::mem::take(&mut self.delayed).into_iter().partition(|d| d.task.is_recurring());
    self.delayed = kept.into_iter().collect();
    drained.extend(recurring.into_iter().map(|d| d.task));
    drained
  }

  /// Number of tasks ready to run now.
  pub(crate) fn ready_len(&self) -> usize {
    self.high.len() + self.low.len() + self.starvable.len()
  }

  pub(crate) fn delayed_len(&self) -> usize {
    self.delayed.len()
  }

  pub(crate) fn lane_len(&self, priority: TaskPriority) -> usize {
    match priority {
      TaskPriority::High => self.high.len(),
      TaskPriority::Low => self.low.len(),
      TaskPriority::Starvable => self.starvable.len(),
    }
  }

  pub(crate) fn len(&self) -> usize {
    self.ready_len() + self.delayed_len()
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::future::ListenableFuture;
  use crate::task::{FutureTask, Task};
  use std::time::Duration;

  // Helper to create a dummy QueuedTask for testing the queue.
  fn dummy_task(priority: TaskPriority) -> (QueuedTask, ListenableFuture<&'static str>) {
    let future = ListenableFuture::new();
    let runnable = FutureTask {
      task: Task::call(|_| "done"),
      future: future.clone(),
    };
    (
      QueuedTask::one_shot(future.task_id(), priority, Box::new(runnable)),
      future,
    )
  }

  fn pop_id(queue: &mut PriorityTaskQueue) -> Option<u64> {
    queue.pop().map(|t| t.task_id)
  }

  #[test]
  fn test_higher_lane_always_dequeued_first() {
    let mut queue = PriorityTaskQueue::new();
    let (starvable, _s) = dummy_task(TaskPriority::Starvable);
    let (low, _l) = dummy_task(TaskPriority::Low);
    let (high, _h) = dummy_task(TaskPriority::High);
    let (starvable_id, low_id, high_id) = (starvable.task_id, low.task_id, high.task_id);

    queue.push(starvable);
    queue.push(low);
    queue.push(high);
    assert_eq!(queue.ready_len(), 3);

    assert_eq!(pop_id(&mut queue), Some(high_id));
    assert_eq!(pop_id(&mut queue), Some(low_id));
    assert_eq!(pop_id(&mut queue), Some(starvable_id));
    assert_eq!(pop_id(&mut queue), None);
  }

  #[test]
  fn test_fifo_within_lane() {
    let mut queue = PriorityTaskQueue::new();
    let mut ids = Vec::new();
    let mut futures = Vec::new();
    for _ in 0..5 {
      let (task, future) = dummy_task(TaskPriority::Low);
      ids.push(task.task_id);
      futures.push(future);
      queue.push(task);
    }
    let popped: Vec<u64> = std::iter::from_fn(|| pop_id(&mut queue)).collect();
    assert_eq!(popped, ids);
  }

  #[test]
  fn test_priority_re_evaluated_at_each_pop() {
    let mut queue = PriorityTaskQueue::new();
    let (low, _l) = dummy_task(TaskPriority::Low);
    let low_id = low.task_id;
    queue.push(low);

    let (high, _h) = dummy_task(TaskPriority::High);
    let high_id = high.task_id;
    queue.push(high);

    assert_eq!(pop_id(&mut queue), Some(high_id));
    assert_eq!(pop_id(&mut queue), Some(low_id));
  }

  #[test]
  fn test_delayed_tasks_promoted_in_due_order() {
    let mut queue = PriorityTaskQueue::new();
    let now = Instant::now();
    let (later, _a) = dummy_task(TaskPriority::High);
    let (sooner, _b) = dummy_task(TaskPriority::High);
    let (later_id, sooner_id) = (later.task_id, sooner.task_id);

    queue.push_delayed(later, now + Duration::from_millis(20));
    queue.push_delayed(sooner, now + Duration::from_millis(10));
    assert_eq!(queue.ready_len(), 0);
    assert_eq!(queue.delayed_len(), 2);
    assert_eq!(queue.next_due(), Some(now + Duration::from_millis(10)));

    assert_eq!(queue.promote_due(now), 0);
    assert_eq!(queue.promote_due(now + Duration::from_millis(15)), 1);
    assert_eq!(pop_id(&mut queue), Some(sooner_id));
    assert_eq!(queue.promote_due(now + Duration::from_millis(25)), 1);
    assert_eq!(pop_id(&mut queue), Some(later_id));
    assert!(queue.is_empty());
  }

  #[test]
  fn test_remove_pending_and_delayed() {
    let mut queue = PriorityTaskQueue::new();
    let (a, _a) = dummy_task(TaskPriority::Low);
    let (b, _b) = dummy_task(TaskPriority::Low);
    let (c, _c) = dummy_task(TaskPriority::Starvable);
    let (a_id, b_id, c_id) = (a.task_id, b.task_id, c.task_id);
    queue.push(a);
    queue.push(b);
    queue.push_delayed(c, Instant::now() + Duration::from_secs(60));

    assert_eq!(queue.remove(a_id).map(|t| t.task_id), Some(a_id));
    assert_eq!(queue.remove(c_id).map(|t| t.task_id), Some(c_id));
    assert!(queue.remove(c_id).is_none());
    assert_eq!(queue.lane_len(TaskPriority::Low), 1);
    assert_eq!(queue.delayed_len(), 0);
    assert_eq!(pop_id(&mut queue), Some(b_id));
  }

  #[test]
  fn test_drain_all_and_discard_cancels_futures() {
    let mut queue = PriorityTaskQueue::new();
    let (a, future_a) = dummy_task(TaskPriority::High);
    let (b, future_b) = dummy_task(TaskPriority::Starvable);
    queue.push(a);
    queue.push_delayed(b, Instant::now() + Duration::from_secs(60));

    let drained = queue.drain_all();
    assert_eq!(drained.len(), 2);
    assert!(queue.is_empty());
    for task in drained {
      task.discard();
    }
    assert!(future_a.is_cancelled());
    assert!(future_b.is_cancelled());
  }
}
