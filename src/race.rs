use crate::completion::CompletionQueue;
use crate::error::{SchedulerError, TaskError};
use crate::partition::Partition;
use crate::scheduler::PriorityScheduler;
use crate::task::{Task, TaskPriority};

use std::ops::Range;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Below this many values per partition the search runs inline instead.
pub const DEFAULT_MIN_PARTITION_SIZE: u64 = 10;

/// Splits a domain across the scheduler and returns the first qualifying
/// result any partition reports, cancelling the rest.
///
/// When several partitions find a result at nearly the same time, whichever
/// finishes first wins; it is not necessarily the one closest to the start of
/// the domain.
#[derive(Debug, Clone, Copy)]
pub struct RaceToFirstSearch<'a> {
  scheduler: &'a PriorityScheduler,
  priority: TaskPriority,
  min_partition_size: u64,
}

impl<'a> RaceToFirstSearch<'a> {
  pub fn new(scheduler: &'a PriorityScheduler) -> Self {
    Self {
      scheduler,
      priority: TaskPriority::High,
      min_partition_size: DEFAULT_MIN_PARTITION_SIZE,
    }
  }

  pub fn with_priority(mut self, priority: TaskPriority) -> Self {
    self.priority = priority;
    self
  }

  pub fn with_min_partition_size(mut self, min_partition_size: u64) -> Self {
    self.min_partition_size = min_partition_size;
    self
  }

  /// Runs `test` over `domain` split into `parallelism` partitions.
  ///
  /// `test` returns `Some` when its partition holds a qualifying value. It is
  /// handed its future's cancellation token and should check it at every step
  /// so that losing partitions stop soon after a winner is found.
  ///
  /// # Errors
  /// The first failing partition's `SchedulerError::Execution` is returned and
  /// the remaining partitions are cancelled. A panic in `test` surfaces as
  /// `Execution` on the inline path too. Submission errors are returned as-is.
  pub fn run<R, F>(&self, domain: Range<u64>, parallelism: usize, test: F) -> Result<Option<R>, SchedulerError>
  where
    R: Clone + Send + Sync + 'static,
    F: Fn(Partition, &CancellationToken) -> Result<Option<R>, TaskError> + Send + Sync + 'static,
  {
    let domain_size = domain.end.saturating_sub(domain.start);
    if domain_size == 0 {
      return Ok(None);
    }

    let parallelism = parallelism.max(1);
    if domain_size / (parallelism as u64) < self.min_partition_size {
      debug!(domain_size, parallelism, "Domain too small to partition; searching inline.");
      let partition = Partition::new(0, domain);
      return Task::try_call(move |token: &CancellationToken| test(partition, token))
        .execute(&CancellationToken::new())
        .map_err(SchedulerError::execution);
    }

    let test = Arc::new(test);
    let mut completions = CompletionQueue::new();
    for partition in Partition::split(domain, parallelism) {
      let test = test.clone();
      let submitted = self.scheduler.submit(
        Task::try_call(move |token: &CancellationToken| test(partition, token)),
        self.priority,
      );
      match submitted {
        Ok(future) => {
          completions.push(future);
        }
        Err(e) => {
          warn!(partition = partition.index, "Race search could not submit partition: {}", e);
          completions.cancel_remaining();
          return Err(e);
        }
      }
    }

    while let Some((index, future)) = completions.take() {
      match future.get() {
        Ok(Some(found)) => {
          let cancelled = completions.cancel_remaining();
          info!(partition = index, cancelled, "Race search found a result; cancelled remaining partitions.");
          return Ok(Some(found));
        }
        Ok(None) => debug!(partition = index, "Partition finished without a result."),
        Err(e) => {
          let cancelled = completions.cancel_remaining();
          warn!(partition = index, cancelled, "Race search partition did not finish: {}", e);
          return Err(e);
        }
      }
    }
    Ok(None)
  }
}
