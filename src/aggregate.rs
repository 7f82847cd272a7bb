use crate::error::{SchedulerError, TaskError};
use crate::future::ListenableFuture;
use crate::partition::Partition;
use crate::scheduler::PriorityScheduler;
use crate::task::{Task, TaskPriority};

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Computes a `width × height` grid one row band per task and reassembles the
/// rows into a row-major buffer in domain order, whatever order they finish in.
#[derive(Debug, Clone, Copy)]
pub struct PartitionedAggregator<'a> {
  scheduler: &'a PriorityScheduler,
  priority: TaskPriority,
  rows_per_task: usize,
}

impl<'a> PartitionedAggregator<'a> {
  pub fn new(scheduler: &'a PriorityScheduler) -> Self {
    Self {
      scheduler,
      priority: TaskPriority::High,
      rows_per_task: 1,
    }
  }

  pub fn with_priority(mut self, priority: TaskPriority) -> Self {
    self.priority = priority;
    self
  }

  /// Groups rows into bands of `rows_per_task` for coarser tasks.
  pub fn with_rows_per_task(mut self, rows_per_task: usize) -> Self {
    self.rows_per_task = rows_per_task.max(1);
    self
  }

  /// Same as [`run_with_offset`](Self::run_with_offset) with rows starting at 0.
  pub fn run<T, F>(&self, width: usize, height: usize, row_fn: F) -> Result<Vec<T>, SchedulerError>
  where
    T: Clone + Default + Send + Sync + 'static,
    F: Fn(u64, &CancellationToken) -> Result<Vec<T>, TaskError> + Send + Sync + 'static,
  {
    self.run_with_offset(width, height, 0, row_fn)
  }

  /// Computes rows `y_offset..y_offset + height` with `row_fn` and returns
  /// them as one buffer where row `y` starts at `width * (y - y_offset)`.
  ///
  /// # Errors
  /// Returns the first failing row's error in domain order, after cancelling
  /// the rows still outstanding. A row with a length other than `width` fails
  /// with `SchedulerError::Execution`.
  pub fn run_with_offset<T, F>(
    &self,
    width: usize,
    height: usize,
    y_offset: u64,
    row_fn: F,
  ) -> Result<Vec<T>, SchedulerError>
  where
    T: Clone + Default + Send + Sync + 'static,
    F: Fn(u64, &CancellationToken) -> Result<Vec<T>, TaskError> + Send + Sync + 'static,
  {
    let mut image_data = vec![T::default(); width * height];
    if image_data.is_empty() {
      return Ok(image_data);
    }

    let row_fn = Arc::new(row_fn);
    let y_end = y_offset + height as u64;
    let bands: Vec<Partition> = (y_offset..y_end)
      .step_by(self.rows_per_task)
      .enumerate()
      .map(|(index, start)| Partition::new(index, start..y_end.min(start + self.rows_per_task as u64)))
      .collect();
    let future_map: DashMap<u64, ListenableFuture<Vec<T>>> = DashMap::with_capacity(bands.len());

    for band in &bands {
      let band = *band;
      let row_fn = row_fn.clone();
      let task = Task::try_call(move |token: &CancellationToken| -> Result<Vec<T>, TaskError> {
        let mut values = Vec::with_capacity(width * band.len() as usize);
        for y in band.range() {
          if token.is_cancelled() {
            break;
          }
          let row = row_fn(y, token)?;
          if row.len() != width {
            return Err(format!("row {} produced {} values, expected {}", y, row.len(), width).into());
          }
          values.extend(row);
        }
        Ok(values)
      });
      match self.scheduler.submit(task, self.priority) {
        Ok(future) => {
          future_map.insert(band.start, future);
        }
        Err(e) => {
          Self::cancel_outstanding(&future_map);
          return Err(e);
        }
      }
    }
    debug!(width, height, y_offset, tasks = bands.len(), "Submitted row tasks; composing results.");

    for band in &bands {
      let index_start = width * (band.start - y_offset) as usize;
      let composed = match future_map.remove(&band.start) {
        Some((_, future)) => future.inspect(|values| {
          image_data[index_start..index_start + values.len()].clone_from_slice(values);
        }),
        None => Err(SchedulerError::IllegalState("row future missing from the future map")),
      };
      if let Err(e) = composed {
        let cancelled = Self::cancel_outstanding(&future_map);
        warn!(row = band.start, cancelled, "Aborting assembly after a row failed: {}", e);
        return Err(e);
      }
    }

    info!(width, height, "Finished composing partitioned results.");
    Ok(image_data)
  }

  fn cancel_outstanding<T: Send + Sync + 'static>(future_map: &DashMap<u64, ListenableFuture<Vec<T>>>) -> usize {
    future_map.iter().filter(|entry| entry.value().cancel()).count()
  }
}
