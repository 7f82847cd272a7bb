//! Parallel trial-division primality testing on top of [`RaceToFirstSearch`],
//! and a windowed search for the next prime.

use crate::error::SchedulerError;
use crate::future::ListenableFuture;
use crate::partition::Partition;
use crate::race::RaceToFirstSearch;
use crate::scheduler::PriorityScheduler;
use crate::task::{Task, TaskPriority};

use std::collections::VecDeque;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Scans the odd candidates of `partition` (never below 3) for a divisor of
/// `n`. Stops early, reporting nothing, once `token` is cancelled.
pub fn scan_for_factor(n: u64, partition: Partition, token: &CancellationToken) -> Option<u64> {
  let mut candidate = partition.start.max(3);
  if candidate % 2 == 0 {
    candidate += 1;
  }
  let end = partition.end.min(n);
  while candidate < end {
    if token.is_cancelled() {
      return None;
    }
    if n % candidate == 0 {
      return Some(candidate);
    }
    candidate += 2;
  }
  None
}

/// Finds a non-trivial factor of `n`, or `None` if `n` is prime.
///
/// Even numbers short-circuit to 2 and values up to 3 have no factor;
/// everything else is searched over `[3, n)` in `parallelism` partitions. When
/// several partitions find a factor concurrently, any one of them may be
/// returned.
pub fn find_factor(scheduler: &PriorityScheduler, n: u64, parallelism: usize) -> Result<Option<u64>, SchedulerError> {
  if n <= 3 {
    return Ok(None);
  }
  if n % 2 == 0 {
    return Ok(Some(2));
  }
  debug!(n, parallelism, "Searching for a factor.");
  RaceToFirstSearch::new(scheduler).run(3..n, parallelism, move |partition, token| {
    Ok(scan_for_factor(n, partition, token))
  })
}

/// Returns `true` if `n` is prime.
pub fn is_prime(scheduler: &PriorityScheduler, n: u64, parallelism: usize) -> Result<bool, SchedulerError> {
  if n < 2 {
    return Ok(false);
  }
  Ok(find_factor(scheduler, n, parallelism)?.is_none())
}

/// Returns the smallest prime greater than `from`.
///
/// Candidates are tested concurrently: each candidate's test runs as a `Low`
/// task that itself fans out a factor search on the same scheduler. At most
/// `parallelism * 2` candidates are in flight, and results are consumed in
/// candidate order so the first prime seen is the smallest. The window never
/// exceeds `core_pool_size - 1`, which leaves a worker for the searches; a
/// single-worker pool tests candidates one at a time from the calling thread.
///
/// # Errors
/// Propagates the first failed candidate test, and returns
/// `SchedulerError::IllegalState` if no prime fits in a `u64`.
pub fn next_prime(scheduler: &Arc<PriorityScheduler>, from: u64, parallelism: usize) -> Result<u64, SchedulerError> {
  let window = parallelism
    .max(1)
    .saturating_mul(2)
    .min(scheduler.config().core_pool_size.saturating_sub(1));
  debug!(from, parallelism, window, "Searching for the next prime.");

  if window == 0 {
    let mut candidate = from;
    loop {
      candidate = candidate
        .checked_add(1)
        .ok_or(SchedulerError::IllegalState("no prime fits in u64"))?;
      if is_prime(scheduler, candidate, parallelism)? {
        return Ok(candidate);
      }
    }
  }

  let mut in_flight: VecDeque<(u64, ListenableFuture<bool>)> = VecDeque::with_capacity(window);
  let mut next_candidate = from.checked_add(1);
  loop {
    while in_flight.len() < window {
      let Some(candidate) = next_candidate else {
        break;
      };
      next_candidate = candidate.checked_add(1);
      let search = Arc::clone(scheduler);
      let submitted = scheduler.submit(
        Task::try_call(move |_: &CancellationToken| is_prime(&search, candidate, parallelism)),
        TaskPriority::Low,
      );
      match submitted {
        Ok(future) => in_flight.push_back((candidate, future)),
        Err(e) => {
          cancel_candidates(&in_flight);
          return Err(e);
        }
      }
    }

    let Some((candidate, future)) = in_flight.pop_front() else {
      return Err(SchedulerError::IllegalState("no prime fits in u64"));
    };
    match future.get() {
      Ok(true) => {
        cancel_candidates(&in_flight);
        info!(from, prime = candidate, "Found the next prime.");
        return Ok(candidate);
      }
      Ok(false) => {}
      Err(e) => {
        cancel_candidates(&in_flight);
        return Err(e);
      }
    }
  }
}

fn cancel_candidates(in_flight: &VecDeque<(u64, ListenableFuture<bool>)>) {
  for (_, future) in in_flight {
    future.cancel();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_scan_for_factor_skips_even_candidates() {
    let token = CancellationToken::new();
    assert_eq!(scan_for_factor(91, Partition::new(0, 0..91), &token), Some(7));
    assert_eq!(scan_for_factor(91, Partition::new(1, 8..91), &token), Some(13));
    assert_eq!(scan_for_factor(97, Partition::new(0, 3..97), &token), None);
  }

  #[test]
  fn test_scan_for_factor_honors_cancelled_token() {
    let token = CancellationToken::new();
    token.cancel();
    assert_eq!(scan_for_factor(91, Partition::new(0, 3..91), &token), None);
  }
}
