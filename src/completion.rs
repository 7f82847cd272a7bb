use crate::error::SchedulerError;
use crate::future::ListenableFuture;

use std::fmt;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::trace;

/// Hands back futures in the order they finish rather than the order they
/// were pushed.
pub struct CompletionQueue<T> {
  futures: Vec<ListenableFuture<T>>,
  done_tx: Sender<usize>,
  done_rx: Receiver<usize>,
  taken: usize,
}

impl<T> fmt::Debug for CompletionQueue<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CompletionQueue")
      .field("tracked", &self.futures.len())
      .field("taken", &self.taken)
      .finish()
  }
}

impl<T: Send + Sync + 'static> Default for CompletionQueue<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: Send + Sync + 'static> CompletionQueue<T> {
  pub fn new() -> Self {
    let (done_tx, done_rx) = crossbeam_channel::unbounded();
    Self {
      futures: Vec::new(),
      done_tx,
      done_rx,
      taken: 0,
    }
  }

  /// Starts tracking `future`. Returns its index in push order.
  pub fn push(&mut self, future: ListenableFuture<T>) -> usize {
    let index = self.futures.len();
    let done_tx = self.done_tx.clone();
    future.add_listener(move |_| {
      // The receiver lives as long as the queue; a send error means it was dropped.
      let _ = done_tx.send(index);
    });
    self.futures.push(future);
    index
  }

  /// Number of tracked futures not yet returned by `take`.
  pub fn outstanding(&self) -> usize {
    self.futures.len() - self.taken
  }

  /// Blocks for the next future to finish. Returns `None` once every tracked
  /// future has been taken.
  pub fn take(&mut self) -> Option<(usize, ListenableFuture<T>)> {
    if self.outstanding() == 0 {
      return None;
    }
    let index = self.done_rx.recv().ok()?;
    self.taken += 1;
    trace!(index, outstanding = self.outstanding(), "Completion queue yielded a finished future.");
    Some((index, self.futures[index].clone()))
  }

  /// Like [`take`](Self::take) but gives up after `timeout`.
  ///
  /// # Errors
  /// Returns `SchedulerError::Timeout` if nothing finished in time.
  pub fn take_timeout(&mut self, timeout: Duration) -> Result<Option<(usize, ListenableFuture<T>)>, SchedulerError> {
    if self.outstanding() == 0 {
      return Ok(None);
    }
    match self.done_rx.recv_timeout(timeout) {
      Ok(index) => {
        self.taken += 1;
        Ok(Some((index, self.futures[index].clone())))
      }
      Err(RecvTimeoutError::Timeout) => Err(SchedulerError::Timeout(timeout)),
      Err(RecvTimeoutError::Disconnected) => Ok(None),
    }
  }

  /// Cancels every tracked future that is not terminal yet. Returns how many
  /// accepted the request.
  pub fn cancel_remaining(&self) -> usize {
    self
      .futures
      .iter()
      .filter(|f| !f.is_done())
      .filter(|f| f.cancel())
      .count()
  }
}
