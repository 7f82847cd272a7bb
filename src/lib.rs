//! A thread-backed priority scheduler with listenable futures, plus two
//! coordination patterns built on it: race-to-first search and partitioned
//! aggregation.

mod aggregate;
mod completion;
mod config;
mod error;
mod future;
mod handle;
mod notifier;
mod partition;
pub mod prime;
mod race;
mod scheduler;
mod task;
mod task_queue;

pub use aggregate::PartitionedAggregator;
pub use completion::CompletionQueue;
pub use config::SchedulerConfig;
pub use error::{FailureCause, SchedulerError, TaskError};
pub use future::ListenableFuture;
pub use handle::{RecurringTaskHandle, Removable};
pub use notifier::{TaskCompletionInfo, TaskCompletionStatus};
pub use partition::Partition;
pub use race::{RaceToFirstSearch, DEFAULT_MIN_PARTITION_SIZE};
pub use scheduler::{Lifecycle, PriorityScheduler, ShutdownMode};
pub use task::{ActionFn, CallableFn, Task, TaskPriority};

pub use tokio_util::sync::CancellationToken;
