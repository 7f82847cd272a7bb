use crate::task::TaskPriority;

use std::time::Duration;

/// Configuration for a [`PriorityScheduler`](crate::PriorityScheduler).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
  /// Prefix for worker thread names and the `pool_name` log field.
  pub pool_name: String,

  /// Workers kept alive while idle. Clamped to at least 1.
  pub core_pool_size: usize,

  /// Upper bound on worker threads. Clamped to at least `core_pool_size`.
  pub max_pool_size: usize,

  /// How long a worker above `core_pool_size` waits for work before exiting.
  pub keep_alive: Duration,

  /// Priority for work submitted without one (fixed-delay tasks).
  pub default_priority: TaskPriority,

  /// Ready tasks beyond the idle worker count that may wait before a
  /// submission grows the pool past `core_pool_size`.
  pub backlog_threshold: usize,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    let workers = num_cpus::get() * 2;
    Self {
      pool_name: "priority-scheduler".to_string(),
      core_pool_size: workers,
      max_pool_size: workers,
      keep_alive: Duration::from_millis(1000),
      default_priority: TaskPriority::High,
      backlog_threshold: 0,
    }
  }
}

impl SchedulerConfig {
  pub fn new(core_pool_size: usize, max_pool_size: usize) -> Self {
    Self {
      core_pool_size,
      max_pool_size,
      ..Self::default()
    }
  }

  pub fn with_pool_name(mut self, pool_name: impl Into<String>) -> Self {
    self.pool_name = pool_name.into();
    self
  }

  pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
    self.keep_alive = keep_alive;
    self
  }

  pub fn with_default_priority(mut self, priority: TaskPriority) -> Self {
    self.default_priority = priority;
    self
  }

  pub fn with_backlog_threshold(mut self, backlog_threshold: usize) -> Self {
    self.backlog_threshold = backlog_threshold;
    self
  }

  /// Applies the pool's size clamps.
  pub(crate) fn normalized(mut self) -> Self {
    self.core_pool_size = self.core_pool_size.max(1);
    self.max_pool_size = self.max_pool_size.max(self.core_pool_size);
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_normalized_clamps_pool_sizes() {
    let config = SchedulerConfig::new(0, 0).normalized();
    assert_eq!(config.core_pool_size, 1);
    assert_eq!(config.max_pool_size, 1);

    let config = SchedulerConfig::new(4, 2).normalized();
    assert_eq!(config.core_pool_size, 4);
    assert_eq!(config.max_pool_size, 4);
  }

  #[test]
  fn test_default_sizes_follow_cpu_count() {
    let config = SchedulerConfig::default();
    assert_eq!(config.core_pool_size, num_cpus::get() * 2);
    assert_eq!(config.keep_alive, Duration::from_millis(1000));
    assert_eq!(config.default_priority, TaskPriority::High);
  }
}
