use priority_orchestra::{PriorityScheduler, SchedulerConfig, ShutdownMode, TaskPriority};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  let scheduler = PriorityScheduler::new(
    SchedulerConfig::new(2, 2)
      .with_pool_name("fixed_delay_pool")
      .with_default_priority(TaskPriority::Low),
  );

  let mut last_run = Instant::now();
  let fast = scheduler
    .schedule_with_fixed_delay(
      move |_| {
        let now = Instant::now();
        info!("Fast task: {:?} since last run", now - last_run);
        last_run = now;
      },
      Duration::ZERO,
      Duration::from_millis(250),
    )
    .expect("scheduler is running");

  let mut last_run = Instant::now();
  let slow = scheduler
    .schedule_with_fixed_delay(
      move |_| {
        let now = Instant::now();
        info!("Slow task: {:?} since last run, working for 300ms", now - last_run);
        thread::sleep(Duration::from_millis(300));
        last_run = Instant::now();
      },
      Duration::from_millis(100),
      Duration::from_millis(500),
    )
    .expect("scheduler is running");

  thread::sleep(Duration::from_secs(2));
  info!("Stopping the fast task after {} runs.", fast.execution_count());
  scheduler.remove(&fast);

  thread::sleep(Duration::from_secs(1));
  info!("Slow task ran {} times. Shutting down.", slow.execution_count());
  scheduler.shutdown(ShutdownMode::Graceful);
  scheduler.await_termination(Some(Duration::from_secs(5)));
  info!("Fixed delay example finished.");
}
