use priority_orchestra::prime::find_factor;
use priority_orchestra::{PriorityScheduler, SchedulerConfig, ShutdownMode, Task, TaskPriority};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

fn test_number(scheduler: &PriorityScheduler, parallelism: usize, n: u64) {
  let started = Instant::now();
  match find_factor(scheduler, n, parallelism) {
    Ok(Some(factor)) => info!("{} is divisible by {} (found in {:?})", n, factor, started.elapsed()),
    Ok(None) if n < 2 => info!("{} is neither prime nor composite", n),
    Ok(None) => info!("{} is prime! (checked in {:?})", n, started.elapsed()),
    Err(e) => error!("Testing {} failed: {}", n, e),
  }
}

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();

  let numbers: Vec<u64> = std::env::args()
    .skip(1)
    .filter_map(|arg| match arg.parse() {
      Ok(n) => Some(n),
      Err(e) => {
        error!("Skipping '{}': {}", arg, e);
        None
      }
    })
    .collect();
  let numbers = if numbers.is_empty() {
    vec![91, 97, 7_919, 10_007 * 10_009, 2_147_483_647]
  } else {
    numbers
  };

  // One extra worker per number tested off the main thread.
  let parallelism = num_cpus::get() * 2;
  let pool_size = parallelism + numbers.len() - 1;
  let scheduler = Arc::new(PriorityScheduler::new(
    SchedulerConfig::new(pool_size, pool_size).with_pool_name("prime_tester"),
  ));
  scheduler.prestart_all_threads();
  info!("Testing {} numbers with {} partitions each.", numbers.len(), parallelism);

  let Some((last, rest)) = numbers.split_last() else {
    return;
  };
  let mut futures = Vec::with_capacity(rest.len());
  for &n in rest {
    let search = scheduler.clone();
    match scheduler.submit(Task::action(move |_| test_number(&search, parallelism, n)), TaskPriority::Low) {
      Ok(future) => futures.push(future),
      Err(e) => error!("Could not submit {}: {}", n, e),
    }
  }

  // The last number is always tested on the main thread.
  test_number(&scheduler, parallelism, *last);

  for future in futures {
    if let Err(e) = future.get() {
      error!("Prime test task failed: {}", e);
    }
  }

  scheduler.shutdown(ShutdownMode::Graceful);
  scheduler.await_termination(None);
  info!("Prime tester finished.");
}
