use priority_orchestra::prime::next_prime;
use priority_orchestra::{PriorityScheduler, SchedulerConfig, ShutdownMode};
use std::process;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();

  let from: u64 = match std::env::args().nth(1).map(|arg| arg.parse()) {
    Some(Ok(from)) => from,
    Some(Err(e)) => {
      error!("Invalid start value: {}", e);
      process::exit(1);
    }
    None => 1_000_000_000,
  };

  let parallelism = num_cpus::get() * 2;
  // Room for the in-flight candidate tests plus the searches they fan out.
  let pool_size = parallelism * 3;
  let scheduler = Arc::new(PriorityScheduler::new(
    SchedulerConfig::new(pool_size, pool_size).with_pool_name("next_prime"),
  ));
  scheduler.prestart_all_threads();

  let started = Instant::now();
  match next_prime(&scheduler, from, parallelism) {
    Ok(prime) => info!("The next prime number after {} is: {} ({:?})", from, prime, started.elapsed()),
    Err(e) => error!("Search failed: {}", e),
  }

  scheduler.shutdown(ShutdownMode::DiscardPending);
  scheduler.await_termination(None);
}
