use priority_orchestra::prime::{find_factor, is_prime, next_prime, scan_for_factor};
use priority_orchestra::{PriorityScheduler, RaceToFirstSearch, SchedulerConfig, SchedulerError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,priority_orchestra=debug"));

    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

fn search_pool(pool_name: &str) -> PriorityScheduler {
  let scheduler = PriorityScheduler::new(SchedulerConfig::new(4, 4).with_pool_name(pool_name));
  scheduler.prestart_all_threads();
  scheduler
}

// Decrements the in-flight counter however the partition body exits.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
  fn enter(counter: &Arc<AtomicUsize>) -> Self {
    counter.fetch_add(1, Ordering::SeqCst);
    Self(counter.clone())
  }
}

impl Drop for InFlight {
  fn drop(&mut self) {
    self.0.fetch_sub(1, Ordering::SeqCst);
  }
}

#[test]
fn test_first_factor_wins_and_losers_stop() {
  setup_tracing_for_test();
  let scheduler = search_pool("race_factor_91");
  let in_flight = Arc::new(AtomicUsize::new(0));
  let started = Arc::new(AtomicUsize::new(0));

  let in_flight_clone = in_flight.clone();
  let started_clone = started.clone();
  let result = RaceToFirstSearch::new(&scheduler)
    .run(3..100, 4, move |partition, token| {
      let _guard = InFlight::enter(&in_flight_clone);
      started_clone.fetch_add(1, Ordering::SeqCst);
      for candidate in partition.range() {
        if token.is_cancelled() {
          return Ok(None);
        }
        // 91 itself lies in the domain but is not a proper factor.
        if candidate < 91 && 91 % candidate == 0 {
          return Ok(Some(candidate));
        }
        thread::sleep(Duration::from_millis(1));
      }
      Ok(None)
    })
    .unwrap();

  let factor = result.expect("91 has factors in [3, 100)");
  assert!(factor == 7 || factor == 13, "unexpected factor {}", factor);

  // Losing partitions observe cancellation within a short grace period.
  thread::sleep(Duration::from_millis(100));
  assert_eq!(in_flight.load(Ordering::SeqCst), 0);
  assert_eq!(scheduler.active_task_count(), 0);
  assert!(started.load(Ordering::SeqCst) <= 4);
}

#[test]
fn test_no_partition_finds_anything() {
  setup_tracing_for_test();
  let scheduler = search_pool("race_prime_97");
  let partitions_seen = Arc::new(Mutex::new(Vec::new()));

  let seen = partitions_seen.clone();
  let result = RaceToFirstSearch::new(&scheduler)
    .run(3..97, 4, move |partition, token| {
      seen.lock().unwrap().push(partition.index);
      Ok(scan_for_factor(97, partition, token))
    })
    .unwrap();
  assert_eq!(result, None);

  let mut seen = partitions_seen.lock().unwrap().clone();
  seen.sort_unstable();
  assert_eq!(seen, vec![0, 1, 2, 3]);
}

#[test]
fn test_small_domain_runs_inline_on_calling_thread() {
  setup_tracing_for_test();
  let scheduler = search_pool("race_inline");
  let caller = thread::current().id();
  let ran_on = Arc::new(Mutex::new(None));

  let ran_on_clone = ran_on.clone();
  let result = RaceToFirstSearch::new(&scheduler)
    .run(3..20, 4, move |partition, _| {
      *ran_on_clone.lock().unwrap() = Some(thread::current().id());
      assert_eq!(partition.index, 0);
      Ok(partition.range().find(|candidate| 15 % candidate == 0))
    })
    .unwrap();

  assert_eq!(result, Some(3));
  assert_eq!(*ran_on.lock().unwrap(), Some(caller));
}

#[test]
fn test_partition_error_is_surfaced_and_others_cancelled() {
  setup_tracing_for_test();
  let scheduler = search_pool("race_error");
  let in_flight = Arc::new(AtomicUsize::new(0));

  let in_flight_clone = in_flight.clone();
  let result: Result<Option<u64>, SchedulerError> = RaceToFirstSearch::new(&scheduler).run(0..4_000, 4, move |partition, token| {
    let _guard = InFlight::enter(&in_flight_clone);
    if partition.index == 2 {
      return Err(format!("partition {} could not be tested", partition.index).into());
    }
    for _ in partition.range() {
      if token.is_cancelled() {
        return Ok(None);
      }
      thread::sleep(Duration::from_millis(1));
    }
    Ok(None)
  });

  match result {
    Err(SchedulerError::Execution { cause }) => assert_eq!(cause.to_string(), "partition 2 could not be tested"),
    other => panic!("Expected Execution error, got {:?}", other),
  }
  thread::sleep(Duration::from_millis(100));
  assert_eq!(in_flight.load(Ordering::SeqCst), 0);
}

#[test]
fn test_find_factor_and_is_prime() {
  setup_tracing_for_test();
  let scheduler = search_pool("race_primes");

  assert_eq!(find_factor(&scheduler, 2, 4).unwrap(), None);
  assert_eq!(find_factor(&scheduler, 3, 4).unwrap(), None);
  assert_eq!(find_factor(&scheduler, 1_000_000, 4).unwrap(), Some(2));
  assert_eq!(find_factor(&scheduler, 97, 4).unwrap(), None);

  let factor = find_factor(&scheduler, 10_007 * 10_009, 4).unwrap();
  assert!(matches!(factor, Some(10_007) | Some(10_009)), "unexpected factor {:?}", factor);

  assert!(!is_prime(&scheduler, 0, 4).unwrap());
  assert!(!is_prime(&scheduler, 1, 4).unwrap());
  assert!(is_prime(&scheduler, 2, 4).unwrap());
  assert!(is_prime(&scheduler, 7_919, 4).unwrap());
  assert!(!is_prime(&scheduler, 91, 4).unwrap());
}

#[test]
fn test_inline_panic_is_captured_as_execution_error() {
  setup_tracing_for_test();
  let scheduler = search_pool("race_inline_panic");

  let result: Result<Option<u64>, SchedulerError> =
    RaceToFirstSearch::new(&scheduler).run(0..8, 4, |_, _| panic!("inline search exploded"));
  match result {
    Err(SchedulerError::Execution { cause }) => {
      assert!(cause.is_panic());
      assert!(cause.to_string().contains("inline search exploded"));
    }
    other => panic!("Expected Execution error, got {:?}", other),
  }
}

#[test]
fn test_next_prime_consumes_candidates_in_order() {
  setup_tracing_for_test();
  let scheduler = Arc::new(search_pool("race_next_prime"));

  assert_eq!(next_prime(&scheduler, 90, 2).unwrap(), 97);
  assert_eq!(next_prime(&scheduler, 0, 2).unwrap(), 2);
  assert_eq!(next_prime(&scheduler, 2, 2).unwrap(), 3);
  assert_eq!(next_prime(&scheduler, 7_919, 2).unwrap(), 7_927);
  assert_eq!(next_prime(&scheduler, 1_000_000, 4).unwrap(), 1_000_003);

  // Candidates still queued when the answer arrives are cancelled and purged.
  let deadline = Instant::now() + Duration::from_secs(5);
  while scheduler.queued_task_count() > 0 && Instant::now() < deadline {
    thread::sleep(Duration::from_millis(5));
  }
  assert_eq!(scheduler.queued_task_count(), 0);
}

#[test]
fn test_next_prime_on_single_worker_pool() {
  setup_tracing_for_test();
  let scheduler = Arc::new(PriorityScheduler::new(
    SchedulerConfig::new(1, 1).with_pool_name("race_next_prime_single"),
  ));

  assert_eq!(next_prime(&scheduler, 13, 2).unwrap(), 17);
  // Large enough that each candidate's search is partitioned onto the worker.
  assert_eq!(next_prime(&scheduler, 10_007, 2).unwrap(), 10_009);
}
