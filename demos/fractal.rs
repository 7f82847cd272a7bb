use priority_orchestra::{PartitionedAggregator, PriorityScheduler, SchedulerConfig, ShutdownMode};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

const WIDTH: usize = 78;
const HEIGHT: usize = 32;
const MAX_ITERATIONS: u32 = 200;

fn escape_time(cx: f64, cy: f64) -> u32 {
  let (mut x, mut y) = (0.0f64, 0.0f64);
  let mut iteration = 0;
  while iteration < MAX_ITERATIONS && x * x + y * y <= 4.0 {
    let next_x = x * x - y * y + cx;
    y = 2.0 * x * y + cy;
    x = next_x;
    iteration += 1;
  }
  iteration
}

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();

  let procs = num_cpus::get();
  let scheduler = PriorityScheduler::new(SchedulerConfig::new(procs * 2, procs * 2).with_pool_name("fractal"));

  let started = Instant::now();
  let rows_done = Arc::new(AtomicUsize::new(0));
  let progress = rows_done.clone();
  let rendered = PartitionedAggregator::new(&scheduler).run(WIDTH, HEIGHT, move |y, _| {
    let cy = -1.2 + 2.4 * y as f64 / HEIGHT as f64;
    let row: Vec<u32> = (0..WIDTH)
      .map(|x| escape_time(-2.2 + 3.2 * x as f64 / WIDTH as f64, cy))
      .collect();
    let done = progress.fetch_add(1, Ordering::Relaxed) + 1;
    info!("Row {} done, {}% complete", y, done * 100 / HEIGHT);
    Ok(row)
  });

  match rendered {
    Ok(image) => {
      info!(
        "Rendered {}x{} ({} rows) in {:?}",
        WIDTH,
        HEIGHT,
        rows_done.load(Ordering::Relaxed),
        started.elapsed()
      );
      let palette = [' ', '.', ':', '-', '=', '+', '*', '#', '%', '@'];
      for row in image.chunks(WIDTH) {
        let line: String = row
          .iter()
          .map(|&i| palette[(i as usize * (palette.len() - 1)) / MAX_ITERATIONS as usize])
          .collect();
        println!("{}", line);
      }
    }
    Err(e) => error!("Rendering failed: {}", e),
  }

  scheduler.shutdown(ShutdownMode::Graceful);
}
