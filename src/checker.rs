use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::cgroup::read_cpu_usage;
use crate::error::RunError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Poll cgroup CPU usage and the wall clock until a budget is exhausted or
/// the cancel flag flips. Returns the first observed violation; `None`
/// means the tracer finished first and nothing was wrong.
///
/// Transient `cpu.stat` read errors are warned and skipped, never fatal:
/// the group may be mid-teardown when we look.
pub fn run(
  stat_path: &Path,
  start: Instant,
  cpu_limit: Duration,
  real_time_limit: Duration,
  cancel: &AtomicBool,
) -> Option<RunError> {
  info!(
    "Limit checker started (cpu {:?}, wall {:?})",
    cpu_limit, real_time_limit
  );

  loop {
    thread::sleep(POLL_INTERVAL);

    if cancel.load(Ordering::Relaxed) {
      info!("Limit checker cancelled");
      return None;
    }

    match read_cpu_usage(stat_path) {
      Ok(used) => {
        if used > cpu_limit {
          warn!("Cgroup CPU time {:?} exceeds limit {:?}", used, cpu_limit);
          return Some(RunError::CgroupLimitExceeded);
        }
      }
      Err(err) => {
        warn!("Limit checker read fails: {}", err);
        continue;
      }
    }

    let elapsed = start.elapsed();
    if elapsed > real_time_limit {
      warn!("Wall clock {:?} exceeds limit {:?}", elapsed, real_time_limit);
      return Some(RunError::RealTimeTimeout);
    }
  }
}
